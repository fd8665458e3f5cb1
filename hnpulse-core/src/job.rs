//! The opaque "run the refresh" contract.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::{
    error::JobError,
    events::{EventLevel, RefreshEvent},
    refresh::{ItemId, RefreshScope},
};

/// Who asked for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOrigin {
    Manual,
    Scheduled,
    Adhoc,
}

impl fmt::Display for TriggerOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerOrigin::Manual => "manual",
            TriggerOrigin::Scheduled => "scheduled",
            TriggerOrigin::Adhoc => "adhoc",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub scope: RefreshScope,
    pub origin: TriggerOrigin,
    /// Article URL for ad-hoc runs when the caller supplied one.
    pub url: Option<String>,
}

impl JobRequest {
    pub fn manual() -> Self {
        Self {
            scope: RefreshScope::Daily,
            origin: TriggerOrigin::Manual,
            url: None,
        }
    }

    pub fn scheduled() -> Self {
        Self {
            scope: RefreshScope::Daily,
            origin: TriggerOrigin::Scheduled,
            url: None,
        }
    }

    pub fn adhoc(item_id: ItemId, url: Option<String>) -> Self {
        Self {
            scope: RefreshScope::Item(item_id),
            origin: TriggerOrigin::Adhoc,
            url,
        }
    }
}

/// Successful result of a run. `details` is merged into the `done` event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutcome {
    pub message: String,
    pub details: Map<String, Value>,
}

impl JobOutcome {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Channel through which a job reports progress to the runner.
///
/// Sends never block. Once the runner stops listening, further progress is
/// silently discarded.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::UnboundedSender<RefreshEvent>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RefreshEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: RefreshEvent) {
        let _ = self.tx.send(event);
    }

    pub fn log(&self, level: EventLevel, message: impl Into<String>) {
        self.emit(RefreshEvent::log(level, message));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(EventLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(EventLevel::Warning, message);
    }

    /// Marks a named pipeline stage boundary.
    pub fn stage(&self, stage: &str, message: impl Into<String>) {
        self.emit(RefreshEvent::info(message).with_field("stage", stage));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// One invocation of the external pipeline.
///
/// A run must not assume it is the only user of the progress sink's
/// receiver: events are forwarded in the order they are sent.
#[async_trait]
pub trait RefreshJob: Send + Sync + fmt::Debug {
    async fn run(
        &self,
        request: JobRequest,
        progress: ProgressSink,
    ) -> Result<JobOutcome, JobError>;
}
