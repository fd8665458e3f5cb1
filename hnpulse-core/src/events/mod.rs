//! Progress events published while a refresh runs.
//!
//! Events are immutable once published. `done` and `error` are the only
//! terminal kinds; every stream ends after forwarding one of them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    Log,
    Done,
    Error,
}

impl EventKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::Done | EventKind::Error)
    }

    /// SSE `event:` name. `error` is renamed because browsers dispatch the
    /// literal `error` type as a transport failure on `EventSource`.
    pub fn sse_event_name(self) -> &'static str {
        match self {
            EventKind::Status => "status",
            EventKind::Log => "log",
            EventKind::Done => "done",
            EventKind::Error => "refresh_error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

const RESERVED_KEYS: [&str; 3] = ["type", "level", "message"];

/// A single progress notification, serialized as
/// `{ "type": .., "level": .., "message": .., ...payload }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub level: EventLevel,
    pub message: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl RefreshEvent {
    pub fn new(
        kind: EventKind,
        level: EventLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            level,
            message: message.into(),
            payload: Map::new(),
        }
    }

    pub fn status(in_progress: bool, message: impl Into<String>) -> Self {
        Self::new(EventKind::Status, EventLevel::Info, message)
            .with_field("in_progress", in_progress)
    }

    pub fn log(level: EventLevel, message: impl Into<String>) -> Self {
        Self::new(EventKind::Log, level, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::log(EventLevel::Info, message)
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self::new(EventKind::Done, EventLevel::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventKind::Error, EventLevel::Error, message)
    }

    /// Attaches a payload field. Keys that would collide with the envelope
    /// (`type`, `level`, `message`) are ignored.
    pub fn with_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        let key = key.into();
        if !RESERVED_KEYS.contains(&key.as_str()) {
            self.payload.insert(key, value.into());
        }
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_payload_flat_beside_envelope() {
        let event = RefreshEvent::info("Scraping top stories")
            .with_field("stage", "scrape")
            .with_field("type", "ignored");

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "log",
                "level": "info",
                "message": "Scraping top stories",
                "stage": "scrape",
            })
        );
    }

    #[test]
    fn only_done_and_error_are_terminal() {
        assert!(EventKind::Done.is_terminal());
        assert!(EventKind::Error.is_terminal());
        assert!(!EventKind::Log.is_terminal());
        assert!(!EventKind::Status.is_terminal());
        assert_eq!(EventKind::Error.sse_event_name(), "refresh_error");
    }
}
