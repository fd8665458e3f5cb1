use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum_test::TestServer;
use chrono::{DateTime, TimeZone, Utc};
use hnpulse_core::{
    Clock, InMemoryCompletionLog, JobError, JobOutcome, JobRequest,
    ManualClock, ProgressSink, RefreshJob,
};
use hnpulse_server::{AppState, infra::config::Config, routes::create_app};
use tempfile::TempDir;
use tokio::sync::Notify;

/// Stands in for the pipeline: narrates its steps, optionally waits on a
/// gate, and records a completion on success the way the real artifacts do.
#[derive(Debug)]
pub struct FakePipeline {
    pub steps: Vec<String>,
    pub fail_with: Option<String>,
    pub gate: Option<Notify>,
    completions: Arc<InMemoryCompletionLog>,
    clock: Arc<ManualClock>,
}

#[async_trait]
impl RefreshJob for FakePipeline {
    async fn run(
        &self,
        request: JobRequest,
        progress: ProgressSink,
    ) -> Result<JobOutcome, JobError> {
        for step in &self.steps {
            progress.info(step.clone());
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(reason) = &self.fail_with {
            return Err(JobError::failed(reason.clone()));
        }
        self.completions
            .record_at(&request.scope, self.clock.now_utc());
        Ok(JobOutcome::new("Refresh complete").with_detail("stories", 30))
    }
}

// Code is used by test modules, but not in this scope
#[allow(unused)]
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub completions: Arc<InMemoryCompletionLog>,
    pub clock: Arc<ManualClock>,
    pub job: Arc<FakePipeline>,
    _tempdir: TempDir,
}

#[allow(unused)]
impl TestApp {
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder::default()
    }

    /// Lets a gated run finish.
    pub fn open_gate(&self) {
        if let Some(gate) = &self.job.gate {
            gate.notify_one();
        }
    }

    pub async fn wait_idle(&self) {
        self.state.runner.wait_idle().await;
    }
}

#[allow(unused)]
#[derive(Debug, Default)]
pub struct TestAppBuilder {
    steps: Vec<String>,
    fail_with: Option<String>,
    gated: bool,
    now: Option<DateTime<Utc>>,
}

#[allow(unused)]
impl TestAppBuilder {
    pub fn steps(mut self, steps: &[&str]) -> Self {
        self.steps = steps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.fail_with = Some(reason.to_string());
        self
    }

    pub fn gated(mut self) -> Self {
        self.gated = true;
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    pub fn build(self) -> Result<TestApp> {
        let tempdir = tempfile::tempdir()?;
        let now = self.now.unwrap_or_else(|| {
            Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0)
                .single()
                .unwrap_or_else(Utc::now)
        });
        let clock = Arc::new(ManualClock::utc(now));
        let completions = Arc::new(InMemoryCompletionLog::new());
        let job = Arc::new(FakePipeline {
            steps: self.steps,
            fail_with: self.fail_with,
            gate: self.gated.then(Notify::new),
            completions: Arc::clone(&completions),
            clock: Arc::clone(&clock),
        });

        let mut config = Config::default();
        config.storage.summaries_dir = tempdir.path().to_path_buf();
        config.schedule.enabled = false;

        let state = AppState::new(
            config,
            completions.clone(),
            job.clone(),
            clock.clone(),
        );
        let server = TestServer::new(create_app(state.clone()))?;

        Ok(TestApp {
            server,
            state,
            completions,
            clock,
            job,
            _tempdir: tempdir,
        })
    }
}
