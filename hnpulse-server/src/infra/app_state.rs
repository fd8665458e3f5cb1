use std::{fmt, sync::Arc};

use hnpulse_core::{Clock, CompletionLog, RefreshGuard, RefreshJob};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::infra::{
    config::Config,
    errors::{AppError, AppResult},
    refresh::{EventHub, JobRunner},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub guard: Arc<RefreshGuard>,
    pub hub: Arc<EventHub>,
    pub runner: Arc<JobRunner>,
    pub clock: Arc<dyn Clock>,
    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
    background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("in_progress", &self.guard.is_in_progress())
            .field("subscribers", &self.hub.subscriber_count())
            .field("background_tasks", &self.background_tasks())
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wires the guard, hub and runner around one job and completion log.
    pub fn new(
        config: Config,
        completions: Arc<dyn CompletionLog>,
        job: Arc<dyn RefreshJob>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let guard = Arc::new(RefreshGuard::new(
            completions,
            Arc::clone(&clock),
            config.refresh,
        ));
        let hub = Arc::new(EventHub::new(
            config.stream.history_capacity,
            config.stream.subscriber_capacity,
        ));
        let runner = Arc::new(JobRunner::new(
            Arc::clone(&guard),
            Arc::clone(&hub),
            job,
        ));

        Self {
            config: Arc::new(config),
            guard,
            hub,
            runner,
            clock,
            shutdown: CancellationToken::new(),
            background: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Runs `work` on the blocking pool. Admission decisions read the
    /// completion log from disk under the guard lock, so handlers go
    /// through here instead of calling the guard on a runtime worker.
    pub async fn run_blocking<T, F>(&self, work: F) -> AppResult<T>
    where
        F: FnOnce(&AppState) -> T + Send + 'static,
        T: Send + 'static,
    {
        let state = self.clone();
        tokio::task::spawn_blocking(move || work(&state))
            .await
            .map_err(|err| {
                error!(error = %err, "blocking admission task failed");
                AppError::internal("admission check failed")
            })
    }

    /// Keeps a long-lived task so shutdown can wait for it.
    pub fn track_background(&self, handle: JoinHandle<()>) {
        self.background.lock().push(handle);
    }

    pub fn background_tasks(&self) -> usize {
        self.background.lock().len()
    }

    /// Awaits every tracked task. Callers cancel `shutdown` first.
    pub async fn join_background(&self) {
        let handles = std::mem::take(&mut *self.background.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "background task failed");
            }
        }
    }
}
