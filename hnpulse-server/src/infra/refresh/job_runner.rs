use std::{any::Any, fmt, sync::Arc, time::Instant};

use chrono::{DateTime, Utc};
use hnpulse_core::{
    AdmissionError, JobError, JobOutcome, JobRequest, ProgressSink,
    QuotaSnapshot, RefreshEvent, RefreshGuard, RefreshJob, RefreshPermit,
    RefreshScope, TriggerOrigin,
};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::event_hub::EventHub;

/// Handle returned to the caller as soon as a run is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobTicket {
    pub run_id: Uuid,
    pub scope: RefreshScope,
    pub origin: TriggerOrigin,
    pub started_at: DateTime<Utc>,
    /// Ad-hoc quota when the run was granted, not counting this run.
    pub adhoc_quota: Option<QuotaSnapshot>,
}

/// Launches guarded runs of the external job and narrates them into the
/// event hub.
///
/// Every accepted run publishes a `status` start event (before `trigger`
/// returns), the job's own progress in order, and exactly one terminal
/// event. The terminal event is
/// published before the refresh slot is released.
pub struct JobRunner {
    guard: Arc<RefreshGuard>,
    hub: Arc<EventHub>,
    job: Arc<dyn RefreshJob>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    current: Mutex<Option<JobTicket>>,
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("job", &self.job)
            .field("current", &*self.current.lock())
            .finish_non_exhaustive()
    }
}

impl JobRunner {
    pub fn new(
        guard: Arc<RefreshGuard>,
        hub: Arc<EventHub>,
        job: Arc<dyn RefreshJob>,
    ) -> Self {
        Self {
            guard,
            hub,
            job,
            supervisor: Mutex::new(None),
            current: Mutex::new(None),
        }
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Ticket of the run in flight, if any.
    pub fn current(&self) -> Option<JobTicket> {
        self.current.lock().clone()
    }

    #[instrument(
        skip(self, request),
        fields(scope = %request.scope, origin = %request.origin)
    )]
    pub fn trigger(
        self: &Arc<Self>,
        request: JobRequest,
    ) -> Result<JobTicket, AdmissionError> {
        let permit = match self.guard.try_acquire(&request.scope) {
            Ok(permit) => permit,
            Err(denied) => {
                info!(reason = denied.code(), "refresh denied: {denied}");
                return Err(denied);
            }
        };

        let ticket = JobTicket {
            run_id: Uuid::now_v7(),
            scope: request.scope.clone(),
            origin: request.origin,
            started_at: Utc::now(),
            adhoc_quota: permit.quota(),
        };
        info!(run_id = %ticket.run_id, "refresh accepted");

        // Published before the ticket is returned so a stream opened right
        // after acceptance replays this lifecycle, not the previous one.
        self.hub.publish(
            RefreshEvent::status(true, start_message(&request))
                .with_field("run_id", ticket.run_id.to_string())
                .with_field("origin", request.origin.to_string())
                .with_field("scope", request.scope.to_string()),
        );

        // Held across spawn so a fast run cannot be overwritten by its
        // successor's handle.
        let mut supervisor = self.supervisor.lock();
        *self.current.lock() = Some(ticket.clone());
        let runner = Arc::clone(self);
        let handle = tokio::spawn(runner.supervise(
            ticket.clone(),
            request,
            permit,
        ));
        *supervisor = Some(handle);

        Ok(ticket)
    }

    /// Waits for the supervised run, if one was started, to finish.
    pub async fn wait_idle(&self) {
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            error!(error = %err, "refresh supervisor task failed");
        }
    }

    async fn supervise(
        self: Arc<Self>,
        ticket: JobTicket,
        request: JobRequest,
        permit: RefreshPermit,
    ) {
        let started = Instant::now();
        let run_id = ticket.run_id.to_string();

        let (sink, mut progress) = ProgressSink::channel();
        let job = Arc::clone(&self.job);
        let mut job_task =
            tokio::spawn(async move { job.run(request, sink).await });

        let joined = loop {
            tokio::select! {
                biased;
                Some(event) = progress.recv() => {
                    self.hub.publish(event);
                }
                joined = &mut job_task => break joined,
            }
        };
        progress.close();
        while let Ok(event) = progress.try_recv() {
            self.hub.publish(event);
        }

        let elapsed_ms =
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let terminal = match flatten_join(joined) {
            Ok(outcome) => {
                info!(run_id = %run_id, elapsed_ms, "refresh finished");
                done_event(outcome)
            }
            Err(err) => {
                warn!(
                    run_id = %run_id,
                    elapsed_ms,
                    error = %err,
                    "refresh failed"
                );
                RefreshEvent::error(format!("Refresh failed: {err}"))
            }
        };
        self.hub.publish(
            terminal
                .with_field("run_id", run_id)
                .with_field("duration_ms", elapsed_ms),
        );

        self.current.lock().take();
        permit.release();
    }
}

fn start_message(request: &JobRequest) -> String {
    match (&request.scope, request.origin) {
        (RefreshScope::Item(id), _) => format!("Summarizing article {id}"),
        (RefreshScope::Daily, TriggerOrigin::Scheduled) => {
            "Scheduled refresh started".to_string()
        }
        (RefreshScope::Daily, _) => "Refresh started".to_string(),
    }
}

fn done_event(outcome: JobOutcome) -> RefreshEvent {
    let message = if outcome.message.is_empty() {
        "Refresh complete".to_string()
    } else {
        outcome.message
    };
    outcome
        .details
        .into_iter()
        .fold(RefreshEvent::done(message), |event, (key, value)| {
            event.with_field(key, value)
        })
}

fn flatten_join(
    joined: Result<Result<JobOutcome, JobError>, JoinError>,
) -> Result<JobOutcome, JobError> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            Err(JobError::Panicked(panic_message(err.into_panic())))
        }
        Err(_) => Err(JobError::failed("job task was cancelled")),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
