use std::{sync::Arc, time::Duration};

use chrono::NaiveDate;
use hnpulse_core::{
    AdmissionError, Clock, DailySchedule, EventLevel, JobRequest,
    RefreshEvent, ScheduleCursor, TickDecision,
};
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::job_runner::{JobRunner, JobTicket};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerTick {
    OutsideWindow,
    AlreadyRan(NaiveDate),
    Triggered(JobTicket),
    /// The day's run was claimed but admission refused it. Not retried.
    Skipped { date: NaiveDate, reason: AdmissionError },
}

/// Fires the daily refresh once per calendar day inside the trigger window.
#[derive(Debug)]
pub struct DailyScheduler {
    runner: Arc<JobRunner>,
    schedule: DailySchedule,
    cursor: ScheduleCursor,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl DailyScheduler {
    pub fn new(
        runner: Arc<JobRunner>,
        schedule: DailySchedule,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            runner,
            schedule,
            cursor: ScheduleCursor::new(),
            clock,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(10));
        self
    }

    pub fn last_run_date(&self) -> Option<NaiveDate> {
        self.cursor.last_run_date()
    }

    #[instrument(skip(self), fields(schedule = %self.schedule))]
    pub fn tick(&self) -> SchedulerTick {
        let date = match self.schedule.evaluate(&self.cursor, &*self.clock) {
            TickDecision::OutsideWindow => return SchedulerTick::OutsideWindow,
            TickDecision::AlreadyRan(date) => {
                debug!(%date, "scheduled refresh already ran today");
                return SchedulerTick::AlreadyRan(date);
            }
            TickDecision::Fire(date) => date,
        };

        match self.runner.trigger(JobRequest::scheduled()) {
            Ok(ticket) => {
                info!(%date, run_id = %ticket.run_id, "scheduled refresh started");
                SchedulerTick::Triggered(ticket)
            }
            Err(reason) => {
                warn!(%date, reason = reason.code(), "scheduled refresh skipped: {reason}");
                self.runner.hub().publish(
                    RefreshEvent::log(
                        EventLevel::Warning,
                        format!("Scheduled refresh skipped: {reason}"),
                    )
                    .with_field("date", date.to_string())
                    .with_field("reason", reason.code()),
                );
                SchedulerTick::Skipped { date, reason }
            }
        }
    }

    /// Polls until `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                schedule = %self.schedule,
                poll_secs = self.poll_interval.as_secs(),
                "daily scheduler started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                self.tick();
            }

            info!("daily scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::refresh::EventHub;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use hnpulse_core::{
        EventKind, InMemoryCompletionLog, JobError, JobOutcome, ManualClock,
        ProgressSink, RefreshGuard, RefreshJob, RefreshPolicy,
        ScheduleTimezone, TriggerOrigin, schedule::parse_time_of_day,
    };
    use tokio::sync::Notify;

    #[derive(Debug, Default)]
    struct GatedJob {
        gate: Notify,
    }

    #[async_trait]
    impl RefreshJob for GatedJob {
        async fn run(
            &self,
            _request: JobRequest,
            _progress: ProgressSink,
        ) -> Result<JobOutcome, JobError> {
            self.gate.notified().await;
            Ok(JobOutcome::new("Refresh complete"))
        }
    }

    struct Fixture {
        scheduler: DailyScheduler,
        runner: Arc<JobRunner>,
        clock: Arc<ManualClock>,
        job: Arc<GatedJob>,
    }

    fn fixture(hour: u32, minute: u32) -> Fixture {
        let clock = Arc::new(ManualClock::utc(
            Utc.with_ymd_and_hms(2026, 5, 4, hour, minute, 0).unwrap(),
        ));
        let guard = Arc::new(RefreshGuard::new(
            Arc::new(InMemoryCompletionLog::new()),
            clock.clone(),
            RefreshPolicy::default(),
        ));
        let job = Arc::new(GatedJob::default());
        let runner = Arc::new(JobRunner::new(
            guard,
            Arc::new(EventHub::default()),
            job.clone(),
        ));
        let schedule = DailySchedule::new(
            parse_time_of_day("06:00").unwrap(),
            Duration::from_secs(5 * 60),
            "UTC".parse::<ScheduleTimezone>().unwrap(),
        );
        Fixture {
            scheduler: DailyScheduler::new(runner.clone(), schedule, clock.clone()),
            runner,
            clock,
            job,
        }
    }

    #[tokio::test]
    async fn fires_once_per_day_inside_the_window() {
        let f = fixture(6, 2);
        let today = NaiveDate::from_ymd_opt(2026, 5, 4).unwrap();

        match f.scheduler.tick() {
            SchedulerTick::Triggered(ticket) => {
                assert_eq!(ticket.origin, TriggerOrigin::Scheduled)
            }
            other => panic!("expected a scheduled run, got {other:?}"),
        }
        f.job.gate.notify_one();
        f.runner.wait_idle().await;

        f.clock.advance(ChronoDuration::minutes(2));
        assert_eq!(f.scheduler.tick(), SchedulerTick::AlreadyRan(today));

        f.clock.advance(ChronoDuration::minutes(2));
        assert_eq!(f.scheduler.tick(), SchedulerTick::OutsideWindow);
        assert_eq!(f.scheduler.last_run_date(), Some(today));
    }

    #[tokio::test]
    async fn busy_slot_skips_the_day_without_retry() {
        let f = fixture(6, 1);
        let today = NaiveDate::from_ymd_opt(2026, 5, 4).unwrap();
        f.runner.trigger(JobRequest::manual()).unwrap();

        assert_eq!(
            f.scheduler.tick(),
            SchedulerTick::Skipped {
                date: today,
                reason: AdmissionError::AlreadyInProgress,
            }
        );
        let skipped = f.runner.hub().history(10);
        let notice = skipped.last().unwrap();
        assert_eq!(notice.event.kind, EventKind::Log);
        assert_eq!(notice.event.level, EventLevel::Warning);

        f.job.gate.notify_one();
        f.runner.wait_idle().await;

        f.clock.advance(ChronoDuration::minutes(1));
        assert_eq!(f.scheduler.tick(), SchedulerTick::AlreadyRan(today));
    }

    #[tokio::test]
    async fn outside_window_does_nothing() {
        let f = fixture(5, 59);
        assert_eq!(f.scheduler.tick(), SchedulerTick::OutsideWindow);
        assert!(f.runner.hub().history(10).is_empty());
        assert_eq!(f.scheduler.last_run_date(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_loop_stops_on_cancel() {
        let f = fixture(12, 0);
        let scheduler =
            Arc::new(f.scheduler.with_poll_interval(Duration::from_secs(1)));
        let shutdown = CancellationToken::new();
        let handle = Arc::clone(&scheduler).spawn(shutdown.clone());

        time::sleep(Duration::from_secs(3)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(scheduler.last_run_date(), None);
    }
}
