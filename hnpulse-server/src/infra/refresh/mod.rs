//! Refresh orchestration: event fan-out, the supervised job runner, the
//! pipeline child process and the daily scheduler.

pub mod command_job;
pub mod event_hub;
pub mod job_runner;
pub mod scheduler;

pub use command_job::{CommandJob, PipelineCommand};
pub use event_hub::{EventFrame, EventHub, Recv, Subscription};
pub use job_runner::{JobRunner, JobTicket};
pub use scheduler::{DailyScheduler, SchedulerTick};
