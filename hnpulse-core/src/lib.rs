//! # hnpulse Core
//!
//! Core library for hnpulse, the control plane that lets many HTTP clients
//! observe and trigger a long-running Hacker News summary pipeline without
//! duplicating work or exceeding quotas.
//!
//! ## Overview
//!
//! `hnpulse-core` holds everything that does not need an HTTP runtime:
//!
//! - **Refresh admission**: the single-flight [`refresh::RefreshGuard`] with
//!   its global cooldown, per-item cooldown and ad-hoc daily quota
//! - **Event model**: the immutable [`events::RefreshEvent`] records fanned
//!   out to progress streams
//! - **Completion log**: the [`completions::CompletionLog`] collaborator that
//!   reports when the pipeline last produced a result
//! - **Jobs**: the opaque [`job::RefreshJob`] contract and its progress sink
//! - **Schedule**: daily trigger-window maths and the once-per-day cursor
//!
//! ## Architecture
//!
//! - [`api`]: route constants and JSON bodies shared with the server
//! - [`clock`]: wall-clock abstraction so cooldowns and schedules are testable
//! - [`completions`]: completion timestamps read from pipeline artifacts
//! - [`events`]: event kinds, levels and payloads
//! - [`job`]: job request, outcome, error and progress sink
//! - [`refresh`]: scopes, cooldown/quota policy and the guard itself
//! - [`schedule`]: the daily window and [`schedule::ScheduleCursor`]

pub mod api;
pub mod clock;
pub mod completions;
pub mod error;
pub mod events;
pub mod job;
pub mod refresh;
pub mod schedule;

pub use clock::{Clock, ManualClock, SystemClock};
pub use completions::{
    CompletionLog, FileCompletionLog, InMemoryCompletionLog,
};
pub use error::{AdmissionError, CompletionLogError, JobError};
pub use events::{EventKind, EventLevel, RefreshEvent};
pub use job::{JobOutcome, JobRequest, ProgressSink, RefreshJob, TriggerOrigin};
pub use refresh::{
    ItemId, QuotaSnapshot, RefreshGuard, RefreshPermit, RefreshPolicy,
    RefreshScope, ScopeFamily,
};
pub use schedule::{
    DailySchedule, ScheduleCursor, ScheduleTimezone, TickDecision,
};
