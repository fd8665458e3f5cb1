use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::refresh::ScopeFamily;

/// Why the refresh guard refused to start a job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("A refresh is already in progress")]
    AlreadyInProgress,

    #[error("{}", rate_limit_message(.family, .remaining))]
    RateLimited {
        family: ScopeFamily,
        remaining: Duration,
    },

    #[error(
        "Daily limit reached: {limit} single-article summaries per day. Try again tomorrow."
    )]
    DailyQuotaExceeded { limit: u32 },
}

impl AdmissionError {
    /// Machine-readable discriminator for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            AdmissionError::AlreadyInProgress => "already_in_progress",
            AdmissionError::RateLimited { .. } => "rate_limited",
            AdmissionError::DailyQuotaExceeded { .. } => {
                "daily_quota_exceeded"
            }
        }
    }

    /// Seconds a client should wait before retrying, when known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AdmissionError::RateLimited { remaining, .. } => Some(*remaining),
            _ => None,
        }
    }
}

fn rate_limit_message(family: &ScopeFamily, remaining: &Duration) -> String {
    let wait = format_wait(*remaining);
    match family {
        ScopeFamily::Daily => {
            format!("Rate limit: Please wait {wait} before refreshing again")
        }
        ScopeFamily::Item => format!(
            "Rate limit: This article was summarized recently. Please wait {wait} before summarizing it again"
        ),
    }
}

/// Renders a wait as `"{m}m {s}s"`, rounding partial seconds up.
pub fn format_wait(remaining: Duration) -> String {
    let mut secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs += 1;
    }
    format!("{}m {}s", secs / 60, secs % 60)
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("failed to launch pipeline: {0}")]
    Launch(#[source] std::io::Error),

    #[error("pipeline exited with {}", describe_exit(.code))]
    ExitStatus { code: Option<i32> },

    #[error("pipeline timed out after {}s", .after.as_secs())]
    TimedOut { after: Duration },

    #[error("{0}")]
    Failed(String),

    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn failed(message: impl Into<String>) -> Self {
        JobError::Failed(message.into())
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".to_string(),
    }
}

#[derive(Error, Debug)]
pub enum CompletionLogError {
    #[error("failed to read completion records in {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed completion record {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidItemId {
    #[error("item_id must not be empty")]
    Empty,
    #[error("item_id exceeds {max} characters")]
    TooLong { max: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleParseError {
    #[error("invalid schedule timezone '{0}': expected 'local', 'UTC' or an offset like '+08:00'")]
    Timezone(String),
    #[error("invalid schedule time '{0}': expected HH:MM")]
    Time(String),
}
