//! Pure cooldown and quota evaluation over completion timestamps.
//!
//! Nothing here mutates state: every decision is a function of the clock,
//! the raw timestamps reported by the completion log, and the policy.

use std::time::Duration;

use chrono::{
    DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc,
};
use tracing::warn;

use crate::clock::Clock;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d_%H-%M-%S",
    "%Y-%m-%dT%H:%M",
];

/// A completion timestamp as written by the pipeline. Aware values compare
/// in UTC, naive values against naive local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionTime {
    Aware(DateTime<Utc>),
    Naive(NaiveDateTime),
}

impl CompletionTime {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(aware) = DateTime::parse_from_rfc3339(raw) {
            return Some(Self::Aware(aware.with_timezone(&Utc)));
        }
        NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(Self::Naive)
    }

    /// Time since completion; negative when the timestamp is in the future.
    pub fn elapsed(&self, clock: &dyn Clock) -> ChronoDuration {
        match self {
            Self::Aware(at) => clock.now_utc() - *at,
            Self::Naive(at) => clock.now_local() - *at,
        }
    }

    /// Calendar date of the completion in the local timezone.
    pub fn local_date(&self, clock: &dyn Clock) -> NaiveDate {
        match self {
            Self::Aware(at) => {
                at.with_timezone(&clock.local_offset()).date_naive()
            }
            Self::Naive(at) => at.date(),
        }
    }

    pub fn is_today(&self, clock: &dyn Clock) -> bool {
        self.local_date(clock) == clock.now_local().date()
    }
}

/// Parses a raw timestamp, logging and returning `None` when it is
/// malformed.
pub fn parse_or_warn(raw: &str) -> Option<CompletionTime> {
    let parsed = CompletionTime::parse(raw);
    if parsed.is_none() {
        warn!(
            timestamp = raw,
            "unparsable completion timestamp; cooldown not applied"
        );
    }
    parsed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub window: Duration,
    /// Only completions on the current local date count.
    pub same_day_only: bool,
}

impl CooldownPolicy {
    pub fn daily(window: Duration) -> Self {
        Self {
            window,
            same_day_only: true,
        }
    }

    pub fn per_item(window: Duration) -> Self {
        Self {
            window,
            same_day_only: false,
        }
    }

    /// Remaining wait before another run is allowed, or `None` if the
    /// completion is old enough (or unparsable).
    pub fn remaining(
        &self,
        last_completion: Option<&str>,
        clock: &dyn Clock,
    ) -> Option<Duration> {
        let completed = parse_or_warn(last_completion?)?;
        if self.same_day_only && !completed.is_today(clock) {
            return None;
        }

        let elapsed = completed
            .elapsed(clock)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.window.checked_sub(elapsed).filter(|left| !left.is_zero())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyQuota {
    pub limit: u32,
}

impl DailyQuota {
    pub fn new(limit: u32) -> Self {
        Self { limit }
    }

    /// Completions that fall on today's local date. Malformed entries are
    /// skipped.
    pub fn used_today<S: AsRef<str>>(
        &self,
        completions: &[S],
        clock: &dyn Clock,
    ) -> u32 {
        let count = completions
            .iter()
            .filter_map(|raw| parse_or_warn(raw.as_ref()))
            .filter(|completed| completed.is_today(clock))
            .count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    pub fn remaining<S: AsRef<str>>(
        &self,
        completions: &[S],
        clock: &dyn Clock,
    ) -> u32 {
        self.limit
            .saturating_sub(self.used_today(completions, clock))
    }
}
