//! Daily trigger window and the once-per-day cursor.

use std::{fmt, str::FromStr, time::Duration};

use chrono::{
    Duration as ChronoDuration, FixedOffset, NaiveDate, NaiveDateTime,
    NaiveTime, Timelike,
};
use parking_lot::Mutex;

use crate::{clock::Clock, error::ScheduleParseError};

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Timezone the window is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleTimezone {
    /// The process-local timezone.
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl ScheduleTimezone {
    pub fn now(&self, clock: &dyn Clock) -> NaiveDateTime {
        match self {
            ScheduleTimezone::Local => clock.now_local(),
            ScheduleTimezone::Fixed(offset) => {
                clock.now_utc().with_timezone(offset).naive_local()
            }
        }
    }
}

impl FromStr for ScheduleTimezone {
    type Err = ScheduleParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "local" | "" => Ok(ScheduleTimezone::Local),
            "utc" | "z" | "gmt" => Ok(ScheduleTimezone::Fixed(
                FixedOffset::east_opt(0)
                    .ok_or_else(|| ScheduleParseError::Timezone(raw.into()))?,
            )),
            _ => parse_offset(trimmed)
                .map(ScheduleTimezone::Fixed)
                .ok_or_else(|| ScheduleParseError::Timezone(raw.to_string())),
        }
    }
}

/// `+HH:MM`, `-HH:MM` or `+HHMM`.
fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

impl fmt::Display for ScheduleTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleTimezone::Local => f.write_str("local"),
            ScheduleTimezone::Fixed(offset) => write!(f, "{offset}"),
        }
    }
}

/// Parses a wall-clock time of day written as `HH:MM`.
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, ScheduleParseError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| ScheduleParseError::Time(raw.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    pub start: NaiveTime,
    pub window: Duration,
    pub timezone: ScheduleTimezone,
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or(NaiveTime::MIN),
            window: Duration::from_secs(5 * 60),
            timezone: ScheduleTimezone::Local,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    OutsideWindow,
    AlreadyRan(NaiveDate),
    Fire(NaiveDate),
}

impl DailySchedule {
    pub fn new(
        start: NaiveTime,
        window: Duration,
        timezone: ScheduleTimezone,
    ) -> Self {
        Self {
            start,
            window,
            timezone,
        }
    }

    /// Date of the window that contains `at`, if any. A window crossing
    /// midnight belongs to the day it opened on.
    pub fn window_date(&self, at: NaiveDateTime) -> Option<NaiveDate> {
        let start = i64::from(self.start.num_seconds_from_midnight());
        let now = i64::from(at.time().num_seconds_from_midnight());
        let since_start = (now - start).rem_euclid(SECS_PER_DAY);
        let window = i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX);

        if since_start >= window {
            return None;
        }
        if now < start {
            Some(at.date() - ChronoDuration::days(1))
        } else {
            Some(at.date())
        }
    }

    /// Decides whether to fire now, claiming the cursor when it does.
    pub fn evaluate(
        &self,
        cursor: &ScheduleCursor,
        clock: &dyn Clock,
    ) -> TickDecision {
        let now = self.timezone.now(clock);
        match self.window_date(now) {
            None => TickDecision::OutsideWindow,
            Some(date) if cursor.claim(date) => TickDecision::Fire(date),
            Some(date) => TickDecision::AlreadyRan(date),
        }
    }
}

impl fmt::Display for DailySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} for {}m ({})",
            self.start.format("%H:%M"),
            self.window.as_secs() / 60,
            self.timezone
        )
    }
}

/// Remembers the last date an automatic run was claimed.
#[derive(Debug, Default)]
pub struct ScheduleCursor {
    last_run_date: Mutex<Option<NaiveDate>>,
}

impl ScheduleCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `date` as run and returns true, unless it already was.
    pub fn claim(&self, date: NaiveDate) -> bool {
        let mut last = self.last_run_date.lock();
        if *last == Some(date) {
            return false;
        }
        *last = Some(date);
        true
    }

    pub fn last_run_date(&self) -> Option<NaiveDate> {
        *self.last_run_date.lock()
    }
}
