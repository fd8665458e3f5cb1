//! Wall-clock access for cooldown, quota and schedule decisions.

use std::fmt;

use chrono::{
    DateTime, Duration as ChronoDuration, FixedOffset, Local, NaiveDateTime,
    Offset, Utc,
};
use parking_lot::Mutex;

/// Source of "now" for every time-based policy in the crate.
///
/// Aware timestamps are compared against [`Clock::now_utc`]; naive timestamps
/// written by the pipeline are compared against [`Clock::now_local`].
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_utc(&self) -> DateTime<Utc>;

    /// Offset of the process-local timezone at the current instant.
    fn local_offset(&self) -> FixedOffset;

    fn now_local(&self) -> NaiveDateTime {
        self.now_utc()
            .with_timezone(&self.local_offset())
            .naive_local()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_offset(&self) -> FixedOffset {
        *Local::now().offset()
    }

    fn now_local(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock that only moves when told to. Local time is derived from a fixed
/// offset so tests are independent of the host timezone.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            offset,
        }
    }

    /// Clock whose local time equals UTC.
    pub fn utc(now: DateTime<Utc>) -> Self {
        Self::new(now, Utc.fix())
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut guard = self.now.lock();
        *guard += by;
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &*self.now.lock())
            .field("offset", &self.offset)
            .finish()
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn local_offset(&self) -> FixedOffset {
        self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_derives_local_time_from_offset() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 22, 30, 0).unwrap();
        let clock =
            ManualClock::new(now, FixedOffset::east_opt(2 * 3600).unwrap());

        let local = clock.now_local();
        assert_eq!(local.to_string(), "2026-03-02 00:30:00");

        clock.advance(ChronoDuration::minutes(45));
        assert_eq!(clock.now_local().to_string(), "2026-03-02 01:15:00");
    }
}
