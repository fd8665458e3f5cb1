use std::{fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    clock::Clock,
    completions::CompletionLog,
    error::AdmissionError,
    refresh::{
        cooldown::{CooldownPolicy, DailyQuota},
        scope::{RefreshScope, ScopeFamily},
    },
};

/// Limits applied by [`RefreshGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshPolicy {
    #[serde(with = "duration_secs")]
    pub cooldown: Duration,
    pub adhoc_daily_limit: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(60 * 60),
            adhoc_daily_limit: 5,
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Process-wide refresh flag. `epoch` increments on every grant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RefreshState {
    in_progress: bool,
    epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
}

/// Single-flight lock plus cooldown and quota admission.
///
/// The in-progress check, every limit evaluation and the flip to
/// `in_progress = true` run inside one critical section, so two concurrent
/// callers can never both be granted.
pub struct RefreshGuard {
    state: Mutex<RefreshState>,
    completions: Arc<dyn CompletionLog>,
    clock: Arc<dyn Clock>,
    policy: RefreshPolicy,
}

impl fmt::Debug for RefreshGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshGuard")
            .field("state", &*self.state.lock())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RefreshGuard {
    pub fn new(
        completions: Arc<dyn CompletionLog>,
        clock: Arc<dyn Clock>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            state: Mutex::new(RefreshState::default()),
            completions,
            clock,
            policy,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.state.lock().in_progress
    }

    /// Grants the single refresh slot for `scope` or explains the denial.
    pub fn try_acquire(
        self: &Arc<Self>,
        scope: &RefreshScope,
    ) -> Result<RefreshPermit, AdmissionError> {
        let mut state = self.state.lock();
        if state.in_progress {
            return Err(AdmissionError::AlreadyInProgress);
        }
        let quota = self.evaluate_limits(scope)?;

        state.in_progress = true;
        state.epoch = state.epoch.wrapping_add(1);
        let epoch = state.epoch;
        drop(state);

        debug!(%scope, epoch, "refresh slot granted");
        Ok(RefreshPermit {
            guard: Arc::clone(self),
            scope: scope.clone(),
            epoch,
            quota,
            released: false,
        })
    }

    /// Same decision as [`Self::try_acquire`] without taking the slot.
    pub fn check(&self, scope: &RefreshScope) -> Result<(), AdmissionError> {
        let state = self.state.lock();
        if state.in_progress {
            return Err(AdmissionError::AlreadyInProgress);
        }
        self.evaluate_limits(scope).map(|_| ())
    }

    /// Clears `in_progress` unconditionally. Idempotent.
    ///
    /// Prefer dropping the [`RefreshPermit`]; this exists for operators
    /// recovering a wedged process.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if state.in_progress {
            state.in_progress = false;
            debug!(epoch = state.epoch, "refresh slot force-released");
        }
    }

    fn release_epoch(&self, epoch: u64) -> bool {
        let mut state = self.state.lock();
        if state.in_progress && state.epoch == epoch {
            state.in_progress = false;
            true
        } else {
            false
        }
    }

    /// Raw timestamp of the most recent completion for `scope`, if any.
    pub fn last_completion(&self, scope: &RefreshScope) -> Option<String> {
        match self.completions.last_completion(scope) {
            Ok(found) => found,
            Err(err) => {
                warn!(%scope, error = %err, "completion log unreadable");
                None
            }
        }
    }

    pub fn adhoc_quota(&self) -> QuotaSnapshot {
        let quota = DailyQuota::new(self.policy.adhoc_daily_limit);
        let completions = self.family_completions(ScopeFamily::Item);
        let used = quota.used_today(&completions, self.clock.as_ref());
        QuotaSnapshot {
            used,
            limit: quota.limit,
            remaining: quota.limit.saturating_sub(used),
        }
    }

    fn family_completions(&self, family: ScopeFamily) -> Vec<String> {
        self.completions.completions(family).unwrap_or_else(|err| {
            warn!(?family, error = %err, "completion log unreadable");
            Vec::new()
        })
    }

    /// For ad-hoc scopes, also returns the quota as it stood at evaluation.
    fn evaluate_limits(
        &self,
        scope: &RefreshScope,
    ) -> Result<Option<QuotaSnapshot>, AdmissionError> {
        let clock = self.clock.as_ref();
        match scope {
            RefreshScope::Daily => {
                let last = self.last_completion(scope);
                let cooldown = CooldownPolicy::daily(self.policy.cooldown);
                match cooldown.remaining(last.as_deref(), clock) {
                    Some(remaining) => Err(AdmissionError::RateLimited {
                        family: ScopeFamily::Daily,
                        remaining,
                    }),
                    None => Ok(None),
                }
            }
            RefreshScope::Item(_) => {
                let quota = DailyQuota::new(self.policy.adhoc_daily_limit);
                let completions = self.family_completions(ScopeFamily::Item);
                let used = quota.used_today(&completions, clock);
                if used >= quota.limit {
                    return Err(AdmissionError::DailyQuotaExceeded {
                        limit: quota.limit,
                    });
                }

                let last = self.last_completion(scope);
                let cooldown = CooldownPolicy::per_item(self.policy.cooldown);
                match cooldown.remaining(last.as_deref(), clock) {
                    Some(remaining) => Err(AdmissionError::RateLimited {
                        family: ScopeFamily::Item,
                        remaining,
                    }),
                    None => Ok(Some(QuotaSnapshot {
                        used,
                        limit: quota.limit,
                        remaining: quota.limit - used,
                    })),
                }
            }
        }
    }
}

/// Proof of holding the refresh slot. Dropping it releases the slot.
#[must_use = "dropping the permit releases the refresh slot immediately"]
pub struct RefreshPermit {
    guard: Arc<RefreshGuard>,
    scope: RefreshScope,
    epoch: u64,
    quota: Option<QuotaSnapshot>,
    released: bool,
}

impl RefreshPermit {
    /// Ad-hoc quota at grant time, not counting the granted run.
    pub fn quota(&self) -> Option<QuotaSnapshot> {
        self.quota
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.guard.release_epoch(self.epoch) {
            debug!(scope = %self.scope, epoch = self.epoch, "refresh slot released");
        }
    }
}

impl Drop for RefreshPermit {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl fmt::Debug for RefreshPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshPermit")
            .field("scope", &self.scope)
            .field("epoch", &self.epoch)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock, completions::InMemoryCompletionLog,
        refresh::ItemId,
    };
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::{sync::Barrier, thread};

    struct Fixture {
        guard: Arc<RefreshGuard>,
        log: Arc<InMemoryCompletionLog>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::utc(
            Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap(),
        ));
        let log = Arc::new(InMemoryCompletionLog::new());
        let guard = Arc::new(RefreshGuard::new(
            log.clone(),
            clock.clone(),
            RefreshPolicy::default(),
        ));
        Fixture { guard, log, clock }
    }

    fn item(id: &str) -> RefreshScope {
        RefreshScope::Item(ItemId::parse(id).unwrap())
    }

    #[test]
    fn concurrent_acquire_grants_exactly_one() {
        let fx = fixture();
        let callers = 16;
        let barrier = Arc::new(Barrier::new(callers));

        let handles: Vec<_> = (0..callers)
            .map(|_| {
                let guard = fx.guard.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    guard.try_acquire(&RefreshScope::Daily)
                })
            })
            .collect();

        let results: Vec<_> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let granted = results.iter().filter(|r| r.is_ok()).count();
        let busy = results
            .iter()
            .filter(|r| matches!(r, Err(AdmissionError::AlreadyInProgress)))
            .count();

        assert_eq!(granted, 1);
        assert_eq!(busy, callers - 1);
        assert!(fx.guard.is_in_progress());
    }

    #[test]
    fn permit_releases_on_drop_even_when_holder_panics() {
        let fx = fixture();
        let permit = fx.guard.try_acquire(&RefreshScope::Daily).unwrap();

        let outcome = thread::spawn(move || {
            let _held = permit;
            panic!("job blew up");
        })
        .join();

        assert!(outcome.is_err());
        assert!(!fx.guard.is_in_progress());
        assert!(fx.guard.try_acquire(&RefreshScope::Daily).is_ok());
    }

    #[test]
    fn stale_permit_does_not_clear_newer_grant() {
        let fx = fixture();
        let first = fx.guard.try_acquire(&RefreshScope::Daily).unwrap();
        let first_epoch = first.epoch();
        fx.guard.release();

        let second = fx.guard.try_acquire(&RefreshScope::Daily).unwrap();
        assert_ne!(second.epoch(), first_epoch);

        drop(first);
        assert!(fx.guard.is_in_progress());

        second.release();
        assert!(!fx.guard.is_in_progress());
        fx.guard.release();
        assert!(!fx.guard.is_in_progress());
    }

    #[test]
    fn global_cooldown_boundary() {
        let fx = fixture();
        fx.log.record_at(&RefreshScope::Daily, fx.clock.now_utc());

        fx.clock.advance(ChronoDuration::seconds(3599));
        assert!(matches!(
            fx.guard.try_acquire(&RefreshScope::Daily),
            Err(AdmissionError::RateLimited {
                family: ScopeFamily::Daily,
                ..
            })
        ));

        fx.clock.advance(ChronoDuration::seconds(2));
        assert!(fx.guard.try_acquire(&RefreshScope::Daily).is_ok());
    }

    #[test]
    fn check_reports_denial_without_taking_the_slot() {
        let fx = fixture();
        assert!(fx.guard.check(&RefreshScope::Daily).is_ok());
        assert!(!fx.guard.is_in_progress());

        let _permit = fx.guard.try_acquire(&RefreshScope::Daily).unwrap();
        assert_eq!(
            fx.guard.check(&item("1")),
            Err(AdmissionError::AlreadyInProgress)
        );
    }

    #[test]
    fn daily_quota_wins_over_per_item_cooldown() {
        let fx = fixture();
        let now = fx.clock.now_utc();
        for id in ["1", "2", "3", "4", "5"] {
            fx.log.record_at(&item(id), now - ChronoDuration::minutes(10));
        }

        assert_eq!(
            fx.guard.try_acquire(&item("1")).unwrap_err(),
            AdmissionError::DailyQuotaExceeded { limit: 5 }
        );
        assert_eq!(
            fx.guard.adhoc_quota(),
            QuotaSnapshot {
                used: 5,
                limit: 5,
                remaining: 0
            }
        );
    }

    #[test]
    fn permit_carries_the_quota_seen_at_grant() {
        let fx = fixture();
        fx.log.record_at(&item("1"), fx.clock.now_utc());

        let permit = fx.guard.try_acquire(&item("2")).unwrap();
        // A completion landing after the grant does not change it.
        fx.log.record_at(&item("2"), fx.clock.now_utc());
        assert_eq!(
            permit.quota(),
            Some(QuotaSnapshot {
                used: 1,
                limit: 5,
                remaining: 4
            })
        );
        drop(permit);

        let daily = fx.guard.try_acquire(&RefreshScope::Daily).unwrap();
        assert_eq!(daily.quota(), None);
    }

    #[test]
    fn per_item_cooldown_is_keyed_by_item() {
        let fx = fixture();
        fx.log.record_at(
            &item("1"),
            fx.clock.now_utc() - ChronoDuration::minutes(20),
        );

        let err = fx.guard.try_acquire(&item("1")).unwrap_err();
        assert_eq!(
            err,
            AdmissionError::RateLimited {
                family: ScopeFamily::Item,
                remaining: Duration::from_secs(40 * 60),
            }
        );
        assert!(fx.guard.try_acquire(&item("2")).is_ok());
    }

    #[test]
    fn malformed_completion_timestamp_fails_open() {
        let fx = fixture();
        fx.log.record(&RefreshScope::Daily, "last tuesday");
        assert!(fx.guard.try_acquire(&RefreshScope::Daily).is_ok());
    }
}
