//! Refresh admission: who may start the pipeline, and when.

pub mod cooldown;
pub mod guard;
pub mod scope;

pub use cooldown::{CompletionTime, CooldownPolicy, DailyQuota};
pub use guard::{QuotaSnapshot, RefreshGuard, RefreshPermit, RefreshPolicy};
pub use scope::{ItemId, RefreshScope, ScopeFamily};
