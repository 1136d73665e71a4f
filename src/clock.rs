//! Time source for expiry and rate-limit decisions.
//!
//! Everything that compares against "now" goes through [`Clock`] so tests
//! can move time forward instead of sleeping.

use chrono::Utc;
use std::sync::Arc;

/// Source of the current time in whole unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by `chrono::Utc`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

#[cfg(test)]
pub use manual::ManualClock;
