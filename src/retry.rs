//! Exponential backoff for failed jobs.

use chrono::{DateTime, TimeDelta, Utc};

/// Upper bound applied when turning a delay into a `run_at`. Keeps the
/// stored timestamp inside the four-digit-year range that sorts as text.
const MAX_SCHEDULE_DELAY_SECS: u64 = 365 * 24 * 60 * 60;

/// Seconds to wait after failed attempt number `attempt` (1-indexed):
/// `base ^ attempt`, saturating at `u64::MAX`.
pub fn delay_seconds(attempt: u32, base: u32) -> u64 {
    u64::from(base).saturating_pow(attempt)
}

/// Backoff configuration. Holds only the base; the policy itself is the
/// pure function [`delay_seconds`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff_base: u32,
}

impl RetryPolicy {
    pub fn new(backoff_base: u32) -> Self {
        Self { backoff_base }
    }

    pub fn delay_seconds(&self, attempt: u32) -> u64 {
        delay_seconds(attempt, self.backoff_base)
    }

    /// When a job that just failed attempt number `attempt` becomes eligible again.
    pub fn next_run_at(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self.delay_seconds(attempt).min(MAX_SCHEDULE_DELAY_SECS);
        // Bounded above, so the conversion and addition cannot overflow.
        now + TimeDelta::seconds(secs as i64)
    }
}
