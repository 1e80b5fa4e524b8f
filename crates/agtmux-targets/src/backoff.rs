//! Per-target reconnect backoff: 4 s doubling to a 90 s cap, reset on
//! success. Pure state machine.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

pub const INITIAL_BACKOFF_SECS: u64 = 4;
pub const MAX_BACKOFF_SECS: u64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffState {
    pub backoff_secs: u64,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self {
            backoff_secs: INITIAL_BACKOFF_SECS,
            next_attempt_at: None,
        }
    }
}

impl BackoffState {
    /// Record a failed attempt: schedule the next one after the current
    /// delay, then double the delay up to the cap.
    #[must_use]
    pub fn on_failure(self, now: DateTime<Utc>) -> Self {
        Self {
            backoff_secs: (self.backoff_secs * 2).min(MAX_BACKOFF_SECS),
            next_attempt_at: Some(now + TimeDelta::seconds(self.backoff_secs as i64)),
        }
    }

    /// Record success: reset the delay and clear the schedule.
    #[must_use]
    pub fn on_success(self) -> Self {
        Self::default()
    }

    /// True when a retry is due (or none is scheduled).
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.next_attempt_at {
            None => true,
            Some(at) => now >= at,
        }
    }
}
