//! Idle-transition hysteresis.
//!
//! A pane that is `Running` must show continuous idle evidence for the
//! configured window before the resolver confirms `Idle`. This prevents
//! flapping on agents that pause briefly between tool invocations. All
//! other transitions pass through immediately — `Error` and the waiting
//! states in particular must never be delayed.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ActivityState;

/// Default continuous-idle window (seconds) before Running → Idle is
/// confirmed. Configurable through `ResolverConfig`.
pub const IDLE_HYSTERESIS_SECS: u64 = 5;

/// Tracks how long idle evidence has been continuously observed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleGate {
    /// When the current uninterrupted run of idle observations began.
    /// `None` while the latest observation is not idle.
    pub idle_observed_since: Option<DateTime<Utc>>,
}

/// Outcome of gating one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateOutcome {
    /// The state the resolver should confirm this tick.
    pub confirmed: ActivityState,
    /// True when an idle observation was withheld by the window.
    pub suppressed: bool,
}

impl IdleGate {
    /// Gate a candidate state against the confirmed state.
    ///
    /// Returns the updated gate and the outcome. Only the Running → Idle
    /// edge is subject to the window; every other edge confirms
    /// immediately and resets the gate.
    pub fn apply(
        self,
        confirmed: ActivityState,
        candidate: ActivityState,
        now: DateTime<Utc>,
        window_secs: u64,
    ) -> (IdleGate, GateOutcome) {
        if candidate != ActivityState::Idle {
            return (
                IdleGate {
                    idle_observed_since: None,
                },
                GateOutcome {
                    confirmed: candidate,
                    suppressed: false,
                },
            );
        }

        // Idle candidate from a non-running state confirms immediately.
        if confirmed != ActivityState::Running {
            return (
                IdleGate {
                    idle_observed_since: None,
                },
                GateOutcome {
                    confirmed: ActivityState::Idle,
                    suppressed: false,
                },
            );
        }

        let since = self.idle_observed_since.unwrap_or(now);
        let elapsed = now.signed_duration_since(since);
        if elapsed >= TimeDelta::seconds(window_secs as i64) {
            (
                IdleGate {
                    idle_observed_since: None,
                },
                GateOutcome {
                    confirmed: ActivityState::Idle,
                    suppressed: false,
                },
            )
        } else {
            (
                IdleGate {
                    idle_observed_since: Some(since),
                },
                GateOutcome {
                    confirmed: ActivityState::Running,
                    suppressed: true,
                },
            )
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
