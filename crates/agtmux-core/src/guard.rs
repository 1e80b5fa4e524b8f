//! Write-guard precondition evaluation.
//!
//! Every mutating RPC may carry `{if_runtime, if_state, if_updated_within,
//! force_stale}`. The dispatcher evaluates them atomically against the
//! current pane state immediately before dispatch, under the per-pane
//! mutex. This module is the pure evaluation; serialization of concurrent
//! writers is the dispatcher's job.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ActivityState;

// ─── Guard inputs ────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteGuards {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_state: Option<ActivityState>,
    /// Maximum age of the pane's `updated_at` in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_updated_within: Option<u64>,
    #[serde(default)]
    pub force_stale: bool,
}

impl WriteGuards {
    pub fn is_empty(&self) -> bool {
        self.if_runtime.is_none() && self.if_state.is_none() && self.if_updated_within.is_none()
    }
}

/// The pane fields the guard checks against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardObservation {
    pub runtime_id: String,
    pub activity_state: ActivityState,
    pub updated_at: DateTime<Utc>,
}

// ─── Guard outputs ───────────────────────────────────────────────

/// Observed values reported back to the caller, on both the success and
/// the failure path (and on `force_stale` bypass).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardReport {
    pub observed_runtime_id: String,
    pub observed_state: ActivityState,
    pub observed_updated_at: DateTime<Utc>,
    /// True when a precondition failed but `force_stale` bypassed it.
    pub bypassed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardViolation {
    #[error("runtime stale: expected {expected}, observed {observed}")]
    RuntimeStale { expected: String, observed: String },
    #[error("state stale: expected {expected}, observed {observed}")]
    StateStale {
        expected: ActivityState,
        observed: ActivityState,
    },
    #[error("update stale: {age_secs}s old, bound {bound_secs}s")]
    UpdateStale { age_secs: i64, bound_secs: u64 },
}

impl GuardViolation {
    /// Stable wire code for this violation.
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::RuntimeStale { .. } => "E_RUNTIME_STALE",
            Self::StateStale { .. } => "E_STATE_STALE",
            Self::UpdateStale { .. } => "E_UPDATE_STALE",
        }
    }
}

// ─── Evaluation ──────────────────────────────────────────────────

/// Evaluate guards against an observation.
///
/// Checks run in order: runtime, state, freshness; the first violation is
/// reported. With `force_stale` the violation is bypassed but the report
/// still carries the observed values and `bypassed = true`.
pub fn evaluate(
    guards: &WriteGuards,
    observed: &GuardObservation,
    now: DateTime<Utc>,
) -> Result<GuardReport, (GuardViolation, GuardReport)> {
    let report = |bypassed: bool| GuardReport {
        observed_runtime_id: observed.runtime_id.clone(),
        observed_state: observed.activity_state,
        observed_updated_at: observed.updated_at,
        bypassed,
    };

    match first_violation(guards, observed, now) {
        None => Ok(report(false)),
        Some(_) if guards.force_stale => Ok(report(true)),
        Some(v) => Err((v, report(false))),
    }
}

fn first_violation(
    guards: &WriteGuards,
    observed: &GuardObservation,
    now: DateTime<Utc>,
) -> Option<GuardViolation> {
    if let Some(expected) = &guards.if_runtime {
        if *expected != observed.runtime_id {
            return Some(GuardViolation::RuntimeStale {
                expected: expected.clone(),
                observed: observed.runtime_id.clone(),
            });
        }
    }

    if let Some(expected) = guards.if_state {
        if expected != observed.activity_state {
            return Some(GuardViolation::StateStale {
                expected,
                observed: observed.activity_state,
            });
        }
    }

    if let Some(bound_secs) = guards.if_updated_within {
        let age = now.signed_duration_since(observed.updated_at);
        if age > TimeDelta::seconds(bound_secs as i64) {
            return Some(GuardViolation::UpdateStale {
                age_secs: age.num_seconds(),
                bound_secs,
            });
        }
    }

    None
}

// ─── Tests ────────────────────────────────────────────────────────
