//! Per-pane state resolution.
//!
//! Fuses deterministic adapter events with tap-derived heuristics into the
//! authoritative `(activity_state, attention_state, evidence_mode,
//! runtime_id)` tuple. Pure function: the daemon calls [`resolve`] once per
//! pane per tick and on every relevant event batch.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::attention::derive_attention;
use crate::hysteresis::{IDLE_HYSTERESIS_SECS, IdleGate};
use crate::types::{
    ActivityState, AgentPresence, AgentType, AttentionState, EvidenceMode, EvidenceTier,
    HeuristicObservation, NormalizedEvent, PanePresence,
};

/// Freshness window for deterministic evidence (seconds).
pub const DET_FRESH_WINDOW_SECS: u64 = 3;

/// Threshold after which a silent deterministic source is considered down
/// (seconds). Evidence decays to heuristic; presence is never cleared.
pub const DOWN_THRESHOLD_SECS: u64 = 15;

// ─── Config ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    pub det_fresh_window_secs: u64,
    pub down_threshold_secs: u64,
    pub idle_hysteresis_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            det_fresh_window_secs: DET_FRESH_WINDOW_SECS,
            down_threshold_secs: DOWN_THRESHOLD_SECS,
            idle_hysteresis_secs: IDLE_HYSTERESIS_SECS,
        }
    }
}

// ─── Freshness ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    Down,
}

/// Classify deterministic-source freshness from the last observation time.
pub fn classify_freshness(
    last_seen: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cfg: &ResolverConfig,
) -> Freshness {
    match last_seen {
        None => Freshness::Down,
        Some(ts) => {
            let elapsed = now.signed_duration_since(ts);
            if elapsed <= TimeDelta::seconds(cfg.det_fresh_window_secs as i64) {
                Freshness::Fresh
            } else if elapsed < TimeDelta::seconds(cfg.down_threshold_secs as i64) {
                Freshness::Stale
            } else {
                Freshness::Down
            }
        }
    }
}

// ─── State ───────────────────────────────────────────────────────

/// Resolver state carried across invocations for one pane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaneResolveState {
    pub presence: PanePresence,
    pub agent_type: AgentType,
    pub agent_presence: AgentPresence,
    pub evidence_mode: EvidenceMode,
    pub winner_tier: EvidenceTier,
    pub activity: ActivityState,
    pub attention: AttentionState,
    pub runtime_id: String,
    pub runtime_seq: u64,
    pub reason_code: String,
    pub last_event_type: String,
    pub last_event_at: Option<DateTime<Utc>>,
    pub deterministic_last_seen: Option<DateTime<Utc>>,
    pub idle_gate: IdleGate,
    pub updated_at: DateTime<Utc>,
}

impl PaneResolveState {
    /// Initial state for a pane that has produced no evidence yet.
    pub fn unknown(now: DateTime<Utc>) -> Self {
        Self {
            presence: PanePresence::Unknown,
            agent_type: AgentType::None,
            agent_presence: AgentPresence::Unknown,
            evidence_mode: EvidenceMode::None,
            winner_tier: EvidenceTier::Heuristic,
            activity: ActivityState::Unknown,
            attention: AttentionState::None,
            runtime_id: String::new(),
            runtime_seq: 0,
            reason_code: String::new(),
            last_event_type: String::new(),
            last_event_at: None,
            deterministic_last_seen: None,
            idle_gate: IdleGate::default(),
            updated_at: now,
        }
    }
}

/// Per-tick inputs for one pane.
#[derive(Debug, Clone, Default)]
pub struct ResolveInputs<'a> {
    /// Normalized adapter events received since the last tick.
    pub det_events: &'a [NormalizedEvent],
    /// Tap-derived heuristics, lower tier.
    pub heuristics: &'a [HeuristicObservation],
    /// Classification result from the adapter registry, if it ran.
    pub classified_agent: Option<AgentType>,
    /// The adapter explicitly reported an agent restart.
    pub restart_observed: bool,
}

/// Output of one resolve step.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOutput {
    pub next: PaneResolveState,
    pub activity_changed: bool,
    pub attention_changed: bool,
    /// A new runtime_id was issued; in-flight write guards referencing the
    /// old id are now stale.
    pub runtime_reissued: bool,
    /// An idle observation was withheld by the hysteresis window.
    pub idle_suppressed: bool,
}

// ─── Candidate selection ─────────────────────────────────────────

struct Candidate {
    activity: ActivityState,
    event_type: String,
    observed_at: DateTime<Utc>,
    completion: bool,
}

/// Pick by precedence, ties broken by newer observation time.
fn pick_candidate(candidates: Vec<Candidate>) -> Option<Candidate> {
    candidates.into_iter().max_by(|a, b| {
        a.activity
            .cmp(&b.activity)
            .then(a.observed_at.cmp(&b.observed_at))
    })
}

fn det_candidates(events: &[NormalizedEvent]) -> Vec<Candidate> {
    events
        .iter()
        .map(|e| Candidate {
            activity: e.kind.activity(),
            event_type: e.event_type.clone(),
            observed_at: e.received_at,
            completion: e.kind.is_completion(),
        })
        .collect()
}

fn heuristic_candidates(observations: &[HeuristicObservation]) -> Vec<Candidate> {
    observations
        .iter()
        .map(|o| Candidate {
            activity: o.signal.activity(),
            event_type: format!("heuristic.{:?}", o.signal).to_lowercase(),
            observed_at: o.observed_at,
            completion: false,
        })
        .collect()
}

// ─── Resolve (main entry point) ──────────────────────────────────

/// Resolve the next state for a **single pane**.
///
/// Steps: tier selection by freshness, state selection by precedence then
/// recency within the winner tier, attention derivation, idle hysteresis,
/// runtime identity maintenance, freshness decay.
pub fn resolve(
    prev: &PaneResolveState,
    inputs: &ResolveInputs<'_>,
    now: DateTime<Utc>,
    cfg: &ResolverConfig,
) -> ResolveOutput {
    // Step 1: merge deterministic last-seen with this batch.
    let batch_det_latest = inputs.det_events.iter().map(|e| e.received_at).max();
    let det_last_seen = match (prev.deterministic_last_seen, batch_det_latest) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    };

    // Step 2: tier selection.
    let freshness = classify_freshness(det_last_seen, now, cfg);
    let winner_tier = match freshness {
        Freshness::Fresh => EvidenceTier::Deterministic,
        Freshness::Stale | Freshness::Down => EvidenceTier::Heuristic,
    };

    // Step 3: candidate within the winner tier.
    let candidate = match winner_tier {
        EvidenceTier::Deterministic => pick_candidate(det_candidates(inputs.det_events)),
        EvidenceTier::Heuristic => pick_candidate(heuristic_candidates(inputs.heuristics)),
    };

    // Step 4: agent identity from classification or prior state.
    let agent_type = match inputs.classified_agent {
        Some(a) if a != AgentType::None => a,
        _ => prev.agent_type,
    };
    let has_det_evidence = !inputs.det_events.is_empty() || det_last_seen.is_some();
    let managed = has_det_evidence || agent_type != AgentType::None;

    let presence = if managed {
        PanePresence::Managed
    } else if prev.presence == PanePresence::Managed {
        // Freshness decay never clears presence.
        PanePresence::Managed
    } else {
        PanePresence::Unmanaged
    };

    let agent_presence = if presence == PanePresence::Managed {
        AgentPresence::Managed
    } else {
        AgentPresence::None
    };

    // Invariant: presence == managed ⇔ evidence_mode ∈ {deterministic, heuristic}.
    let evidence_mode = if presence != PanePresence::Managed {
        EvidenceMode::None
    } else if winner_tier == EvidenceTier::Deterministic {
        EvidenceMode::Deterministic
    } else {
        EvidenceMode::Heuristic
    };

    // Step 5: runtime identity.
    let hint = inputs
        .det_events
        .iter()
        .filter_map(|e| e.runtime_id_hint.as_deref())
        .next_back();
    let classification_changed = prev.agent_type != AgentType::None
        && agent_type != AgentType::None
        && agent_type != prev.agent_type;
    let hint_changed = hint.is_some_and(|h| !prev.runtime_id.is_empty() && h != prev.runtime_id);
    let needs_issue = presence == PanePresence::Managed && prev.runtime_id.is_empty();
    let reissue = inputs.restart_observed || classification_changed || hint_changed;

    let (runtime_id, runtime_seq, runtime_reissued) = if reissue || needs_issue {
        let seq = prev.runtime_seq + 1;
        let id = hint
            .map(str::to_owned)
            .unwrap_or_else(|| format!("rt-{seq}-{}", now.timestamp_millis()));
        (id, seq, reissue)
    } else {
        (prev.runtime_id.clone(), prev.runtime_seq, false)
    };

    // Step 6: raw activity, then the idle gate.
    let (raw_activity, reason_code, last_event_type, last_event_at, completion) = match &candidate {
        Some(c) => (
            c.activity,
            c.event_type.clone(),
            c.event_type.clone(),
            Some(c.observed_at),
            c.completion,
        ),
        None => {
            // No new evidence this tick: carry the previous state; note
            // decay when the deterministic source went quiet.
            let reason = if freshness == Freshness::Stale || freshness == Freshness::Down {
                if prev.winner_tier == EvidenceTier::Deterministic {
                    "det_stale_fallback".to_owned()
                } else {
                    prev.reason_code.clone()
                }
            } else {
                prev.reason_code.clone()
            };
            (
                prev.activity,
                reason,
                prev.last_event_type.clone(),
                prev.last_event_at,
                false,
            )
        }
    };

    let (idle_gate, gate_out) = prev.idle_gate.apply(
        prev.activity,
        raw_activity,
        now,
        cfg.idle_hysteresis_secs,
    );
    let activity = gate_out.confirmed;

    // Step 7: attention derivation.
    let attention = derive_attention(activity, &last_event_type, completion);

    let activity_changed = activity != prev.activity;
    let attention_changed = attention != prev.attention;
    let evidence_changed =
        evidence_mode != prev.evidence_mode || presence != prev.presence;
    let touched =
        activity_changed || attention_changed || evidence_changed || candidate.is_some();

    let next = PaneResolveState {
        presence,
        agent_type,
        agent_presence,
        evidence_mode,
        winner_tier,
        activity,
        attention,
        runtime_id,
        runtime_seq,
        reason_code,
        last_event_type,
        last_event_at,
        deterministic_last_seen: det_last_seen,
        idle_gate,
        updated_at: if touched { now } else { prev.updated_at },
    };

    ResolveOutput {
        next,
        activity_changed,
        attention_changed,
        runtime_reissued,
        idle_suppressed: gate_out.suppressed,
    }
}

// ─── Tests ────────────────────────────────────────────────────────
