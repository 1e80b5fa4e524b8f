//! Snapshot projection: assemble `{targets, sessions, windows, panes}`
//! from resolved state. Deterministic and idempotent — identical inputs
//! produce identical snapshots, which clients use for equality-based
//! poll backoff.

use std::collections::BTreeMap;
use std::str::FromStr;

use agtmux_core::types::{
    ActivityState, AttentionState, PanePresence, SESSION_TIME_CONFIDENCE_FLOOR, SessionLabelSource,
    TargetHealth,
};
use agtmux_proto::rpc::{PaneCategory, SessionSummary, Snapshot, SnapshotPane, WindowSummary};

use crate::state::DaemonState;

/// User-selected ordering for sessions after the pinned/default/health
/// tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionSortMode {
    #[default]
    Stable,
    RecentActivity,
    Name,
}

impl FromStr for SessionSortMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stable" => Ok(Self::Stable),
            "recent_activity" => Ok(Self::RecentActivity),
            "name" => Ok(Self::Name),
            _ => Err(()),
        }
    }
}

/// Snapshot category for one pane. Actionable attention overrides the
/// activity categorization.
pub fn categorize(
    presence: PanePresence,
    activity: ActivityState,
    attention: AttentionState,
) -> PaneCategory {
    if attention.is_actionable() {
        return PaneCategory::Attention;
    }
    match activity {
        ActivityState::Running => PaneCategory::Running,
        ActivityState::Idle => PaneCategory::Idle,
        ActivityState::WaitingInput | ActivityState::WaitingApproval | ActivityState::Error => {
            PaneCategory::Attention
        }
        ActivityState::Unknown | _ => {
            if presence == PanePresence::Unmanaged {
                PaneCategory::Unmanaged
            } else {
                PaneCategory::Unknown
            }
        }
    }
}

/// Resolve the display label for a session: explicit override from the
/// store wins, then the first managed pane's title, then the session
/// name itself.
pub fn resolve_session_label(
    state: &DaemonState,
    target: &str,
    session_name: &str,
) -> (Option<String>, Option<SessionLabelSource>) {
    if session_name.is_empty() {
        return (None, None);
    }

    let key = format!("session_label.{target}.{session_name}");
    if let Ok(Some(label)) = state.store.get_ui(&key) {
        return (Some(label), Some(SessionLabelSource::Override));
    }

    let title = state
        .panes
        .values()
        .filter(|e| e.target == target && e.info.session_name == session_name)
        .filter(|e| e.resolve.presence == PanePresence::Managed)
        .map(|e| e.info.pane_title.trim())
        .find(|t| !t.is_empty());
    if let Some(title) = title {
        return (Some(title.to_owned()), Some(SessionLabelSource::PaneTitle));
    }

    (
        Some(session_name.to_owned()),
        Some(SessionLabelSource::SessionName),
    )
}

/// Numeric suffix of a tmux handle (`@12` → 12, `%3` → 3). Handles
/// without one sort last.
fn numeric_suffix(handle: &str) -> u64 {
    let digits: String = handle.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(u64::MAX)
}

struct SessionRow {
    summary: SessionSummary,
    is_default_target: bool,
    stable_position: i64,
}

/// Assemble the dashboard snapshot.
pub fn project(state: &DaemonState) -> Snapshot {
    let targets = state.targets.list();
    let partial_results = targets.iter().any(|t| {
        state
            .targets
            .get(&t.target_name)
            .map(|r| r.partial_results)
            .unwrap_or(false)
    });

    let sort_mode = state
        .store
        .get_ui("ui.session_sort_mode")
        .ok()
        .flatten()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();

    // Group panes by (target, session).
    let mut by_session: BTreeMap<(String, String), Vec<&crate::state::PaneEntry>> =
        BTreeMap::new();
    for entry in state.panes.values() {
        by_session
            .entry((entry.target.clone(), entry.info.session_name.clone()))
            .or_default()
            .push(entry);
    }

    // Session rows with their sort inputs.
    let mut rows: Vec<SessionRow> = Vec::new();
    for ((target, session_name), entries) in &by_session {
        let health = state
            .targets
            .health(target)
            .unwrap_or(TargetHealth::Unknown);
        let pinned = state
            .store
            .is_pinned(target, session_name)
            .unwrap_or(false);
        let time_confidence = entries
            .iter()
            .map(|e| e.time_confidence())
            .fold(0.0_f64, f64::max);
        let last_active_at = if time_confidence < SESSION_TIME_CONFIDENCE_FLOOR {
            None
        } else {
            entries.iter().filter_map(|e| e.resolve.last_event_at).max()
        };
        let (session_label, session_label_source) =
            resolve_session_label(state, target, session_name);
        let is_default_target = state
            .targets
            .default_target()
            .map(|t| &t.identity.target_name == target)
            .unwrap_or(false);
        let stable_position = state
            .store
            .stable_order_position(target, session_name)
            .ok()
            .flatten()
            .unwrap_or(i64::MAX);

        rows.push(SessionRow {
            summary: SessionSummary {
                target: target.clone(),
                session_name: session_name.clone(),
                session_label,
                session_label_source,
                pinned,
                health,
                last_active_at,
                time_confidence,
            },
            is_default_target,
            stable_position,
        });
    }

    // Sort: pinned (stable) → default target → health → sort mode →
    // stable fallback.
    rows.sort_by(|a, b| {
        b.summary
            .pinned
            .cmp(&a.summary.pinned)
            .then(b.is_default_target.cmp(&a.is_default_target))
            .then(a.summary.health.cmp(&b.summary.health))
            .then_with(|| match sort_mode {
                SessionSortMode::Stable => std::cmp::Ordering::Equal,
                SessionSortMode::RecentActivity => {
                    b.summary.last_active_at.cmp(&a.summary.last_active_at)
                }
                SessionSortMode::Name => a.summary.session_name.cmp(&b.summary.session_name),
            })
            .then(a.stable_position.cmp(&b.stable_position))
            .then(a.summary.session_name.cmp(&b.summary.session_name))
            .then(a.summary.target.cmp(&b.summary.target))
    });

    // Panes follow session order; within a session by window id suffix,
    // then pane id suffix.
    let mut panes: Vec<SnapshotPane> = Vec::new();
    let mut windows: Vec<WindowSummary> = Vec::new();
    for row in &rows {
        let key = (
            row.summary.target.clone(),
            row.summary.session_name.clone(),
        );
        let Some(entries) = by_session.get(&key) else {
            continue;
        };
        let mut entries: Vec<_> = entries.clone();
        entries.sort_by_key(|e| {
            (
                numeric_suffix(&e.info.window_id),
                numeric_suffix(&e.info.pane_id),
            )
        });

        for entry in entries {
            if let Some(item) = state.pane_item(&entry.target, &entry.info.pane_id) {
                let category =
                    categorize(item.presence, item.activity_state, item.attention_state);
                let display_state = item.activity_state.display_word().to_owned();
                panes.push(SnapshotPane {
                    pane: item,
                    category,
                    display_state,
                });
            }
            let window = WindowSummary {
                target: entry.target.clone(),
                session_name: entry.info.session_name.clone(),
                window_id: entry.info.window_id.clone(),
                window_name: entry.info.window_name.clone(),
            };
            if !windows.contains(&window) {
                windows.push(window);
            }
        }
    }

    Snapshot {
        version: state.version(),
        targets,
        sessions: rows.into_iter().map(|r| r.summary).collect(),
        windows,
        panes,
        partial_results,
    }
}

/// The v1 JSON export of a snapshot.
pub fn export_json_v1(snapshot: &Snapshot) -> serde_json::Value {
    let panes: Vec<serde_json::Value> = snapshot
        .panes
        .iter()
        .map(|p| {
            serde_json::json!({
                "pane_id": p.pane.identity.pane_id,
                "target": p.pane.identity.target,
                "session_name": p.pane.identity.session_name,
                "window_id": p.pane.identity.window_id,
                "window_name": p.pane.window_name,
                "presence": p.pane.presence,
                "current_cmd": p.pane.current_cmd,
                "current_path": p.pane.current_path,
                "activity_state": p.pane.activity_state,
                "evidence_mode": p.pane.evidence_mode,
                "agent_type": p.pane.agent_type,
                "runtime_id": p.pane.runtime_id,
                "last_event_type": p.pane.last_event_type,
                "last_event_at": p.pane.last_event_at,
                "display_state": p.display_state,
            })
        })
        .collect();

    serde_json::json!({
        "version": 1,
        "panes": panes,
    })
}

// ─── Tests ────────────────────────────────────────────────────────
