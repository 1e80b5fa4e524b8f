//! Attention derivation and the review/informational queues.
//!
//! Derivation is a pure function of the resolved activity state and the
//! latest event. The queue layers dedup, bounds, and acknowledgement on
//! top of resolved-state transitions.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ActivityState, AttentionState, PaneIdentity};

/// Repeat signals within this window re-mark the existing unread item
/// instead of adding a duplicate (seconds).
pub const DEDUP_WINDOW_SECS: u64 = 30;

/// Maximum items retained per stream; oldest evicted from the tail.
pub const QUEUE_LIMIT: usize = 250;

const COMPLETION_SIGNALS: &[&str] = &["complete", "finished", "exit", "stop", "session_end"];

fn is_completion_signal(last_event_type: &str) -> bool {
    let lower = last_event_type.to_ascii_lowercase();
    COMPLETION_SIGNALS.iter().any(|s| lower.contains(s))
}

/// Derive attention state from activity + the latest event. Pure, no IO.
///
/// Actionable states map directly from the waiting/error activity; a
/// completion event with no pending action yields the informational state.
pub fn derive_attention(
    activity: ActivityState,
    last_event_type: &str,
    completion: bool,
) -> AttentionState {
    match activity {
        ActivityState::WaitingInput => AttentionState::ActionRequiredInput,
        ActivityState::WaitingApproval => AttentionState::ActionRequiredApproval,
        ActivityState::Error => AttentionState::ActionRequiredError,
        _ if completion || is_completion_signal(last_event_type) => {
            AttentionState::InformationalCompleted
        }
        _ => AttentionState::None,
    }
}

// ─── Queue types ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionKind {
    TaskCompleted,
    NeedsInput,
    NeedsApproval,
    Error,
}

impl AttentionKind {
    /// Map an attention state to its queue kind; `None` for the quiet state.
    pub fn from_state(state: AttentionState) -> Option<Self> {
        match state {
            AttentionState::None => None,
            AttentionState::InformationalCompleted => Some(Self::TaskCompleted),
            AttentionState::ActionRequiredInput => Some(Self::NeedsInput),
            AttentionState::ActionRequiredApproval => Some(Self::NeedsApproval),
            AttentionState::ActionRequiredError => Some(Self::Error),
        }
    }

    pub fn is_actionable(self) -> bool {
        !matches!(self, Self::TaskCompleted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionItem {
    pub id: String,
    pub kind: AttentionKind,
    pub pane: PaneIdentity,
    pub runtime_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub summary: String,
    pub unread: bool,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// What [`AttentionQueue::observe_transition`] did with a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    /// A new item was added; carries its id.
    Added(String),
    /// An existing unread item inside the dedup window was re-marked.
    RemarkedUnread(String),
    /// Nothing actionable or informational in this transition.
    Ignored,
}

// ─── Queue ───────────────────────────────────────────────────────

/// Two ordered lists (newest first): *review* (actionable) and
/// *informational* (completed).
#[derive(Debug, Default)]
pub struct AttentionQueue {
    review: Vec<AttentionItem>,
    informational: Vec<AttentionItem>,
    next_id: u64,
}

impl AttentionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn review(&self) -> &[AttentionItem] {
        &self.review
    }

    pub fn informational(&self) -> &[AttentionItem] {
        &self.informational
    }

    /// Feed one resolved-state transition into the queue.
    ///
    /// Emits a review item when a non-actionable state transitions to an
    /// actionable one, and an informational item on completion. Repeat
    /// signals within [`DEDUP_WINDOW_SECS`] re-mark the existing unread
    /// item. An older unread item for the same `(pane, kind)` outside the
    /// window is superseded so at most one unread actionable item exists
    /// per key.
    pub fn observe_transition(
        &mut self,
        pane: &PaneIdentity,
        prev: AttentionState,
        new: AttentionState,
        runtime_id: Option<&str>,
        summary: &str,
        now: DateTime<Utc>,
    ) -> Emission {
        if prev == new {
            return Emission::Ignored;
        }
        let Some(kind) = AttentionKind::from_state(new) else {
            return Emission::Ignored;
        };

        if kind.is_actionable() {
            if prev.is_actionable() && AttentionKind::from_state(prev) == Some(kind) {
                return Emission::Ignored;
            }
            self.emit(Stream::Review, kind, pane, runtime_id, summary, now)
        } else {
            self.emit(Stream::Informational, kind, pane, runtime_id, summary, now)
        }
    }

    fn stream_mut(&mut self, stream: Stream) -> &mut Vec<AttentionItem> {
        match stream {
            Stream::Review => &mut self.review,
            Stream::Informational => &mut self.informational,
        }
    }

    fn emit(
        &mut self,
        stream: Stream,
        kind: AttentionKind,
        pane: &PaneIdentity,
        runtime_id: Option<&str>,
        summary: &str,
        now: DateTime<Utc>,
    ) -> Emission {
        let window = TimeDelta::seconds(DEDUP_WINDOW_SECS as i64);

        // Dedup against the existing unread item for the same (pane, kind).
        let items = self.stream_mut(stream);
        if let Some(existing) = items
            .iter_mut()
            .find(|i| i.pane.pane_id == pane.pane_id && i.kind == kind && i.acknowledged_at.is_none())
        {
            if now.signed_duration_since(existing.created_at) <= window {
                existing.unread = true;
                return Emission::RemarkedUnread(existing.id.clone());
            }
            // Outside the window: supersede the old item.
            existing.unread = false;
        }

        self.next_id += 1;
        let id = format!("attn-{}", self.next_id);
        let item = AttentionItem {
            id: id.clone(),
            kind,
            pane: pane.clone(),
            runtime_id: runtime_id.map(str::to_owned),
            created_at: now,
            summary: summary.to_owned(),
            unread: true,
            acknowledged_at: None,
        };

        let items = self.stream_mut(stream);
        items.insert(0, item);
        if items.len() > QUEUE_LIMIT {
            items.truncate(QUEUE_LIMIT);
        }
        Emission::Added(id)
    }

    /// Acknowledge one item by id. Returns `false` for unknown ids.
    pub fn acknowledge(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        for item in self.review.iter_mut().chain(self.informational.iter_mut()) {
            if item.id == id {
                item.unread = false;
                if item.acknowledged_at.is_none() {
                    item.acknowledged_at = Some(now);
                }
                return true;
            }
        }
        false
    }

    /// Acknowledge every currently non-acked item in both streams.
    /// Returns the number of items acknowledged.
    pub fn acknowledge_all(&mut self, now: DateTime<Utc>) -> usize {
        let mut count = 0;
        for item in self.review.iter_mut().chain(self.informational.iter_mut()) {
            if item.acknowledged_at.is_none() {
                item.unread = false;
                item.acknowledged_at = Some(now);
                count += 1;
            }
        }
        count
    }

    /// Count of unread items across both streams.
    pub fn unread_count(&self) -> usize {
        self.review
            .iter()
            .chain(self.informational.iter())
            .filter(|i| i.unread)
            .count()
    }

    /// Drop every item belonging to a removed pane.
    pub fn remove_pane(&mut self, pane_id: &str) {
        self.review.retain(|i| i.pane.pane_id != pane_id);
        self.informational.retain(|i| i.pane.pane_id != pane_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Review,
    Informational,
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn pane(id: &str) -> PaneIdentity {
        PaneIdentity::new("local", "main", "@0", id)
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    // ── Derivation ──────────────────────────────────────────────

    #[test]
    fn waiting_input_derives_action_required() {
        let a = derive_attention(ActivityState::WaitingInput, "prompt", false);
        assert_eq!(a, AttentionState::ActionRequiredInput);
    }

    #[test]
    fn error_derives_action_required() {
        let a = derive_attention(ActivityState::Error, "lifecycle.error", false);
        assert_eq!(a, AttentionState::ActionRequiredError);
    }

    #[test]
    fn completion_flag_derives_informational() {
        let a = derive_attention(ActivityState::Running, "lifecycle.completed", true);
        assert_eq!(a, AttentionState::InformationalCompleted);
    }

    #[test]
    fn completion_string_match_derives_informational() {
        let a = derive_attention(ActivityState::Idle, "task-finished", false);
        assert_eq!(a, AttentionState::InformationalCompleted);
    }

    #[test]
    fn pending_action_beats_completion() {
        // waiting_approval wins even when the event string mentions "finished"
        let a = derive_attention(ActivityState::WaitingApproval, "finished", false);
        assert_eq!(a, AttentionState::ActionRequiredApproval);
    }

    #[test]
    fn plain_running_derives_none() {
        let a = derive_attention(ActivityState::Running, "tool_start", false);
        assert_eq!(a, AttentionState::None);
    }

    // ── Queue emission ──────────────────────────────────────────

    #[test]
    fn transition_into_waiting_emits_review_item() {
        let mut q = AttentionQueue::new();
        let e = q.observe_transition(
            &pane("%1"),
            AttentionState::None,
            AttentionState::ActionRequiredInput,
            Some("rt-1"),
            "agent waiting for input",
            t0(),
        );
        assert!(matches!(e, Emission::Added(_)));
        assert_eq!(q.review().len(), 1);
        assert!(q.informational().is_empty());
        assert!(q.review()[0].unread);
        assert_eq!(q.review()[0].kind, AttentionKind::NeedsInput);
        assert_eq!(q.review()[0].runtime_id.as_deref(), Some("rt-1"));
    }

    #[test]
    fn completion_emits_informational_item() {
        let mut q = AttentionQueue::new();
        let e = q.observe_transition(
            &pane("%1"),
            AttentionState::None,
            AttentionState::InformationalCompleted,
            None,
            "task completed",
            t0(),
        );
        assert!(matches!(e, Emission::Added(_)));
        assert!(q.review().is_empty());
        assert_eq!(q.informational().len(), 1);
        assert_eq!(q.informational()[0].kind, AttentionKind::TaskCompleted);
    }

    #[test]
    fn no_emission_without_transition() {
        let mut q = AttentionQueue::new();
        let e = q.observe_transition(
            &pane("%1"),
            AttentionState::ActionRequiredInput,
            AttentionState::ActionRequiredInput,
            None,
            "",
            t0(),
        );
        assert_eq!(e, Emission::Ignored);
        assert!(q.review().is_empty());
    }

    #[test]
    fn clearing_attention_emits_nothing() {
        let mut q = AttentionQueue::new();
        let e = q.observe_transition(
            &pane("%1"),
            AttentionState::ActionRequiredInput,
            AttentionState::None,
            None,
            "",
            t0(),
        );
        assert_eq!(e, Emission::Ignored);
    }

    // ── Dedup ───────────────────────────────────────────────────

    #[test]
    fn repeat_within_window_remarks_existing() {
        let mut q = AttentionQueue::new();
        q.observe_transition(
            &pane("%1"),
            AttentionState::None,
            AttentionState::ActionRequiredInput,
            None,
            "first",
            t0(),
        );

        // Acknowledge is not involved; the item merely stops being unread
        // when the state clears and re-enters.
        let t1 = t0() + TimeDelta::seconds(5);
        let e = q.observe_transition(
            &pane("%1"),
            AttentionState::None,
            AttentionState::ActionRequiredInput,
            None,
            "second",
            t1,
        );
        assert!(matches!(e, Emission::RemarkedUnread(_)));
        assert_eq!(q.review().len(), 1, "no duplicate inside the window");
        assert!(q.review()[0].unread);
    }

    #[test]
    fn repeat_after_window_adds_second_item() {
        let mut q = AttentionQueue::new();
        q.observe_transition(
            &pane("%1"),
            AttentionState::None,
            AttentionState::ActionRequiredInput,
            None,
            "first",
            t0(),
        );

        let t1 = t0() + TimeDelta::seconds(DEDUP_WINDOW_SECS as i64 + 1);
        let e = q.observe_transition(
            &pane("%1"),
            AttentionState::None,
            AttentionState::ActionRequiredInput,
            None,
            "late repeat",
            t1,
        );
        assert!(matches!(e, Emission::Added(_)));
        assert_eq!(q.review().len(), 2);

        // At most one unread actionable item per (pane, kind).
        let unread: Vec<_> = q.review().iter().filter(|i| i.unread).collect();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].summary, "late repeat");
    }

    #[test]
    fn different_kinds_do_not_dedup() {
        let mut q = AttentionQueue::new();
        q.observe_transition(
            &pane("%1"),
            AttentionState::None,
            AttentionState::ActionRequiredInput,
            None,
            "input",
            t0(),
        );
        q.observe_transition(
            &pane("%1"),
            AttentionState::ActionRequiredInput,
            AttentionState::ActionRequiredApproval,
            None,
            "approval",
            t0() + TimeDelta::seconds(1),
        );
        assert_eq!(q.review().len(), 2);
    }

    #[test]
    fn different_panes_do_not_dedup() {
        let mut q = AttentionQueue::new();
        for id in ["%1", "%2"] {
            q.observe_transition(
                &pane(id),
                AttentionState::None,
                AttentionState::ActionRequiredError,
                None,
                "boom",
                t0(),
            );
        }
        assert_eq!(q.review().len(), 2);
    }

    #[test]
    fn acknowledged_item_does_not_absorb_repeats() {
        let mut q = AttentionQueue::new();
        let Emission::Added(id) = q.observe_transition(
            &pane("%1"),
            AttentionState::None,
            AttentionState::ActionRequiredInput,
            None,
            "first",
            t0(),
        ) else {
            panic!("expected Added");
        };
        assert!(q.acknowledge(&id, t0() + TimeDelta::seconds(1)));

        let e = q.observe_transition(
            &pane("%1"),
            AttentionState::None,
            AttentionState::ActionRequiredInput,
            None,
            "again",
            t0() + TimeDelta::seconds(2),
        );
        assert!(matches!(e, Emission::Added(_)));
        assert_eq!(q.review().len(), 2);
    }

    // ── Acknowledge ─────────────────────────────────────────────

    #[test]
    fn acknowledge_sets_timestamp_and_clears_unread() {
        let mut q = AttentionQueue::new();
        let Emission::Added(id) = q.observe_transition(
            &pane("%1"),
            AttentionState::None,
            AttentionState::ActionRequiredError,
            None,
            "err",
            t0(),
        ) else {
            panic!("expected Added");
        };

        let t1 = t0() + TimeDelta::seconds(3);
        assert!(q.acknowledge(&id, t1));
        let item = &q.review()[0];
        assert!(!item.unread);
        assert_eq!(item.acknowledged_at, Some(t1));
        assert_eq!(q.unread_count(), 0);
    }

    #[test]
    fn acknowledge_unknown_id_returns_false() {
        let mut q = AttentionQueue::new();
        assert!(!q.acknowledge("attn-999", t0()));
    }

    #[test]
    fn acknowledge_all_covers_both_streams() {
        let mut q = AttentionQueue::new();
        q.observe_transition(
            &pane("%1"),
            AttentionState::None,
            AttentionState::ActionRequiredInput,
            None,
            "input",
            t0(),
        );
        q.observe_transition(
            &pane("%2"),
            AttentionState::None,
            AttentionState::InformationalCompleted,
            None,
            "done",
            t0(),
        );

        let n = q.acknowledge_all(t0() + TimeDelta::seconds(1));
        assert_eq!(n, 2);
        assert_eq!(q.unread_count(), 0);
    }

    // ── Bounds & removal ────────────────────────────────────────

    #[test]
    fn queue_bounded_with_tail_eviction() {
        let mut q = AttentionQueue::new();
        for n in 0..(QUEUE_LIMIT + 20) {
            // Distinct panes so dedup never kicks in.
            q.observe_transition(
                &pane(&format!("%{n}")),
                AttentionState::None,
                AttentionState::ActionRequiredError,
                None,
                "err",
                t0() + TimeDelta::seconds(n as i64),
            );
        }
        assert_eq!(q.review().len(), QUEUE_LIMIT);
        // Newest first: the most recent pane is at the head.
        assert_eq!(
            q.review()[0].pane.pane_id,
            format!("%{}", QUEUE_LIMIT + 19)
        );
    }

    #[test]
    fn remove_pane_drops_its_items() {
        let mut q = AttentionQueue::new();
        q.observe_transition(
            &pane("%1"),
            AttentionState::None,
            AttentionState::ActionRequiredInput,
            None,
            "a",
            t0(),
        );
        q.observe_transition(
            &pane("%2"),
            AttentionState::None,
            AttentionState::InformationalCompleted,
            None,
            "b",
            t0(),
        );

        q.remove_pane("%1");
        assert!(q.review().is_empty());
        assert_eq!(q.informational().len(), 1);
    }
}
