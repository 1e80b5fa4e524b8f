//! Tap lifecycle bookkeeping: exactly one capture per pane, opened on the
//! first subscription and closed a grace period after the last one goes
//! away so rapid re-subscriptions do not churn `pipe-pane`.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;

/// Grace before the capture is closed after the last unsubscribe (seconds).
pub const TAP_CLOSE_GRACE_SECS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
struct TapState {
    subscribers: usize,
    close_at: Option<DateTime<Utc>>,
}

/// Tracks which panes need a live tap. The daemon owns the actual
/// `PaneTap` IO objects and opens/closes them on this manager's say-so.
#[derive(Debug, Default)]
pub struct TapManager {
    taps: HashMap<String, TapState>,
}

impl TapManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Returns `true` when a capture must be
    /// opened (first subscriber on a pane with no live tap).
    pub fn subscribe(&mut self, pane_key: &str) -> bool {
        match self.taps.get_mut(pane_key) {
            Some(state) => {
                state.subscribers += 1;
                // A pending grace-close is cancelled by re-subscription.
                state.close_at = None;
                false
            }
            None => {
                self.taps.insert(
                    pane_key.to_owned(),
                    TapState {
                        subscribers: 1,
                        close_at: None,
                    },
                );
                true
            }
        }
    }

    /// Drop a subscriber. The tap stays open for the grace window.
    pub fn unsubscribe(&mut self, pane_key: &str, now: DateTime<Utc>) {
        if let Some(state) = self.taps.get_mut(pane_key) {
            state.subscribers = state.subscribers.saturating_sub(1);
            if state.subscribers == 0 && state.close_at.is_none() {
                state.close_at = Some(now + TimeDelta::seconds(TAP_CLOSE_GRACE_SECS as i64));
            }
        }
    }

    /// Pane keys whose grace expired; the caller must close their taps.
    /// The entries are removed from the manager.
    pub fn due_closes(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let due: Vec<String> = self
            .taps
            .iter()
            .filter(|(_, s)| s.subscribers == 0 && s.close_at.is_some_and(|at| now >= at))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &due {
            self.taps.remove(key);
        }
        due
    }

    /// Force-drop a pane (pane removed from tmux). Returns `true` when a
    /// tap was live and must be closed now.
    pub fn remove_pane(&mut self, pane_key: &str) -> bool {
        self.taps.remove(pane_key).is_some()
    }

    pub fn is_open(&self, pane_key: &str) -> bool {
        self.taps.contains_key(pane_key)
    }

    pub fn subscriber_count(&self, pane_key: &str) -> usize {
        self.taps.get(pane_key).map_or(0, |s| s.subscribers)
    }
}

// ─── Tests ────────────────────────────────────────────────────────
