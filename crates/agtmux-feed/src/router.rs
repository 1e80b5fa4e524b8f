//! Terminal feed router: viewer sessions over pane buffers.
//!
//! Sessions are registry entries keyed by opaque ids. Frame sequencing
//! per session: one `attached` anchor, one absolute `output` snapshot,
//! then `delta` frames; `reset` re-anchors after buffer resets and
//! evictions. Cancelling a stream call is safe — re-supplying the last
//! delivered cursor resumes with no lost bytes.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;

use agtmux_proto::error::ErrorCode;
use agtmux_proto::frames::TerminalFrame;

use crate::buffer::{PaneBuffer, ReadResult};

/// Consecutive failures within the cooldown that trip degradation.
pub const FAILURE_THRESHOLD: u32 = 3;

/// Window within which consecutive failures count (seconds).
pub const DEGRADE_COOLDOWN_SECS: u64 = 8;

/// Server-side resize debounce (milliseconds).
pub const RESIZE_DEBOUNCE_MS: i64 = 80;

/// Retry delay for the nth consecutive failure: `min(4000, 250·2^(n−1))`.
pub fn retry_delay_ms(n: u32) -> u64 {
    if n == 0 {
        return 0;
    }
    let exp = (n - 1).min(16);
    (250u64 << exp).min(4000)
}

// ─── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("pane {0} is degraded")]
    Degraded(String),
    #[error("viewer session not found: {0}")]
    SessionNotFound(String),
}

impl RouterError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Degraded(_) => ErrorCode::Degraded,
            Self::SessionNotFound(_) => ErrorCode::RefNotFound,
        }
    }
}

// ─── Session ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerSession {
    pub session_id: String,
    pub target: String,
    pub pane_id: String,
    /// Runtime incarnation the viewer bound to. Write Guard surfaces
    /// sessions whose runtime has since changed as stale.
    pub runtime_id_at_attach: String,
    /// Cursor of the last delivered chunk.
    pub last_cursor: Option<u64>,
    /// Buffer epoch last acknowledged via `attached`/`reset`.
    pub epoch_seen: u32,
    pub attached_sent: bool,
    pub snapshot_sent: bool,
    pub cols: u16,
    pub rows: u16,
}

impl ViewerSession {
    pub fn pane_key(&self) -> String {
        pane_key(&self.target, &self.pane_id)
    }
}

pub fn pane_key(target: &str, pane_id: &str) -> String {
    format!("{target}/{pane_id}")
}

// ─── Degradation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct PaneDegrade {
    consecutive_failures: u32,
    first_failure_at: Option<DateTime<Utc>>,
    degraded: bool,
}

impl PaneDegrade {
    fn record_failure(&mut self, now: DateTime<Utc>) {
        let window = TimeDelta::seconds(DEGRADE_COOLDOWN_SECS as i64);
        match self.first_failure_at {
            Some(first) if now.signed_duration_since(first) <= window => {
                self.consecutive_failures += 1;
            }
            _ => {
                self.first_failure_at = Some(now);
                self.consecutive_failures = 1;
            }
        }
        if self.consecutive_failures >= FAILURE_THRESHOLD {
            self.degraded = true;
        }
    }
}

// ─── Router ───────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct FeedRouter {
    sessions: HashMap<String, ViewerSession>,
    degrade: HashMap<String, PaneDegrade>,
    next_session: u64,
}

impl FeedRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a viewer session. Refused while the pane is degraded.
    pub fn attach(
        &mut self,
        target: &str,
        pane_id: &str,
        runtime_id: &str,
        cols: u16,
        rows: u16,
    ) -> Result<String, RouterError> {
        let key = pane_key(target, pane_id);
        if self.is_degraded(&key) {
            return Err(RouterError::Degraded(key));
        }

        self.next_session += 1;
        let session_id = format!("vs-{}", self.next_session);
        self.sessions.insert(
            session_id.clone(),
            ViewerSession {
                session_id: session_id.clone(),
                target: target.to_owned(),
                pane_id: pane_id.to_owned(),
                runtime_id_at_attach: runtime_id.to_owned(),
                last_cursor: None,
                epoch_seen: 0,
                attached_sent: false,
                snapshot_sent: false,
                cols,
                rows,
            },
        );
        Ok(session_id)
    }

    /// Produce the next frame for a session against its pane buffer, or
    /// `None` when the session is fully caught up (the dispatcher then
    /// long-polls).
    ///
    /// `cursor` re-anchors the session first: passing the last delivered
    /// cursor after a cancelled call resumes the sequence losslessly.
    pub fn next_frame(
        &mut self,
        session_id: &str,
        buffer: &PaneBuffer,
        cursor: Option<u64>,
        lines: u32,
    ) -> Result<Option<TerminalFrame>, RouterError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RouterError::SessionNotFound(session_id.to_owned()))?;

        if let Some(c) = cursor {
            session.last_cursor = Some(c);
        }

        // First call: the attach synchronization frame.
        if !session.attached_sent {
            session.attached_sent = true;
            session.epoch_seen = buffer.epoch();
            return Ok(Some(TerminalFrame::Attached {
                cursor: buffer.head_cursor(),
                cols: buffer.cols(),
                rows: buffer.rows(),
                cursor_x: buffer.cursor_x(),
                cursor_y: buffer.cursor_y(),
            }));
        }

        // Buffer reset since the session last synced: re-anchor.
        if buffer.epoch() != session.epoch_seen {
            session.epoch_seen = buffer.epoch();
            session.snapshot_sent = true;
            session.last_cursor = buffer.latest_cursor();
            return Ok(Some(TerminalFrame::Reset {
                cursor: buffer.latest_cursor().unwrap_or_else(|| buffer.head_cursor()),
                content: buffer.snapshot_tail(lines as usize),
            }));
        }

        // Second call: one absolute screen snapshot.
        if !session.snapshot_sent {
            session.snapshot_sent = true;
            session.last_cursor = buffer.latest_cursor();
            return Ok(Some(TerminalFrame::Output {
                cursor: buffer.latest_cursor().unwrap_or_else(|| buffer.head_cursor()),
                content: buffer.snapshot_tail(lines as usize),
            }));
        }

        match buffer.read_after(session.last_cursor) {
            ReadResult::UpToDate => Ok(None),
            ReadResult::Data {
                content,
                last_cursor,
            } => {
                session.last_cursor = Some(last_cursor);
                Ok(Some(TerminalFrame::Delta {
                    cursor: last_cursor,
                    content,
                }))
            }
            ReadResult::Gap => {
                // The session's cursor fell off the front; re-anchor with
                // a reset snapshot.
                session.last_cursor = buffer.latest_cursor();
                Ok(Some(TerminalFrame::Reset {
                    cursor: buffer.latest_cursor().unwrap_or_else(|| buffer.head_cursor()),
                    content: buffer.snapshot_tail(lines as usize),
                }))
            }
        }
    }

    /// Idempotent detach. Returns `true` when a session was removed.
    pub fn detach(&mut self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn session(&self, session_id: &str) -> Option<&ViewerSession> {
        self.sessions.get(session_id)
    }

    /// Number of live viewer sessions (drives the fast poll mode).
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn sessions_for_pane(&self, target: &str, pane_id: &str) -> Vec<&ViewerSession> {
        let key = pane_key(target, pane_id);
        self.sessions
            .values()
            .filter(|s| s.pane_key() == key)
            .collect()
    }

    /// Drop every session bound to a removed pane. Subsequent `stream`
    /// calls for those ids fail with `E_REF_NOT_FOUND`.
    pub fn drop_pane_sessions(&mut self, target: &str, pane_id: &str) -> Vec<String> {
        let key = pane_key(target, pane_id);
        let ids: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.pane_key() == key)
            .map(|s| s.session_id.clone())
            .collect();
        for id in &ids {
            self.sessions.remove(id);
        }
        ids
    }

    /// Sessions attached under a runtime that is no longer current.
    pub fn stale_sessions(
        &self,
        target: &str,
        pane_id: &str,
        current_runtime: &str,
    ) -> Vec<&ViewerSession> {
        self.sessions_for_pane(target, pane_id)
            .into_iter()
            .filter(|s| s.runtime_id_at_attach != current_runtime)
            .collect()
    }

    // ── Degradation ─────────────────────────────────────────────

    pub fn record_failure(&mut self, target: &str, pane_id: &str, now: DateTime<Utc>) {
        let key = pane_key(target, pane_id);
        self.degrade.entry(key).or_default().record_failure(now);
    }

    /// A success clears the failure streak and lifts degradation.
    pub fn record_success(&mut self, target: &str, pane_id: &str) {
        self.degrade.remove(&pane_key(target, pane_id));
    }

    pub fn is_degraded(&self, key: &str) -> bool {
        self.degrade.get(key).is_some_and(|d| d.degraded)
    }

    pub fn failure_count(&self, target: &str, pane_id: &str) -> u32 {
        self.degrade
            .get(&pane_key(target, pane_id))
            .map_or(0, |d| d.consecutive_failures)
    }
}

// ─── Resize debounce ─────────────────────────────────────────────

/// Debounces resize requests per pane: only the final requested size
/// within the window is applied.
#[derive(Debug, Default)]
pub struct ResizeDebouncer {
    pending: HashMap<String, (u16, u16, DateTime<Utc>)>,
}

impl ResizeDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resize request; supersedes any pending one for the pane.
    pub fn request(&mut self, pane_key: &str, cols: u16, rows: u16, now: DateTime<Utc>) {
        let deadline = now + TimeDelta::milliseconds(RESIZE_DEBOUNCE_MS);
        self.pending
            .insert(pane_key.to_owned(), (cols, rows, deadline));
    }

    /// Resizes whose debounce expired, coalesced last-wins. Entries are
    /// removed.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<(String, u16, u16)> {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, (_, _, deadline))| now >= *deadline)
            .map(|(k, _)| k.clone())
            .collect();
        due.into_iter()
            .filter_map(|k| self.pending.remove(&k).map(|(c, r, _)| (k, c, r)))
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// ─── Tests ────────────────────────────────────────────────────────
