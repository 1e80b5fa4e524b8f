//! RPC surface: request and response shapes for the Unix-socket dispatcher.
//!
//! Requests are adjacently tagged (`method` / `params`) so the dispatcher
//! can route without decoding variant bodies it does not know. Mutating
//! requests carry a `request_ref` idempotency token and optional write
//! guards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agtmux_core::attention::AttentionItem;
use agtmux_core::guard::{GuardReport, WriteGuards};
use agtmux_core::types::{
    AgentType, PaneItem, SessionLabelSource, TargetHealth, TargetIdentity, TargetKind,
};

use crate::error::ErrorCode;
use crate::frames::TerminalFrame;

// ─── Capabilities ─────────────────────────────────────────────────

pub const TERMINAL_PROXY_MODE: &str = "daemon-proxy-pty-poc";
pub const TERMINAL_FRAME_PROTOCOL: &str = "terminal-stream-v1";

/// Versioned capability envelope. Clients choose their transport by
/// probing this; missing capabilities trigger graceful fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityEnvelope {
    pub embedded_terminal: bool,
    pub terminal_attach: bool,
    pub terminal_write: bool,
    pub terminal_stream: bool,
    pub terminal_read: bool,
    pub terminal_proxy_mode: Option<String>,
    pub terminal_frame_protocol: Option<String>,
}

impl Default for CapabilityEnvelope {
    fn default() -> Self {
        Self {
            embedded_terminal: true,
            terminal_attach: true,
            terminal_write: true,
            terminal_stream: true,
            terminal_read: true,
            terminal_proxy_mode: Some(TERMINAL_PROXY_MODE.to_owned()),
            terminal_frame_protocol: Some(TERMINAL_FRAME_PROTOCOL.to_owned()),
        }
    }
}

// ─── Requests ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KillMode {
    Key,
    Signal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Request {
    AddTarget {
        name: String,
        kind: TargetKind,
        #[serde(default)]
        connection_ref: Option<String>,
        #[serde(default)]
        is_default: bool,
    },
    RemoveTarget {
        name: String,
    },
    ConnectTarget {
        name: String,
    },
    FetchSnapshot,
    FetchCapabilities,
    FetchAttention,
    Acknowledge {
        id: String,
    },
    AcknowledgeAll,
    /// Structured lifecycle event pushed by an agent adapter source
    /// (hook script, app-server bridge). `event_type` stays in the
    /// source's own vocabulary; the daemon translates it.
    IngestEvent {
        source: String,
        agent_type: AgentType,
        event_type: String,
        target: String,
        pane_id: String,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        thread_id: Option<String>,
        #[serde(default)]
        payload: serde_json::Value,
    },
    SendText {
        target: String,
        pane_id: String,
        text: String,
        request_ref: String,
        #[serde(default)]
        enter: bool,
        #[serde(default)]
        paste: bool,
        #[serde(default)]
        guards: WriteGuards,
    },
    Kill {
        target: String,
        pane_id: String,
        request_ref: String,
        mode: KillMode,
        #[serde(default)]
        signal: Option<String>,
        #[serde(default)]
        guards: WriteGuards,
    },
    ViewOutput {
        target: String,
        pane_id: String,
        request_ref: String,
        lines: u32,
    },
    TerminalAttach {
        target: String,
        pane_id: String,
        #[serde(default)]
        guards: WriteGuards,
    },
    TerminalWrite {
        session_id: String,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        key: Option<String>,
        #[serde(default)]
        bytes: Option<Vec<u8>>,
        #[serde(default)]
        enter: bool,
        #[serde(default)]
        paste: bool,
    },
    TerminalStream {
        session_id: String,
        #[serde(default)]
        cursor: Option<u64>,
        lines: u32,
    },
    TerminalRead {
        target: String,
        pane_id: String,
        #[serde(default)]
        cursor: Option<u64>,
        lines: u32,
    },
    TerminalResize {
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        pane_id: Option<String>,
        cols: u16,
        rows: u16,
    },
    TerminalDetach {
        session_id: String,
    },
    RenameSession {
        target: String,
        session_name: String,
        new_name: String,
        request_ref: String,
        #[serde(default)]
        guards: WriteGuards,
    },
    RenamePane {
        target: String,
        pane_id: String,
        title: String,
        request_ref: String,
        #[serde(default)]
        guards: WriteGuards,
    },
    CreatePane {
        target: String,
        pane_id: String,
        #[serde(default)]
        vertical: bool,
        request_ref: String,
        #[serde(default)]
        guards: WriteGuards,
    },
    KillPane {
        target: String,
        pane_id: String,
        request_ref: String,
        #[serde(default)]
        guards: WriteGuards,
    },
    KillSession {
        target: String,
        session_name: String,
        request_ref: String,
        #[serde(default)]
        guards: WriteGuards,
    },
}

impl Request {
    /// Idempotency token, present on every mutating request.
    pub fn request_ref(&self) -> Option<&str> {
        match self {
            Self::SendText { request_ref, .. }
            | Self::Kill { request_ref, .. }
            | Self::ViewOutput { request_ref, .. }
            | Self::RenameSession { request_ref, .. }
            | Self::RenamePane { request_ref, .. }
            | Self::CreatePane { request_ref, .. }
            | Self::KillPane { request_ref, .. }
            | Self::KillSession { request_ref, .. } => Some(request_ref),
            _ => None,
        }
    }

    /// Write guards attached to this request, if the verb is guarded.
    pub fn guards(&self) -> Option<&WriteGuards> {
        match self {
            Self::SendText { guards, .. }
            | Self::Kill { guards, .. }
            | Self::TerminalAttach { guards, .. }
            | Self::RenameSession { guards, .. }
            | Self::RenamePane { guards, .. }
            | Self::CreatePane { guards, .. }
            | Self::KillPane { guards, .. }
            | Self::KillSession { guards, .. } => Some(guards),
            _ => None,
        }
    }

    /// True for verbs that mutate pane/session/target state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::AddTarget { .. }
                | Self::RemoveTarget { .. }
                | Self::SendText { .. }
                | Self::Kill { .. }
                | Self::RenameSession { .. }
                | Self::RenamePane { .. }
                | Self::CreatePane { .. }
                | Self::KillPane { .. }
                | Self::KillSession { .. }
                | Self::TerminalWrite { .. }
        )
    }
}

// ─── Responses ────────────────────────────────────────────────────

/// Result of a guarded mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub result_code: String,
    pub action_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Observed pane values at guard evaluation time; present for guarded
    /// verbs, including `force_stale` bypasses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<GuardReport>,
}

impl ActionResponse {
    pub fn ok(action_id: impl Into<String>) -> Self {
        Self {
            result_code: "ok".into(),
            action_id: action_id.into(),
            error_code: None,
            message: None,
            observed: None,
        }
    }

    pub fn error(action_id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            result_code: "error".into(),
            action_id: action_id.into(),
            error_code: Some(code),
            message: Some(message.into()),
            observed: None,
        }
    }

    #[must_use]
    pub fn with_observed(mut self, observed: GuardReport) -> Self {
        self.observed = Some(observed);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.result_code == "ok"
    }
}

/// Snapshot category of one pane row. `action_required_*` attention
/// overrides the activity categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaneCategory {
    Attention,
    Running,
    Idle,
    Unmanaged,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPane {
    pub pane: PaneItem,
    pub category: PaneCategory,
    /// Single display word ("Running", "Waiting", "Error", …).
    pub display_state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub target: String,
    pub session_name: String,
    pub session_label: Option<String>,
    pub session_label_source: Option<SessionLabelSource>,
    pub pinned: bool,
    pub health: TargetHealth,
    pub last_active_at: Option<DateTime<Utc>>,
    pub time_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub target: String,
    pub session_name: String,
    pub window_id: String,
    pub window_name: String,
}

/// Dashboard snapshot: deterministic and idempotent for identical inputs,
/// so clients can poll-back-off on equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub targets: Vec<TargetIdentity>,
    pub sessions: Vec<SessionSummary>,
    pub windows: Vec<WindowSummary>,
    pub panes: Vec<SnapshotPane>,
    /// Set when any target returned partial results this cycle.
    #[serde(default)]
    pub partial_results: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachResponse {
    pub session_id: String,
    pub result_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Response {
    Ok,
    Target(TargetIdentity),
    Targets(Vec<TargetIdentity>),
    Snapshot(Snapshot),
    Capabilities(CapabilityEnvelope),
    Action(ActionResponse),
    Output {
        result_code: String,
        action_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    Attach(AttachResponse),
    Frame(TerminalFrame),
    Attention {
        review: Vec<AttentionItem>,
        informational: Vec<AttentionItem>,
    },
    AckCount {
        acknowledged: u32,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl Response {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
