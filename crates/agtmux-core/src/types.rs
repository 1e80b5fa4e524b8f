use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─── Target ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Local,
    Ssh,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Ssh => "ssh",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetHealth {
    Ok,
    Degraded,
    Down,
    #[default]
    Unknown,
}

/// Identity of a configured target (local host or ssh alias).
///
/// `target_name` is the user-visible key; `target_id` is immutable across
/// renames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIdentity {
    pub target_id: String,
    pub target_name: String,
    pub kind: TargetKind,
    pub connection_ref: Option<String>,
    pub is_default: bool,
    pub health: TargetHealth,
}

// ─── Pane identity ────────────────────────────────────────────────

/// Globally unique pane key: `(target, session_name, window_id, pane_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaneIdentity {
    pub target: String,
    pub session_name: String,
    pub window_id: String,
    pub pane_id: String,
}

impl PaneIdentity {
    pub fn new(
        target: impl Into<String>,
        session_name: impl Into<String>,
        window_id: impl Into<String>,
        pane_id: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            session_name: session_name.into(),
            window_id: window_id.into(),
            pane_id: pane_id.into(),
        }
    }
}

impl fmt::Display for PaneIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.target, self.session_name, self.window_id, self.pane_id
        )
    }
}

// ─── Agent ────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum AgentType {
    Claude,
    Codex,
    Gemini,
    Other,
    #[default]
    None,
}

impl AgentType {
    pub const KNOWN: [Self; 3] = [Self::Claude, Self::Codex, Self::Gemini];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Other => "other",
            Self::None => "none",
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "gemini" => Ok(Self::Gemini),
            "other" => Ok(Self::Other),
            "none" => Ok(Self::None),
            _ => Err(CoreError::InvalidAgentType(s.to_owned())),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPresence {
    Managed,
    None,
    #[default]
    Unknown,
}

// ─── Presence & Evidence ──────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanePresence {
    Managed,
    Unmanaged,
    #[default]
    Unknown,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceMode {
    Deterministic,
    Heuristic,
    #[default]
    None,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceTier {
    Deterministic,
    #[default]
    Heuristic,
}

// ─── Activity & Attention ─────────────────────────────────────────

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
#[non_exhaustive]
pub enum ActivityState {
    #[default]
    Unknown = 0,
    Idle = 1,
    Running = 2,
    WaitingInput = 3,
    WaitingApproval = 4,
    Error = 5,
}

impl ActivityState {
    /// Precedence order (descending): higher-priority states take precedence.
    pub const PRECEDENCE_DESC: [Self; 6] = [
        Self::Error,
        Self::WaitingApproval,
        Self::WaitingInput,
        Self::Running,
        Self::Idle,
        Self::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Idle => "idle",
            Self::Running => "running",
            Self::WaitingInput => "waiting_input",
            Self::WaitingApproval => "waiting_approval",
            Self::Error => "error",
        }
    }

    /// Single display word for lists: both waiting states collapse to
    /// `"Waiting"`.
    pub fn display_word(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::WaitingInput | Self::WaitingApproval => "Waiting",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for ActivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "waiting_input" => Ok(Self::WaitingInput),
            "waiting_approval" => Ok(Self::WaitingApproval),
            "error" => Ok(Self::Error),
            _ => Err(CoreError::InvalidActivityState(s.to_owned())),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionState {
    #[default]
    None,
    InformationalCompleted,
    ActionRequiredInput,
    ActionRequiredApproval,
    ActionRequiredError,
}

impl AttentionState {
    /// True for the `action_required_*` states that force the snapshot
    /// category to `attention`.
    pub fn is_actionable(self) -> bool {
        matches!(
            self,
            Self::ActionRequiredInput | Self::ActionRequiredApproval | Self::ActionRequiredError
        )
    }
}

// ─── Session label ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLabelSource {
    Override,
    PaneTitle,
    SessionName,
}

/// Threshold below which `session_last_active_at` is suppressed in
/// client-facing projections.
pub const SESSION_TIME_CONFIDENCE_FLOOR: f64 = 0.65;

// ─── PaneItem ─────────────────────────────────────────────────────

/// The resolved view of one pane: identity, topology metadata, and the
/// resolver's authoritative state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaneItem {
    pub identity: PaneIdentity,
    pub window_name: String,
    pub pane_title: String,
    pub current_cmd: String,
    pub current_path: String,
    pub presence: PanePresence,
    pub agent_type: AgentType,
    pub agent_presence: AgentPresence,
    pub activity_state: ActivityState,
    pub attention_state: AttentionState,
    pub evidence_mode: EvidenceMode,
    /// Opaque token identifying the current agent runtime incarnation.
    /// Re-issued when the adapter observes a restart.
    pub runtime_id: String,
    pub reason_code: String,
    pub last_event_type: String,
    pub last_event_at: Option<DateTime<Utc>>,
    pub session_label: Option<String>,
    pub session_label_source: Option<SessionLabelSource>,
    pub session_last_active_at: Option<DateTime<Utc>>,
    pub session_time_confidence: f64,
    pub updated_at: DateTime<Utc>,
}

impl PaneItem {
    /// An unresolved pane: identity known from tmux topology, nothing else.
    pub fn unresolved(identity: PaneIdentity, now: DateTime<Utc>) -> Self {
        Self {
            identity,
            window_name: String::new(),
            pane_title: String::new(),
            current_cmd: String::new(),
            current_path: String::new(),
            presence: PanePresence::Unknown,
            agent_type: AgentType::None,
            agent_presence: AgentPresence::Unknown,
            activity_state: ActivityState::Unknown,
            attention_state: AttentionState::None,
            evidence_mode: EvidenceMode::None,
            runtime_id: String::new(),
            reason_code: String::new(),
            last_event_type: String::new(),
            last_event_at: None,
            session_label: None,
            session_label_source: None,
            session_last_active_at: None,
            session_time_confidence: 0.0,
            updated_at: now,
        }
    }
}

// ─── Events ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Tmux,
    AgentAdapter,
    Synthetic,
}

/// Discriminator for [`NormalizedEvent`]. The original adapter-specific
/// `event_type` string is preserved alongside for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum EventKind {
    LifecycleRunning,
    LifecycleIdle,
    LifecycleWaitingInput,
    LifecycleWaitingApproval,
    LifecycleError,
    LifecycleCompleted,
    ThreadActive,
    ThreadIdle,
    ToolStart,
    ToolEnd,
}

impl EventKind {
    pub const ALL: [Self; 10] = [
        Self::LifecycleRunning,
        Self::LifecycleIdle,
        Self::LifecycleWaitingInput,
        Self::LifecycleWaitingApproval,
        Self::LifecycleError,
        Self::LifecycleCompleted,
        Self::ThreadActive,
        Self::ThreadIdle,
        Self::ToolStart,
        Self::ToolEnd,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LifecycleRunning => "lifecycle.running",
            Self::LifecycleIdle => "lifecycle.idle",
            Self::LifecycleWaitingInput => "lifecycle.waiting_input",
            Self::LifecycleWaitingApproval => "lifecycle.waiting_approval",
            Self::LifecycleError => "lifecycle.error",
            Self::LifecycleCompleted => "lifecycle.completed",
            Self::ThreadActive => "thread.active",
            Self::ThreadIdle => "thread.idle",
            Self::ToolStart => "tool_start",
            Self::ToolEnd => "tool_end",
        }
    }

    /// Activity state implied by this event kind.
    pub fn activity(self) -> ActivityState {
        match self {
            Self::LifecycleRunning | Self::ThreadActive | Self::ToolStart => ActivityState::Running,
            Self::LifecycleIdle | Self::ThreadIdle | Self::LifecycleCompleted | Self::ToolEnd => {
                ActivityState::Idle
            }
            Self::LifecycleWaitingInput => ActivityState::WaitingInput,
            Self::LifecycleWaitingApproval => ActivityState::WaitingApproval,
            Self::LifecycleError => ActivityState::Error,
        }
    }

    /// True for kinds that signal task completion (informational attention).
    pub fn is_completion(self) -> bool {
        matches!(self, Self::LifecycleCompleted)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lifecycle.running" => Ok(Self::LifecycleRunning),
            "lifecycle.idle" => Ok(Self::LifecycleIdle),
            "lifecycle.waiting_input" => Ok(Self::LifecycleWaitingInput),
            "lifecycle.waiting_approval" => Ok(Self::LifecycleWaitingApproval),
            "lifecycle.error" => Ok(Self::LifecycleError),
            "lifecycle.completed" => Ok(Self::LifecycleCompleted),
            "thread.active" => Ok(Self::ThreadActive),
            "thread.idle" => Ok(Self::ThreadIdle),
            "tool_start" => Ok(Self::ToolStart),
            "tool_end" => Ok(Self::ToolEnd),
            _ => Err(CoreError::InvalidEventKind(s.to_owned())),
        }
    }
}

/// Common event form produced by adapter translation. Only the resolver
/// consumes these; they are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub kind: EventKind,
    /// Original adapter-specific event type string, kept for diagnostics.
    pub event_type: String,
    pub source: EventSource,
    pub tier: EvidenceTier,
    pub pane: PaneIdentity,
    pub thread_id: Option<String>,
    pub cwd: Option<String>,
    pub runtime_id_hint: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl NormalizedEvent {
    /// Deterministic adapter event with defaults for the optional fields.
    pub fn deterministic(kind: EventKind, pane: PaneIdentity, received_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            event_type: kind.as_str().to_owned(),
            source: EventSource::AgentAdapter,
            tier: EvidenceTier::Deterministic,
            pane,
            thread_id: None,
            cwd: None,
            runtime_id_hint: None,
            received_at,
        }
    }
}

// ─── Heuristic observations ───────────────────────────────────────

/// Tap-derived heuristic signals, lower tier than adapter events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeuristicSignal {
    /// Shell or agent prompt regex matched at the tail of the capture.
    PromptDetected,
    /// An approval/confirmation prompt matched.
    ApprovalPromptDetected,
    /// Bytes flowed through the tap recently.
    OutputActive,
    /// No bytes for the silence window.
    OutputSilence,
    /// Error banner matched in the capture.
    ErrorBannerDetected,
}

impl HeuristicSignal {
    pub fn activity(self) -> ActivityState {
        match self {
            Self::PromptDetected => ActivityState::WaitingInput,
            Self::ApprovalPromptDetected => ActivityState::WaitingApproval,
            Self::OutputActive => ActivityState::Running,
            Self::OutputSilence => ActivityState::Idle,
            Self::ErrorBannerDetected => ActivityState::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicObservation {
    pub signal: HeuristicSignal,
    pub pane: PaneIdentity,
    pub observed_at: DateTime<Utc>,
}

// ─── Errors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("invalid agent type: {0}")]
    InvalidAgentType(String),
    #[error("invalid activity state: {0}")]
    InvalidActivityState(String),
    #[error("invalid event kind: {0}")]
    InvalidEventKind(String),
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_state_serde_is_snake_case() {
        let json = serde_json::to_string(&ActivityState::WaitingApproval).expect("serialize");
        assert_eq!(json, r#""waiting_approval""#);
        let back: ActivityState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, ActivityState::WaitingApproval);
    }

    #[test]
    fn activity_state_precedence_order() {
        let prec = ActivityState::PRECEDENCE_DESC;
        assert_eq!(prec[0], ActivityState::Error);
        assert_eq!(prec[5], ActivityState::Unknown);
        for pair in prec.windows(2) {
            assert!(pair[0] > pair[1], "precedence array must be descending");
        }
    }

    #[test]
    fn waiting_states_display_as_waiting() {
        assert_eq!(ActivityState::WaitingInput.display_word(), "Waiting");
        assert_eq!(ActivityState::WaitingApproval.display_word(), "Waiting");
        assert_eq!(ActivityState::Error.display_word(), "Error");
    }

    #[test]
    fn activity_state_parse_roundtrip() {
        for s in ActivityState::PRECEDENCE_DESC {
            let parsed = s.as_str().parse::<ActivityState>().expect("parse");
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn event_kind_string_roundtrip() {
        for kind in EventKind::ALL {
            let parsed = kind.as_str().parse::<EventKind>().expect("parse");
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn event_kind_activity_mapping() {
        assert_eq!(EventKind::ToolStart.activity(), ActivityState::Running);
        assert_eq!(EventKind::ThreadActive.activity(), ActivityState::Running);
        assert_eq!(
            EventKind::LifecycleWaitingApproval.activity(),
            ActivityState::WaitingApproval
        );
        assert_eq!(EventKind::LifecycleError.activity(), ActivityState::Error);
        assert_eq!(EventKind::LifecycleCompleted.activity(), ActivityState::Idle);
    }

    #[test]
    fn only_completed_is_completion() {
        for kind in EventKind::ALL {
            assert_eq!(kind.is_completion(), kind == EventKind::LifecycleCompleted);
        }
    }

    #[test]
    fn agent_type_parse_and_display() {
        for a in [
            AgentType::Claude,
            AgentType::Codex,
            AgentType::Gemini,
            AgentType::Other,
            AgentType::None,
        ] {
            assert_eq!(a.to_string().parse::<AgentType>().expect("parse"), a);
        }
        assert!("copilot".parse::<AgentType>().is_err());
    }

    #[test]
    fn attention_actionable_set() {
        assert!(AttentionState::ActionRequiredInput.is_actionable());
        assert!(AttentionState::ActionRequiredApproval.is_actionable());
        assert!(AttentionState::ActionRequiredError.is_actionable());
        assert!(!AttentionState::InformationalCompleted.is_actionable());
        assert!(!AttentionState::None.is_actionable());
    }

    #[test]
    fn pane_identity_display() {
        let id = PaneIdentity::new("local", "main", "@3", "%42");
        assert_eq!(id.to_string(), "local:main:@3:%42");
    }

    #[test]
    fn unresolved_pane_defaults() {
        let now = Utc::now();
        let pane = PaneItem::unresolved(PaneIdentity::new("local", "main", "@0", "%0"), now);
        assert_eq!(pane.presence, PanePresence::Unknown);
        assert_eq!(pane.evidence_mode, EvidenceMode::None);
        assert_eq!(pane.activity_state, ActivityState::Unknown);
        assert_eq!(pane.attention_state, AttentionState::None);
        assert!(pane.runtime_id.is_empty());
        assert_eq!(pane.updated_at, now);
    }

    #[test]
    fn normalized_event_deterministic_helper() {
        let now = Utc::now();
        let ev = NormalizedEvent::deterministic(
            EventKind::ToolStart,
            PaneIdentity::new("local", "main", "@0", "%1"),
            now,
        );
        assert_eq!(ev.tier, EvidenceTier::Deterministic);
        assert_eq!(ev.source, EventSource::AgentAdapter);
        assert_eq!(ev.event_type, "tool_start");
        assert_eq!(ev.received_at, now);
    }

    #[test]
    fn heuristic_signal_activity_mapping() {
        assert_eq!(
            HeuristicSignal::PromptDetected.activity(),
            ActivityState::WaitingInput
        );
        assert_eq!(
            HeuristicSignal::OutputActive.activity(),
            ActivityState::Running
        );
        assert_eq!(
            HeuristicSignal::OutputSilence.activity(),
            ActivityState::Idle
        );
    }

    #[test]
    fn target_health_orders_ok_first() {
        assert!(TargetHealth::Ok < TargetHealth::Degraded);
        assert!(TargetHealth::Degraded < TargetHealth::Down);
    }

    #[test]
    fn pane_item_serde_roundtrip() {
        let now = Utc::now();
        let mut pane = PaneItem::unresolved(PaneIdentity::new("local", "dev", "@1", "%7"), now);
        pane.presence = PanePresence::Managed;
        pane.agent_type = AgentType::Claude;
        pane.activity_state = ActivityState::Running;
        pane.evidence_mode = EvidenceMode::Deterministic;
        pane.runtime_id = "rt-1".into();

        let json = serde_json::to_string(&pane).expect("serialize");
        let back: PaneItem = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(pane, back);
        assert!(json.contains(r#""activity_state":"running""#));
        assert!(json.contains(r#""evidence_mode":"deterministic""#));
    }
}
