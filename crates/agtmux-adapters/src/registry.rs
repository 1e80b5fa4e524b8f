//! The adapter registry: process-local registration, pane classification,
//! and raw-event translation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agtmux_core::types::{AgentType, NormalizedEvent, PaneIdentity};

// ─── Classification ──────────────────────────────────────────────

/// Signal weights for classification confidence. A single strong signal
/// is enough; weights do not stack.
pub const WEIGHT_CMD_MATCH: f64 = 0.95;
pub const WEIGHT_TITLE_MATCH: f64 = 0.7;
pub const WEIGHT_CONTENT_MATCH: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub agent_type: AgentType,
    pub confidence: f64,
    pub runtime_id_hint: Option<String>,
}

/// Pane evidence available to `classify`: command name, title, and the
/// tail of recent tap content.
#[derive(Debug, Clone, Default)]
pub struct PaneProbe<'a> {
    pub current_cmd: &'a str,
    pub pane_title: &'a str,
    pub recent_content: &'a [String],
}

// ─── Raw events ──────────────────────────────────────────────────

/// An adapter-specific event before translation. `event_type` is the
/// source's own vocabulary; translation preserves it for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAdapterEvent {
    pub source: String,
    pub event_type: String,
    pub pane: PaneIdentity,
    pub session_id: Option<String>,
    pub thread_id: Option<String>,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslateError {
    #[error("no adapter registered for agent type: {0}")]
    UnknownAgent(AgentType),
    #[error("unknown event type for {agent}: {event_type}")]
    UnknownEventType { agent: AgentType, event_type: String },
}

// ─── Adapter trait ───────────────────────────────────────────────

/// One agent CLI's adapter. Pure: adapters hold no IO and may consume
/// bytes at their own rate; the registry never blocks taps.
pub trait AgentAdapter: Send + Sync {
    fn agent_type(&self) -> AgentType;

    /// Classify a pane from command/title/content evidence. `None` when
    /// nothing matches.
    fn classify(&self, probe: &PaneProbe<'_>) -> Option<Classification>;

    /// Translate a raw event into the normalized form.
    fn translate(&self, raw: &RawAdapterEvent) -> Result<NormalizedEvent, TranslateError>;
}

// ─── Registry ────────────────────────────────────────────────────

pub struct AdapterRegistry {
    adapters: Vec<Box<dyn AgentAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    /// Registry pre-loaded with the claude, codex, and gemini adapters.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::claude::ClaudeAdapter::new()));
        registry.register(Box::new(crate::codex::CodexAdapter::new()));
        registry.register(Box::new(crate::gemini::GeminiAdapter::new()));
        registry
    }

    pub fn register(&mut self, adapter: Box<dyn AgentAdapter>) {
        self.adapters.push(adapter);
    }

    pub fn registered_types(&self) -> Vec<AgentType> {
        self.adapters.iter().map(|a| a.agent_type()).collect()
    }

    /// Classify a pane: every adapter votes, best confidence wins.
    pub fn classify(&self, probe: &PaneProbe<'_>) -> Option<Classification> {
        self.adapters
            .iter()
            .filter_map(|a| a.classify(probe))
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Translate a raw event via the adapter registered for `agent_type`.
    pub fn translate(
        &self,
        agent_type: AgentType,
        raw: &RawAdapterEvent,
    ) -> Result<NormalizedEvent, TranslateError> {
        let adapter = self
            .adapters
            .iter()
            .find(|a| a.agent_type() == agent_type)
            .ok_or(TranslateError::UnknownAgent(agent_type))?;
        adapter.translate(raw)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use agtmux_core::types::{EventKind, EvidenceTier};

    fn pane() -> PaneIdentity {
        PaneIdentity::new("local", "main", "@0", "%1")
    }

    fn raw(source: &str, event_type: &str) -> RawAdapterEvent {
        RawAdapterEvent {
            source: source.to_owned(),
            event_type: event_type.to_owned(),
            pane: pane(),
            session_id: Some("sess-1".into()),
            thread_id: None,
            payload: serde_json::json!({}),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn defaults_register_three_adapters() {
        let registry = AdapterRegistry::with_defaults();
        let types = registry.registered_types();
        assert_eq!(types.len(), 3);
        assert!(types.contains(&AgentType::Claude));
        assert!(types.contains(&AgentType::Codex));
        assert!(types.contains(&AgentType::Gemini));
    }

    #[test]
    fn classify_by_command_wins() {
        let registry = AdapterRegistry::with_defaults();
        let probe = PaneProbe {
            current_cmd: "claude",
            pane_title: "",
            recent_content: &[],
        };
        let c = registry.classify(&probe).expect("classified");
        assert_eq!(c.agent_type, AgentType::Claude);
        assert!((c.confidence - WEIGHT_CMD_MATCH).abs() < f64::EPSILON);
    }

    #[test]
    fn classify_prefers_strongest_signal() {
        let registry = AdapterRegistry::with_defaults();
        // Title mentions codex, but the command is claude — command wins.
        let probe = PaneProbe {
            current_cmd: "claude",
            pane_title: "codex session",
            recent_content: &[],
        };
        let c = registry.classify(&probe).expect("classified");
        assert_eq!(c.agent_type, AgentType::Claude);
    }

    #[test]
    fn classify_plain_shell_is_none() {
        let registry = AdapterRegistry::with_defaults();
        let probe = PaneProbe {
            current_cmd: "zsh",
            pane_title: "~/src",
            recent_content: &[],
        };
        assert!(registry.classify(&probe).is_none());
    }

    #[test]
    fn translate_routes_by_agent_type() {
        let registry = AdapterRegistry::with_defaults();
        let ev = registry
            .translate(AgentType::Claude, &raw("claude_hooks", "tool_start"))
            .expect("translated");
        assert_eq!(ev.kind, EventKind::ToolStart);
        assert_eq!(ev.tier, EvidenceTier::Deterministic);
        assert_eq!(ev.event_type, "tool_start", "original string preserved");
    }

    #[test]
    fn translate_unknown_agent_fails() {
        let registry = AdapterRegistry::new();
        let err = registry
            .translate(AgentType::Claude, &raw("claude_hooks", "tool_start"))
            .expect_err("no adapters");
        assert_eq!(err, TranslateError::UnknownAgent(AgentType::Claude));
    }
}
