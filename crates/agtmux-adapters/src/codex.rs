//! Codex adapter: app-server lifecycle events and pane classification.

use regex::Regex;

use agtmux_core::types::{
    AgentType, EventKind, EventSource, EvidenceTier, NormalizedEvent,
};

use crate::registry::{
    AgentAdapter, Classification, PaneProbe, RawAdapterEvent, TranslateError, WEIGHT_CMD_MATCH,
    WEIGHT_CONTENT_MATCH, WEIGHT_TITLE_MATCH,
};

pub struct CodexAdapter {
    content_re: Regex,
}

impl CodexAdapter {
    pub fn new() -> Self {
        Self {
            content_re: Regex::new(r"(?i)(^codex>|openai codex)")
                .unwrap_or_else(|e| unreachable!("static regex must compile: {e}")),
        }
    }

    /// Map Codex app-server event types to normalized kinds.
    fn kind_for(event_type: &str) -> Option<EventKind> {
        match event_type {
            "session.start" => Some(EventKind::LifecycleRunning),
            "session.end" => Some(EventKind::LifecycleCompleted),
            "task.running" => Some(EventKind::LifecycleRunning),
            "task.idle" => Some(EventKind::LifecycleIdle),
            "task.error" => Some(EventKind::LifecycleError),
            "turn.active" => Some(EventKind::ThreadActive),
            "turn.idle" => Some(EventKind::ThreadIdle),
            "tool.begin" => Some(EventKind::ToolStart),
            "tool.end" => Some(EventKind::ToolEnd),
            "approval.requested" | "lifecycle.waiting_approval" => {
                Some(EventKind::LifecycleWaitingApproval)
            }
            "input.requested" | "lifecycle.waiting_input" => {
                Some(EventKind::LifecycleWaitingInput)
            }
            _ => None,
        }
    }
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentAdapter for CodexAdapter {
    fn agent_type(&self) -> AgentType {
        AgentType::Codex
    }

    fn classify(&self, probe: &PaneProbe<'_>) -> Option<Classification> {
        let mut confidence: f64 = 0.0;
        if probe.current_cmd.to_ascii_lowercase().contains("codex") {
            confidence = confidence.max(WEIGHT_CMD_MATCH);
        }
        if probe.pane_title.to_ascii_lowercase().contains("codex") {
            confidence = confidence.max(WEIGHT_TITLE_MATCH);
        }
        if probe
            .recent_content
            .iter()
            .any(|line| self.content_re.is_match(line))
        {
            confidence = confidence.max(WEIGHT_CONTENT_MATCH);
        }

        if confidence == 0.0 {
            return None;
        }
        Some(Classification {
            agent_type: AgentType::Codex,
            confidence,
            runtime_id_hint: None,
        })
    }

    fn translate(&self, raw: &RawAdapterEvent) -> Result<NormalizedEvent, TranslateError> {
        let kind = Self::kind_for(&raw.event_type).ok_or_else(|| {
            TranslateError::UnknownEventType {
                agent: AgentType::Codex,
                event_type: raw.event_type.clone(),
            }
        })?;

        Ok(NormalizedEvent {
            kind,
            event_type: raw.event_type.clone(),
            source: EventSource::AgentAdapter,
            tier: EvidenceTier::Deterministic,
            pane: raw.pane.clone(),
            thread_id: raw.thread_id.clone(),
            cwd: raw
                .payload
                .get("cwd")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
            runtime_id_hint: raw.session_id.clone(),
            received_at: raw.received_at,
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────
