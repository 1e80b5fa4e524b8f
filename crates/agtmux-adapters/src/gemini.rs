//! Gemini CLI adapter.

use regex::Regex;

use agtmux_core::types::{
    AgentType, EventKind, EventSource, EvidenceTier, NormalizedEvent,
};

use crate::registry::{
    AgentAdapter, Classification, PaneProbe, RawAdapterEvent, TranslateError, WEIGHT_CMD_MATCH,
    WEIGHT_CONTENT_MATCH, WEIGHT_TITLE_MATCH,
};

pub struct GeminiAdapter {
    content_re: Regex,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self {
            content_re: Regex::new(r"(?i)(gemini cli|gemini-2\.|^\s*gemini>)")
                .unwrap_or_else(|e| unreachable!("static regex must compile: {e}")),
        }
    }

    fn kind_for(event_type: &str) -> Option<EventKind> {
        match event_type {
            "run.started" => Some(EventKind::LifecycleRunning),
            "run.finished" => Some(EventKind::LifecycleCompleted),
            "run.error" => Some(EventKind::LifecycleError),
            "awaiting_input" => Some(EventKind::LifecycleWaitingInput),
            "awaiting_confirmation" => Some(EventKind::LifecycleWaitingApproval),
            "tool_call.start" => Some(EventKind::ToolStart),
            "tool_call.end" => Some(EventKind::ToolEnd),
            "idle" => Some(EventKind::LifecycleIdle),
            _ => None,
        }
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentAdapter for GeminiAdapter {
    fn agent_type(&self) -> AgentType {
        AgentType::Gemini
    }

    fn classify(&self, probe: &PaneProbe<'_>) -> Option<Classification> {
        let mut confidence: f64 = 0.0;
        if probe.current_cmd.to_ascii_lowercase().contains("gemini") {
            confidence = confidence.max(WEIGHT_CMD_MATCH);
        }
        if probe.pane_title.to_ascii_lowercase().contains("gemini") {
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
            agent_type: AgentType::Gemini,
            confidence,
            runtime_id_hint: None,
        })
    }

    fn translate(&self, raw: &RawAdapterEvent) -> Result<NormalizedEvent, TranslateError> {
        let kind = Self::kind_for(&raw.event_type).ok_or_else(|| {
            TranslateError::UnknownEventType {
                agent: AgentType::Gemini,
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
