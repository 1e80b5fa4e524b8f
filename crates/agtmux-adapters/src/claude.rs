//! Claude Code adapter: hook-event translation and pane classification.

use regex::Regex;

use agtmux_core::types::{
    AgentType, EventKind, EventSource, EvidenceTier, NormalizedEvent,
};

use crate::registry::{
    AgentAdapter, Classification, PaneProbe, RawAdapterEvent, TranslateError, WEIGHT_CMD_MATCH,
    WEIGHT_CONTENT_MATCH, WEIGHT_TITLE_MATCH,
};

pub struct ClaudeAdapter {
    content_re: Regex,
}

impl ClaudeAdapter {
    pub fn new() -> Self {
        Self {
            // The boxed banner or the interrupt hint at the tail of the
            // capture identify a live Claude Code TUI.
            content_re: Regex::new(r"(?i)(╭.*claude code|esc to interrupt)")
                .unwrap_or_else(|e| unreachable!("static regex must compile: {e}")),
        }
    }

    /// Map Claude hook types to normalized event kinds.
    fn kind_for(hook_type: &str) -> Option<EventKind> {
        match hook_type {
            "session_start" => Some(EventKind::LifecycleRunning),
            "session_end" | "stop" => Some(EventKind::LifecycleCompleted),
            "tool_start" | "pre_tool_use" => Some(EventKind::ToolStart),
            "tool_end" | "post_tool_use" => Some(EventKind::ToolEnd),
            "thinking" => Some(EventKind::ThreadActive),
            "idle" => Some(EventKind::LifecycleIdle),
            "prompt" | "input_request" => Some(EventKind::LifecycleWaitingInput),
            "notification" | "permission_request" => Some(EventKind::LifecycleWaitingApproval),
            "error" => Some(EventKind::LifecycleError),
            _ => None,
        }
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentAdapter for ClaudeAdapter {
    fn agent_type(&self) -> AgentType {
        AgentType::Claude
    }

    fn classify(&self, probe: &PaneProbe<'_>) -> Option<Classification> {
        let mut confidence: f64 = 0.0;
        if probe.current_cmd.to_ascii_lowercase().contains("claude") {
            confidence = confidence.max(WEIGHT_CMD_MATCH);
        }
        if probe.pane_title.to_ascii_lowercase().contains("claude") {
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
            agent_type: AgentType::Claude,
            confidence,
            runtime_id_hint: None,
        })
    }

    fn translate(&self, raw: &RawAdapterEvent) -> Result<NormalizedEvent, TranslateError> {
        let kind = Self::kind_for(&raw.event_type).ok_or_else(|| {
            TranslateError::UnknownEventType {
                agent: AgentType::Claude,
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
