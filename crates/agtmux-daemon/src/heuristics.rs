//! Tap-derived heuristic signals: prompt shapes, approval prompts, error
//! banners, and output silence. These feed the resolver at the heuristic
//! tier and only matter while the deterministic sources are quiet.

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;

use agtmux_core::types::{HeuristicObservation, HeuristicSignal, PaneIdentity};

/// Silence window after which a pane is considered idle (seconds).
pub const OUTPUT_SILENCE_SECS: u64 = 10;

/// Recent-output window for the running signal (seconds).
pub const OUTPUT_ACTIVE_SECS: u64 = 2;

pub struct HeuristicSampler {
    prompt_re: Regex,
    approval_re: Regex,
    error_re: Regex,
}

impl HeuristicSampler {
    pub fn new() -> Self {
        Self {
            prompt_re: Regex::new(r"[$%>❯›]\s*$")
                .unwrap_or_else(|e| unreachable!("static regex must compile: {e}")),
            approval_re: Regex::new(r"(?i)(\[y/n\]|\(y/n\)|allow this|approve\?|do you want to proceed)")
                .unwrap_or_else(|e| unreachable!("static regex must compile: {e}")),
            error_re: Regex::new(r"(?i)(^error[:\s]|panicked at|traceback \(most recent call last\))")
                .unwrap_or_else(|e| unreachable!("static regex must compile: {e}")),
        }
    }

    /// Sample the capture tail of one pane into heuristic observations.
    pub fn sample(
        &self,
        pane: &PaneIdentity,
        capture_tail: &[String],
        last_output_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Vec<HeuristicObservation> {
        let mut signals = Vec::new();
        let last_line = capture_tail
            .iter()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(String::as_str)
            .unwrap_or("");

        if self.approval_re.is_match(last_line) {
            signals.push(HeuristicSignal::ApprovalPromptDetected);
        } else if self.prompt_re.is_match(last_line) {
            signals.push(HeuristicSignal::PromptDetected);
        }

        if capture_tail.iter().any(|l| self.error_re.is_match(l)) {
            signals.push(HeuristicSignal::ErrorBannerDetected);
        }

        match last_output_at {
            Some(at) if now.signed_duration_since(at) <= TimeDelta::seconds(OUTPUT_ACTIVE_SECS as i64) => {
                signals.push(HeuristicSignal::OutputActive);
            }
            Some(at)
                if now.signed_duration_since(at)
                    >= TimeDelta::seconds(OUTPUT_SILENCE_SECS as i64) =>
            {
                signals.push(HeuristicSignal::OutputSilence);
            }
            _ => {}
        }

        signals
            .into_iter()
            .map(|signal| HeuristicObservation {
                signal,
                pane: pane.clone(),
                observed_at: now,
            })
            .collect()
    }
}

impl Default for HeuristicSampler {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Tests ────────────────────────────────────────────────────────
