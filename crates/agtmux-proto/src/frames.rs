use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Streaming frames delivered to an attached viewer session.
///
/// Per pane, the concatenation of `content` across delivered frames must
/// equal the pane's ground-truth output between the attach cursor and the
/// last delivered cursor, ignoring the initial `attached` marker and any
/// `reset` markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalFrame {
    /// Emitted exactly once per successful attach and after every forced
    /// resync. Carries the cursor anchor and current geometry.
    Attached {
        cursor: u64,
        cols: u16,
        rows: u16,
        cursor_x: u16,
        cursor_y: u16,
    },
    /// Absolute screen snapshot anchored at `cursor`.
    Output { cursor: u64, content: String },
    /// Appended bytes since the last delivered cursor.
    Delta { cursor: u64, content: String },
    /// Screen cleared; content replaces any buffered output.
    Reset { cursor: u64, content: String },
    /// Terminal condition; the session must be considered detached.
    Error { code: ErrorCode, message: String },
}

impl TerminalFrame {
    /// Cursor carried by this frame, if any.
    pub fn cursor(&self) -> Option<u64> {
        match self {
            Self::Attached { cursor, .. }
            | Self::Output { cursor, .. }
            | Self::Delta { cursor, .. }
            | Self::Reset { cursor, .. } => Some(*cursor),
            Self::Error { .. } => None,
        }
    }

    /// Payload content, if any.
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::Output { content, .. }
            | Self::Delta { content, .. }
            | Self::Reset { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_form_uses_snake_case_type() {
        let frame = TerminalFrame::Delta {
            cursor: 42,
            content: "hi".into(),
        };
        let json = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(json["type"], "delta");
        assert_eq!(json["cursor"], 42);
        assert_eq!(json["content"], "hi");
    }

    #[test]
    fn attached_roundtrip() {
        let frame = TerminalFrame::Attached {
            cursor: 7,
            cols: 120,
            rows: 40,
            cursor_x: 3,
            cursor_y: 12,
        };
        let json = serde_json::to_string(&frame).expect("serialize");
        let back: TerminalFrame = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, frame);
    }

    #[test]
    fn error_frame_is_terminal_and_cursorless() {
        let frame = TerminalFrame::Error {
            code: ErrorCode::RefNotFound,
            message: "session expired".into(),
        };
        assert!(frame.is_terminal());
        assert_eq!(frame.cursor(), None);
        assert_eq!(frame.content(), None);
    }

    #[test]
    fn content_accessor() {
        let frame = TerminalFrame::Reset {
            cursor: 0,
            content: "cleared".into(),
        };
        assert_eq!(frame.content(), Some("cleared"));
        assert!(!frame.is_terminal());
    }
}
