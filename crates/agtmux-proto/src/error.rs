use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire-level error codes. The serialized strings are stable protocol
/// constants; never rename them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCode {
    #[serde(rename = "E_NOT_FOUND")]
    NotFound,
    #[serde(rename = "E_REF_NOT_FOUND")]
    RefNotFound,
    #[serde(rename = "E_RUNTIME_STALE")]
    RuntimeStale,
    #[serde(rename = "E_STATE_STALE")]
    StateStale,
    #[serde(rename = "E_UPDATE_STALE")]
    UpdateStale,
    #[serde(rename = "E_DEGRADED")]
    Degraded,
    #[serde(rename = "E_PARTIAL")]
    Partial,
    #[serde(rename = "E_TIMEOUT")]
    Timeout,
    #[serde(rename = "E_CAPACITY")]
    Capacity,
    #[serde(rename = "E_INVALID_ARGS")]
    InvalidArgs,
    #[serde(rename = "E_TRANSPORT")]
    Transport,
    #[serde(rename = "E_UNSUPPORTED")]
    Unsupported,
    #[serde(rename = "E_DUPLICATE")]
    Duplicate,
    #[serde(rename = "E_HAS_REFERENCES")]
    HasReferences,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "E_NOT_FOUND",
            Self::RefNotFound => "E_REF_NOT_FOUND",
            Self::RuntimeStale => "E_RUNTIME_STALE",
            Self::StateStale => "E_STATE_STALE",
            Self::UpdateStale => "E_UPDATE_STALE",
            Self::Degraded => "E_DEGRADED",
            Self::Partial => "E_PARTIAL",
            Self::Timeout => "E_TIMEOUT",
            Self::Capacity => "E_CAPACITY",
            Self::InvalidArgs => "E_INVALID_ARGS",
            Self::Transport => "E_TRANSPORT",
            Self::Unsupported => "E_UNSUPPORTED",
            Self::Duplicate => "E_DUPLICATE",
            Self::HasReferences => "E_HAS_REFERENCES",
        }
    }

    /// True for codes a client may transparently retry after a backoff.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Capacity | Self::Transport)
    }

    /// CLI exit code category: transport-ish failures get 2, semantic
    /// failures 1.
    pub fn exit_code(self) -> i32 {
        if self.is_retryable() { 2 } else { 1 }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ErrorCode; 14] = [
        ErrorCode::NotFound,
        ErrorCode::RefNotFound,
        ErrorCode::RuntimeStale,
        ErrorCode::StateStale,
        ErrorCode::UpdateStale,
        ErrorCode::Degraded,
        ErrorCode::Partial,
        ErrorCode::Timeout,
        ErrorCode::Capacity,
        ErrorCode::InvalidArgs,
        ErrorCode::Transport,
        ErrorCode::Unsupported,
        ErrorCode::Duplicate,
        ErrorCode::HasReferences,
    ];

    #[test]
    fn serialized_form_matches_as_str() {
        for code in ALL {
            let json = serde_json::to_string(&code).expect("serialize");
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn serde_roundtrip() {
        for code in ALL {
            let json = serde_json::to_string(&code).expect("serialize");
            let back: ErrorCode = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(back, code);
        }
    }

    #[test]
    fn retryable_set() {
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::Capacity.is_retryable());
        assert!(ErrorCode::Transport.is_retryable());
        assert!(!ErrorCode::RuntimeStale.is_retryable());
        assert!(!ErrorCode::NotFound.is_retryable());
    }

    #[test]
    fn exit_codes_nonzero() {
        for code in ALL {
            assert_ne!(code.exit_code(), 0);
        }
    }
}
