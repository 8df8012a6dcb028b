//! Unified error types for Kiln

use thiserror::Error;

/// Transport-level failure classes that are worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    ConnectionReset,
    TimedOut,
    Other,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionReset => write!(f, "connection reset"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Other => write!(f, "transport error"),
        }
    }
}

/// HTTP status codes that indicate a transient remote failure
pub const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Unified error type for all Kiln operations
#[derive(Error, Debug)]
pub enum KilnError {
    // Registry errors
    #[error("Registry error: {0}")]
    Registry(String),

    // Validation errors
    #[error("Validation tool '{tool}' failed without output (exit code {exit_code:?})")]
    ValidationInfra {
        tool: String,
        exit_code: Option<i32>,
    },

    #[error("Failed to run tool: {0}")]
    Tool(String),

    #[error("Diagnostic parse error: {0}")]
    DiagnosticParse(String),

    // Remote collaborator errors
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Transport error ({kind}): {message}")]
    Transport { kind: TransportKind, message: String },

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Design source error: {0}")]
    DesignSource(String),

    // Workflow errors
    #[error("Phase error: {0}")]
    Phase(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl KilnError {
    /// Whether a remote call that failed with this error should be retried.
    ///
    /// Rate limits, 5xx gateway/server failures, connection resets and
    /// timeouts are transient. Everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } => RETRYABLE_STATUS_CODES.contains(status),
            Self::Transport { kind, .. } => {
                matches!(kind, TransportKind::ConnectionReset | TransportKind::TimedOut)
            }
            _ => false,
        }
    }

    /// True for the "tool produced nothing" failure that must never be read as a pass
    pub fn is_infra_failure(&self) -> bool {
        matches!(self, Self::ValidationInfra { .. })
    }
}

/// Result type alias using KilnError
pub type Result<T> = std::result::Result<T, KilnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_status_codes() {
        for status in [429, 500, 502, 503, 504] {
            let err = KilnError::Api {
                status,
                message: String::new(),
            };
            assert!(err.is_retryable(), "{} should be retryable", status);
        }

        for status in [400, 401, 403, 404, 501] {
            let err = KilnError::Api {
                status,
                message: String::new(),
            };
            assert!(!err.is_retryable(), "{} should be terminal", status);
        }
    }

    #[test]
    fn test_retryable_transport() {
        let reset = KilnError::Transport {
            kind: TransportKind::ConnectionReset,
            message: "reset by peer".to_string(),
        };
        let timeout = KilnError::Transport {
            kind: TransportKind::TimedOut,
            message: "deadline".to_string(),
        };
        let other = KilnError::Transport {
            kind: TransportKind::Other,
            message: "dns".to_string(),
        };

        assert!(reset.is_retryable());
        assert!(timeout.is_retryable());
        assert!(!other.is_retryable());
        assert!(!KilnError::Synthesis("bad output".to_string()).is_retryable());
    }

    #[test]
    fn test_infra_failure_kind() {
        let err = KilnError::ValidationInfra {
            tool: "tsc".to_string(),
            exit_code: Some(2),
        };
        assert!(err.is_infra_failure());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("tsc"));
    }
}
