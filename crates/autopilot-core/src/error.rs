//! Error types for the autopilot supervisor.
//!
//! Per-target failures (transport, timeout, remote evaluation) are ordinary
//! values here: the session coordinator records them and moves on to the next
//! target. "No targets available" and "another process holds the lock" are not
//! errors at all and have no variant.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the autopilot library.
#[derive(Debug, Error)]
pub enum AutopilotError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    // Transport / RPC errors
    #[error("Transport error on target {target_id}: {message}")]
    Transport { target_id: String, message: String },

    #[error("Connection to target {target_id} closed: {reason}")]
    ConnectionClosed { target_id: String, reason: String },

    #[error("RPC {method} on target {target_id} timed out after {timeout:?}")]
    RpcTimeout {
        target_id: String,
        method: String,
        timeout: Duration,
    },

    #[error("Target not connected: {target_id}")]
    TargetNotFound { target_id: String },

    #[error("Remote error{}: {message}", code_suffix(.code))]
    RemoteError { code: Option<i64>, message: String },

    #[error("Evaluation failed in target {target_id}: {message}")]
    RemoteEvaluation { target_id: String, message: String },

    #[error("Malformed protocol frame: {message}")]
    MalformedFrame { message: String },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Other(String),
}

fn code_suffix(code: &Option<i64>) -> String {
    code.map(|c| format!(" {c}")).unwrap_or_default()
}

/// Result type alias for autopilot operations.
pub type Result<T> = std::result::Result<T, AutopilotError>;

impl From<std::io::Error> for AutopilotError {
    fn from(err: std::io::Error) -> Self {
        AutopilotError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for AutopilotError {
    fn from(err: serde_json::Error) -> Self {
        AutopilotError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for AutopilotError {
    fn from(err: rusqlite::Error) -> Self {
        AutopilotError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl AutopilotError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        AutopilotError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Wrap a websocket error with the target it happened on.
    pub fn transport(target_id: impl Into<String>, err: impl std::fmt::Display) -> Self {
        AutopilotError::Transport {
            target_id: target_id.into(),
            message: err.to_string(),
        }
    }

    /// Errors the next scheduler tick can be expected to clear on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AutopilotError::Network { .. }
                | AutopilotError::Transport { .. }
                | AutopilotError::ConnectionClosed { .. }
                | AutopilotError::RpcTimeout { .. }
                | AutopilotError::RemoteEvaluation { .. }
        )
    }

    /// Whether the error means the target's connection is gone.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AutopilotError::Transport { .. } | AutopilotError::ConnectionClosed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AutopilotError::RpcTimeout {
            target_id: "page-1".into(),
            method: "Runtime.evaluate".into(),
            timeout: Duration::from_millis(250),
        };
        assert_eq!(
            err.to_string(),
            "RPC Runtime.evaluate on target page-1 timed out after 250ms"
        );
    }

    #[test]
    fn test_remote_error_display_with_and_without_code() {
        let with_code = AutopilotError::RemoteError {
            code: Some(-32000),
            message: "Cannot find context".into(),
        };
        assert_eq!(with_code.to_string(), "Remote error -32000: Cannot find context");

        let without = AutopilotError::RemoteError {
            code: None,
            message: "boom".into(),
        };
        assert_eq!(without.to_string(), "Remote error: boom");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(AutopilotError::RpcTimeout {
            target_id: "t".into(),
            method: "Runtime.evaluate".into(),
            timeout: Duration::from_secs(1),
        }
        .is_retryable());
        assert!(AutopilotError::RemoteEvaluation {
            target_id: "t".into(),
            message: "ReferenceError".into(),
        }
        .is_retryable());
        assert!(!AutopilotError::Config {
            message: "bad".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_transport_classification() {
        assert!(AutopilotError::transport("t", "reset by peer").is_transport());
        assert!(!AutopilotError::TargetNotFound {
            target_id: "t".into()
        }
        .is_transport());
    }
}
