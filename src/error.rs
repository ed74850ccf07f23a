//! Error types for a3s-debug

use thiserror::Error;

/// Errors that can occur while bridging a debug session
#[derive(Debug, Error)]
pub enum DebugError {
    /// Unknown session id, or the session has already stopped
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Command is not valid in the session's current state
    #[error("Bad state for '{command}': {reason}")]
    BadState {
        command: String,
        reason: String,
    },

    /// The adapter process or stream could not be acquired or initialized
    #[error("Launch failed for {language} program '{program}': {reason}")]
    LaunchFailed {
        language: String,
        program: String,
        reason: String,
    },

    /// Malformed frame or message from the adapter
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No response within the configured bound
    #[error("Request '{command}' timed out after {millis}ms")]
    Timeout {
        command: String,
        millis: u64,
    },

    /// The session ended while the request was outstanding
    #[error("Session terminated: {0}")]
    Terminated(String),

    /// The adapter answered with `success: false`
    #[error("Adapter rejected '{command}': {message}")]
    Adapter {
        command: String,
        message: String,
    },

    /// Transport I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Bus back-end failed to accept a notification
    #[error("Failed to publish '{name}': {reason}")]
    Publish {
        name: String,
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DebugError {
    pub(crate) fn bad_state(command: &str, reason: impl Into<String>) -> Self {
        Self::BadState {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error ends the session it occurred on
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Protocol(_) | Self::Timeout { .. } | Self::Terminated(_)
        )
    }
}

/// Result type alias for debug bridge operations
pub type Result<T> = std::result::Result<T, DebugError>;
