//! Error taxonomy for the dispatch core
//!
//! Steady-state failures are recovered locally by the sender and dispatcher
//! loops; only startup failures terminate the process.

use thiserror::Error;

/// Main error type for dispatch operations
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Network unreachable")]
    NetworkUnreachable,

    #[error("Session connect failed: {message}")]
    SessionConnectFailed { message: String },

    #[error("Send timed out after {timeout_secs}s")]
    SendTimeout { timeout_secs: u64 },

    #[error("Send failed: {message}")]
    SendFailed { message: String },

    #[error("No handler registered for command: {name}")]
    CommandRoutingFailed { name: String },

    #[error("Command handler failed: {message}")]
    CommandHandlerFailed { message: String },
}

impl DispatchError {
    /// Create a session connect error
    pub fn connect_failed<S: Into<String>>(message: S) -> Self {
        Self::SessionConnectFailed {
            message: message.into(),
        }
    }

    /// Create a send error
    pub fn send_failed<S: Into<String>>(message: S) -> Self {
        Self::SendFailed {
            message: message.into(),
        }
    }

    /// Create a handler error
    pub fn handler_failed<S: Into<String>>(message: S) -> Self {
        Self::CommandHandlerFailed {
            message: message.into(),
        }
    }
}

/// Sanitize a message destined for the remote endpoint.
///
/// Redacts common credential patterns and caps the length so a verbose
/// collaborator error cannot leak secrets or bloat a response body.
pub fn sanitize_remote_message(message: &str) -> String {
    let mut sanitized = message.to_string();

    sanitized = regex::Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+")
        .unwrap()
        .replace_all(&sanitized, "${1}=***")
        .to_string();

    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let max_content_len = 500 - truncate_suffix.len();
        sanitized = format!("{}{}", &sanitized[..max_content_len], truncate_suffix);
    }

    sanitized
}

/// Result type for dispatch operations
pub type DispatchResult<T> = Result<T, DispatchError>;
