use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionState;

/// Broad error category used for user-facing handling and recovery decisions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorCategory {
    /// Invalid input, missing configuration, or unsupported state.
    Config,
    /// Authentication/authorization failure.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited or timed out by the backend.
    RateLimited,
    /// Serialization/deserialization failure.
    Serialization,
    /// Local credential persistence failure.
    Storage,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload emitted across the session event boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    /// High-level error category.
    pub category: ChatErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ChatError {
    /// Construct a new chat error.
    pub fn new(
        category: ChatErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: ConnectionState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChatErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while connection is {current:?}"),
        )
    }

    /// Build the error returned for any input after teardown.
    pub fn terminated(action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChatErrorCategory::Internal,
            "session_terminated",
            format!("cannot run '{action}' after the session was torn down"),
        )
    }
}

/// Map HTTP status codes to chat error categories.
pub fn classify_http_status(status: u16) -> ChatErrorCategory {
    match status {
        401 | 403 => ChatErrorCategory::Auth,
        408 | 429 => ChatErrorCategory::RateLimited,
        400..=499 => ChatErrorCategory::Config,
        500..=599 => ChatErrorCategory::Network,
        _ => ChatErrorCategory::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(401), ChatErrorCategory::Auth);
        assert_eq!(classify_http_status(403), ChatErrorCategory::Auth);
        assert_eq!(classify_http_status(429), ChatErrorCategory::RateLimited);
        assert_eq!(classify_http_status(404), ChatErrorCategory::Config);
        assert_eq!(classify_http_status(503), ChatErrorCategory::Network);
        assert_eq!(classify_http_status(700), ChatErrorCategory::Internal);
    }

    #[test]
    fn keeps_invalid_state_error_code_stable() {
        let err = ChatError::invalid_state(ConnectionState::Idle, "handshake_accepted");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(err.category, ChatErrorCategory::Internal);
        assert!(err.message.contains("Idle"));
    }
}
