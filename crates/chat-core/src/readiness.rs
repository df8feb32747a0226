use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ConnectionState, Identity};

/// Reason a send request was refused. Advisory only; nothing was published.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Error)]
pub enum SendRefusal {
    #[error("not connected to the chat server")]
    NotConnected,
    #[error("sender identity is not known yet")]
    IdentityUnknown,
    #[error("message is empty")]
    EmptyContent,
}

impl SendRefusal {
    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::IdentityUnknown => "identity_unknown",
            Self::EmptyContent => "empty_content",
        }
    }
}

/// Readiness predicate gating every publish.
///
/// Both asynchronous preconditions (handshake and identity) are checked at
/// call time, connection first.
pub fn check_send_readiness<'a>(
    state: ConnectionState,
    identity: Option<&'a Identity>,
    content: &str,
) -> Result<&'a Identity, SendRefusal> {
    if state != ConnectionState::Open {
        return Err(SendRefusal::NotConnected);
    }
    let identity = identity.ok_or(SendRefusal::IdentityUnknown)?;
    if content.trim().is_empty() {
        return Err(SendRefusal::EmptyContent);
    }
    Ok(identity)
}
