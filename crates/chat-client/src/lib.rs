//! Chat session client: identity resolution over HTTP and the session runtime
//! that drives a [`chat_core::ConnectionManager`] over the STOMP transport.

/// One-shot profile lookup for the local user.
pub mod identity;
/// Session task, owner handle and configuration.
pub mod runtime;

pub use identity::{DEFAULT_USERS_PATH, IdentityResolver};
pub use runtime::{
    ChatSessionHandle, DEFAULT_SOCKET_PATH, SessionConfig, SessionCredentials,
    TRANSPORT_STOP_TIMEOUT, spawn_session, spawn_session_with_transport,
};
