//! Core chat session contract shared between transports, runtimes and views.
//!
//! This crate defines the identity and message types, the connection
//! lifecycle, the transport-neutral connection manager, the message log, and
//! common error/channel abstractions. Nothing here performs network IO.

/// Async command/event and transport link channel primitives.
pub mod channel;
/// Stable chat error types and HTTP classification helpers.
pub mod error;
/// Sans-IO connection manager driving one broadcast session.
pub mod manager;
/// Append-only message log with live reader views.
pub mod message_log;
/// Wire frame parsing and identity defaults.
pub mod normalization;
/// Send gating predicate.
pub mod readiness;
/// Reconnect delay policy used by transports.
pub mod retry;
/// Connection lifecycle state machine.
pub mod state_machine;
/// Shared protocol types (identity, events, transport signals).
pub mod types;

pub use channel::{
    EventStream, SessionChannelError, SessionChannels, SessionCommand, TransportEndpoint,
    TransportLink, transport_link,
};
pub use error::{ChatError, ChatErrorCategory, classify_http_status};
pub use manager::{ConnectionManager, ManagerStep};
pub use message_log::{MessageLog, MessageLogView};
pub use normalization::{
    encode_outbound_message, first_non_blank, normalize_identity, normalize_identity_failure,
    normalize_inbound_frame,
};
pub use readiness::{SendRefusal, check_send_readiness};
pub use retry::{DEFAULT_RECONNECT_DELAY_MS, ReconnectPolicy};
pub use state_machine::{ConnectionStateMachine, ConnectionTrigger};
pub use types::{
    CHAT_MESSAGE_TYPE, ChannelConfig, ChatEvent, ConnectionState, Credential,
    DEFAULT_AVATAR_REF, DEFAULT_BROADCAST_TOPIC, DEFAULT_SEND_DESTINATION, DEFAULT_SENDER_NAME,
    Identity, IdentityState, SessionEvent, TransportRequest, TransportSignal,
};
