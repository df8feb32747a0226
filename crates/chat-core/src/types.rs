use std::fmt;

use serde::{Deserialize, Serialize};

/// Sender name shown when a frame carries none.
pub const DEFAULT_SENDER_NAME: &str = "Unknown";
/// Avatar reference used when a frame or profile carries none.
pub const DEFAULT_AVATAR_REF: &str = "/default-avatar.png";
/// Message-type tag stamped on every outbound chat frame.
pub const CHAT_MESSAGE_TYPE: &str = "CHAT";
/// Shared broadcast topic every participant subscribes to.
pub const DEFAULT_BROADCAST_TOPIC: &str = "/topic/public";
/// Destination outbound chat frames are published to.
pub const DEFAULT_SEND_DESTINATION: &str = "/app/chat.sendMessage";

/// Opaque bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a token, returning `None` for blank input.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_owned()))
        }
    }

    /// Raw token value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// `Authorization` header value for this token.
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Resolved profile of the local user, used to stamp outgoing messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    /// Backend user id.
    pub user_id: String,
    /// Name shown next to messages.
    pub display_name: String,
    /// Avatar path or absolute URL.
    pub avatar_ref: String,
}

/// Resolution progress of the local identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityState {
    /// The profile request has not completed yet.
    #[default]
    Pending,
    /// The profile was fetched.
    Resolved(Identity),
    /// The profile could not be fetched; sending stays disabled.
    Failed {
        /// Stable error code.
        code: String,
        /// Diagnostic message.
        message: String,
    },
}

impl IdentityState {
    /// The resolved identity, if any.
    pub fn resolved(&self) -> Option<&Identity> {
        match self {
            Self::Resolved(identity) => Some(identity),
            Self::Pending | Self::Failed { .. } => None,
        }
    }
}

/// Lifecycle of the persistent broadcast connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Nothing has been attempted yet.
    #[default]
    Idle,
    /// A handshake is in flight.
    Connecting,
    /// Handshake accepted and the broadcast subscription is live.
    Open,
    /// The connection dropped or was deactivated.
    Closed,
}

/// One chat message as carried on the broadcast channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatEvent {
    /// User id of the author.
    pub sender_id: String,
    /// Display name of the author.
    pub sender_name: String,
    /// Message text.
    pub content: String,
    /// Author avatar path or absolute URL.
    pub avatar_ref: String,
}

impl ChatEvent {
    /// Stamp `content` with the sender fields of `identity`.
    pub fn from_identity(identity: &Identity, content: impl Into<String>) -> Self {
        Self {
            sender_id: identity.user_id.clone(),
            sender_name: identity.display_name.clone(),
            content: content.into(),
            avatar_ref: identity.avatar_ref.clone(),
        }
    }
}

/// Topic and destination names of the single broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Topic subscribed to on every entry to `Open`.
    pub topic: String,
    /// Destination outbound frames are published to.
    pub destination: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_BROADCAST_TOPIC.to_owned(),
            destination: DEFAULT_SEND_DESTINATION.to_owned(),
        }
    }
}

/// Discrete signals a transport reports to the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// A handshake attempt started (`attempt` is 0 for the first one).
    Connecting { attempt: u32 },
    /// The server accepted the handshake.
    Connected,
    /// A frame arrived for a subscription.
    Message {
        /// Destination the frame was delivered from.
        destination: String,
        /// Raw frame body.
        body: String,
    },
    /// The server or socket reported an error.
    Error { message: String },
    /// The socket closed.
    Disconnected { reason: String },
}

/// Work the connection manager asks the transport to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportRequest {
    /// Open a subscription on `destination`.
    Subscribe { id: String, destination: String },
    /// Drop a subscription.
    Unsubscribe { id: String },
    /// Publish `body` to `destination`.
    Publish { destination: String, body: String },
    /// Stop the transport for good, including any pending reconnect.
    Deactivate,
}

/// Events emitted by a chat session to rendering layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection lifecycle transition.
    StateChanged { state: ConnectionState },
    /// Local identity became known.
    IdentityResolved(Identity),
    /// Local identity could not be resolved.
    IdentityFailed { code: String, message: String },
    /// A message was appended to the log at `index`.
    MessageAppended { index: usize, event: ChatEvent },
    /// An inbound frame was dropped.
    FrameDiscarded { reason: String },
    /// Transport reported an error; reconnect is handled by the transport.
    TransportError { message: String },
    /// The session was torn down; no further events follow.
    Terminated,
}
