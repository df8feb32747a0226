//! STOMP 1.2 over WebSocket transport for chat sessions.
//!
//! The transport owns the socket, the heart-beats and the reconnect loop. It
//! talks to the session only through a [`chat_core::TransportEndpoint`].

/// Frame codec and heart-beat negotiation.
pub mod frame;
/// Reconnecting WebSocket transport task.
pub mod transport;

pub use frame::{Decoded, Frame, FrameError, StompCommand, decode, negotiate_heart_beat};
pub use transport::{DEFAULT_HEARTBEAT_MS, HeartBeat, StompConfig, spawn_transport};
