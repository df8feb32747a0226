use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    readiness::SendRefusal,
    types::{SessionEvent, TransportRequest, TransportSignal},
};

/// Broadcast event stream type used by rendering subscribers.
pub type EventStream = broadcast::Receiver<SessionEvent>;

/// Errors returned by session channel operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
    /// The session dropped the request before answering.
    #[error("session dropped the request")]
    ReplyDropped,
}

/// Commands a session handle sends to its runtime.
#[derive(Debug)]
pub enum SessionCommand {
    /// Publish `content` if the session is ready.
    Send {
        content: String,
        reply: oneshot::Sender<Result<(), SendRefusal>>,
    },
    /// Tear the session down.
    Shutdown,
}

/// Command/event channel pair used by the runtime and its handles.
#[derive(Clone, Debug)]
pub struct SessionChannels {
    command_tx: mpsc::Sender<SessionCommand>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(
        command_buffer: usize,
        event_buffer: usize,
    ) -> (Self, mpsc::Receiver<SessionCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Subscribe to emitted session events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Send one command to the runtime.
    pub async fn send_command(&self, command: SessionCommand) -> Result<(), SessionChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SessionChannelError::CommandChannelClosed)
    }

    /// Ask the runtime to publish `content` and wait for its verdict.
    pub async fn request_send(
        &self,
        content: impl Into<String>,
    ) -> Result<Result<(), SendRefusal>, SessionChannelError> {
        let (reply, verdict) = oneshot::channel();
        self.send_command(SessionCommand::Send {
            content: content.into(),
            reply,
        })
        .await?;
        verdict.await.map_err(|_| SessionChannelError::ReplyDropped)
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Session side of a transport connection.
#[derive(Debug)]
pub struct TransportLink {
    pub requests: mpsc::UnboundedSender<TransportRequest>,
    pub signals: mpsc::Receiver<TransportSignal>,
}

/// Transport side of a transport connection.
#[derive(Debug)]
pub struct TransportEndpoint {
    pub requests: mpsc::UnboundedReceiver<TransportRequest>,
    pub signals: mpsc::Sender<TransportSignal>,
}

/// Create a connected link/endpoint pair.
///
/// Requests are unbounded so the synchronous manager never waits on the
/// transport; signals are bounded by `signal_buffer`.
pub fn transport_link(signal_buffer: usize) -> (TransportLink, TransportEndpoint) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (signal_tx, signal_rx) = mpsc::channel(signal_buffer.max(1));
    (
        TransportLink {
            requests: request_tx,
            signals: signal_rx,
        },
        TransportEndpoint {
            requests: request_rx,
            signals: signal_tx,
        },
    )
}
