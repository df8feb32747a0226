use std::{future::Future, time::Duration};

use chat_core::{
    ChannelConfig, ChatError, ChatErrorCategory, ConnectionManager, ConnectionState, Credential,
    EventStream, Identity, IdentityState, ManagerStep, MessageLogView, ReconnectPolicy,
    SendRefusal, SessionChannels, SessionCommand, TransportLink, TransportSignal, transport_link,
};
use chat_stomp::{HeartBeat, StompConfig, spawn_transport};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::identity::{DEFAULT_USERS_PATH, IdentityResolver, parse_api_base};

/// Path of the broadcast WebSocket endpoint below the API base.
pub const DEFAULT_SOCKET_PATH: &str = "/ws";
/// How long teardown waits for the transport to stop before aborting it.
pub const TRANSPORT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 512;
const SIGNAL_BUFFER: usize = 256;

/// Everything needed to run one chat session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the HTTP API, e.g. `https://school.example.org`.
    pub api_base: String,
    /// Broadcast WebSocket URL. Derived from `api_base` when unset.
    pub socket_url: Option<String>,
    pub users_path: String,
    pub channel: ChannelConfig,
    pub reconnect: ReconnectPolicy,
    pub heart_beat: HeartBeat,
}

impl SessionConfig {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            socket_url: None,
            users_path: DEFAULT_USERS_PATH.to_owned(),
            channel: ChannelConfig::default(),
            reconnect: ReconnectPolicy::default(),
            heart_beat: HeartBeat::default(),
        }
    }

    /// The WebSocket URL the transport connects to.
    ///
    /// Without an explicit URL, `http`/`https` become `ws`/`wss` and `/ws` is
    /// appended to the API path.
    pub fn resolved_socket_url(&self) -> Result<Url, ChatError> {
        if let Some(explicit) = &self.socket_url {
            let url = Url::parse(explicit).map_err(|err| invalid_socket_url(explicit, err))?;
            return match url.scheme() {
                "ws" | "wss" => Ok(url),
                other => Err(ChatError::new(
                    ChatErrorCategory::Config,
                    "invalid_socket_url",
                    format!("unsupported scheme '{other}'"),
                )),
            };
        }

        let mut url = parse_api_base(&self.api_base)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        let path = format!(
            "{}{DEFAULT_SOCKET_PATH}",
            url.path().trim_end_matches('/')
        );
        url.set_path(&path);
        url.set_query(None);
        url.set_fragment(None);
        url.set_scheme(scheme).map_err(|()| {
            ChatError::new(
                ChatErrorCategory::Config,
                "invalid_socket_url",
                format!("cannot derive a websocket url from {}", self.api_base),
            )
        })?;
        Ok(url)
    }
}

fn invalid_socket_url(raw: &str, err: url::ParseError) -> ChatError {
    ChatError::new(
        ChatErrorCategory::Config,
        "invalid_socket_url",
        format!("'{raw}': {err}"),
    )
}

/// Locally stored login state. Either part may be missing; the session still
/// connects but cannot send.
#[derive(Debug, Clone, Default)]
pub struct SessionCredentials {
    pub token: Option<Credential>,
    pub user_id: Option<String>,
}

/// Owner handle of a running chat session.
///
/// Dropping the handle tears the session down.
#[derive(Debug)]
pub struct ChatSessionHandle {
    channels: SessionChannels,
    messages: MessageLogView,
    state: watch::Receiver<ConnectionState>,
    identity: watch::Receiver<IdentityState>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChatSessionHandle {
    /// Publish `content` as the local user.
    ///
    /// Refusals are advisory; nothing is queued for later.
    pub async fn send(&self, content: impl Into<String>) -> Result<(), SendRefusal> {
        match self.channels.request_send(content).await {
            Ok(verdict) => verdict,
            Err(err) => {
                debug!(error = %err, "send after session stopped");
                Err(SendRefusal::NotConnected)
            }
        }
    }

    /// Subscribe to session events emitted from now on.
    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Live view of the message log.
    pub fn messages(&self) -> MessageLogView {
        self.messages.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver notified on every connection state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn identity(&self) -> IdentityState {
        self.identity.borrow().clone()
    }

    /// Tear the session down and wait until the transport is deactivated.
    pub async fn shutdown(mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take()
            && let Err(err) = task.await
        {
            warn!(error = %err, "chat session task failed during shutdown");
        }
    }
}

impl Drop for ChatSessionHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Start a session: resolve the identity and connect the broadcast transport
/// concurrently.
pub fn spawn_session(
    config: SessionConfig,
    credentials: SessionCredentials,
) -> Result<ChatSessionHandle, ChatError> {
    let socket_url = config.resolved_socket_url()?;
    let resolver = IdentityResolver::new(&config.api_base)?.with_users_path(&config.users_path);

    let (link, endpoint) = transport_link(SIGNAL_BUFFER);
    let stomp = StompConfig {
        host: socket_url.host_str().unwrap_or("localhost").to_owned(),
        url: socket_url.to_string(),
        credential: credentials.token.clone(),
        heart_beat: config.heart_beat,
        reconnect: config.reconnect,
    };
    info!(socket_url = %stomp.url, "starting chat session");
    let transport = spawn_transport(stomp, endpoint);

    let SessionCredentials { token, user_id } = credentials;
    let identity = async move { resolver.resolve(token.as_ref(), user_id.as_deref()).await };

    Ok(spawn_session_with_transport(
        config.channel,
        identity,
        link,
        Some(transport),
    ))
}

/// Start a session over an already running transport.
///
/// `identity` is polled once; `transport` is awaited during teardown.
pub fn spawn_session_with_transport<F>(
    channel: ChannelConfig,
    identity: F,
    link: TransportLink,
    transport: Option<JoinHandle<()>>,
) -> ChatSessionHandle
where
    F: Future<Output = Result<Identity, ChatError>> + Send + 'static,
{
    let (channels, command_rx) = SessionChannels::new(COMMAND_BUFFER, EVENT_BUFFER);
    let manager = ConnectionManager::new(channel, format!("sub-{}", Uuid::new_v4()));
    let messages = manager.view();
    let (state_tx, state) = watch::channel(manager.state());
    let (identity_tx, identity_rx) = watch::channel(manager.identity().clone());
    let stop = CancellationToken::new();

    let runtime = SessionRuntime {
        manager,
        channels: channels.clone(),
        command_rx,
        link,
        state_tx,
        identity_tx,
        stop: stop.child_token(),
    };
    let task = tokio::spawn(runtime.run(identity, transport));

    ChatSessionHandle {
        channels,
        messages,
        state,
        identity: identity_rx,
        stop,
        task: Some(task),
    }
}

struct SessionRuntime {
    manager: ConnectionManager,
    channels: SessionChannels,
    command_rx: mpsc::Receiver<SessionCommand>,
    link: TransportLink,
    state_tx: watch::Sender<ConnectionState>,
    identity_tx: watch::Sender<IdentityState>,
    stop: CancellationToken,
}

impl SessionRuntime {
    async fn run<F>(mut self, identity: F, transport: Option<JoinHandle<()>>)
    where
        F: Future<Output = Result<Identity, ChatError>>,
    {
        let step = self.manager.start();
        self.apply(step);

        tokio::pin!(identity);
        let mut identity_pending = true;
        let mut transport_alive = true;

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                result = &mut identity, if identity_pending => {
                    identity_pending = false;
                    let step = self.manager.on_identity(result);
                    self.apply(step);
                }
                signal = self.link.signals.recv(), if transport_alive => {
                    let signal = signal.unwrap_or_else(|| {
                        warn!("transport stopped without being deactivated");
                        transport_alive = false;
                        TransportSignal::Disconnected {
                            reason: "transport stopped".into(),
                        }
                    });
                    let step = self.manager.on_signal(signal);
                    self.apply(step);
                }
                command = self.command_rx.recv() => match command {
                    Some(SessionCommand::Send { content, reply }) => {
                        let verdict = self.manager.send(&content).map(|request| {
                            self.apply(ManagerStep {
                                requests: vec![request],
                                events: Vec::new(),
                            });
                        });
                        let _ = reply.send(verdict);
                    }
                    Some(SessionCommand::Shutdown) | None => break,
                },
            }
        }

        info!("tearing down chat session");
        let step = self.manager.teardown();
        self.apply(step);
        if let Some(transport) = transport {
            self.await_transport(transport).await;
        }
        debug!("chat session stopped");
    }

    /// Forward requests to the transport and publish events.
    fn apply(&self, step: ManagerStep) {
        for request in step.requests {
            if self.link.requests.send(request).is_err() {
                debug!("transport already stopped; dropping request");
            }
        }

        let state = self.manager.state();
        self.state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        let identity = self.manager.identity();
        self.identity_tx.send_if_modified(|current| {
            let changed = *current != *identity;
            if changed {
                *current = identity.clone();
            }
            changed
        });

        for event in step.events {
            self.channels.emit(event);
        }
    }

    // Keep draining signals so the transport never blocks on a full buffer
    // while it shuts down.
    async fn await_transport(&mut self, transport: JoinHandle<()>) {
        let abort = transport.abort_handle();
        let mut transport = transport;
        let drain = async {
            loop {
                tokio::select! {
                    result = &mut transport => {
                        if let Err(err) = result {
                            warn!(error = %err, "transport task failed");
                        }
                        return;
                    }
                    signal = self.link.signals.recv() => {
                        if signal.is_none() {
                            let _ = (&mut transport).await;
                            return;
                        }
                    }
                }
            }
        };

        if tokio::time::timeout(TRANSPORT_STOP_TIMEOUT, drain).await.is_err() {
            warn!("transport did not stop in time; aborting");
            abort.abort();
        }
    }
}
