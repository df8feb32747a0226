use std::time::Duration;

use chat_core::{Credential, ReconnectPolicy, TransportEndpoint, TransportRequest, TransportSignal};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use tracing::{debug, info, warn};

use crate::frame::{Decoded, Frame, StompCommand, decode, negotiate_heart_beat};

/// Default heart-beat offer in both directions.
pub const DEFAULT_HEARTBEAT_MS: u64 = 10_000;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Heart-beat offer sent in CONNECT, in milliseconds. Zero disables a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartBeat {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl Default for HeartBeat {
    fn default() -> Self {
        Self {
            outgoing_ms: DEFAULT_HEARTBEAT_MS,
            incoming_ms: DEFAULT_HEARTBEAT_MS,
        }
    }
}

/// Connection settings for one STOMP transport.
#[derive(Debug, Clone)]
pub struct StompConfig {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub url: String,
    /// Virtual host sent in CONNECT.
    pub host: String,
    pub credential: Option<Credential>,
    pub heart_beat: HeartBeat,
    pub reconnect: ReconnectPolicy,
}

impl StompConfig {
    pub fn new(url: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            host: host.into(),
            credential: None,
            heart_beat: HeartBeat::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

enum Flow {
    Continue,
    Lost,
    Deactivated,
}

/// Run the transport on its own task until it is deactivated or the session
/// side of the link goes away.
pub fn spawn_transport(config: StompConfig, endpoint: TransportEndpoint) -> JoinHandle<()> {
    tokio::spawn(StompTransport { config, endpoint }.run())
}

struct StompTransport {
    config: StompConfig,
    endpoint: TransportEndpoint,
}

impl StompTransport {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            if !self.emit(TransportSignal::Connecting { attempt }).await {
                return;
            }
            if let Flow::Deactivated = self.connect_and_serve().await {
                info!("stomp transport deactivated");
                return;
            }

            let delay = self.config.reconnect.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            debug!(?delay, attempt, "waiting before reconnect");
            if let Flow::Deactivated = self.wait_before_retry(delay).await {
                info!("stomp transport deactivated during reconnect wait");
                return;
            }
        }
    }

    async fn connect_and_serve(&mut self) -> Flow {
        let url = self.config.url.clone();
        let connect = connect_async(url.as_str());
        tokio::pin!(connect);

        let socket = loop {
            tokio::select! {
                result = &mut connect => match result {
                    Ok((socket, _response)) => break socket,
                    Err(err) => {
                        warn!(%url, error = %err, "websocket connect failed");
                        return self.lost(TransportSignal::Error {
                            message: format!("connect failed: {err}"),
                        })
                        .await;
                    }
                },
                request = self.endpoint.requests.recv() => {
                    if let Flow::Deactivated = drop_or_deactivate(request) {
                        return Flow::Deactivated;
                    }
                }
            }
        };

        self.serve(socket).await
    }

    async fn serve(&mut self, socket: Socket) -> Flow {
        let (mut sink, mut stream) = socket.split();

        let offer = (
            self.config.heart_beat.outgoing_ms,
            self.config.heart_beat.incoming_ms,
        );
        let authorization = self.config.credential.as_ref().map(Credential::bearer_header);
        let connect = Frame::connect(&self.config.host, offer, authorization);
        if let Err(err) = sink.send(WsMessage::Text(connect.encode())).await {
            return self
                .lost(TransportSignal::Error {
                    message: format!("failed to send CONNECT: {err}"),
                })
                .await;
        }

        // The handshake itself has no deadline; only negotiated heart-beats arm one.
        let mut established = false;
        let mut ping_every: Option<Duration> = None;
        let mut read_timeout = Duration::ZERO;
        let mut ping_at: Option<Instant> = None;
        let mut read_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                incoming = stream.next() => {
                    let message = match incoming {
                        Some(Ok(message)) => message,
                        Some(Err(err)) => {
                            return self
                                .lost(TransportSignal::Error {
                                    message: format!("websocket error: {err}"),
                                })
                                .await;
                        }
                        None => {
                            return self
                                .lost(TransportSignal::Disconnected {
                                    reason: "socket closed".into(),
                                })
                                .await;
                        }
                    };
                    if read_deadline.is_some() {
                        read_deadline = Some(Instant::now() + read_timeout);
                    }

                    let text = match message {
                        WsMessage::Text(text) => text,
                        WsMessage::Binary(bytes) => match String::from_utf8(bytes) {
                            Ok(text) => text,
                            Err(_) => {
                                warn!("dropping non-utf8 binary websocket message");
                                continue;
                            }
                        },
                        WsMessage::Close(close) => {
                            let reason = close
                                .map(|frame| format!("closed by server: {} {}", frame.code, frame.reason))
                                .unwrap_or_else(|| "closed by server".into());
                            return self.lost(TransportSignal::Disconnected { reason }).await;
                        }
                        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
                    };

                    let frame = match decode(&text) {
                        Ok(Decoded::HeartBeat) => continue,
                        Ok(Decoded::Frame(frame)) => frame,
                        Err(err) => {
                            warn!(error = %err, "dropping undecodable stomp frame");
                            continue;
                        }
                    };

                    match frame.command {
                        StompCommand::Connected if !established => {
                            established = true;
                            let (outgoing, incoming) =
                                negotiate_heart_beat(offer, frame.get("heart-beat"));
                            info!(
                                version = frame.get("version").unwrap_or("1.2"),
                                outgoing, incoming, "stomp session established"
                            );
                            ping_every = (outgoing > 0).then(|| Duration::from_millis(outgoing));
                            ping_at = ping_every.map(|every| Instant::now() + every);
                            // Silence for twice the agreed interval means the peer is gone.
                            read_timeout = Duration::from_millis(incoming) * 2;
                            read_deadline = (incoming > 0).then(|| Instant::now() + read_timeout);
                            if !self.emit(TransportSignal::Connected).await {
                                return Flow::Deactivated;
                            }
                        }
                        StompCommand::Message => {
                            let destination = frame.get("destination").unwrap_or_default().to_owned();
                            let signal = TransportSignal::Message {
                                destination,
                                body: frame.body,
                            };
                            if !self.emit(signal).await {
                                return Flow::Deactivated;
                            }
                        }
                        StompCommand::Error => {
                            let summary = frame.get("message").unwrap_or("server error");
                            let message = if frame.body.is_empty() {
                                summary.to_owned()
                            } else {
                                format!("{summary}: {}", frame.body)
                            };
                            warn!(%message, "stomp ERROR frame");
                            let _ = sink.close().await;
                            return self.lost(TransportSignal::Error { message }).await;
                        }
                        other => debug!(command = %other, "ignoring stomp frame"),
                    }
                }
                request = self.endpoint.requests.recv() => {
                    let outbound = match request {
                        None | Some(TransportRequest::Deactivate) => {
                            if established {
                                let _ = sink.send(WsMessage::Text(Frame::disconnect().encode())).await;
                            }
                            let _ = sink.close().await;
                            return Flow::Deactivated;
                        }
                        Some(request) if established => request_frame(request),
                        Some(request) => {
                            warn!(?request, "dropping request before stomp session is established");
                            continue;
                        }
                    };
                    let Some(outbound) = outbound else { continue };
                    if let Err(err) = sink.send(WsMessage::Text(outbound.encode())).await {
                        return self
                            .lost(TransportSignal::Error {
                                message: format!("failed to send {}: {err}", outbound.command),
                            })
                            .await;
                    }
                }
                _ = sleep_opt(ping_at) => {
                    if let Err(err) = sink.send(WsMessage::Text("\n".into())).await {
                        return self
                            .lost(TransportSignal::Error {
                                message: format!("failed to send heart-beat: {err}"),
                            })
                            .await;
                    }
                    ping_at = ping_every.map(|every| Instant::now() + every);
                }
                _ = sleep_opt(read_deadline) => {
                    let reason = format!("no server traffic for {read_timeout:?}");
                    warn!(%reason, "stomp connection lost");
                    let _ = sink.close().await;
                    return self.lost(TransportSignal::Disconnected { reason }).await;
                }
            }
        }
    }

    async fn wait_before_retry(&mut self, delay: Duration) -> Flow {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return Flow::Continue,
                request = self.endpoint.requests.recv() => {
                    if let Flow::Deactivated = drop_or_deactivate(request) {
                        return Flow::Deactivated;
                    }
                }
            }
        }
    }

    async fn lost(&self, signal: TransportSignal) -> Flow {
        if self.emit(signal).await {
            Flow::Lost
        } else {
            Flow::Deactivated
        }
    }

    /// Returns `false` once the session side is gone.
    async fn emit(&self, signal: TransportSignal) -> bool {
        self.endpoint.signals.send(signal).await.is_ok()
    }
}

fn drop_or_deactivate(request: Option<TransportRequest>) -> Flow {
    match request {
        None | Some(TransportRequest::Deactivate) => Flow::Deactivated,
        Some(request) => {
            warn!(?request, "dropping request while disconnected");
            Flow::Continue
        }
    }
}

fn request_frame(request: TransportRequest) -> Option<Frame> {
    match request {
        TransportRequest::Subscribe { id, destination } => Some(Frame::subscribe(&id, &destination)),
        TransportRequest::Unsubscribe { id } => Some(Frame::unsubscribe(&id)),
        TransportRequest::Publish { destination, body } => Some(Frame::send(&destination, body)),
        TransportRequest::Deactivate => None,
    }
}

async fn sleep_opt(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
