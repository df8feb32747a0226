//! Transport-neutral connection manager.
//!
//! The manager never performs IO. Every input (startup, transport signal,
//! identity result, send request, teardown) is handled synchronously and
//! returns the transport requests to perform plus the session events to
//! publish, so one event loop can own it without locking.

use tracing::{debug, info, warn};

use crate::{
    error::ChatError,
    message_log::{MessageLog, MessageLogView},
    normalization::{encode_outbound_message, normalize_identity_failure, normalize_inbound_frame},
    readiness::{SendRefusal, check_send_readiness},
    state_machine::{ConnectionStateMachine, ConnectionTrigger},
    types::{
        ChannelConfig, ChatEvent, ConnectionState, Identity, IdentityState, SessionEvent,
        TransportRequest, TransportSignal,
    },
};

/// Output of one manager input.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ManagerStep {
    /// Requests to hand to the transport, in order.
    pub requests: Vec<TransportRequest>,
    /// Events to publish, in order.
    pub events: Vec<SessionEvent>,
}

impl ManagerStep {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.events.is_empty()
    }
}

#[derive(Debug)]
pub struct ConnectionManager {
    machine: ConnectionStateMachine,
    identity: IdentityState,
    log: MessageLog,
    channel: ChannelConfig,
    subscription_id: String,
    subscribed: bool,
}

impl ConnectionManager {
    pub fn new(channel: ChannelConfig, subscription_id: impl Into<String>) -> Self {
        Self {
            machine: ConnectionStateMachine::default(),
            identity: IdentityState::Pending,
            log: MessageLog::new(),
            channel,
            subscription_id: subscription_id.into(),
            subscribed: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn identity(&self) -> &IdentityState {
        &self.identity
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn view(&self) -> MessageLogView {
        self.log.view()
    }

    pub fn is_terminated(&self) -> bool {
        self.machine.is_terminated()
    }

    /// `Idle -> Connecting`. Runs once, independent of identity resolution.
    pub fn start(&mut self) -> ManagerStep {
        let mut step = ManagerStep::default();
        self.drive(ConnectionTrigger::Start, &mut step);
        step
    }

    /// React to one transport signal.
    pub fn on_signal(&mut self, signal: TransportSignal) -> ManagerStep {
        let mut step = ManagerStep::default();
        if self.machine.is_terminated() {
            debug!(?signal, "ignoring transport signal after teardown");
            return step;
        }

        match signal {
            TransportSignal::Connecting { attempt } => match self.machine.state() {
                ConnectionState::Closed => {
                    info!(attempt, "transport reconnecting");
                    self.drive(ConnectionTrigger::Reconnect, &mut step);
                }
                ConnectionState::Idle => {
                    self.drive(ConnectionTrigger::Start, &mut step);
                }
                ConnectionState::Connecting => {
                    debug!(attempt, "transport handshake started");
                }
                ConnectionState::Open => {
                    warn!(attempt, "transport restarted a handshake without reporting a drop");
                    self.mark_lost(&mut step);
                    self.drive(ConnectionTrigger::Reconnect, &mut step);
                }
            },
            TransportSignal::Connected => {
                if self.drive(ConnectionTrigger::HandshakeAccepted, &mut step) {
                    info!(topic = %self.channel.topic, "connected; subscribing to broadcast topic");
                    self.subscribed = true;
                    step.requests.push(TransportRequest::Subscribe {
                        id: self.subscription_id.clone(),
                        destination: self.channel.topic.clone(),
                    });
                }
            }
            TransportSignal::Message { destination, body } => {
                self.on_frame(&destination, &body, &mut step);
            }
            TransportSignal::Error { message } => {
                warn!(%message, "transport error");
                step.events.push(SessionEvent::TransportError { message });
                self.mark_lost(&mut step);
            }
            TransportSignal::Disconnected { reason } => {
                info!(%reason, "transport disconnected");
                self.mark_lost(&mut step);
            }
        }

        step
    }

    /// Record the outcome of identity resolution. Only the first result counts.
    pub fn on_identity(&mut self, result: Result<Identity, ChatError>) -> ManagerStep {
        let mut step = ManagerStep::default();
        if self.machine.is_terminated() {
            debug!("discarding identity result after teardown");
            return step;
        }
        if !matches!(self.identity, IdentityState::Pending) {
            warn!("identity already settled; ignoring second result");
            return step;
        }

        match result {
            Ok(identity) => {
                info!(user_id = %identity.user_id, "identity resolved");
                self.identity = IdentityState::Resolved(identity.clone());
                step.events.push(SessionEvent::IdentityResolved(identity));
            }
            Err(err) => {
                warn!(code = %err.code, message = %err.message, "identity resolution failed");
                self.identity = IdentityState::Failed {
                    code: err.code.clone(),
                    message: err.message.clone(),
                };
                step.events.push(normalize_identity_failure(err));
            }
        }
        step
    }

    /// Build the publish request for `content`, or say why it cannot be sent.
    ///
    /// The event is not appended locally; it reaches the log only when the
    /// broadcast echoes it back.
    pub fn send(&self, content: &str) -> Result<TransportRequest, SendRefusal> {
        let state = if self.machine.is_terminated() {
            ConnectionState::Closed
        } else {
            self.machine.state()
        };
        let identity = check_send_readiness(state, self.identity.resolved(), content)
            .inspect_err(|refusal| debug!(reason = refusal.code(), "send refused"))?;

        let event = ChatEvent::from_identity(identity, content);
        Ok(TransportRequest::Publish {
            destination: self.channel.destination.clone(),
            body: encode_outbound_message(&event),
        })
    }

    /// Final stop: unsubscribe when live, then deactivate the transport.
    /// Safe from every state; later inputs are ignored.
    pub fn teardown(&mut self) -> ManagerStep {
        let mut step = ManagerStep::default();
        if self.machine.is_terminated() {
            return step;
        }

        if self.subscribed {
            step.requests.push(TransportRequest::Unsubscribe {
                id: self.subscription_id.clone(),
            });
            self.subscribed = false;
        }
        step.requests.push(TransportRequest::Deactivate);
        self.drive(ConnectionTrigger::Teardown, &mut step);
        self.log.reset();
        step.events.push(SessionEvent::Terminated);
        step
    }

    fn on_frame(&mut self, destination: &str, body: &str, step: &mut ManagerStep) {
        if !self.machine.is_open() {
            debug!(%destination, "dropping frame received while not open");
            return;
        }
        if destination != self.channel.topic {
            debug!(%destination, "dropping frame for unknown destination");
            step.events.push(SessionEvent::FrameDiscarded {
                reason: format!("unexpected destination {destination}"),
            });
            return;
        }

        match normalize_inbound_frame(body) {
            Ok(event) => {
                let index = self.log.append(event.clone());
                debug!(index, sender_id = %event.sender_id, "chat message appended");
                step.events.push(SessionEvent::MessageAppended { index, event });
            }
            Err(err) => {
                warn!(error = %err.message, "discarding malformed chat frame");
                step.events.push(SessionEvent::FrameDiscarded {
                    reason: err.message,
                });
            }
        }
    }

    fn mark_lost(&mut self, step: &mut ManagerStep) {
        self.subscribed = false;
        self.drive(ConnectionTrigger::TransportLost, step);
    }

    fn drive(&mut self, trigger: ConnectionTrigger, step: &mut ManagerStep) -> bool {
        match self.machine.apply(trigger) {
            Ok(events) => {
                step.events.extend(events);
                true
            }
            Err(err) => {
                warn!(code = %err.code, message = %err.message, "ignoring connection trigger");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatErrorCategory;

    const TOPIC: &str = "/topic/public";

    fn manager() -> ConnectionManager {
        ConnectionManager::new(ChannelConfig::default(), "sub-0")
    }

    fn identity() -> Identity {
        Identity {
            user_id: "42".into(),
            display_name: "Ada".into(),
            avatar_ref: "/img/ada.png".into(),
        }
    }

    fn frame(sender: &str, content: &str) -> TransportSignal {
        TransportSignal::Message {
            destination: TOPIC.into(),
            body: format!(
                r#"{{"senderId":"{sender}","senderName":"n{sender}","content":"{content}","avatarRef":"/a.png"}}"#
            ),
        }
    }

    fn open_manager() -> ConnectionManager {
        let mut m = manager();
        m.start();
        m.on_signal(TransportSignal::Connecting { attempt: 0 });
        m.on_signal(TransportSignal::Connected);
        m
    }

    fn ready_manager() -> ConnectionManager {
        let mut m = open_manager();
        m.on_identity(Ok(identity()));
        m
    }

    #[test]
    fn subscribes_on_every_entry_to_open() {
        let mut m = manager();
        let step = m.start();
        assert_eq!(
            step.events,
            vec![SessionEvent::StateChanged {
                state: ConnectionState::Connecting
            }]
        );
        assert!(m.on_signal(TransportSignal::Connecting { attempt: 0 }).is_empty());

        let step = m.on_signal(TransportSignal::Connected);
        assert_eq!(m.state(), ConnectionState::Open);
        assert_eq!(
            step.requests,
            vec![TransportRequest::Subscribe {
                id: "sub-0".into(),
                destination: TOPIC.into(),
            }]
        );

        m.on_signal(TransportSignal::Disconnected {
            reason: "socket closed".into(),
        });
        assert_eq!(m.state(), ConnectionState::Closed);
        m.on_signal(TransportSignal::Connecting { attempt: 1 });
        assert_eq!(m.state(), ConnectionState::Connecting);

        let step = m.on_signal(TransportSignal::Connected);
        assert_eq!(step.requests.len(), 1);
        assert!(matches!(step.requests[0], TransportRequest::Subscribe { .. }));
    }

    #[test]
    fn appends_valid_frames_in_arrival_order() {
        let mut m = open_manager();
        m.on_signal(frame("1", "first"));
        m.on_signal(frame("2", "second"));
        let step = m.on_signal(frame("1", "first"));

        assert!(matches!(
            step.events.as_slice(),
            [SessionEvent::MessageAppended { index: 2, .. }]
        ));
        let contents: Vec<String> = m.log().all().iter().map(|e| e.content.clone()).collect();
        assert_eq!(contents, vec!["first", "second", "first"]);
    }

    #[test]
    fn malformed_frame_is_dropped_without_state_change() {
        let mut m = open_manager();
        m.on_signal(frame("1", "before"));

        let step = m.on_signal(TransportSignal::Message {
            destination: TOPIC.into(),
            body: "definitely not json".into(),
        });
        assert!(matches!(
            step.events.as_slice(),
            [SessionEvent::FrameDiscarded { .. }]
        ));
        assert!(step.requests.is_empty());
        assert_eq!(m.state(), ConnectionState::Open);

        m.on_signal(frame("1", "after"));
        let contents: Vec<String> = m.log().all().iter().map(|e| e.content.clone()).collect();
        assert_eq!(contents, vec!["before", "after"]);
    }

    #[test]
    fn frames_while_not_open_are_ignored() {
        let mut m = manager();
        m.start();
        m.on_signal(frame("1", "early"));
        assert!(m.log().is_empty());
    }

    #[test]
    fn refuses_empty_and_blank_content() {
        let m = ready_manager();
        assert_eq!(m.send(""), Err(SendRefusal::EmptyContent));
        assert_eq!(m.send("   "), Err(SendRefusal::EmptyContent));
        assert!(m.log().is_empty());
    }

    #[test]
    fn refuses_send_unless_open() {
        let mut m = manager();
        m.on_identity(Ok(identity()));
        assert_eq!(m.send("hello"), Err(SendRefusal::NotConnected));

        m.start();
        assert_eq!(m.send("hello"), Err(SendRefusal::NotConnected));

        m.on_signal(TransportSignal::Connected);
        m.on_signal(TransportSignal::Error {
            message: "broker went away".into(),
        });
        assert_eq!(m.state(), ConnectionState::Closed);
        assert_eq!(m.send("hello"), Err(SendRefusal::NotConnected));
    }

    #[test]
    fn refuses_send_without_identity() {
        let mut m = open_manager();
        assert_eq!(m.send("hello"), Err(SendRefusal::IdentityUnknown));

        m.on_identity(Err(ChatError::new(
            ChatErrorCategory::Auth,
            "identity_http_status",
            "401",
        )));
        assert_eq!(m.send("hello"), Err(SendRefusal::IdentityUnknown));
    }

    #[test]
    fn send_publishes_one_frame_without_local_echo() {
        let m = ready_manager();
        let request = m.send("hello").expect("send should be accepted");

        let TransportRequest::Publish { destination, body } = request else {
            panic!("expected publish, got {request:?}");
        };
        assert_eq!(destination, "/app/chat.sendMessage");
        let published = normalize_inbound_frame(&body).expect("published body parses");
        assert_eq!(published, ChatEvent::from_identity(&identity(), "hello"));
        assert!(m.log().is_empty());
    }

    #[test]
    fn own_message_appears_after_broadcast_echo() {
        let mut m = ready_manager();
        let TransportRequest::Publish { body, .. } = m.send("hello").expect("send") else {
            panic!("expected publish");
        };
        assert!(m.log().is_empty());

        m.on_signal(TransportSignal::Message {
            destination: TOPIC.into(),
            body,
        });
        assert_eq!(m.log().len(), 1);
        assert_eq!(m.log().all()[0], ChatEvent::from_identity(&identity(), "hello"));
    }

    #[test]
    fn identity_and_handshake_may_complete_in_either_order() {
        let mut m = manager();
        m.start();
        m.on_identity(Ok(identity()));
        assert_eq!(m.send("hi"), Err(SendRefusal::NotConnected));
        m.on_signal(TransportSignal::Connected);
        assert!(m.send("hi").is_ok());
    }

    #[test]
    fn reconnect_resubscribes_and_resumes_appending() {
        let mut m = ready_manager();
        m.on_signal(frame("1", "before drop"));
        m.on_signal(TransportSignal::Disconnected {
            reason: "network".into(),
        });
        assert_eq!(m.send("hello"), Err(SendRefusal::NotConnected));

        m.on_signal(frame("1", "lost in outage"));
        m.on_signal(TransportSignal::Connecting { attempt: 1 });
        let step = m.on_signal(TransportSignal::Connected);
        assert!(matches!(
            step.requests.as_slice(),
            [TransportRequest::Subscribe { .. }]
        ));

        m.on_signal(frame("2", "after reconnect"));
        let contents: Vec<String> = m.log().all().iter().map(|e| e.content.clone()).collect();
        assert_eq!(contents, vec!["before drop", "after reconnect"]);
        assert!(m.send("hello").is_ok());
    }

    #[test]
    fn teardown_while_connecting_deactivates_and_freezes_state() {
        let mut m = manager();
        m.start();
        let step = m.teardown();

        assert_eq!(step.requests, vec![TransportRequest::Deactivate]);
        assert_eq!(
            step.events,
            vec![
                SessionEvent::StateChanged {
                    state: ConnectionState::Closed
                },
                SessionEvent::Terminated,
            ]
        );

        assert!(m.on_signal(TransportSignal::Connected).is_empty());
        assert!(m.on_identity(Ok(identity())).is_empty());
        assert_eq!(m.state(), ConnectionState::Closed);
        assert!(m.teardown().is_empty());
    }

    #[test]
    fn teardown_while_open_unsubscribes_first_and_clears_log() {
        let mut m = ready_manager();
        m.on_signal(frame("1", "x"));
        let view = m.view();
        assert_eq!(view.len(), 1);

        let step = m.teardown();
        assert_eq!(
            step.requests,
            vec![
                TransportRequest::Unsubscribe { id: "sub-0".into() },
                TransportRequest::Deactivate,
            ]
        );
        assert!(view.is_empty());
    }

    #[test]
    fn transport_connecting_before_start_leaves_idle() {
        let mut m = manager();
        let step = m.on_signal(TransportSignal::Connecting { attempt: 0 });
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert_eq!(
            step.events,
            vec![SessionEvent::StateChanged {
                state: ConnectionState::Connecting,
            }]
        );
        assert!(step.requests.is_empty());
    }

    #[test]
    fn frames_for_other_destinations_are_discarded() {
        let mut m = open_manager();
        let step = m.on_signal(TransportSignal::Message {
            destination: "/topic/other".into(),
            body: r#"{"senderId":"1","content":"x"}"#.into(),
        });
        assert!(matches!(
            step.events.as_slice(),
            [SessionEvent::FrameDiscarded { .. }]
        ));
        assert!(m.log().is_empty());
    }
}
