use crate::{
    error::ChatError,
    types::{ConnectionState, SessionEvent},
};

/// Inputs that move the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTrigger {
    /// Session startup.
    Start,
    /// Transport began a new handshake after a drop.
    Reconnect,
    /// Transport reported a successful handshake.
    HandshakeAccepted,
    /// Transport reported an error or disconnect.
    TransportLost,
    /// Owner tore the session down.
    Teardown,
}

impl ConnectionTrigger {
    fn action(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Reconnect => "reconnect",
            Self::HandshakeAccepted => "handshake_accepted",
            Self::TransportLost => "transport_lost",
            Self::Teardown => "teardown",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    terminated: bool,
}

impl ConnectionStateMachine {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn is_open(&self) -> bool {
        !self.terminated && self.state == ConnectionState::Open
    }

    pub fn apply(&mut self, trigger: ConnectionTrigger) -> Result<Vec<SessionEvent>, ChatError> {
        use ConnectionState::*;

        if self.terminated {
            return Err(ChatError::terminated(trigger.action()));
        }

        match trigger {
            ConnectionTrigger::Start => self.transition_from_state(Idle, Connecting, trigger),
            ConnectionTrigger::Reconnect => self.transition_from_state(Closed, Connecting, trigger),
            ConnectionTrigger::HandshakeAccepted => {
                self.transition_from_state(Connecting, Open, trigger)
            }
            // A close frequently follows an error report; the second one is a no-op.
            ConnectionTrigger::TransportLost if self.state == Closed => Ok(Vec::new()),
            ConnectionTrigger::TransportLost => {
                self.transition_from_any_of(&[Connecting, Open], Closed, trigger)
            }
            ConnectionTrigger::Teardown => {
                self.terminated = true;
                if self.state == Closed {
                    return Ok(Vec::new());
                }
                self.state = Closed;
                Ok(vec![SessionEvent::StateChanged { state: Closed }])
            }
        }
    }

    fn transition_from_state(
        &mut self,
        expected: ConnectionState,
        next: ConnectionState,
        trigger: ConnectionTrigger,
    ) -> Result<Vec<SessionEvent>, ChatError> {
        if self.state != expected {
            return Err(ChatError::invalid_state(self.state, trigger.action()));
        }
        self.state = next;
        Ok(vec![SessionEvent::StateChanged { state: next }])
    }

    fn transition_from_any_of(
        &mut self,
        expected: &[ConnectionState],
        next: ConnectionState,
        trigger: ConnectionTrigger,
    ) -> Result<Vec<SessionEvent>, ChatError> {
        if !expected.contains(&self.state) {
            return Err(ChatError::invalid_state(self.state, trigger.action()));
        }
        self.state = next;
        Ok(vec![SessionEvent::StateChanged { state: next }])
    }
}
