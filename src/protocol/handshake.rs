//! Per-connection handshake progress.
//!
//! The accepting side picks the connection id; the handshake makes the
//! remote side learn it before any application traffic is accepted.
//!
//! ```text
//! server                         client
//!   │ ── Welcome{id} ──────────▶  │  NotStarted → WelcomeReceived
//!   │                             │  (stores id)
//!   │ ◀────────── WelcomeAck{id} ─│  WelcomeReceived → AckSent  ✓
//!   │  WelcomeSent → Acknowledged ✓
//! ```

use super::frame::ControlMessage;
use crate::core::ConnectionId;

/// Server-side progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerHandshake {
    /// Nothing sent yet.
    #[default]
    NotStarted,
    /// Welcome sent, waiting for the echo.
    WelcomeSent,
    /// Echo received.
    Acknowledged,
}

/// Client-side progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientHandshake {
    /// Waiting for the welcome.
    #[default]
    NotStarted,
    /// Welcome received, echo not yet sent.
    WelcomeReceived,
    /// Echo sent.
    AckSent,
}

/// Handshake progress for either role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Accepting side.
    Server(ServerHandshake),
    /// Connecting side.
    Client(ClientHandshake),
}

impl HandshakeState {
    /// Fresh server-side handshake.
    pub fn server() -> Self {
        HandshakeState::Server(ServerHandshake::NotStarted)
    }

    /// Fresh client-side handshake.
    pub fn client() -> Self {
        HandshakeState::Client(ClientHandshake::NotStarted)
    }

    /// Whether the terminal state for this role was reached.
    pub fn is_complete(&self) -> bool {
        matches!(
            self,
            HandshakeState::Server(ServerHandshake::Acknowledged)
                | HandshakeState::Client(ClientHandshake::AckSent)
        )
    }
}

/// Result of handling a welcome echo on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Echo matched; handshake complete.
    Completed,
    /// Echo did not match the assigned id. The connection proceeds anyway.
    Mismatch {
        /// Id the client echoed.
        echoed: ConnectionId,
    },
    /// Handshake was already complete; ignore.
    Duplicate,
    /// No welcome was sent yet; ignore.
    Unexpected,
}

impl ServerHandshake {
    /// Begin the handshake, returning the welcome to send.
    pub fn start(&mut self, id: ConnectionId) -> ControlMessage {
        *self = ServerHandshake::WelcomeSent;
        ControlMessage::Welcome(id)
    }

    /// Handle the client's echo of `assigned`.
    pub fn acknowledge(&mut self, assigned: ConnectionId, echoed: ConnectionId) -> AckOutcome {
        match self {
            ServerHandshake::NotStarted => AckOutcome::Unexpected,
            ServerHandshake::Acknowledged => AckOutcome::Duplicate,
            ServerHandshake::WelcomeSent => {
                *self = ServerHandshake::Acknowledged;
                if echoed == assigned {
                    AckOutcome::Completed
                } else {
                    AckOutcome::Mismatch { echoed }
                }
            }
        }
    }
}

impl ClientHandshake {
    /// Handle the server's welcome, returning the echo to send.
    ///
    /// Returns `None` if a welcome was already handled.
    pub fn receive_welcome(&mut self, id: ConnectionId) -> Option<ControlMessage> {
        match self {
            ClientHandshake::NotStarted => {
                *self = ClientHandshake::WelcomeReceived;
                Some(ControlMessage::WelcomeAck(id))
            }
            ClientHandshake::WelcomeReceived | ClientHandshake::AckSent => None,
        }
    }

    /// Record that the echo went out.
    pub fn ack_sent(&mut self) {
        if *self == ClientHandshake::WelcomeReceived {
            *self = ClientHandshake::AckSent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_handshake_happy_path() {
        let mut handshake = ServerHandshake::default();
        let id = ConnectionId::new(3);

        assert_eq!(handshake.start(id), ControlMessage::Welcome(id));
        assert_eq!(handshake, ServerHandshake::WelcomeSent);
        assert!(!HandshakeState::Server(handshake).is_complete());

        assert_eq!(handshake.acknowledge(id, id), AckOutcome::Completed);
        assert!(HandshakeState::Server(handshake).is_complete());
        assert_eq!(handshake.acknowledge(id, id), AckOutcome::Duplicate);
    }

    #[test]
    fn test_server_handshake_mismatch_still_completes() {
        let mut handshake = ServerHandshake::default();
        handshake.start(ConnectionId::new(1));

        let outcome = handshake.acknowledge(ConnectionId::new(1), ConnectionId::new(9));
        assert_eq!(
            outcome,
            AckOutcome::Mismatch {
                echoed: ConnectionId::new(9)
            }
        );
        assert!(HandshakeState::Server(handshake).is_complete());
    }

    #[test]
    fn test_server_ack_before_welcome() {
        let mut handshake = ServerHandshake::default();
        assert_eq!(
            handshake.acknowledge(ConnectionId::new(1), ConnectionId::new(1)),
            AckOutcome::Unexpected
        );
        assert_eq!(handshake, ServerHandshake::NotStarted);
    }

    #[test]
    fn test_client_handshake() {
        let mut handshake = ClientHandshake::default();
        let id = ConnectionId::new(4);

        assert_eq!(handshake.receive_welcome(id), Some(ControlMessage::WelcomeAck(id)));
        assert!(!HandshakeState::Client(handshake).is_complete());
        handshake.ack_sent();
        assert!(HandshakeState::Client(handshake).is_complete());

        // A second welcome is ignored.
        assert_eq!(handshake.receive_welcome(ConnectionId::new(5)), None);
    }
}
