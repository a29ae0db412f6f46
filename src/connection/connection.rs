//! One logical peer-to-peer connection.

use tracing::debug;

use super::buffer::{BufferedPayload, EarlyMessageBuffer};
use crate::core::{
    ConnectionId, ConnectionState, DisconnectReason, PeerIdentity, SendFlags, SendMode,
};
use crate::protocol::{
    encode_payload, ClientHandshake, ControlMessage, HandshakeState, ServerHandshake,
};
use crate::transport::{RawTransport, SendError, TransportHandle};

/// Snapshot of a connection for callers outside the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection id (`INVALID` until a client learns it).
    pub id: ConnectionId,
    /// Remote peer.
    pub peer: PeerIdentity,
    /// Transport handle.
    pub handle: TransportHandle,
    /// Lifecycle state.
    pub state: ConnectionState,
}

/// A logical session with one peer.
///
/// Starts in [`ConnectionState::Connecting`] and is promoted to
/// [`ConnectionState::Connected`] only once the handshake for its role is
/// complete. Payloads received before that are held in its early buffer.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: PeerIdentity,
    handle: TransportHandle,
    state: ConnectionState,
    handshake: HandshakeState,
    early: EarlyMessageBuffer,
}

impl Connection {
    /// Connection accepted by a server, with its assigned id.
    pub fn inbound(id: ConnectionId, peer: PeerIdentity, handle: TransportHandle) -> Self {
        Self::new(id, peer, handle, HandshakeState::server())
    }

    /// Connection opened by a client. The id is learned from the welcome.
    pub fn outbound(peer: PeerIdentity, handle: TransportHandle) -> Self {
        Self::new(ConnectionId::INVALID, peer, handle, HandshakeState::client())
    }

    fn new(
        id: ConnectionId,
        peer: PeerIdentity,
        handle: TransportHandle,
        handshake: HandshakeState,
    ) -> Self {
        Self {
            id,
            peer,
            handle,
            state: ConnectionState::Connecting,
            handshake,
            early: EarlyMessageBuffer::new(),
        }
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: ConnectionId) {
        self.id = id;
    }

    /// Remote peer identity.
    pub fn peer(&self) -> PeerIdentity {
        self.peer
    }

    /// Underlying transport handle.
    pub fn handle(&self) -> TransportHandle {
        self.handle
    }

    /// Lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Handshake progress.
    pub fn handshake(&self) -> HandshakeState {
        self.handshake
    }

    /// Whether application traffic may flow.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Whether the handshake is still running.
    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    /// Snapshot for callers outside the session.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            peer: self.peer,
            handle: self.handle,
            state: self.state,
        }
    }

    pub(crate) fn server_handshake_mut(&mut self) -> Option<&mut ServerHandshake> {
        match &mut self.handshake {
            HandshakeState::Server(handshake) => Some(handshake),
            HandshakeState::Client(_) => None,
        }
    }

    pub(crate) fn client_handshake_mut(&mut self) -> Option<&mut ClientHandshake> {
        match &mut self.handshake {
            HandshakeState::Client(handshake) => Some(handshake),
            HandshakeState::Server(_) => None,
        }
    }

    /// Promote to `Connected` if the handshake is complete.
    ///
    /// Returns `true` only on the transition itself.
    pub fn promote(&mut self) -> bool {
        if self.state != ConnectionState::Connecting || !self.handshake.is_complete() {
            return false;
        }
        self.state = ConnectionState::Connected;
        true
    }

    /// Hold back a payload that arrived before promotion.
    pub fn defer(&mut self, data: Vec<u8>, relayed: bool) {
        debug!(peer = %self.peer, len = data.len(), "buffering payload until handshake completes");
        self.early.push(data, relayed);
    }

    /// Number of deferred payloads.
    pub fn deferred(&self) -> usize {
        self.early.len()
    }

    /// Take the deferred payloads, oldest first.
    pub fn take_deferred(&mut self) -> Vec<BufferedPayload> {
        self.early.take()
    }

    /// Send a control message. Control messages always go reliably.
    pub fn send_control<T: RawTransport + ?Sized>(
        &self,
        transport: &mut T,
        message: ControlMessage,
    ) -> Result<(), SendError> {
        transport.send(self.handle, &message.to_bytes(), SendFlags::RELIABLE)
    }

    /// Send an application payload.
    pub fn send_payload<T: RawTransport + ?Sized>(
        &self,
        transport: &mut T,
        data: &[u8],
        mode: SendMode,
        relayed: bool,
    ) -> Result<(), SendError> {
        transport.send(self.handle, &encode_payload(data, relayed), mode.into())
    }

    /// Close the transport connection with `reason`.
    pub fn close<T: RawTransport + ?Sized>(&mut self, transport: &mut T, reason: DisconnectReason) {
        if self.state != ConnectionState::NotConnected {
            transport.close(self.handle, reason);
            self.state = ConnectionState::NotConnected;
        }
    }
}
