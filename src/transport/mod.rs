//! Relay Transport - Transport Layer
//!
//! The narrow capability this crate consumes from the underlying relay
//! socket engine. Packet delivery, retransmission, encryption, NAT traversal
//! and congestion control all live behind [`RawTransport`]; this crate only
//! sees handles, state-change events, and byte buffers.
//!
//! - **Capability trait**: [`RawTransport`]
//! - **State-change events**: [`TransportEvent`] keyed by [`TransportHandle`]
//! - **Event queue**: [`EventQueue`] funnels callbacks into the poll thread
//! - **In-process relay**: [`MemoryRelay`] (feature `memory`)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     ClientSession / ServerSession       │
//! ├─────────────────────────────────────────┤
//! │   handshake, registry, early buffer     │
//! ├─────────────────────────────────────────┤
//! │         RawTransport                    │  ← This module
//! ├─────────────────────────────────────────┤
//! │      relay socket engine                │
//! └─────────────────────────────────────────┘
//! ```

use std::fmt;

use crate::core::{DisconnectReason, PeerIdentity, SendFlags};

mod error;
#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "memory")]
mod queue;

pub use error::*;
#[cfg(feature = "memory")]
pub use memory::{MemoryRelay, MemoryTransport};
#[cfg(feature = "memory")]
pub use queue::{event_queue, EventQueue, EventSender};

/// Transport-level connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportHandle(u32);

impl TransportHandle {
    /// Create a handle from its raw value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Listen socket handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenHandle(u32);

impl ListenHandle {
    /// Create a handle from its raw value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

/// Two handles created already connected to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketPair {
    /// Handle the client side sends and receives on.
    pub to_server: TransportHandle,
    /// Handle the server side sends and receives on.
    pub to_client: TransportHandle,
}

/// Asynchronous connection state change reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A remote peer is trying to connect to our listen socket.
    Connecting {
        /// Handle of the pending connection.
        handle: TransportHandle,
        /// Remote peer.
        peer: PeerIdentity,
    },

    /// The connection is established at the transport level.
    Connected {
        /// Connection handle.
        handle: TransportHandle,
        /// Remote peer.
        peer: PeerIdentity,
    },

    /// The connection was closed by the peer or a local problem was detected.
    Closed {
        /// Connection handle.
        handle: TransportHandle,
        /// Remote peer.
        peer: PeerIdentity,
        /// Reason code carried by the close.
        reason: DisconnectReason,
    },
}

impl TransportEvent {
    /// Handle the event refers to.
    pub fn handle(&self) -> TransportHandle {
        match self {
            TransportEvent::Connecting { handle, .. }
            | TransportEvent::Connected { handle, .. }
            | TransportEvent::Closed { handle, .. } => *handle,
        }
    }

    /// Remote peer the event refers to.
    pub fn peer(&self) -> PeerIdentity {
        match self {
            TransportEvent::Connecting { peer, .. }
            | TransportEvent::Connected { peer, .. }
            | TransportEvent::Closed { peer, .. } => *peer,
        }
    }
}

/// The relay socket engine, as seen by the sessions.
///
/// Implementations whose callbacks fire on other threads must queue them
/// (see [`EventQueue`]) and hand them out from [`RawTransport::poll_events`].
pub trait RawTransport {
    /// Identity of the local endpoint.
    fn local_identity(&self) -> PeerIdentity;

    /// Initialize access to the relay network.
    fn init_relay_access(&mut self) -> TransportResult<()>;

    /// Open a listen socket on a virtual port.
    fn listen(&mut self, port: u16) -> TransportResult<ListenHandle>;

    /// Close a listen socket.
    fn close_listen(&mut self, listen: ListenHandle);

    /// Start connecting to a remote peer's virtual port.
    fn connect_p2p(&mut self, remote: PeerIdentity, port: u16) -> TransportResult<TransportHandle>;

    /// Accept a pending inbound connection.
    fn accept(&mut self, handle: TransportHandle) -> TransportResult<()>;

    /// Create two handles connected to each other inside this process.
    ///
    /// Both ends are connected on return and no state-change events are
    /// emitted for them.
    fn create_socket_pair(&mut self, identity: PeerIdentity) -> TransportResult<SocketPair>;

    /// Close a connection, telling the remote side `reason`.
    fn close(&mut self, handle: TransportHandle, reason: DisconnectReason);

    /// Send one message.
    fn send(&mut self, handle: TransportHandle, data: &[u8], flags: SendFlags) -> Result<(), SendError>;

    /// Move up to `max` received messages for `handle` into `out`.
    ///
    /// Returns the number of messages moved.
    fn receive(&mut self, handle: TransportHandle, out: &mut Vec<Vec<u8>>, max: usize) -> usize;

    /// Push out anything the transport is batching for `handle`.
    fn flush(&mut self, _handle: TransportHandle) {}

    /// Move pending state-change events into `out`, oldest first.
    fn poll_events(&mut self, out: &mut Vec<TransportEvent>);
}
