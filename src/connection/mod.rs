//! Relay Transport - Connection Layer
//!
//! Per-connection state shared by both session roles:
//!
//! - [`Connection`]: one logical session, its handshake and early buffer
//! - [`ConnectionRegistry`]: dual-keyed store (id and peer identity)
//! - [`IdPool`]: bounded pool of reusable connection ids
//! - [`EarlyMessageBuffer`]: payloads held back until the handshake is done
//! - [`LoopbackHost`]: in-process server hand-off used by local clients

#[allow(clippy::module_inception)]
mod connection;
mod buffer;
mod pool;
mod registry;

pub use buffer::*;
pub use connection::*;
pub use pool::*;
pub use registry::*;

use crate::core::{ConnectionId, PeerIdentity};
use crate::transport::TransportHandle;

/// A server running in the same process that a client can attach to
/// without going through the relay.
///
/// The client creates a socket pair on its own transport and hands the
/// server-side handle over; the server registers it and starts the
/// handshake immediately, since no `Connecting` event will ever arrive
/// for that handle.
pub trait LoopbackHost {
    /// Identity the host listens as, or `None` while it is not running.
    fn host_identity(&self) -> Option<PeerIdentity>;

    /// Register the server side of a loopback pair opened by `peer`.
    ///
    /// Returns `None` if the host refused the connection; in that case it
    /// has already closed `handle` with the reason.
    fn accept_loopback(&mut self, handle: TransportHandle, peer: PeerIdentity)
        -> Option<ConnectionId>;
}
