//! Error types shared across the crate.

use thiserror::Error;

use super::types::{ConnectionId, PeerIdentity};
use crate::protocol::FrameError;
use crate::transport::{SendError, TransportError};

/// Registry integrity and capacity errors.
///
/// `DuplicateId`/`DuplicatePeer` are logic errors: the sessions never insert
/// a key that is already live, so hitting one means a bookkeeping bug.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The connection id is already bound to a live connection.
    #[error("connection id {0} is already in use")]
    DuplicateId(ConnectionId),

    /// The peer already owns a live connection.
    #[error("peer {0} already has a connection")]
    DuplicatePeer(PeerIdentity),

    /// Every id in the pool is taken.
    #[error("connection id pool exhausted")]
    CapacityExceeded,
}

/// Errors returned by a client connect attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The host address is neither a loopback designator nor a peer identity.
    #[error("invalid host address '{0}': not a peer identity")]
    InvalidAddress(String),

    /// Loopback was requested but no in-process server is configured.
    #[error("no local server configured for loopback connection")]
    NoLocalServer,

    /// Relay access or the transport connect call failed.
    #[error("transport initialization failed: {0}")]
    TransportInitFailed(String),

    /// A connection is already live or in progress.
    #[error("already connected or connecting")]
    AlreadyConnected,
}

/// Top-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Registry error.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Connect error.
    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Send error.
    #[error("send error: {0}")]
    Send(#[from] SendError),

    /// Frame decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Server error.
    #[cfg(feature = "server")]
    #[error("server error: {0}")]
    Server(#[from] crate::server::ServerError),
}
