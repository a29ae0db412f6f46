//! Identity, id and state value types shared by both roles.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use super::constants::{SEND_FLAG_RELIABLE, SEND_FLAG_UNRELIABLE};

/// Stable identity of a remote endpoint, supplied by the transport.
///
/// Opaque to this crate apart from equality and its decimal text form
/// (the form host addresses are given in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerIdentity(u64);

impl PeerIdentity {
    /// Create an identity from its raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerIdentity {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Self)
    }
}

impl From<u64> for PeerIdentity {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Locally assigned connection id.
///
/// Unique among live connections of one server. `0` means unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ConnectionId(u16);

impl ConnectionId {
    /// The reserved "unassigned" id.
    pub const INVALID: Self = Self(0);

    /// Create an id from its raw value.
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    pub const fn raw(&self) -> u16 {
        self.0
    }

    /// Whether this id was actually assigned.
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for ConnectionId {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<ConnectionId> for u16 {
    fn from(id: ConnectionId) -> u16 {
        id.0
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No live transport connection.
    #[default]
    NotConnected,
    /// Transport connection exists, handshake not finished.
    Connecting,
    /// Handshake finished; application traffic flows.
    Connected,
}

/// Delivery guarantee requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendMode {
    /// Fire and forget.
    #[default]
    Unreliable,
    /// Retransmitted and ordered by the transport.
    Reliable,
}

/// Transport-level send flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SendFlags(u32);

impl SendFlags {
    /// Unreliable delivery.
    pub const UNRELIABLE: Self = Self(SEND_FLAG_UNRELIABLE);
    /// Reliable delivery.
    pub const RELIABLE: Self = Self(SEND_FLAG_RELIABLE);

    /// Get the raw flag bits handed to the transport.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Whether the reliable bit is set.
    pub const fn is_reliable(&self) -> bool {
        self.0 & SEND_FLAG_RELIABLE != 0
    }
}

impl From<SendMode> for SendFlags {
    fn from(mode: SendMode) -> Self {
        match mode {
            SendMode::Reliable => SendFlags::RELIABLE,
            SendMode::Unreliable => SendFlags::UNRELIABLE,
        }
    }
}

impl From<SendFlags> for SendMode {
    fn from(flags: SendFlags) -> Self {
        if flags.is_reliable() {
            SendMode::Reliable
        } else {
            SendMode::Unreliable
        }
    }
}

/// Why a connection ended or failed to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Graceful, explicit disconnect.
    Disconnected,
    /// The transport reported a problem.
    TransportError,
    /// The connection attempt was not answered in time.
    Timeout,
    /// The server was at capacity.
    ServerFull,
    /// The server removed this connection.
    Kicked,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::Disconnected => "disconnected",
            DisconnectReason::TransportError => "transport error",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::ServerFull => "server full",
            DisconnectReason::Kicked => "kicked",
        };
        f.write_str(text)
    }
}
