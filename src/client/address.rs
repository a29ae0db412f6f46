//! Host address parsing.

use std::fmt;
use std::str::FromStr;

use crate::core::constants::LOOPBACK_ADDRESSES;
use crate::core::{ConnectError, PeerIdentity};

/// Where a client connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostAddress {
    /// The server running in this process.
    Loopback,
    /// A remote peer, by identity.
    Remote(PeerIdentity),
}

impl HostAddress {
    /// Whether this selects the in-process server.
    pub fn is_loopback(&self) -> bool {
        matches!(self, HostAddress::Loopback)
    }
}

impl FromStr for HostAddress {
    type Err = ConnectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if LOOPBACK_ADDRESSES
            .iter()
            .any(|loopback| loopback.eq_ignore_ascii_case(trimmed))
        {
            return Ok(HostAddress::Loopback);
        }

        trimmed
            .parse::<PeerIdentity>()
            .map(HostAddress::Remote)
            .map_err(|_| ConnectError::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostAddress::Loopback => f.write_str(LOOPBACK_ADDRESSES[0]),
            HostAddress::Remote(peer) => write!(f, "{peer}"),
        }
    }
}
