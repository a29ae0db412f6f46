//! Transport layer error types.

use thiserror::Error;

use super::TransportHandle;

/// Errors from transport setup calls (relay access, listen, connect, accept).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Relay network access could not be initialized.
    #[error("relay access initialization failed: {0}")]
    RelayInit(String),

    /// Outbound connect call failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Listen socket could not be opened.
    #[error("listen failed: {0}")]
    ListenFailed(String),

    /// The handle does not name a live transport connection.
    #[error("invalid transport handle {0}")]
    InvalidHandle(TransportHandle),

    /// The handle is live but not in a state that allows the call.
    #[error("transport handle {0} is in the wrong state")]
    InvalidState(TransportHandle),
}

/// Errors from sending a message on a transport connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The handle does not name a live transport connection.
    #[error("invalid transport handle")]
    InvalidHandle,

    /// The connection has not finished connecting.
    #[error("connection not established")]
    NotConnected,

    /// The remote end is gone.
    #[error("peer unreachable")]
    PeerUnreachable,

    /// The message exceeds the transport's size limit.
    #[error("message of {0} bytes is too large")]
    MessageTooLarge(usize),
}

impl SendError {
    /// Whether the connection is unusable and should be torn down.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, SendError::InvalidHandle | SendError::PeerUnreachable)
    }
}

/// Result type for transport setup operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_errors() {
        assert!(SendError::PeerUnreachable.is_unreachable());
        assert!(SendError::InvalidHandle.is_unreachable());

        assert!(!SendError::NotConnected.is_unreachable());
        assert!(!SendError::MessageTooLarge(10).is_unreachable());
    }
}
