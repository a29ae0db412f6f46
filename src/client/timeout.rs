//! Connect-attempt deadline.
//!
//! The transport has no native connect timeout, so each attempt records a
//! deadline that the session checks on every poll. Expiry only depends on
//! the clock, never on an async runtime getting a chance to run.
//!
//! The clock is tokio's, which falls back to the system clock outside a
//! runtime and honours a paused clock in tests.

use std::time::Duration;

use tokio::time::Instant;

/// Point in time after which a pending attempt is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConnectDeadline {
    at: Instant,
}

impl ConnectDeadline {
    /// Deadline `timeout` from now.
    pub(crate) fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
        }
    }

    /// Whether the deadline has been reached.
    pub(crate) fn has_passed(&self) -> bool {
        Instant::now() >= self.at
    }
}
