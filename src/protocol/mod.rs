//! Relay Transport - Protocol Layer
//!
//! Framing on top of raw transport messages and the welcome handshake that
//! runs before a connection is usable by the application.
//!
//! | Kind | Frame | Body |
//! |------|-------|------|
//! | 0x00 | Welcome | u16 assigned id |
//! | 0x01 | WelcomeAck | u16 echoed id |
//! | 0x02 | PeerJoined | u16 id of new peer |
//! | 0x03 | PeerLeft | u16 id of departed peer |
//! | 0x10 | Payload | application bytes |
//! | 0x11 | RelayedPayload | application bytes |

mod frame;
mod handshake;

pub use frame::*;
pub use handshake::*;
