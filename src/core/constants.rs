//! Protocol constants.
//!
//! Wire discriminators are part of the framing contract and MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// FRAME KINDS
// =============================================================================

/// Server -> client: assigned connection id.
pub const FRAME_KIND_WELCOME: u8 = 0x00;

/// Client -> server: echo of the assigned connection id.
pub const FRAME_KIND_WELCOME_ACK: u8 = 0x01;

/// Server -> client: another peer finished its handshake.
pub const FRAME_KIND_PEER_JOINED: u8 = 0x02;

/// Server -> client: another peer left.
pub const FRAME_KIND_PEER_LEFT: u8 = 0x03;

/// Application payload.
pub const FRAME_KIND_PAYLOAD: u8 = 0x10;

/// Application payload the server may forward to every other client.
pub const FRAME_KIND_RELAYED_PAYLOAD: u8 = 0x11;

// =============================================================================
// FRAME SIZES
// =============================================================================

/// Size of the leading kind byte.
pub const FRAME_HEADER_SIZE: usize = 1;

/// Size of a control frame (kind + u16 id).
pub const CONTROL_FRAME_SIZE: usize = FRAME_HEADER_SIZE + 2;

/// Largest application payload accepted in one frame.
pub const MAX_PAYLOAD_SIZE: usize = 1225;

/// Largest frame pulled from the transport; longer messages are truncated.
pub const MAX_MESSAGE_SIZE: usize = MAX_PAYLOAD_SIZE + FRAME_HEADER_SIZE + 2;

// =============================================================================
// SEND FLAGS (transport)
// =============================================================================

/// Transport flag for unreliable delivery.
pub const SEND_FLAG_UNRELIABLE: u32 = 0;

/// Transport flag for reliable, ordered delivery.
pub const SEND_FLAG_RELIABLE: u32 = 8;

// =============================================================================
// SESSION DEFAULTS
// =============================================================================

/// Give up on a connection attempt after this long without a welcome.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);

/// Messages pulled from one connection per poll.
pub const DEFAULT_MAX_MESSAGES_PER_POLL: usize = 256;

/// Default server capacity.
pub const DEFAULT_MAX_CLIENTS: u16 = 16;

/// Default virtual listen port.
pub const DEFAULT_PORT: u16 = 0;

/// Host addresses that select the in-process server.
pub const LOOPBACK_ADDRESSES: [&str; 2] = ["localhost", "127.0.0.1"];
