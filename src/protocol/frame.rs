//! Frame encoding and decoding.
//!
//! Every message on a transport connection starts with one kind byte:
//! - Control frames (0x00-0x03) carry a little-endian `u16` connection id
//! - Payload frames (0x10, 0x11) carry opaque application bytes

use thiserror::Error;

use crate::core::constants::{
    CONTROL_FRAME_SIZE, FRAME_HEADER_SIZE, FRAME_KIND_PAYLOAD, FRAME_KIND_PEER_JOINED,
    FRAME_KIND_PEER_LEFT, FRAME_KIND_RELAYED_PAYLOAD, FRAME_KIND_WELCOME,
    FRAME_KIND_WELCOME_ACK,
};
use crate::core::ConnectionId;

/// Frame kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Server -> client id assignment.
    Welcome = FRAME_KIND_WELCOME,
    /// Client -> server id echo.
    WelcomeAck = FRAME_KIND_WELCOME_ACK,
    /// Another peer joined.
    PeerJoined = FRAME_KIND_PEER_JOINED,
    /// Another peer left.
    PeerLeft = FRAME_KIND_PEER_LEFT,
    /// Application payload.
    Payload = FRAME_KIND_PAYLOAD,
    /// Application payload eligible for server-side relay.
    RelayedPayload = FRAME_KIND_RELAYED_PAYLOAD,
}

impl FrameKind {
    /// Parse a frame kind from a byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            FRAME_KIND_WELCOME => Some(Self::Welcome),
            FRAME_KIND_WELCOME_ACK => Some(Self::WelcomeAck),
            FRAME_KIND_PEER_JOINED => Some(Self::PeerJoined),
            FRAME_KIND_PEER_LEFT => Some(Self::PeerLeft),
            FRAME_KIND_PAYLOAD => Some(Self::Payload),
            FRAME_KIND_RELAYED_PAYLOAD => Some(Self::RelayedPayload),
            _ => None,
        }
    }

    /// Convert the kind to its byte representation.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether frames of this kind are protocol-internal.
    pub fn is_control(self) -> bool {
        !matches!(self, Self::Payload | Self::RelayedPayload)
    }
}

/// Protocol-internal control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Id assigned to the receiving client.
    Welcome(ConnectionId),
    /// The id the client believes it was assigned.
    WelcomeAck(ConnectionId),
    /// Id of a peer that finished its handshake.
    PeerJoined(ConnectionId),
    /// Id of a peer that left.
    PeerLeft(ConnectionId),
}

impl ControlMessage {
    /// Frame kind of this message.
    pub fn kind(&self) -> FrameKind {
        match self {
            ControlMessage::Welcome(_) => FrameKind::Welcome,
            ControlMessage::WelcomeAck(_) => FrameKind::WelcomeAck,
            ControlMessage::PeerJoined(_) => FrameKind::PeerJoined,
            ControlMessage::PeerLeft(_) => FrameKind::PeerLeft,
        }
    }

    /// The id carried by the message.
    pub fn id(&self) -> ConnectionId {
        match self {
            ControlMessage::Welcome(id)
            | ControlMessage::WelcomeAck(id)
            | ControlMessage::PeerJoined(id)
            | ControlMessage::PeerLeft(id) => *id,
        }
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> [u8; CONTROL_FRAME_SIZE] {
        let id = self.id().raw().to_le_bytes();
        [self.kind().as_byte(), id[0], id[1]]
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Control message.
    Control(ControlMessage),
    /// Application payload.
    Payload {
        /// Application bytes.
        data: Vec<u8>,
        /// Whether the sender asked the server to relay it.
        relayed: bool,
    },
}

impl Frame {
    /// Parse a frame from raw transport bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let (&kind_byte, body) = bytes.split_first().ok_or(FrameError::Empty)?;
        let kind = FrameKind::from_byte(kind_byte).ok_or(FrameError::UnknownKind(kind_byte))?;

        let frame = match kind {
            FrameKind::Payload => Frame::Payload {
                data: body.to_vec(),
                relayed: false,
            },
            FrameKind::RelayedPayload => Frame::Payload {
                data: body.to_vec(),
                relayed: true,
            },
            FrameKind::Welcome => Frame::Control(ControlMessage::Welcome(control_id(bytes)?)),
            FrameKind::WelcomeAck => Frame::Control(ControlMessage::WelcomeAck(control_id(bytes)?)),
            FrameKind::PeerJoined => Frame::Control(ControlMessage::PeerJoined(control_id(bytes)?)),
            FrameKind::PeerLeft => Frame::Control(ControlMessage::PeerLeft(control_id(bytes)?)),
        };
        Ok(frame)
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Control(message) => message.to_bytes().to_vec(),
            Frame::Payload { data, relayed } => encode_payload(data, *relayed),
        }
    }
}

fn control_id(bytes: &[u8]) -> Result<ConnectionId, FrameError> {
    if bytes.len() < CONTROL_FRAME_SIZE {
        return Err(FrameError::Truncated {
            expected: CONTROL_FRAME_SIZE,
            actual: bytes.len(),
        });
    }
    Ok(ConnectionId::new(u16::from_le_bytes([bytes[1], bytes[2]])))
}

/// Build a payload frame without going through [`Frame`].
pub fn encode_payload(data: &[u8], relayed: bool) -> Vec<u8> {
    let kind = if relayed {
        FrameKind::RelayedPayload
    } else {
        FrameKind::Payload
    };
    let mut bytes = Vec::with_capacity(FRAME_HEADER_SIZE + data.len());
    bytes.push(kind.as_byte());
    bytes.extend_from_slice(data);
    bytes
}

/// Errors that can occur during frame parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Zero-length message.
    #[error("empty frame")]
    Empty,

    /// Unknown kind byte.
    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownKind(u8),

    /// Control frame shorter than its fixed size.
    #[error("frame truncated: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Required size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },
}
