//! Payloads received before the handshake finished.

use std::collections::VecDeque;

/// One deferred application payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedPayload {
    /// Application bytes.
    pub data: Vec<u8>,
    /// Whether it arrived as a relayed payload.
    pub relayed: bool,
}

/// Arrival-ordered queue of payloads held back while a connection is
/// still connecting.
///
/// Drained exactly once, when the connection is promoted.
#[derive(Debug, Clone, Default)]
pub struct EarlyMessageBuffer {
    messages: VecDeque<BufferedPayload>,
}

impl EarlyMessageBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload.
    pub fn push(&mut self, data: Vec<u8>, relayed: bool) {
        self.messages.push_back(BufferedPayload { data, relayed });
    }

    /// Number of buffered payloads.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Take every buffered payload, oldest first, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<BufferedPayload> {
        std::mem::take(&mut self.messages).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_preserves_arrival_order() {
        let mut buffer = EarlyMessageBuffer::new();
        buffer.push(b"A".to_vec(), false);
        buffer.push(b"B".to_vec(), true);
        buffer.push(b"C".to_vec(), false);
        assert_eq!(buffer.len(), 3);

        let drained: Vec<_> = buffer.take().into_iter().map(|m| m.data).collect();
        assert_eq!(drained, vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);
        assert!(buffer.is_empty());
        assert!(buffer.take().is_empty());
    }
}
