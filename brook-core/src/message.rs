//! Framed-message wire format.
//!
//! Every message in the log is stored and streamed as a fixed header
//! followed by the payload:
//!
//! ```text
//! +-----------+------------+----------+----------+
//! |  Offset   | Timestamp  |   Size   | Payload  |
//! | (8 bytes) | (8 bytes)  | (4 bytes)| (N bytes)|
//! +-----------+------------+----------+----------+
//! ```
//!
//! - Offset: position of the message in the log
//! - Timestamp: milliseconds since the Unix epoch
//! - Size: payload length in bytes (not including the header)
//!
//! All integers are stored in big-endian format. A stream of log bytes is
//! a concatenation of such frames in strictly increasing offset order.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::types::{Offset, Timestamp};

/// Size of the message header in bytes.
pub const MESSAGE_HEADER_SIZE: usize = 20; // 8 + 8 + 4

/// Message header containing framing metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Offset of the message in the log.
    pub offset: Offset,
    /// Timestamp assigned at append time.
    pub timestamp: Timestamp,
    /// Length of the payload in bytes.
    pub size: u32,
}

impl MessageHeader {
    /// Creates a new message header.
    #[must_use]
    pub const fn new(offset: Offset, timestamp: Timestamp, size: u32) -> Self {
        Self {
            offset,
            timestamp,
            size,
        }
    }

    /// Encodes the header to bytes.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.offset.get());
        buf.put_u64(self.timestamp.as_millis());
        buf.put_u32(self.size);
    }

    /// Decodes a header from bytes.
    ///
    /// # Panics
    /// Panics if fewer than [`MESSAGE_HEADER_SIZE`] bytes remain.
    #[must_use]
    pub fn decode(buf: &mut impl Buf) -> Self {
        assert!(
            buf.remaining() >= MESSAGE_HEADER_SIZE,
            "buffer too small for message header"
        );
        let offset = Offset::new(buf.get_u64());
        let timestamp = Timestamp::from_millis(buf.get_u64());
        let size = buf.get_u32();
        Self {
            offset,
            timestamp,
            size,
        }
    }
}

/// A single framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Offset of the message in the log.
    pub offset: Offset,
    /// Timestamp assigned at append time.
    pub timestamp: Timestamp,
    /// The message payload.
    pub payload: Bytes,
}

impl Message {
    /// Creates a new message.
    #[must_use]
    pub fn new(offset: Offset, timestamp: Timestamp, payload: impl Into<Bytes>) -> Self {
        Self {
            offset,
            timestamp,
            payload: payload.into(),
        }
    }

    /// Returns the framed size of the message (header plus payload).
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        MESSAGE_HEADER_SIZE + self.payload.len()
    }

    /// Encodes the message to bytes.
    #[allow(clippy::cast_possible_truncation)] // Payload sizes are bounded by the log's limits.
    pub fn encode(&self, buf: &mut BytesMut) {
        MessageHeader::new(self.offset, self.timestamp, self.payload.len() as u32).encode(buf);
        buf.put_slice(&self.payload);
    }

    /// Decodes a message from bytes.
    ///
    /// Returns `None` if the buffer ends before the frame is complete.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < MESSAGE_HEADER_SIZE {
            return None;
        }
        let header = MessageHeader::decode(buf);
        if buf.remaining() < header.size as usize {
            return None;
        }
        let payload = buf.copy_to_bytes(header.size as usize);
        Some(Self {
            offset: header.offset,
            timestamp: header.timestamp,
            payload,
        })
    }
}
