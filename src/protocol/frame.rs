//! Streaming frame decoder
//!
//! Accumulates bytes read from a connection and yields whole messages.
//!
//! ## Error classes
//!
//! - `Protocol`: the stream itself is unusable (bad magic, absurd size). The
//!   caller should close the connection.
//! - `Decode`: a well-framed message could not be parsed. The frame has been
//!   consumed, so the caller may log it and keep reading.

use bytes::{Buf, BytesMut};

use crate::error::{RelayError, Result};

use super::header::{MessageHeader, HEADER_SIZE, MAGIC};
use super::message::{Decoded, Message};

/// Incremental decoder over a byte stream
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            max_frame_size,
        }
    }

    /// Buffer to read into
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Append bytes received from the peer
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet decoded
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Try to take the next complete message
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let magic = u16::from_be_bytes([self.buffer[0], self.buffer[1]]);
        if magic != MAGIC {
            return Err(RelayError::Protocol(format!(
                "Bad magic 0x{:04x} in stream",
                magic
            )));
        }
        let size = MessageHeader::peek_message_size(&self.buffer).unwrap_or(0) as usize;
        if size < HEADER_SIZE || size > self.max_frame_size {
            return Err(RelayError::Protocol(format!(
                "Frame size {} outside [{}, {}]",
                size, HEADER_SIZE, self.max_frame_size
            )));
        }
        if self.buffer.len() < size {
            self.buffer.reserve(size - self.buffer.len());
            return Ok(None);
        }

        let result = Message::decode(&self.buffer[..size]);
        self.buffer.advance(size);
        match result? {
            Decoded::Complete { message, .. } => Ok(Some(message)),
            Decoded::Incomplete => Err(RelayError::Decode(format!(
                "Frame of {} bytes decoded as incomplete",
                size
            ))),
        }
    }
}
