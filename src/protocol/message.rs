//! Whole-message encode/decode
//!
//! A message is the 16-byte header followed by zero or more components. Each
//! component starts with its own 4-byte size and 1-byte tag, so unknown
//! components can be skipped without understanding them.

use bytes::{Bytes, BytesMut};

use crate::error::{RelayError, Result};

use super::header::{MessageHeader, HEADER_SIZE};
use super::metadata::{MetadataComponent, METADATA_TAG};
use super::payload::{PayloadComponent, PAYLOAD_TAG};

/// A decoded (or to-be-encoded) message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub metadata: Option<MetadataComponent>,
    pub payload: Option<PayloadComponent>,
}

/// Outcome of decoding from a possibly partial buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// More bytes are needed
    Incomplete,
    /// One message was decoded from the first `consumed` bytes
    Complete { message: Message, consumed: usize },
}

impl Message {
    pub fn new(header: MessageHeader) -> Self {
        Self {
            header,
            metadata: None,
            payload: None,
        }
    }

    pub fn with_metadata(mut self, metadata: MetadataComponent) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_payload(mut self, payload: PayloadComponent) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Total encoded length, header included
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE
            + self.metadata.as_ref().map_or(0, MetadataComponent::encoded_len)
            + self.payload.as_ref().map_or(0, PayloadComponent::encoded_len)
    }

    /// Encode into a contiguous buffer; the header's message size is
    /// recomputed from the components
    pub fn encode(&self) -> Result<Bytes> {
        let total = self.encoded_len();
        let mut header = self.header;
        header.message_size = u32::try_from(total)
            .map_err(|_| RelayError::Validation(format!("message too large: {} bytes", total)))?;

        let mut out = BytesMut::with_capacity(total);
        header.encode(&mut out);
        if let Some(metadata) = &self.metadata {
            metadata.encode(&mut out)?;
        }
        if let Some(payload) = &self.payload {
            payload.encode(&mut out)?;
        }
        debug_assert_eq!(out.len(), total);
        Ok(out.freeze())
    }

    /// Decode one message from the front of `bytes`
    pub fn decode(bytes: &[u8]) -> Result<Decoded> {
        let header = match MessageHeader::decode(bytes)? {
            Some(header) => header,
            None => return Ok(Decoded::Incomplete),
        };
        let size = header.message_size as usize;
        if size < HEADER_SIZE {
            return Err(RelayError::Protocol(format!(
                "Message size {} is smaller than the header",
                size
            )));
        }
        if bytes.len() < size {
            return Ok(Decoded::Incomplete);
        }

        let message = Self::decode_body(header, &bytes[HEADER_SIZE..size])?;
        Ok(Decoded::Complete {
            message,
            consumed: size,
        })
    }

    fn decode_body(header: MessageHeader, mut body: &[u8]) -> Result<Self> {
        let mut message = Message::new(header);

        while !body.is_empty() {
            if body.len() < 5 {
                return Err(RelayError::Decode(format!(
                    "Trailing {} bytes do not form a component",
                    body.len()
                )));
            }
            let size = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
            if size == 0 || size > body.len() {
                return Err(RelayError::Decode(format!(
                    "Component size {} with {} bytes left in message",
                    size,
                    body.len()
                )));
            }
            let (component, rest) = body.split_at(size);
            match component[4] {
                METADATA_TAG => message.metadata = Some(MetadataComponent::decode(component)?),
                PAYLOAD_TAG => message.payload = Some(PayloadComponent::decode(component)?),
                tag => {
                    tracing::debug!("Skipping unknown component tag 0x{:02x} ({} bytes)", tag, size);
                }
            }
            body = rest;
        }

        Ok(message)
    }
}
