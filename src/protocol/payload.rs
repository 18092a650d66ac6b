//! Payload component
//!
//! Carries the namespace, the key and the (optional) value of a record.
//!
//! ```text
//! +----------+-------+--------+---------+--------------+
//! | size (4) | 0x01  | ns len | key len | payload len  |
//! |          |       | (1)    | (2)     | (4)          |
//! +----------+-------+--------+---------+--------------+
//! | namespace | key | type (1) | value ...  | pad to 8 |
//! +-----------+-----+----------+------------+----------+
//! ```
//!
//! `payload len` is zero when there is no value; otherwise it counts the type
//! byte plus the value bytes. A compressed value additionally carries a
//! one-byte compression name length and the name before the data.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{RelayError, Result};

use super::{padded_len, put_padding};

/// Component tag of the payload component
pub const PAYLOAD_TAG: u8 = 0x01;

/// Fixed part of the payload component
pub const PAYLOAD_HEADER_SIZE: usize = 12;

/// Name written for Snappy-compressed values
pub const SNAPPY_NAME: &str = "Snappy";

const TYPE_CLEAR: u8 = 0;
const TYPE_CLIENT_ENCRYPTED: u8 = 1;
const TYPE_PROXY_ENCRYPTED: u8 = 2;
const TYPE_COMPRESSED: u8 = 3;

/// Compression scheme named inside a compressed value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompressionType {
    Snappy,
    Other(String),
}

impl CompressionType {
    fn from_name(name: &[u8]) -> Self {
        if name == SNAPPY_NAME.as_bytes() {
            CompressionType::Snappy
        } else {
            CompressionType::Other(String::from_utf8_lossy(name).into_owned())
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CompressionType::Snappy => SNAPPY_NAME,
            CompressionType::Other(name) => name,
        }
    }
}

/// A record value, tagged with how its bytes are to be interpreted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadValue {
    Clear(Bytes),
    ClientEncrypted(Bytes),
    ProxyEncrypted(Bytes),
    Compressed {
        compression: CompressionType,
        data: Bytes,
    },
}

impl PayloadValue {
    /// The stored bytes, whatever their encoding
    pub fn data(&self) -> &Bytes {
        match self {
            PayloadValue::Clear(data)
            | PayloadValue::ClientEncrypted(data)
            | PayloadValue::ProxyEncrypted(data)
            | PayloadValue::Compressed { data, .. } => data,
        }
    }

    fn type_byte(&self) -> u8 {
        match self {
            PayloadValue::Clear(_) => TYPE_CLEAR,
            PayloadValue::ClientEncrypted(_) => TYPE_CLIENT_ENCRYPTED,
            PayloadValue::ProxyEncrypted(_) => TYPE_PROXY_ENCRYPTED,
            PayloadValue::Compressed { .. } => TYPE_COMPRESSED,
        }
    }

    /// Value length as written into `payload len`
    pub fn encoded_len(&self) -> usize {
        match self {
            PayloadValue::Compressed { compression, data } => {
                1 + 1 + compression.name().len() + data.len()
            }
            other => 1 + other.data().len(),
        }
    }
}

/// The payload component
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadComponent {
    pub namespace: Bytes,
    pub key: Bytes,
    pub value: Option<PayloadValue>,
}

impl PayloadComponent {
    /// Build a payload; an empty value is stored as no value
    pub fn new(
        namespace: impl Into<Bytes>,
        key: impl Into<Bytes>,
        value: Option<PayloadValue>,
    ) -> Self {
        let value = value.filter(|v| !v.data().is_empty());
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value,
        }
    }

    fn value_len(&self) -> usize {
        self.value.as_ref().map_or(0, PayloadValue::encoded_len)
    }

    /// Total component length including padding to 8
    pub fn encoded_len(&self) -> usize {
        padded_len(
            PAYLOAD_HEADER_SIZE + self.namespace.len() + self.key.len() + self.value_len(),
            8,
        )
    }

    pub fn encode(&self, out: &mut BytesMut) -> Result<()> {
        if self.namespace.len() > u8::MAX as usize {
            return Err(RelayError::Validation(format!(
                "namespace too long for the wire: {} bytes",
                self.namespace.len()
            )));
        }
        if self.key.len() > u16::MAX as usize {
            return Err(RelayError::Validation(format!(
                "key too long for the wire: {} bytes",
                self.key.len()
            )));
        }
        if let Some(PayloadValue::Compressed { compression, .. }) = &self.value {
            if compression.name().len() > u8::MAX as usize {
                return Err(RelayError::Validation(format!(
                    "compression name too long: {}",
                    compression.name()
                )));
            }
        }

        let start = out.len();
        out.put_u32(self.encoded_len() as u32);
        out.put_u8(PAYLOAD_TAG);
        out.put_u8(self.namespace.len() as u8);
        out.put_u16(self.key.len() as u16);
        out.put_u32(self.value_len() as u32);
        out.put_slice(&self.namespace);
        out.put_slice(&self.key);

        if let Some(value) = &self.value {
            out.put_u8(value.type_byte());
            if let PayloadValue::Compressed { compression, .. } = value {
                out.put_u8(compression.name().len() as u8);
                out.put_slice(compression.name().as_bytes());
            }
            out.put_slice(value.data());
        }
        put_padding(out, start, 8);
        Ok(())
    }

    /// Parse a whole component (`component` starts at its size field)
    pub fn decode(component: &[u8]) -> Result<Self> {
        if component.len() < PAYLOAD_HEADER_SIZE {
            return Err(RelayError::Decode(format!(
                "Payload component: {} bytes is shorter than its header",
                component.len()
            )));
        }
        let mut buf = &component[5..PAYLOAD_HEADER_SIZE];
        let ns_len = buf.get_u8() as usize;
        let key_len = buf.get_u16() as usize;
        let value_len = buf.get_u32() as usize;

        let needed = PAYLOAD_HEADER_SIZE + ns_len + key_len + value_len;
        if component.len() < needed {
            return Err(RelayError::Decode(format!(
                "Payload component: lengths need {} bytes, component has {}",
                needed,
                component.len()
            )));
        }

        let mut offset = PAYLOAD_HEADER_SIZE;
        let namespace = Bytes::copy_from_slice(&component[offset..offset + ns_len]);
        offset += ns_len;
        let key = Bytes::copy_from_slice(&component[offset..offset + key_len]);
        offset += key_len;

        let value = if value_len == 0 {
            None
        } else {
            Some(decode_value(&component[offset..offset + value_len])?)
        };

        Ok(Self::new(namespace, key, value))
    }
}

fn decode_value(raw: &[u8]) -> Result<PayloadValue> {
    let kind = raw[0];
    let rest = &raw[1..];
    let value = match kind {
        TYPE_CLEAR => PayloadValue::Clear(Bytes::copy_from_slice(rest)),
        TYPE_CLIENT_ENCRYPTED => PayloadValue::ClientEncrypted(Bytes::copy_from_slice(rest)),
        TYPE_PROXY_ENCRYPTED => PayloadValue::ProxyEncrypted(Bytes::copy_from_slice(rest)),
        TYPE_COMPRESSED => {
            let name_len = *rest.first().ok_or_else(|| {
                RelayError::Decode("Compressed value: missing name length".to_string())
            })? as usize;
            if rest.len() < 1 + name_len {
                return Err(RelayError::Decode(format!(
                    "Compressed value: name length {} exceeds value",
                    name_len
                )));
            }
            PayloadValue::Compressed {
                compression: CompressionType::from_name(&rest[1..1 + name_len]),
                data: Bytes::copy_from_slice(&rest[1 + name_len..]),
            }
        }
        other => {
            return Err(RelayError::Decode(format!(
                "Unknown payload type: {}",
                other
            )))
        }
    };
    Ok(value)
}
