//! Metadata component
//!
//! A variable-length header listing the fields present, followed by the field
//! bodies in the same order.
//!
//! ```text
//! Header                              Body
//! +----------+--------+---------+     +---------+-----+---------+-----------+
//! | size (4) | 0x02   | count   |     | field 1 | ... | field n | pad to 8  |
//! +----------+--------+---------+     +---------+-----+---------+-----------+
//! | tag/size byte per field     |
//! | ...            | pad to 4   |
//! +-----------------------------+
//! ```
//!
//! Each tag/size byte carries the field tag in its low five bits and the size
//! class in its top three. Size class `n > 0` means a fixed body of
//! `2^(n+1)` bytes; size class 0 means the body starts with its own length
//! byte (which counts itself and the padding to 4).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

use crate::error::{RelayError, Result};

use super::{padded_len, put_padding};

/// Component tag of the metadata component
pub const METADATA_TAG: u8 = 0x02;

/// Field tags
pub mod field_tag {
    pub const TIME_TO_LIVE: u8 = 0x01;
    pub const VERSION: u8 = 0x02;
    pub const CREATION_TIME: u8 = 0x03;
    pub const EXPIRATION_TIME: u8 = 0x04;
    pub const REQUEST_ID: u8 = 0x05;
    pub const SOURCE_INFO: u8 = 0x06;
    pub const LAST_MODIFICATION_TIME: u8 = 0x07;
    pub const ORIGINATOR_REQUEST_ID: u8 = 0x08;
    pub const CORRELATION_ID: u8 = 0x09;
    pub const REQUEST_HANDLING_TIME: u8 = 0x0A;
}

const SIZE_CLASS_VARIABLE: u8 = 0;
const SIZE_CLASS_4: u8 = 1;
const SIZE_CLASS_8: u8 = 2;
const SIZE_CLASS_16: u8 = 3;

/// Byte length of a fixed field of the given (non-zero) size class
pub fn fixed_field_len(size_class: u8) -> usize {
    1usize << (size_class as usize + 1)
}

/// Largest correlation id that still fits the one-byte field size
/// (`2 + len` padded to 4 must not exceed 255)
pub const MAX_CORRELATION_ID_LEN: usize = 250;

/// Source info carried by every request (and echoed by ping replies)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub ip: IpAddr,
    pub port: u16,
    pub app_name: Vec<u8>,
}

impl SourceInfo {
    pub fn new(ip: IpAddr, port: u16, app_name: impl Into<Vec<u8>>) -> Self {
        Self {
            ip,
            port,
            app_name: app_name.into(),
        }
    }

    fn ip_len(&self) -> usize {
        match self.ip {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 16,
        }
    }

    /// Field length including its size byte and padding to 4
    fn field_len(&self) -> usize {
        padded_len(1 + 1 + 2 + self.ip_len() + self.app_name.len(), 4)
    }
}

/// A single metadata field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaField {
    /// Record lifetime in seconds
    TimeToLive(u32),
    Version(u32),
    /// Seconds since the epoch
    CreationTime(u32),
    /// Seconds since the epoch
    ExpirationTime(u32),
    RequestId(Uuid),
    SourceInfo(SourceInfo),
    /// Nanoseconds since the epoch
    LastModificationTime(u64),
    OriginatorRequestId(Uuid),
    CorrelationId(Vec<u8>),
    /// Server-side handling time in microseconds
    RequestHandlingTime(u32),
    /// A field this client does not understand, kept byte-for-byte
    Unknown { tag_and_size: u8, raw: Vec<u8> },
}

impl MetaField {
    /// The tag/size-class byte written into the component header
    pub fn tag_and_size(&self) -> u8 {
        let (tag, size_class) = match self {
            MetaField::TimeToLive(_) => (field_tag::TIME_TO_LIVE, SIZE_CLASS_4),
            MetaField::Version(_) => (field_tag::VERSION, SIZE_CLASS_4),
            MetaField::CreationTime(_) => (field_tag::CREATION_TIME, SIZE_CLASS_4),
            MetaField::ExpirationTime(_) => (field_tag::EXPIRATION_TIME, SIZE_CLASS_4),
            MetaField::RequestId(_) => (field_tag::REQUEST_ID, SIZE_CLASS_16),
            MetaField::SourceInfo(_) => (field_tag::SOURCE_INFO, SIZE_CLASS_VARIABLE),
            MetaField::LastModificationTime(_) => (field_tag::LAST_MODIFICATION_TIME, SIZE_CLASS_8),
            MetaField::OriginatorRequestId(_) => (field_tag::ORIGINATOR_REQUEST_ID, SIZE_CLASS_16),
            MetaField::CorrelationId(_) => (field_tag::CORRELATION_ID, SIZE_CLASS_VARIABLE),
            MetaField::RequestHandlingTime(_) => (field_tag::REQUEST_HANDLING_TIME, SIZE_CLASS_4),
            MetaField::Unknown { tag_and_size, .. } => return *tag_and_size,
        };
        tag | (size_class << 5)
    }

    /// Encoded body length in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            MetaField::SourceInfo(info) => info.field_len(),
            MetaField::CorrelationId(id) => padded_len(2 + id.len(), 4),
            MetaField::Unknown { raw, .. } => raw.len(),
            other => fixed_field_len(other.tag_and_size() >> 5),
        }
    }

    fn check(&self) -> Result<()> {
        match self {
            MetaField::SourceInfo(info) if info.app_name.len() > 0x7F => Err(RelayError::Validation(
                format!("app name too long: {} bytes", info.app_name.len()),
            )),
            MetaField::CorrelationId(id) if id.len() > MAX_CORRELATION_ID_LEN => Err(RelayError::Validation(
                format!("correlation id too long: {} bytes", id.len()),
            )),
            MetaField::SourceInfo(_) | MetaField::CorrelationId(_) => u8::try_from(self.encoded_len())
                .map(|_| ())
                .map_err(|_| {
                    RelayError::Validation(format!(
                        "metadata field too long: {} bytes",
                        self.encoded_len()
                    ))
                }),
            _ => Ok(()),
        }
    }

    fn encode(&self, out: &mut BytesMut) {
        debug_assert!(self.check().is_ok(), "unchecked metadata field {:?}", self);
        let start = out.len();
        match self {
            MetaField::TimeToLive(v)
            | MetaField::Version(v)
            | MetaField::CreationTime(v)
            | MetaField::ExpirationTime(v)
            | MetaField::RequestHandlingTime(v) => out.put_u32(*v),
            MetaField::LastModificationTime(v) => out.put_u64(*v),
            MetaField::RequestId(id) | MetaField::OriginatorRequestId(id) => {
                out.put_slice(id.as_bytes())
            }
            MetaField::SourceInfo(info) => {
                out.put_u8(info.field_len() as u8);
                let mut len_and_kind = info.app_name.len() as u8;
                if info.ip.is_ipv6() {
                    len_and_kind |= 0x80;
                }
                out.put_u8(len_and_kind);
                out.put_u16(info.port);
                match info.ip {
                    IpAddr::V4(ip) => out.put_slice(&ip.octets()),
                    IpAddr::V6(ip) => out.put_slice(&ip.octets()),
                }
                out.put_slice(&info.app_name);
                put_padding(out, start, 4);
            }
            MetaField::CorrelationId(id) => {
                out.put_u8(padded_len(2 + id.len(), 4) as u8);
                out.put_u8(id.len() as u8);
                out.put_slice(id);
                put_padding(out, start, 4);
            }
            MetaField::Unknown { raw, .. } => out.put_slice(raw),
        }
    }

    /// Parse one field body from the front of `body`
    fn decode(tag_and_size: u8, body: &mut &[u8]) -> Result<Self> {
        let tag = tag_and_size & 0x1F;
        let size_class = tag_and_size >> 5;

        if size_class == SIZE_CLASS_VARIABLE {
            let raw = take_variable(body)?;
            return Ok(match tag {
                field_tag::SOURCE_INFO => MetaField::SourceInfo(decode_source_info(raw)?),
                field_tag::CORRELATION_ID => MetaField::CorrelationId(decode_octets(raw)?),
                _ => MetaField::Unknown {
                    tag_and_size,
                    raw: raw.to_vec(),
                },
            });
        }

        let len = fixed_field_len(size_class);
        if body.len() < len {
            return Err(RelayError::Decode(format!(
                "Metadata field 0x{:02x}: need {} bytes, have {}",
                tag,
                len,
                body.len()
            )));
        }
        let (raw, rest) = body.split_at(len);
        *body = rest;

        let field = match (tag, size_class) {
            (field_tag::TIME_TO_LIVE, SIZE_CLASS_4) => MetaField::TimeToLive(be_u32(raw)),
            (field_tag::VERSION, SIZE_CLASS_4) => MetaField::Version(be_u32(raw)),
            (field_tag::CREATION_TIME, SIZE_CLASS_4) => MetaField::CreationTime(be_u32(raw)),
            (field_tag::EXPIRATION_TIME, SIZE_CLASS_4) => MetaField::ExpirationTime(be_u32(raw)),
            (field_tag::REQUEST_HANDLING_TIME, SIZE_CLASS_4) => {
                MetaField::RequestHandlingTime(be_u32(raw))
            }
            (field_tag::LAST_MODIFICATION_TIME, SIZE_CLASS_8) => {
                MetaField::LastModificationTime((&raw[..]).get_u64())
            }
            (field_tag::REQUEST_ID, SIZE_CLASS_16) => MetaField::RequestId(uuid_from(raw)),
            (field_tag::ORIGINATOR_REQUEST_ID, SIZE_CLASS_16) => {
                MetaField::OriginatorRequestId(uuid_from(raw))
            }
            _ => {
                tracing::trace!("Skipping unknown metadata field 0x{:02x}", tag_and_size);
                MetaField::Unknown {
                    tag_and_size,
                    raw: raw.to_vec(),
                }
            }
        };
        Ok(field)
    }
}

fn be_u32(raw: &[u8]) -> u32 {
    u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])
}

fn uuid_from(raw: &[u8]) -> Uuid {
    let mut id = [0u8; 16];
    id.copy_from_slice(&raw[..16]);
    Uuid::from_bytes(id)
}

/// Split off a self-sized variable field (size byte counts itself)
fn take_variable<'a>(body: &mut &'a [u8]) -> Result<&'a [u8]> {
    let size = *body
        .first()
        .ok_or_else(|| RelayError::Decode("Variable metadata field: missing size".to_string()))?
        as usize;
    if size == 0 || size > body.len() {
        return Err(RelayError::Decode(format!(
            "Variable metadata field: size {} with {} bytes left",
            size,
            body.len()
        )));
    }
    let (raw, rest) = body.split_at(size);
    *body = rest;
    Ok(raw)
}

fn decode_source_info(raw: &[u8]) -> Result<SourceInfo> {
    if raw.len() < 4 {
        return Err(RelayError::Decode("Source info: truncated header".to_string()));
    }
    let is_ipv6 = raw[1] & 0x80 != 0;
    let app_len = (raw[1] & 0x7F) as usize;
    let port = u16::from_be_bytes([raw[2], raw[3]]);
    let ip_len = if is_ipv6 { 16 } else { 4 };
    if raw.len() < 4 + ip_len + app_len {
        return Err(RelayError::Decode(format!(
            "Source info: {} bytes cannot hold ip ({}) and app name ({})",
            raw.len(),
            ip_len,
            app_len
        )));
    }
    let ip_bytes = &raw[4..4 + ip_len];
    let ip = if is_ipv6 {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(ip_bytes);
        IpAddr::V6(Ipv6Addr::from(octets))
    } else {
        IpAddr::V4(Ipv4Addr::new(ip_bytes[0], ip_bytes[1], ip_bytes[2], ip_bytes[3]))
    };
    let app_name = raw[4 + ip_len..4 + ip_len + app_len].to_vec();
    Ok(SourceInfo { ip, port, app_name })
}

fn decode_octets(raw: &[u8]) -> Result<Vec<u8>> {
    if raw.len() < 2 {
        return Err(RelayError::Decode("Octet field: truncated header".to_string()));
    }
    let len = raw[1] as usize;
    if raw.len() < 2 + len {
        return Err(RelayError::Decode(format!(
            "Octet field: length {} exceeds field size {}",
            len,
            raw.len()
        )));
    }
    Ok(raw[2..2 + len].to_vec())
}

/// The metadata component: an ordered list of fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataComponent {
    pub fields: Vec<MetaField>,
}

impl MetadataComponent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field (fields are encoded in insertion order)
    pub fn push(&mut self, field: MetaField) {
        self.fields.push(field);
    }

    pub fn with(mut self, field: MetaField) -> Self {
        self.fields.push(field);
        self
    }

    /// Header length: size(4) + tag(1) + count(1) + one byte per field, padded to 4
    pub fn header_len(&self) -> usize {
        padded_len(6 + self.fields.len(), 4)
    }

    /// Total component length including both paddings
    pub fn encoded_len(&self) -> usize {
        let body: usize = self.fields.iter().map(MetaField::encoded_len).sum();
        padded_len(self.header_len() + body, 8)
    }

    pub fn encode(&self, out: &mut BytesMut) -> Result<()> {
        if self.fields.len() > u8::MAX as usize {
            return Err(RelayError::Validation(format!(
                "too many metadata fields: {}",
                self.fields.len()
            )));
        }
        for field in &self.fields {
            field.check()?;
        }

        let start = out.len();
        out.put_u32(self.encoded_len() as u32);
        out.put_u8(METADATA_TAG);
        out.put_u8(self.fields.len() as u8);
        for field in &self.fields {
            out.put_u8(field.tag_and_size());
        }
        put_padding(out, start, 4);

        for field in &self.fields {
            field.encode(out);
        }
        put_padding(out, start, 8);
        Ok(())
    }

    /// Parse a whole component (`component` starts at its size field)
    pub fn decode(component: &[u8]) -> Result<Self> {
        if component.len() < 6 {
            return Err(RelayError::Decode(format!(
                "Metadata component: {} bytes is shorter than its header",
                component.len()
            )));
        }
        let count = component[5] as usize;
        let header_len = padded_len(6 + count, 4);
        if component.len() < header_len {
            return Err(RelayError::Decode(format!(
                "Metadata component: header needs {} bytes, have {}",
                header_len,
                component.len()
            )));
        }
        let tags = &component[6..6 + count];

        let mut body = &component[header_len..];
        let mut fields = Vec::with_capacity(count);
        for &tag_and_size in tags {
            fields.push(MetaField::decode(tag_and_size, &mut body)?);
        }
        Ok(Self { fields })
    }

    // =========================================================================
    // Field Accessors
    // =========================================================================

    pub fn ttl(&self) -> Option<u32> {
        self.fields.iter().find_map(|f| match f {
            MetaField::TimeToLive(v) => Some(*v),
            _ => None,
        })
    }

    pub fn version(&self) -> Option<u32> {
        self.fields.iter().find_map(|f| match f {
            MetaField::Version(v) => Some(*v),
            _ => None,
        })
    }

    pub fn creation_time(&self) -> Option<u32> {
        self.fields.iter().find_map(|f| match f {
            MetaField::CreationTime(v) => Some(*v),
            _ => None,
        })
    }

    pub fn expiration_time(&self) -> Option<u32> {
        self.fields.iter().find_map(|f| match f {
            MetaField::ExpirationTime(v) => Some(*v),
            _ => None,
        })
    }

    pub fn request_id(&self) -> Option<Uuid> {
        self.fields.iter().find_map(|f| match f {
            MetaField::RequestId(id) => Some(*id),
            _ => None,
        })
    }

    pub fn source_info(&self) -> Option<&SourceInfo> {
        self.fields.iter().find_map(|f| match f {
            MetaField::SourceInfo(info) => Some(info),
            _ => None,
        })
    }

    pub fn correlation_id(&self) -> Option<&[u8]> {
        self.fields.iter().find_map(|f| match f {
            MetaField::CorrelationId(id) => Some(id.as_slice()),
            _ => None,
        })
    }

    pub fn request_handling_time(&self) -> Option<u32> {
        self.fields.iter().find_map(|f| match f {
            MetaField::RequestHandlingTime(v) => Some(*v),
            _ => None,
        })
    }

    pub fn last_modification_time(&self) -> Option<u64> {
        self.fields.iter().find_map(|f| match f {
            MetaField::LastModificationTime(v) => Some(*v),
            _ => None,
        })
    }
}
