//! Message header
//!
//! The fixed 16-byte prefix of every message: a 12-byte protocol header
//! followed by the 4-byte operational header.
//!
//! ```text
//!        |       0       |       1       |       2       |       3       |
//! -------+---------------+---------------+---------------+---------------+
//!    0   | magic (0x5050)                | version       | RQ | type     |
//! -------+-------------------------------+---------------+---------------+
//!    4   | message size                                                  |
//! -------+---------------------------------------------------------------+
//!    8   | opaque                                                        |
//! -------+---------------+---------------+-------------------------------+
//!   12   | opcode        | flag          | shard id (request)            |
//!        |               |               | reserved      | status (resp) |
//! -------+---------------+---------------+-------------------------------+
//! ```

use bytes::{Buf, BufMut};

use crate::error::{RelayError, Result};

/// Magic constant at the start of every message
pub const MAGIC: u16 = 0x5050;

/// Protocol version written by this client
pub const PROTOCOL_VERSION: u8 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Request/response kind, stored in the top two bits of the flags byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageRq {
    Response = 0,
    TwoWayRequest = 1,
    OneWayRequest = 2,
}

impl MessageRq {
    fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0 => Ok(MessageRq::Response),
            1 => Ok(MessageRq::TwoWayRequest),
            2 => Ok(MessageRq::OneWayRequest),
            _ => Err(RelayError::Decode(format!("Unknown RQ bits: {}", bits))),
        }
    }
}

/// Message class, stored in the low six bits of the flags byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Operational = 0,
    Admin = 1,
    ClusterControl = 2,
}

impl MessageType {
    fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0 => Ok(MessageType::Operational),
            1 => Ok(MessageType::Admin),
            2 => Ok(MessageType::ClusterControl),
            _ => Err(RelayError::Decode(format!("Unknown message type: {}", bits))),
        }
    }
}

/// Operation codes
///
/// Only the client operations (0x00-0x05) are ever built by this crate; the
/// replication codes decode so a misrouted message is recognisable in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    Create = 0x01,
    Get = 0x02,
    Update = 0x03,
    Set = 0x04,
    Destroy = 0x05,
    PrepareCreate = 0x81,
    Read = 0x82,
    PrepareUpdate = 0x83,
    PrepareSet = 0x84,
    PrepareDelete = 0x85,
    Delete = 0x86,
    Commit = 0xC1,
    Abort = 0xC2,
    Repair = 0xC3,
    MarkDelete = 0xC4,
    Clone = 0xE1,
    MockSetParam = 0xFE,
    MockReSet = 0xFF,
}

impl Opcode {
    /// Whether this is one of the operations a client may send
    pub fn is_client_op(self) -> bool {
        (self as u8) <= Opcode::Destroy as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = RelayError;

    fn try_from(value: u8) -> Result<Self> {
        let op = match value {
            0x00 => Opcode::Nop,
            0x01 => Opcode::Create,
            0x02 => Opcode::Get,
            0x03 => Opcode::Update,
            0x04 => Opcode::Set,
            0x05 => Opcode::Destroy,
            0x81 => Opcode::PrepareCreate,
            0x82 => Opcode::Read,
            0x83 => Opcode::PrepareUpdate,
            0x84 => Opcode::PrepareSet,
            0x85 => Opcode::PrepareDelete,
            0x86 => Opcode::Delete,
            0xC1 => Opcode::Commit,
            0xC2 => Opcode::Abort,
            0xC3 => Opcode::Repair,
            0xC4 => Opcode::MarkDelete,
            0xE1 => Opcode::Clone,
            0xFE => Opcode::MockSetParam,
            0xFF => Opcode::MockReSet,
            _ => {
                return Err(RelayError::Decode(format!(
                    "Unknown opcode: 0x{:02x}",
                    value
                )))
            }
        };
        Ok(op)
    }
}

/// The fixed message header
///
/// `shard_id` is only written for requests; `status` only for responses.
/// Both are kept on the struct so a decoded header re-encodes identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u8,
    pub msg_type: MessageType,
    pub rq: MessageRq,
    pub message_size: u32,
    pub opaque: u32,
    pub opcode: Opcode,
    pub flag: u8,
    pub shard_id: u16,
    pub status: u8,
}

impl MessageHeader {
    /// Header of a two-way operational request
    pub fn request(opcode: Opcode, opaque: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            msg_type: MessageType::Operational,
            rq: MessageRq::TwoWayRequest,
            message_size: HEADER_SIZE as u32,
            opaque,
            opcode,
            flag: 0,
            shard_id: 0,
            status: 0,
        }
    }

    /// Header of an operational response
    pub fn response(opcode: Opcode, opaque: u32, status: u8) -> Self {
        Self {
            rq: MessageRq::Response,
            status,
            ..Self::request(opcode, opaque)
        }
    }

    pub fn is_response(&self) -> bool {
        self.rq == MessageRq::Response
    }

    /// Write the 16 header bytes
    pub fn encode<B: BufMut>(&self, out: &mut B) {
        out.put_u16(MAGIC);
        out.put_u8(self.version);
        out.put_u8(((self.rq as u8) << 6) | (self.msg_type as u8 & 0x3F));
        out.put_u32(self.message_size);
        out.put_u32(self.opaque);
        out.put_u8(self.opcode as u8);
        out.put_u8(self.flag);
        if self.is_response() {
            out.put_u8(0); // reserved
            out.put_u8(self.status);
        } else {
            out.put_u16(self.shard_id);
        }
    }

    /// Parse the 16 header bytes
    ///
    /// Returns `Ok(None)` when fewer than 16 bytes are available.
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.len() < HEADER_SIZE {
            return Ok(None);
        }
        let mut buf = &bytes[..HEADER_SIZE];

        let magic = buf.get_u16();
        if magic != MAGIC {
            return Err(RelayError::Protocol(format!(
                "Bad magic: expected 0x{:04x}, got 0x{:04x}",
                MAGIC, magic
            )));
        }
        let version = buf.get_u8();
        let flags = buf.get_u8();
        let rq = MessageRq::from_bits(flags >> 6)?;
        let msg_type = MessageType::from_bits(flags & 0x3F)?;
        let message_size = buf.get_u32();
        let opaque = buf.get_u32();
        let opcode = Opcode::try_from(buf.get_u8())?;
        let flag = buf.get_u8();

        let (shard_id, status) = if rq == MessageRq::Response {
            let _reserved = buf.get_u8();
            (0, buf.get_u8())
        } else {
            (buf.get_u16(), 0)
        };

        Ok(Some(Self {
            version,
            msg_type,
            rq,
            message_size,
            opaque,
            opcode,
            flag,
            shard_id,
            status,
        }))
    }

    /// Read only the declared message size, without validating the rest
    pub fn peek_message_size(bytes: &[u8]) -> Option<u32> {
        if bytes.len() < 8 {
            return None;
        }
        Some(u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]))
    }
}
