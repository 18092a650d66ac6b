//! Protocol Module
//!
//! Binary wire codec for messages exchanged with the proxy.
//!
//! ## Message Layout
//!
//! ```text
//! ┌──────────────┬─────────────────────────┬─────────────────────────┐
//! │ Header (16)  │ Metadata component (opt)│ Payload component (opt) │
//! └──────────────┴─────────────────────────┴─────────────────────────┘
//! ```
//!
//! All integers are big-endian. Components are self-sized and padded to 8
//! bytes; unknown components and unknown metadata fields are skipped.
//!
//! ## Submodules
//! - `header`: the fixed header, opcodes and RQ/type flags
//! - `metadata`: tagged metadata fields (TTL, version, request id, ...)
//! - `payload`: namespace, key and typed value
//! - `message`: whole-message encode/decode
//! - `frame`: incremental decoding from a byte stream
//! - `status`: server status codes

mod header;
mod metadata;
mod payload;
mod message;
mod frame;
mod status;

pub use header::{MessageHeader, MessageRq, MessageType, Opcode, HEADER_SIZE, MAGIC, PROTOCOL_VERSION};
pub use metadata::{
    field_tag, fixed_field_len, MetaField, MetadataComponent, SourceInfo, MAX_CORRELATION_ID_LEN,
    METADATA_TAG,
};
pub use payload::{
    CompressionType, PayloadComponent, PayloadValue, PAYLOAD_HEADER_SIZE, PAYLOAD_TAG, SNAPPY_NAME,
};
pub use message::{Decoded, Message};
pub use frame::FrameDecoder;
pub use status::ServerStatus;

use bytes::{BufMut, BytesMut};

/// Round `len` up to the next multiple of `align`
pub(crate) fn padded_len(len: usize, align: usize) -> usize {
    len.div_ceil(align) * align
}

/// Zero-fill `out` so the bytes written since `start` are a multiple of `align`
pub(crate) fn put_padding(out: &mut BytesMut, start: usize, align: usize) {
    let written = out.len() - start;
    out.put_bytes(0, padded_len(written, align) - written);
}
