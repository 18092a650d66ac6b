//! Value compression
//!
//! A reversible byte transform applied to large values before they are sent.
//! The compressed form is only kept when it is actually smaller.

use crate::error::{RelayError, Result};
use crate::protocol::CompressionType;

/// A reversible byte-array codec
pub trait Compressor: Send + Sync {
    /// Name written into the payload
    fn compression_type(&self) -> CompressionType;

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>>;
}

/// Snappy raw-format codec
#[derive(Debug, Default, Clone, Copy)]
pub struct SnappyCompressor;

impl Compressor for SnappyCompressor {
    fn compression_type(&self) -> CompressionType {
        CompressionType::Snappy
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Encoder::new()
            .compress_vec(input)
            .map_err(|e| RelayError::Compression(e.to_string()))
    }

    fn decompress(&self, input: &[u8]) -> Result<Vec<u8>> {
        snap::raw::Decoder::new()
            .decompress_vec(input)
            .map_err(|e| RelayError::Compression(e.to_string()))
    }
}

/// Saved space as a whole percentage of the original size
pub fn compression_percent(original: usize, compressed: usize) -> u32 {
    if original == 0 || compressed >= original {
        return 0;
    }
    (((original - compressed) * 100) / original) as u32
}

/// Compress `value` if it exceeds `threshold` and compression helps.
///
/// Returns the compressed bytes and the achieved percentage, or `None` when
/// the value should be sent as is.
pub fn maybe_compress(
    compressor: &dyn Compressor,
    value: &[u8],
    threshold: usize,
) -> Result<Option<(Vec<u8>, u32)>> {
    if value.len() <= threshold {
        return Ok(None);
    }
    let compressed = compressor.compress(value)?;
    let percent = compression_percent(value.len(), compressed.len());
    if percent == 0 {
        tracing::trace!("Compression saved nothing on {} bytes, sending clear", value.len());
        return Ok(None);
    }
    Ok(Some((compressed, percent)))
}
