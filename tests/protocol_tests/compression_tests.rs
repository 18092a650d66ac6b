//! Payload Compression Tests

use relaykv::compression::{compression_percent, maybe_compress, Compressor, SnappyCompressor};
use relaykv::RelayError;

#[test]
fn test_snappy_reverses() {
    let codec = SnappyCompressor;
    let input = b"abcabcabcabcabcabcabcabcabcabcabcabc".repeat(64);
    let packed = codec.compress(&input).unwrap();
    assert!(packed.len() < input.len());
    assert_eq!(codec.decompress(&packed).unwrap(), input);
}

#[test]
fn test_small_values_are_left_alone() {
    let out = maybe_compress(&SnappyCompressor, b"tiny", 1024).unwrap();
    assert!(out.is_none());
}

#[test]
fn test_percent() {
    assert_eq!(compression_percent(1000, 250), 75);
    assert_eq!(compression_percent(10, 12), 0);
    assert_eq!(compression_percent(0, 0), 0);
}

#[test]
fn test_garbage_fails_to_decompress() {
    let err = SnappyCompressor.decompress(&[0xff, 0xff, 0xff, 0xff, 0xff]);
    assert!(matches!(err, Err(RelayError::Compression(_))));
}
