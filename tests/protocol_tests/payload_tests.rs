//! Payload Component Tests

use bytes::{Bytes, BytesMut};
use relaykv::protocol::{CompressionType, PayloadComponent, PayloadValue, PAYLOAD_TAG};
use relaykv::RelayError;

fn encode(component: &PayloadComponent) -> Vec<u8> {
    let mut out = BytesMut::new();
    component.encode(&mut out).unwrap();
    out.to_vec()
}

#[test]
fn test_clear_value_layout() {
    let component = PayloadComponent::new(
        Bytes::from_static(b"testnamespace123"),
        Bytes::from_static(b"testkey123"),
        Some(PayloadValue::Clear(Bytes::from_static(b"testvalue456"))),
    );
    let bytes = encode(&component);

    assert_eq!(bytes.len(), 56);
    assert_eq!(&bytes[0..4], &56u32.to_be_bytes());
    assert_eq!(bytes[4], PAYLOAD_TAG);
    assert_eq!(bytes[5], 16);
    assert_eq!(&bytes[6..8], &10u16.to_be_bytes());
    assert_eq!(&bytes[8..12], &13u32.to_be_bytes());
    assert_eq!(&bytes[12..28], b"testnamespace123");
    assert_eq!(&bytes[28..38], b"testkey123");
    assert_eq!(bytes[38], 0); // clear
    assert_eq!(&bytes[39..51], b"testvalue456");
    assert_eq!(&bytes[51..56], &[0, 0, 0, 0, 0]);
}

#[test]
fn test_no_value() {
    let component = PayloadComponent::new(
        Bytes::from_static(b"ns"),
        Bytes::from_static(b"k"),
        None,
    );
    let bytes = encode(&component);

    assert_eq!(bytes.len(), 16);
    assert_eq!(&bytes[8..12], &[0, 0, 0, 0]);

    let decoded = PayloadComponent::decode(&bytes).unwrap();
    assert_eq!(decoded.namespace, Bytes::from_static(b"ns"));
    assert_eq!(decoded.key, Bytes::from_static(b"k"));
    assert!(decoded.value.is_none());
}

#[test]
fn test_empty_value_is_no_value() {
    let component = PayloadComponent::new(
        Bytes::from_static(b"ns"),
        Bytes::from_static(b"k"),
        Some(PayloadValue::Clear(Bytes::new())),
    );
    assert!(component.value.is_none());
}

#[test]
fn test_compressed_value_names_its_codec() {
    let component = PayloadComponent::new(
        Bytes::from_static(b"ns"),
        Bytes::from_static(b"key"),
        Some(PayloadValue::Compressed {
            compression: CompressionType::Snappy,
            data: Bytes::from_static(&[1, 2, 3, 4]),
        }),
    );
    let bytes = encode(&component);

    // type + name length + "Snappy" + data
    assert_eq!(&bytes[8..12], &12u32.to_be_bytes());
    let value_start = 12 + 2 + 3;
    assert_eq!(bytes[value_start], 3);
    assert_eq!(bytes[value_start + 1], 6);
    assert_eq!(&bytes[value_start + 2..value_start + 8], b"Snappy");
    assert_eq!(&bytes[value_start + 8..value_start + 12], &[1, 2, 3, 4]);

    let decoded = PayloadComponent::decode(&bytes).unwrap();
    assert_eq!(decoded, component);
}

#[test]
fn test_encrypted_value_types_survive() {
    for value in [
        PayloadValue::ClientEncrypted(Bytes::from_static(b"cipher")),
        PayloadValue::ProxyEncrypted(Bytes::from_static(b"cipher")),
    ] {
        let component = PayloadComponent::new(
            Bytes::from_static(b"ns"),
            Bytes::from_static(b"key"),
            Some(value.clone()),
        );
        let decoded = PayloadComponent::decode(&encode(&component)).unwrap();
        assert_eq!(decoded.value, Some(value));
    }
}

#[test]
fn test_lengths_past_the_component_are_rejected() {
    let component = PayloadComponent::new(
        Bytes::from_static(b"ns"),
        Bytes::from_static(b"key"),
        Some(PayloadValue::Clear(Bytes::from_static(b"value"))),
    );
    let mut bytes = encode(&component);
    bytes[8..12].copy_from_slice(&200u32.to_be_bytes());

    assert!(matches!(PayloadComponent::decode(&bytes), Err(RelayError::Decode(_))));
}

#[test]
fn test_unknown_value_type_is_rejected() {
    let component = PayloadComponent::new(
        Bytes::from_static(b"ns"),
        Bytes::from_static(b"key"),
        Some(PayloadValue::Clear(Bytes::from_static(b"value"))),
    );
    let mut bytes = encode(&component);
    bytes[12 + 2 + 3] = 9;

    assert!(matches!(PayloadComponent::decode(&bytes), Err(RelayError::Decode(_))));
}

#[test]
fn test_namespace_longer_than_a_byte() {
    let component = PayloadComponent::new(
        Bytes::from(vec![b'n'; 256]),
        Bytes::from_static(b"key"),
        None,
    );
    let mut out = BytesMut::new();
    assert!(matches!(component.encode(&mut out), Err(RelayError::Validation(_))));
}
