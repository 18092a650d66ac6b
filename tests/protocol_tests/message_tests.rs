//! Message Tests

use std::net::{IpAddr, Ipv4Addr};

use bytes::Bytes;
use relaykv::protocol::{
    Decoded, Message, MessageHeader, MetaField, MetadataComponent, Opcode, PayloadComponent,
    PayloadValue, SourceInfo, HEADER_SIZE,
};
use relaykv::RelayError;
use uuid::Uuid;

fn sample_request(opaque: u32) -> Message {
    let metadata = MetadataComponent::new()
        .with(MetaField::TimeToLive(1800))
        .with(MetaField::RequestId(Uuid::new_v4()))
        .with(MetaField::SourceInfo(SourceInfo::new(
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            0,
            "tests",
        )));
    let payload = PayloadComponent::new(
        Bytes::from_static(b"ns"),
        Bytes::from_static(b"user:1"),
        Some(PayloadValue::Clear(Bytes::from_static(b"hello"))),
    );
    Message::new(MessageHeader::request(Opcode::Create, opaque))
        .with_metadata(metadata)
        .with_payload(payload)
}

fn decode_complete(bytes: &[u8]) -> (Message, usize) {
    match Message::decode(bytes).unwrap() {
        Decoded::Complete { message, consumed } => (message, consumed),
        Decoded::Incomplete => panic!("Expected a complete message"),
    }
}

#[test]
fn test_message_size_is_computed() {
    let message = sample_request(9);
    let bytes = message.encode().unwrap();

    assert_eq!(bytes.len(), message.encoded_len());
    assert_eq!(bytes.len() % 8, 0);
    assert_eq!(&bytes[4..8], &(bytes.len() as u32).to_be_bytes());
}

#[test]
fn test_decode_restores_components() {
    let message = sample_request(9);
    let bytes = message.encode().unwrap();
    let (decoded, consumed) = decode_complete(&bytes);

    assert_eq!(consumed, bytes.len());
    assert_eq!(decoded.header.opaque, 9);
    assert_eq!(decoded.header.message_size as usize, bytes.len());
    assert_eq!(decoded.metadata, message.metadata);
    assert_eq!(decoded.payload, message.payload);
}

#[test]
fn test_header_only_message() {
    let message = Message::new(MessageHeader::response(Opcode::Nop, 3, 0));
    let bytes = message.encode().unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE);

    let (decoded, _) = decode_complete(&bytes);
    assert!(decoded.metadata.is_none());
    assert!(decoded.payload.is_none());
}

#[test]
fn test_partial_input_is_incomplete() {
    let bytes = sample_request(1).encode().unwrap();

    assert_eq!(Message::decode(&bytes[..10]).unwrap(), Decoded::Incomplete);
    assert_eq!(Message::decode(&bytes[..bytes.len() - 1]).unwrap(), Decoded::Incomplete);
}

#[test]
fn test_decode_stops_at_declared_size() {
    let first = sample_request(1).encode().unwrap();
    let second = sample_request(2).encode().unwrap();
    let mut stream = first.to_vec();
    stream.extend_from_slice(&second);

    let (decoded, consumed) = decode_complete(&stream);
    assert_eq!(decoded.header.opaque, 1);
    assert_eq!(consumed, first.len());
}

#[test]
fn test_unknown_component_is_skipped() {
    let message = sample_request(5);
    let bytes = message.encode().unwrap();

    // Splice an 8-byte component with tag 0x07 between header and metadata
    let mut spliced = bytes[..HEADER_SIZE].to_vec();
    spliced.extend_from_slice(&[0, 0, 0, 8, 0x07, 0xAA, 0xBB, 0xCC]);
    spliced.extend_from_slice(&bytes[HEADER_SIZE..]);
    let size = spliced.len() as u32;
    spliced[4..8].copy_from_slice(&size.to_be_bytes());

    let (decoded, consumed) = decode_complete(&spliced);
    assert_eq!(consumed, spliced.len());
    assert_eq!(decoded.metadata, message.metadata);
    assert_eq!(decoded.payload, message.payload);
}

#[test]
fn test_component_overrunning_message_is_an_error() {
    let mut bytes = sample_request(5).encode().unwrap().to_vec();
    bytes[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(&4096u32.to_be_bytes());

    assert!(matches!(Message::decode(&bytes), Err(RelayError::Decode(_))));
}

#[test]
fn test_size_below_header_is_a_protocol_error() {
    let mut bytes = Message::new(MessageHeader::request(Opcode::Get, 1))
        .encode()
        .unwrap()
        .to_vec();
    bytes[4..8].copy_from_slice(&8u32.to_be_bytes());

    assert!(matches!(Message::decode(&bytes), Err(RelayError::Protocol(_))));
}
