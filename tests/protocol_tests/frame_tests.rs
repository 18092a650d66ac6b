//! Frame Decoder Tests

use relaykv::protocol::{FrameDecoder, Message, MessageHeader, MetaField, MetadataComponent, Opcode};
use relaykv::RelayError;

fn response(opaque: u32) -> Vec<u8> {
    Message::new(MessageHeader::response(Opcode::Get, opaque, 0))
        .with_metadata(MetadataComponent::new().with(MetaField::Version(opaque)))
        .encode()
        .unwrap()
        .to_vec()
}

#[test]
fn test_message_split_across_reads() {
    let bytes = response(1);
    let mut decoder = FrameDecoder::new(1024);

    decoder.extend(&bytes[..5]);
    assert!(decoder.next_message().unwrap().is_none());
    decoder.extend(&bytes[5..20]);
    assert!(decoder.next_message().unwrap().is_none());
    decoder.extend(&bytes[20..]);

    let message = decoder.next_message().unwrap().unwrap();
    assert_eq!(message.header.opaque, 1);
    assert_eq!(decoder.buffered(), 0);
}

#[test]
fn test_several_messages_in_one_read() {
    let mut stream = response(1);
    stream.extend(response(2));
    stream.extend(response(3));
    let tail = response(4);
    stream.extend(&tail[..3]);

    let mut decoder = FrameDecoder::new(1024);
    decoder.extend(&stream);

    let mut opaques = Vec::new();
    while let Some(message) = decoder.next_message().unwrap() {
        opaques.push(message.header.opaque);
    }
    assert_eq!(opaques, vec![1, 2, 3]);
    assert_eq!(decoder.buffered(), 3);
}

#[test]
fn test_bad_magic_poisons_the_stream() {
    let mut bytes = response(1);
    bytes[1] = 0x00;

    let mut decoder = FrameDecoder::new(1024);
    decoder.extend(&bytes);
    assert!(matches!(decoder.next_message(), Err(RelayError::Protocol(_))));
}

#[test]
fn test_oversized_frame_is_refused() {
    let bytes = response(1);
    let mut decoder = FrameDecoder::new(bytes.len() - 1);
    decoder.extend(&bytes);

    assert!(matches!(decoder.next_message(), Err(RelayError::Protocol(_))));
}

#[test]
fn test_malformed_frame_is_consumed() {
    let mut bad = response(1);
    bad[12] = 0x42; // unknown opcode
    let good = response(2);

    let mut decoder = FrameDecoder::new(1024);
    decoder.extend(&bad);
    decoder.extend(&good);

    assert!(matches!(decoder.next_message(), Err(RelayError::Decode(_))));
    let message = decoder.next_message().unwrap().unwrap();
    assert_eq!(message.header.opaque, 2);
}
