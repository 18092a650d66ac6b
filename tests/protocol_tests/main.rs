//! Protocol Tests
//!
//! Wire layout of headers, components, whole messages and the stream decoder.

mod compression_tests;
mod frame_tests;
mod message_tests;
mod payload_tests;
mod status_tests;
