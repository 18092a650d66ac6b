//! Response Correlator Tests

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use relaykv::context::{ClientContext, PING_OPAQUE};
use relaykv::protocol::{Message, MessageHeader, Opcode};
use relaykv::queue::{DeliveryOutcome, ResponseCorrelator};
use relaykv::{Config, RelayError};

fn reply(opaque: u32) -> Message {
    Message::new(MessageHeader::response(Opcode::Get, opaque, 0))
}

#[test]
fn test_deliver_reaches_the_waiting_slot() {
    let correlator = ResponseCorrelator::new();
    let slot = correlator.register(5).unwrap();

    assert_eq!(correlator.deliver(5, reply(5)), DeliveryOutcome::Delivered);
    let message = slot.wait(Duration::from_millis(100)).unwrap();
    assert_eq!(message.header.opaque, 5);
    assert!(!correlator.is_pending(5));
}

#[test]
fn test_unknown_opaque_has_no_cross_talk() {
    let correlator = ResponseCorrelator::new();
    let a = correlator.register(1).unwrap();
    let b = correlator.register(2).unwrap();

    assert_eq!(correlator.deliver(99, reply(99)), DeliveryOutcome::NoSlot);
    assert!(a.try_take().is_none());
    assert!(b.try_take().is_none());
    assert_eq!(correlator.pending_count(), 2);

    correlator.deliver(2, reply(2));
    assert!(a.try_take().is_none());
    assert_eq!(b.try_take().map(|m| m.header.opaque), Some(2));
}

#[test]
fn test_duplicate_response_is_dropped() {
    let correlator = ResponseCorrelator::new();
    let slot = correlator.register(3).unwrap();

    assert_eq!(correlator.deliver(3, reply(3)), DeliveryOutcome::Delivered);
    assert_eq!(correlator.deliver(3, reply(3)), DeliveryOutcome::NoSlot);
    assert!(slot.try_take().is_some());
    assert!(slot.try_take().is_none());
}

#[test]
fn test_late_response_after_cleanup() {
    let correlator = ResponseCorrelator::new();
    let slot = correlator.register(4).unwrap();

    assert!(slot.wait(Duration::from_millis(10)).is_none());
    correlator.cleanup(4);
    assert_eq!(correlator.deliver(4, reply(4)), DeliveryOutcome::NoSlot);
    assert_eq!(correlator.pending_count(), 0);
}

#[test]
fn test_register_collision() {
    let correlator = ResponseCorrelator::new();
    let _slot = correlator.register(8).unwrap();

    assert!(matches!(correlator.register(8), Err(RelayError::OpaqueCollision(8))));
}

#[test]
fn test_concurrent_opaques_are_distinct() {
    let ctx = ClientContext::new(Config::default());
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                (0..250)
                    .map(|_| ctx.allocate_slot().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for worker in workers {
        for slot in worker.join().unwrap() {
            assert_ne!(slot.opaque(), PING_OPAQUE);
            assert!(seen.insert(slot.opaque()), "opaque {} issued twice", slot.opaque());
        }
    }
    assert_eq!(seen.len(), 2000);
    assert_eq!(ctx.correlator().pending_count(), 2000);
}
