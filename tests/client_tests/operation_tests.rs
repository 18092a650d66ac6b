//! Record Operation Tests

use bytes::Bytes;
use relaykv::protocol::MAX_CORRELATION_ID_LEN;
use relaykv::{RelayError, Request, ServerStatus};

use crate::harness::{config_for, connect, setup, start_proxy};

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_create_then_get() {
    let (_proxy, client) = setup();

    let created = client.create("user:1", "alice").unwrap();
    assert!(created.is_success());
    assert_eq!(created.version, 1);
    assert_eq!(created.key, Bytes::from_static(b"user:1"));
    assert!(created.request_handling_time_us > 0);

    let read = client.get("user:1").unwrap();
    assert!(read.is_success());
    assert_eq!(read.value, Some(Bytes::from_static(b"alice")));
    assert_eq!(read.version, 1);
    assert_ne!(read.request_id, created.request_id);
    assert!(read.message_size > 0);
}

#[test]
fn test_missing_key_is_an_answer() {
    let (_proxy, client) = setup();

    let read = client.get("nobody").unwrap();
    assert_eq!(read.status, ServerStatus::NoKey);
    assert!(read.value.is_none());
}

#[test]
fn test_duplicate_create_is_an_answer() {
    let (_proxy, client) = setup();

    client.create("dup", "one").unwrap();
    let again = client.create("dup", "two").unwrap();
    assert_eq!(again.status, ServerStatus::DuplicateKey);

    let read = client.get("dup").unwrap();
    assert_eq!(read.value, Some(Bytes::from_static(b"one")));
}

#[test]
fn test_update_set_and_destroy() {
    let (proxy, client) = setup();

    assert_eq!(client.update("cart", "x").unwrap().status, ServerStatus::NoKey);

    let set = client.set("cart", "apples").unwrap();
    assert_eq!(set.version, 1);
    let updated = client.update("cart", "pears").unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(client.get("cart").unwrap().value, Some(Bytes::from_static(b"pears")));
    assert_eq!(proxy.record_count(), 1);

    assert!(client.destroy("cart").unwrap().is_success());
    assert_eq!(client.get("cart").unwrap().status, ServerStatus::NoKey);
    assert_eq!(proxy.record_count(), 0);
}

#[test]
fn test_compare_and_set() {
    let (_proxy, client) = setup();
    client.create("counter", "1").unwrap();

    let stale = client.compare_and_set("counter", "2", 7).unwrap();
    assert_eq!(stale.status, ServerStatus::VersionConflict);
    assert_eq!(stale.version, 1);

    let fresh = client.compare_and_set("counter", "2", 1).unwrap();
    assert!(fresh.is_success());
    assert_eq!(fresh.version, 2);
}

#[test]
fn test_get_extends_ttl() {
    let (_proxy, client) = setup();

    let created = client.create_with_ttl("session", "token", 60).unwrap();
    assert_eq!(created.ttl_secs, 60);

    let read = client.get_with_ttl("session", 7200).unwrap();
    assert_eq!(read.ttl_secs, 7200);
}

#[test]
fn test_batch_keeps_submission_order() {
    let (_proxy, client) = setup();

    let requests: Vec<_> = (0..50)
        .map(|i| Request::set(format!("key-{}", i), format!("value-{}", i)))
        .collect();
    let results = client.execute_all(requests);

    assert_eq!(results.len(), 50);
    for (i, result) in results.into_iter().enumerate() {
        let response = result.unwrap();
        assert_eq!(response.key, Bytes::from(format!("key-{}", i)));
    }
    assert_eq!(client.stats().received, 50);
}

#[test]
fn test_compressed_values_come_back_whole() {
    let proxy = start_proxy();
    let client = connect(
        config_for(&proxy)
            .use_compression(true)
            .compression_threshold(64)
            .build(),
    );
    let value = "compress me please ".repeat(200);

    let stored = client.set("big", &value).unwrap();
    assert!(stored.compression_percent > 0);

    let read = client.get("big").unwrap();
    assert_eq!(read.value, Some(Bytes::from(value)));
}

// =============================================================================
// Status Classification
// =============================================================================

#[test]
fn test_record_locked_is_a_response() {
    let (proxy, client) = setup();
    proxy.force_status(Some(ServerStatus::RecordLocked));

    let response = client.get("busy-row").unwrap();
    assert_eq!(response.status, ServerStatus::RecordLocked);
    assert!(!response.is_success());
}

#[test]
fn test_inconsistent_state_reports_success() {
    let (proxy, client) = setup();
    proxy.force_status(Some(ServerStatus::InconsistentState));

    let response = client.set("k", "v").unwrap();
    assert_eq!(response.status, ServerStatus::Success);
}

#[test]
fn test_server_busy_is_an_error() {
    let (proxy, client) = setup();
    proxy.force_status(Some(ServerStatus::ServerBusy));

    match client.get("k") {
        Err(RelayError::Server { status, .. }) => assert_eq!(status, ServerStatus::ServerBusy),
        other => panic!("Expected a server error, got {:?}", other),
    }

    proxy.force_status(None);
    assert_eq!(client.get("k").unwrap().status, ServerStatus::NoKey);
}

// =============================================================================
// Validation
// =============================================================================

#[test]
fn test_invalid_requests_never_reach_the_proxy() {
    let (proxy, client) = setup();

    let cases = vec![
        Request::get(""),
        Request::get("k".repeat(129)),
        Request::create("k", vec![0u8; 204_801]),
        Request::compare_and_set("k", "v", 0),
        Request::set("k", "v").with_ttl(259_201),
        Request::get("k").with_correlation_id(vec![b'c'; 251]),
    ];
    for request in cases {
        let result = client.submit(request).wait();
        assert!(
            matches!(result, Err(RelayError::Validation(_))),
            "expected a validation error, got {:?}",
            result
        );
    }
    assert_eq!(proxy.request_count(), 0);
}

#[test]
fn test_longest_correlation_id_reaches_the_proxy() {
    let (proxy, client) = setup();

    let request = Request::get("k").with_correlation_id(vec![b'c'; MAX_CORRELATION_ID_LEN]);
    let response = client.submit(request).wait().unwrap();
    assert_eq!(response.status, ServerStatus::NoKey);
    assert_eq!(proxy.request_count(), 1);
}

#[test]
fn test_value_on_a_read_is_rejected() {
    let (_proxy, client) = setup();
    let mut request = Request::get("k");
    request.value = Some(Bytes::from_static(b"unexpected"));

    assert!(matches!(client.submit(request).wait(), Err(RelayError::Validation(_))));
}
