//! Backpressure Tests
//!
//! Both bounded stages reject work immediately instead of blocking.

use std::time::{Duration, Instant};

use bytes::Bytes;
use relaykv::network::ConnectionState;
use relaykv::queue::QueueEntry;
use relaykv::{ClientContext, Config, RelayError, Request, RequestDispatcher};
use uuid::Uuid;

use crate::harness::{config_for, connect, start_proxy};

#[test]
fn test_full_worker_pool_rejects_immediately() {
    let proxy = start_proxy();
    let client = connect(
        config_for(&proxy)
            .worker_threads(1)
            .worker_queue_capacity(1)
            .build(),
    );
    proxy.set_delay(Duration::from_millis(200));

    // One request on the worker, one waiting in the job queue
    let running = client.submit(Request::set("a", "1"));
    let waiting = client.submit(Request::set("b", "2"));

    let start = Instant::now();
    let rejected = client.submit(Request::set("c", "3"));
    let outcome = rejected.try_take();
    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(
        matches!(outcome, Some(Err(RelayError::TooManyRequests))),
        "expected an immediate rejection, got {:?}",
        outcome
    );

    proxy.set_delay(Duration::ZERO);
    let mut accepted = 0;
    for handle in [running, waiting] {
        match handle.wait() {
            Ok(response) => {
                assert!(response.is_success());
                accepted += 1;
            }
            // The second submission may race the worker picking up the first
            Err(RelayError::TooManyRequests) => {}
            Err(e) => panic!("unexpected failure: {}", e),
        }
    }
    assert!(accepted >= 1);
    assert_eq!(proxy.request_count(), accepted);
}

#[test]
fn test_full_request_queue_fails_without_retry() {
    // No I/O loop: nothing drains the queue
    let ctx = ClientContext::new(
        Config::builder()
            .namespace("tests")
            .queue_capacity(1)
            .retry_enabled(true)
            .build(),
    );
    ctx.set_connection_state(ConnectionState::Connected);
    assert!(ctx
        .queue()
        .push(QueueEntry::new(Bytes::from_static(b"occupied"), Uuid::nil(), 0)));

    let dispatcher = RequestDispatcher::new(ctx.clone()).unwrap();
    let start = Instant::now();
    let result = dispatcher.execute(&Request::get("k"));

    assert!(matches!(result, Err(RelayError::QueueFull)));
    assert!(start.elapsed() < ctx.config().response_timeout());
    assert_eq!(ctx.queue().len(), 1);
    assert_eq!(ctx.correlator().pending_count(), 0);

    let stats = ctx.stats();
    assert_eq!(stats.sent, 0);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.timeouts, 0);
    assert_eq!(stats.retries, 0);
}
