//! Proxy Relocation Tests
//!
//! The load balancer is a mock proxy on 127.0.0.1; the "direct" proxy listens
//! on 127.0.0.2 with the same port.

use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use relaykv::network::{local_ipv4, MockProxy};
use relaykv::Client;

use crate::harness::{config_for, connect, start_proxy};

const DIRECT_IP: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

/// A load balancer, a direct proxy behind it and a client with discovery on
fn rig() -> (MockProxy, MockProxy, Client) {
    let balancer = start_proxy();
    let direct = MockProxy::start(&format!("{}:{}", DIRECT_IP, balancer.port())).unwrap();
    let client = connect(
        config_for(&balancer)
            .loopback_discovery(true)
            .connection_lifetime_ms(300)
            .build(),
    );
    (balancer, direct, client)
}

/// Keep writing for `duration`; every request must succeed
fn keep_writing(client: &Client, duration: Duration) -> usize {
    let deadline = Instant::now() + duration;
    let mut sent = 0;
    while Instant::now() < deadline {
        let response = client.set(format!("key-{}", sent), "v").unwrap();
        assert!(response.is_success(), "request {} failed: {:?}", sent, response.status);
        sent += 1;
        thread::sleep(Duration::from_millis(10));
    }
    sent
}

#[test]
fn test_first_connect_sends_no_ping() {
    let (balancer, _direct, _client) = rig();

    thread::sleep(Duration::from_millis(150));
    assert_eq!(balancer.ping_count(), 0);
    assert_eq!(balancer.connection_count(), 1);
}

#[test]
fn test_relocates_to_the_direct_proxy() {
    let (balancer, direct, client) = rig();
    balancer.set_ping_reply_ip(DIRECT_IP);
    // Keep replies in flight across the swap
    balancer.set_delay(Duration::from_millis(30));

    let sent = keep_writing(&client, Duration::from_millis(1500));

    assert!(sent > 10);
    assert!(balancer.ping_count() >= 1);
    assert!(direct.connection_count() >= 1, "never connected to the direct proxy");
    assert!(
        !direct.received_opaques().is_empty(),
        "no request was served by the direct proxy"
    );
    assert_eq!(client.stats().failed, 0);
}

#[test]
fn test_local_address_in_reply_keeps_the_connection() {
    let (balancer, direct, client) = rig();
    balancer.set_ping_reply_ip(local_ipv4());

    keep_writing(&client, Duration::from_millis(1200));

    assert!(balancer.ping_count() >= 1);
    assert_eq!(direct.connection_count(), 0);
    assert!(direct.received_opaques().is_empty());
}

#[test]
fn test_loopback_reply_is_ignored_without_the_test_switch() {
    let balancer = start_proxy();
    let direct = MockProxy::start(&format!("{}:{}", DIRECT_IP, balancer.port())).unwrap();
    balancer.set_ping_reply_ip(DIRECT_IP);
    let client = connect(config_for(&balancer).connection_lifetime_ms(300).build());

    keep_writing(&client, Duration::from_millis(800));

    // Discovery is off for a loopback host
    assert_eq!(balancer.ping_count(), 0);
    assert_eq!(direct.connection_count(), 0);
}
