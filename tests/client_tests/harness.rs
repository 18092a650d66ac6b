//! Shared setup: a mock proxy on an ephemeral port and a client pointed at it

use std::time::Duration;

use relaykv::config::ConfigBuilder;
use relaykv::network::MockProxy;
use relaykv::{Client, Config};

pub const CONNECT_WAIT: Duration = Duration::from_secs(5);

pub fn start_proxy() -> MockProxy {
    MockProxy::start("127.0.0.1:0").unwrap()
}

/// Defaults for tests: short timeouts, a small pool, no retry
pub fn config_for(proxy: &MockProxy) -> ConfigBuilder {
    Config::builder()
        .host("127.0.0.1")
        .port(proxy.port())
        .namespace("tests")
        .app_name("relaykv-tests")
        .response_timeout_ms(300)
        .worker_threads(4)
}

pub fn connect(config: Config) -> Client {
    let client = Client::connect(config).unwrap();
    assert!(client.wait_connected(CONNECT_WAIT), "client never connected");
    client
}

pub fn setup() -> (MockProxy, Client) {
    let proxy = start_proxy();
    let client = connect(config_for(&proxy).build());
    (proxy, client)
}
