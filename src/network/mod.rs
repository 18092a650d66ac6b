//! Network Module
//!
//! Everything between the request queue and the proxy.
//!
//! ## Architecture
//! - One connection manager loop owns all sockets and timers
//! - One reader task per connection decodes frames and routes responses
//! - Discovery pings ride the same queue and connection as requests
//! - `MockProxy` stands in for a proxy in tests

mod backoff;
mod connection;
mod discovery;
mod health;
mod manager;
mod server;
mod tls;

pub use backoff::{Backoff, MAX_JITTER};
pub use connection::{Connection, ConnectionEvent, Connector, Transport};
pub use discovery::{
    is_ping_reply, local_ipv4, ping_message, Decision, ProxyDiscovery, INITIAL_RECHECK_INTERVAL,
    INTERNAL_APP_NAME, MAX_RECHECK_INTERVAL,
};
pub use health::{
    FailureMonitor, HealthVerdict, CHECK_INTERVAL, COOL_DOWN, EMA_ALPHA, FAILURE_THRESHOLD,
    MAX_FORCED_RECYCLES, SAFETY_BUFFER,
};
pub use manager::{ConnectionManager, ConnectionState};
pub use server::MockProxy;
pub use tls::{build_connector, server_name};
