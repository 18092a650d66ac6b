//! Client context
//!
//! The state shared by the dispatcher, its workers and the connection
//! manager. One context is built per client and handed around as an `Arc`;
//! there is no process-wide state.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::network::{local_ipv4, ConnectionState};
use crate::queue::{RequestQueue, ResponseCorrelator, ResponseSlot};

/// Opaque reserved for discovery pings
pub const PING_OPAQUE: u32 = 0;

/// Give up on finding a free opaque after this many tries
const MAX_OPAQUE_PROBES: u32 = 64;

/// Point-in-time copy of the request counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub sent: u64,
    pub received: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub retries: u64,
    pub expired_in_queue: u64,
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    failed: AtomicU64,
    timeouts: AtomicU64,
    retries: AtomicU64,
}

/// Shared client state
#[derive(Debug)]
pub struct ClientContext {
    config: Arc<Config>,
    queue: RequestQueue,
    correlator: ResponseCorrelator,
    local_ip: Ipv4Addr,

    next_opaque: AtomicU32,
    counters: Counters,

    // Per-interval outcomes read by the reconnect-on-fail monitor
    interval_success: AtomicU64,
    interval_failure: AtomicU64,

    connected: AtomicBool,
    state: Mutex<ConnectionState>,
    state_changed: Condvar,

    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

impl ClientContext {
    pub fn new(config: Config) -> Arc<Self> {
        let queue = RequestQueue::new(config.queue_capacity, config.response_timeout());
        Arc::new(Self {
            queue,
            correlator: ResponseCorrelator::new(),
            local_ip: local_ipv4(),
            next_opaque: AtomicU32::new(1),
            counters: Counters::default(),
            interval_success: AtomicU64::new(0),
            interval_failure: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            state: Mutex::new(ConnectionState::Disconnected),
            state_changed: Condvar::new(),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn correlator(&self) -> &ResponseCorrelator {
        &self.correlator
    }

    /// This host's primary IPv4 address
    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }

    // =========================================================================
    // Opaque Allocation
    // =========================================================================

    /// Next opaque from the wrapping counter (never the ping opaque)
    pub fn next_opaque(&self) -> u32 {
        loop {
            let opaque = self.next_opaque.fetch_add(1, Ordering::Relaxed);
            if opaque != PING_OPAQUE {
                return opaque;
            }
        }
    }

    /// Allocate a fresh opaque and register its response slot
    pub fn allocate_slot(&self) -> Result<ResponseSlot> {
        for _ in 0..MAX_OPAQUE_PROBES {
            match self.correlator.register(self.next_opaque()) {
                Ok(slot) => return Ok(slot),
                Err(RelayError::OpaqueCollision(opaque)) => {
                    tracing::error!(opaque, "Opaque still pending after counter wrap");
                }
                Err(e) => return Err(e),
            }
        }
        Err(RelayError::TooManyRequests)
    }

    // =========================================================================
    // Counters
    // =========================================================================

    pub fn record_sent(&self) {
        self.counters.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        self.interval_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        self.interval_failure.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.counters.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Take (and reset) the success/failure counts since the last call
    pub fn take_interval_outcomes(&self) -> (u64, u64) {
        (
            self.interval_success.swap(0, Ordering::Relaxed),
            self.interval_failure.swap(0, Ordering::Relaxed),
        )
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            expired_in_queue: self.queue.expired_count(),
        }
    }

    // =========================================================================
    // Connection State
    // =========================================================================

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Publish a state change from the connection manager
    pub fn set_connection_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        if *current != state {
            tracing::debug!(from = ?*current, to = ?state, "Connection state");
        }
        *current = state;
        self.connected.store(state.is_connected(), Ordering::Release);
        self.state_changed.notify_all();
    }

    /// Block until connected, shut down, or `timeout` elapses
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.is_connected() {
            if self.is_shutdown() {
                return false;
            }
            if self.state_changed.wait_until(&mut state, deadline).timed_out() {
                return state.is_connected();
            }
        }
        true
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn begin_shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            tracing::debug!("Client shutdown requested");
            self.shutdown_notify.notify_one();
            let _state = self.state.lock();
            self.state_changed.notify_all();
        }
    }

    /// Resolves once shutdown has been requested
    pub async fn shutdown_requested(&self) {
        while !self.is_shutdown() {
            self.shutdown_notify.notified().await;
        }
    }
}
