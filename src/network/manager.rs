//! Connection Manager
//!
//! Owns the proxy connection(s) and every timer around them. Runs as a single
//! cooperative loop; nothing else writes to a socket.
//!
//! ## States
//!
//! ```text
//!                ┌──────────────┐
//!                │ Disconnected │
//!                └──────┬───────┘
//!                       ▼
//!   ┌──────────▶ ┌────────────┐ ── ok ──▶ ┌───────────┐ ── lifetime ──▶ ┌───────────┐
//!   │            │ Connecting │           │ Connected │ ◀── swapped ─── │ Recycling │
//!   │            └─────┬──────┘           └─────┬─────┘                 └───────────┘
//!   │                  │ error                  │ lost
//!   │                  ▼                        ▼
//!   │            ┌────────────┐           ┌────────────┐
//!   └─ delay ─── │  Backoff   │ ◀──────── │   Failed   │
//!                └────────────┘           └────────────┘
//!
//!   shutdown (any state) ──▶ Closing ──▶ Disconnected
//! ```
//!
//! ## Responsibilities
//! - Drain the request queue onto the current connection, in queue order
//! - Replace the connection every `connection_lifetime`, draining the old one
//!   for `2 × response_timeout` so its in-flight responses still land
//! - Relocate to a directly addressed proxy when discovery finds one; the
//!   ping goes out on recycled connections, never on a fresh connect
//! - Reconnect with jittered exponential backoff after failures
//! - Force a recycle when the failure ratio stays high (reconnect-on-fail)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Instant};
use uuid::Uuid;

use crate::context::ClientContext;
use crate::error::Result;
use crate::protocol::Message;
use crate::queue::QueueEntry;

use super::backoff::Backoff;
use super::connection::{Connection, ConnectionEvent, Connector};
use super::discovery::{ping_message, Decision, ProxyDiscovery};
use super::health::{FailureMonitor, HealthVerdict, CHECK_INTERVAL};

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, with a replacement being opened
    Recycling,
    Failed,
    Backoff,
    Closing,
}

impl ConnectionState {
    /// Whether requests can be written in this state
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Recycling)
    }
}

/// Why a background connect was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectPurpose {
    Recycle,
    Relocate(SocketAddr),
}

struct ConnectDone {
    purpose: ConnectPurpose,
    result: Result<Connection>,
}

/// The single-threaded connection state machine
pub struct ConnectionManager {
    ctx: Arc<ClientContext>,
    connector: Connector,
    events: UnboundedReceiver<ConnectionEvent>,
    connect_tx: UnboundedSender<ConnectDone>,
    connect_rx: UnboundedReceiver<ConnectDone>,

    current: Option<Connection>,
    draining: Vec<(Connection, Instant)>,
    next_conn_id: u64,
    connect_in_flight: bool,
    recycle_at: Instant,
    needs_backoff: bool,

    backoff: Backoff,
    discovery: ProxyDiscovery,
    health: FailureMonitor,
}

impl ConnectionManager {
    pub fn new(ctx: Arc<ClientContext>) -> Result<Self> {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        let connector = Connector::new(Arc::clone(&ctx), events_tx)?;

        let config = ctx.config();
        let backoff = Backoff::new(
            Duration::from_millis(config.reconnect_initial_wait_ms),
            Duration::from_millis(config.reconnect_max_wait_ms),
        );
        let discovery = ProxyDiscovery::new(config, ctx.local_ip());
        let recycle_at = Instant::now() + config.connection_lifetime();

        Ok(Self {
            ctx,
            connector,
            events,
            connect_tx,
            connect_rx,
            current: None,
            draining: Vec::new(),
            next_conn_id: 1,
            connect_in_flight: false,
            recycle_at,
            needs_backoff: false,
            backoff,
            discovery,
            health: FailureMonitor::new(),
        })
    }

    /// Run until shutdown is requested
    pub async fn run(mut self) {
        tracing::info!("Connection manager started for {}", self.ctx.config().endpoint());

        while !self.ctx.is_shutdown() {
            if self.current.is_some() {
                self.serve().await;
            } else {
                self.establish().await;
            }
        }

        self.close_all().await;
        tracing::info!("Connection manager stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        self.ctx.set_connection_state(state);
    }

    fn allocate_conn_id(&mut self) -> u64 {
        let id = self.next_conn_id;
        self.next_conn_id += 1;
        id
    }

    // =========================================================================
    // Connecting
    // =========================================================================

    /// One pass of Connecting (preceded by Backoff after a failure)
    async fn establish(&mut self) {
        let ctx = Arc::clone(&self.ctx);

        if self.needs_backoff {
            self.set_state(ConnectionState::Failed);
            let delay = self.backoff.next_delay();
            tracing::debug!("Reconnecting in {:?} (attempt {})", delay, self.backoff.attempts());
            self.set_state(ConnectionState::Backoff);
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = ctx.shutdown_requested() => return,
            }
        }

        // A replacement opened before the old connection died is good enough
        while let Ok(done) = self.connect_rx.try_recv() {
            self.connect_in_flight = false;
            match (done.purpose, done.result) {
                (ConnectPurpose::Recycle, Ok(conn)) => {
                    tracing::info!(conn_id = conn.id(), "Adopting replacement connection");
                    self.install(conn);
                    return;
                }
                (ConnectPurpose::Relocate(addr), Ok(conn)) => {
                    tracing::info!(conn_id = conn.id(), "Adopting direct connection to {}", addr);
                    self.discovery.relocated(StdInstant::now());
                    self.install(conn);
                    return;
                }
                (ConnectPurpose::Relocate(_), Err(_)) => {
                    self.discovery.relocation_failed(StdInstant::now());
                }
                (ConnectPurpose::Recycle, Err(_)) => {}
            }
        }

        self.set_state(ConnectionState::Connecting);
        let id = self.allocate_conn_id();
        let config = ctx.config();
        let connector = self.connector.clone();
        let result = tokio::select! {
            result = connector.connect(id, &config.host, config.port) => result,
            _ = ctx.shutdown_requested() => return,
        };

        // No ping on a fresh connect; discovery waits for the first recycle
        match result {
            Ok(conn) => self.install(conn),
            Err(e) => {
                tracing::warn!("Connect to {} failed: {}", config.endpoint(), e);
                self.needs_backoff = true;
            }
        }
    }

    /// Make `conn` current; a previous connection is left to drain
    fn install(&mut self, conn: Connection) {
        self.discovery.add_local_addr(conn.local().ip());
        if let Some(old) = self.current.replace(conn) {
            let deadline = Instant::now() + self.ctx.config().drain_grace();
            tracing::debug!(conn_id = old.id(), "Draining replaced connection");
            self.draining.push((old, deadline));
        }
        self.needs_backoff = false;
        self.backoff.reset();
        self.recycle_at = Instant::now() + self.ctx.config().connection_lifetime();
        self.health.reset_average();
        self.set_state(ConnectionState::Connected);
    }

    /// Start a connect in the background; the loop keeps serving meanwhile
    fn spawn_connect(&mut self, purpose: ConnectPurpose) {
        if self.connect_in_flight {
            return;
        }
        self.connect_in_flight = true;

        let id = self.allocate_conn_id();
        let connector = self.connector.clone();
        let done = self.connect_tx.clone();
        let (host, port) = match purpose {
            ConnectPurpose::Recycle => (self.ctx.config().host.clone(), self.ctx.config().port),
            ConnectPurpose::Relocate(addr) => (addr.ip().to_string(), addr.port()),
        };
        tokio::spawn(async move {
            let result = connector.connect(id, &host, port).await;
            let _ = done.send(ConnectDone { purpose, result });
        });
    }

    fn start_recycle(&mut self) {
        if self.connect_in_flight {
            return;
        }
        tracing::debug!("Connection lifetime reached, recycling");
        self.set_state(ConnectionState::Recycling);
        self.spawn_connect(ConnectPurpose::Recycle);
    }

    fn on_connect_done(&mut self, done: ConnectDone) {
        self.connect_in_flight = false;
        match (done.purpose, done.result) {
            (ConnectPurpose::Recycle, Ok(conn)) => {
                tracing::info!(conn_id = conn.id(), "Recycled connection");
                self.install(conn);
                self.maybe_ping();
            }
            (ConnectPurpose::Recycle, Err(e)) => {
                tracing::warn!("Recycle failed, keeping current connection: {}", e);
                self.recycle_at = Instant::now() + self.ctx.config().connection_lifetime();
                self.set_state(ConnectionState::Connected);
            }
            (ConnectPurpose::Relocate(addr), Ok(conn)) => {
                tracing::info!(conn_id = conn.id(), "Relocated to proxy {}", addr);
                self.discovery.relocated(StdInstant::now());
                self.install(conn);
            }
            (ConnectPurpose::Relocate(addr), Err(e)) => {
                tracing::warn!("Proxy {} unreachable, staying: {}", addr, e);
                self.discovery.relocation_failed(StdInstant::now());
            }
        }
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Queue a discovery ping if one is due
    fn maybe_ping(&self) {
        if !self.discovery.is_due(StdInstant::now()) {
            return;
        }
        let ping = ping_message(self.ctx.local_ip());
        match ping.encode() {
            Ok(bytes) => {
                let entry = QueueEntry::new(bytes, Uuid::nil(), ping.header.opaque);
                if !self.ctx.queue().push(entry) {
                    tracing::debug!("Request queue full, skipping discovery ping");
                }
            }
            Err(e) => tracing::error!("Failed to encode discovery ping: {}", e),
        }
    }

    fn on_ping_reply(&mut self, conn_id: u64, message: Message) {
        let Some(current) = self.current.as_ref() else {
            return;
        };
        if current.id() != conn_id {
            return;
        }
        if self.connect_in_flight {
            // Still due, so the next recycle asks again
            tracing::debug!(conn_id, "Connect in flight, ignoring ping reply");
            return;
        }
        let peer = current.peer();
        if let Decision::Relocate(ip) = self.discovery.decide(&message, Some(peer.ip())) {
            self.spawn_connect(ConnectPurpose::Relocate(SocketAddr::new(ip.into(), peer.port())));
        }
    }

    // =========================================================================
    // Connected
    // =========================================================================

    /// Serve the current connection until it is lost or shutdown is requested
    async fn serve(&mut self) {
        let ctx = Arc::clone(&self.ctx);
        let mut health_tick = time::interval(CHECK_INTERVAL);
        health_tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        while self.current.is_some() {
            self.flush_queue().await;
            if self.current.is_none() {
                break;
            }

            let drain_deadline = self
                .draining
                .iter()
                .map(|(_, deadline)| *deadline)
                .min()
                .unwrap_or_else(|| Instant::now() + ctx.config().connection_lifetime());
            let recycling = self.connect_in_flight;

            tokio::select! {
                _ = ctx.queue().notified() => {}
                Some(event) = self.events.recv() => self.on_connection_event(event).await,
                Some(done) = self.connect_rx.recv() => self.on_connect_done(done),
                _ = time::sleep_until(self.recycle_at), if !recycling => self.start_recycle(),
                _ = time::sleep_until(drain_deadline), if !self.draining.is_empty() => {
                    self.close_drained().await
                }
                _ = health_tick.tick() => self.check_health(),
                _ = ctx.shutdown_requested() => return,
            }
        }
    }

    /// Write everything queued to the current connection
    async fn flush_queue(&mut self) {
        let Some(conn) = self.current.as_mut() else {
            return;
        };

        let mut written = 0usize;
        while let Some(entry) = self.ctx.queue().pop() {
            if let Err(e) = conn.send(&entry.buffer).await {
                tracing::error!(opaque = entry.opaque, "Write failed: {}", e);
                self.drop_current().await;
                return;
            }
            written += 1;
        }
        if written == 0 {
            return;
        }
        if let Err(e) = conn.flush().await {
            tracing::error!("Flush failed: {}", e);
            self.drop_current().await;
            return;
        }
        tracing::trace!(conn_id = conn.id(), "Wrote {} request(s)", written);
    }

    async fn on_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::PingReply { conn_id, message } => self.on_ping_reply(conn_id, message),
            ConnectionEvent::Closed { conn_id, reason } => {
                if self.current.as_ref().is_some_and(|c| c.id() == conn_id) {
                    tracing::warn!(conn_id, "Connection lost: {}", reason);
                    self.drop_current().await;
                } else if let Some(pos) = self.draining.iter().position(|(c, _)| c.id() == conn_id) {
                    let (conn, _) = self.draining.swap_remove(pos);
                    conn.close().await;
                }
            }
        }
    }

    async fn drop_current(&mut self) {
        if let Some(conn) = self.current.take() {
            self.set_state(ConnectionState::Failed);
            conn.close().await;
        }
        self.needs_backoff = true;
    }

    async fn close_drained(&mut self) {
        let now = Instant::now();
        let mut index = 0;
        while index < self.draining.len() {
            if self.draining[index].1 <= now {
                let (conn, _) = self.draining.swap_remove(index);
                conn.close().await;
            } else {
                index += 1;
            }
        }
    }

    fn check_health(&mut self) {
        let (success, failed) = self.ctx.take_interval_outcomes();
        if !self.ctx.config().reconnect_on_fail {
            return;
        }
        match self.health.observe(success, failed, StdInstant::now()) {
            HealthVerdict::Healthy | HealthVerdict::CoolingDown => {}
            HealthVerdict::Recycle => {
                tracing::warn!(
                    "Failure ratio {:.3} over threshold, recycling connection",
                    self.health.average()
                );
                self.start_recycle();
            }
        }
    }

    // =========================================================================
    // Closing
    // =========================================================================

    async fn close_all(&mut self) {
        self.set_state(ConnectionState::Closing);
        if let Some(conn) = self.current.take() {
            conn.close().await;
        }
        for (conn, _) in self.draining.drain(..) {
            conn.close().await;
        }
        self.set_state(ConnectionState::Disconnected);
    }
}
