//! Proxy connection
//!
//! One transport (plain TCP or TLS) to a proxy. The write half stays with the
//! connection manager; the read half runs in its own task, decoding frames
//! and routing them either to the correlator or back to the manager.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

use crate::context::ClientContext;
use crate::error::{RelayError, Result};
use crate::protocol::{FrameDecoder, Message};
use crate::queue::DeliveryOutcome;

use super::discovery::is_ping_reply;
use super::tls;

/// Byte stream a connection runs over
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

type BoxedTransport = Box<dyn Transport>;

/// Notifications from a connection's reader task
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A discovery ping was answered
    PingReply { conn_id: u64, message: Message },
    /// The reader stopped; the connection is unusable
    Closed { conn_id: u64, reason: String },
}

#[derive(Debug, Default)]
struct ConnectionStats {
    sent: AtomicU64,
    failed: AtomicU64,
    received: AtomicU64,
}

/// Everything needed to open connections; cheap to clone into connect tasks
#[derive(Clone)]
pub struct Connector {
    ctx: Arc<ClientContext>,
    tls: Option<TlsConnector>,
    events: UnboundedSender<ConnectionEvent>,
}

impl Connector {
    pub fn new(ctx: Arc<ClientContext>, events: UnboundedSender<ConnectionEvent>) -> Result<Self> {
        let tls = if ctx.config().tls.enabled {
            Some(tls::build_connector(&ctx.config().tls)?)
        } else {
            None
        };
        Ok(Self { ctx, tls, events })
    }

    /// Open a connection to `host:port`, bounded by the connect timeout
    /// (applied separately to the TCP connect and the TLS handshake)
    pub async fn connect(&self, id: u64, host: &str, port: u16) -> Result<Connection> {
        let config = self.ctx.config();
        let timeout = config.connect_timeout();

        let tcp = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                RelayError::Connection(format!("connect to {}:{} timed out after {:?}", host, port, timeout))
            })?
            .map_err(|e| RelayError::Connection(format!("connect to {}:{}: {}", host, port, e)))?;
        tcp.set_nodelay(true)?;
        let peer = tcp.peer_addr()?;
        let local = tcp.local_addr()?;

        let stream: BoxedTransport = match &self.tls {
            Some(connector) => {
                let name = tls::server_name(&config.tls, &config.host)?;
                let tls_stream = tokio::time::timeout(timeout, connector.connect(name, tcp))
                    .await
                    .map_err(|_| RelayError::Tls(format!("handshake with {} timed out", peer)))?
                    .map_err(|e| RelayError::Tls(format!("handshake with {}: {}", peer, e)))?;
                Box::new(tls_stream)
            }
            None => Box::new(tcp),
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let stats = Arc::new(ConnectionStats::default());
        let reader = tokio::spawn(read_loop(
            id,
            read_half,
            Arc::clone(&self.ctx),
            self.events.clone(),
            Arc::clone(&stats),
        ));

        tracing::info!(conn_id = id, %peer, tls = self.tls.is_some(), "Connected");
        Ok(Connection {
            id,
            peer,
            local,
            tls: self.tls.is_some(),
            created_at: Instant::now(),
            writer: write_half,
            reader,
            stats,
        })
    }
}

/// An established proxy connection
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    local: SocketAddr,
    tls: bool,
    created_at: Instant,
    writer: WriteHalf<BoxedTransport>,
    reader: JoinHandle<()>,
    stats: Arc<ConnectionStats>,
}

impl Connection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local(&self) -> SocketAddr {
        self.local
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Write one encoded message
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        match self.writer.write_all(bytes).await {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                Err(RelayError::Connection(format!("write to {}: {}", self.peer, e)))
            }
        }
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .await
            .map_err(|e| RelayError::Connection(format!("flush to {}: {}", self.peer, e)))
    }

    /// Shut the transport down and stop the reader
    pub async fn close(mut self) {
        let _ = self.writer.shutdown().await;
        self.reader.abort();

        let sent = self.stats.sent.load(Ordering::Relaxed);
        let failed = self.stats.failed.load(Ordering::Relaxed);
        let received = self.stats.received.load(Ordering::Relaxed);
        tracing::info!(
            conn_id = self.id,
            peer = %self.peer,
            "Closed after {:?}: sent={} failed={} received={}",
            self.age(),
            sent,
            failed,
            received
        );
        if sent > received {
            tracing::warn!(conn_id = self.id, "{} response(s) missing", sent - received);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("local", &self.local)
            .field("tls", &self.tls)
            .finish()
    }
}

// =============================================================================
// Read Path
// =============================================================================

async fn read_loop(
    conn_id: u64,
    mut reader: ReadHalf<BoxedTransport>,
    ctx: Arc<ClientContext>,
    events: UnboundedSender<ConnectionEvent>,
    stats: Arc<ConnectionStats>,
) {
    let mut decoder = FrameDecoder::new(ctx.config().max_frame_size);

    let reason = 'read: loop {
        match reader.read_buf(decoder.buffer_mut()).await {
            Ok(0) => break 'read "closed by peer".to_string(),
            Ok(n) => tracing::trace!(conn_id, "Read {} bytes ({} buffered)", n, decoder.buffered()),
            Err(e) => break 'read e.to_string(),
        }

        loop {
            match decoder.next_message() {
                Ok(Some(message)) => {
                    stats.received.fetch_add(1, Ordering::Relaxed);
                    route(conn_id, message, &ctx, &events);
                }
                Ok(None) => break,
                Err(RelayError::Decode(detail)) => {
                    tracing::warn!(conn_id, "Dropping undecodable frame: {}", detail);
                }
                Err(e) => break 'read e.to_string(),
            }
        }
    };

    tracing::debug!(conn_id, "Reader stopped: {}", reason);
    let _ = events.send(ConnectionEvent::Closed { conn_id, reason });
}

fn route(
    conn_id: u64,
    message: Message,
    ctx: &ClientContext,
    events: &UnboundedSender<ConnectionEvent>,
) {
    if is_ping_reply(&message) {
        let _ = events.send(ConnectionEvent::PingReply { conn_id, message });
        return;
    }

    let opaque = message.header.opaque;
    match ctx.correlator().deliver(opaque, message) {
        DeliveryOutcome::Delivered => tracing::trace!(conn_id, opaque, "Response delivered"),
        DeliveryOutcome::NoSlot => {
            tracing::warn!(conn_id, opaque, "Late response, caller already gave up")
        }
        DeliveryOutcome::SlotFull => {}
    }
}
