//! Mock Proxy
//!
//! A loopback proxy that speaks the wire protocol and keeps records in memory.
//! Used by the integration tests and the `relaykv-mock-proxy` binary.
//!
//! ## Architecture
//! - Single acceptor thread
//! - One thread per client connection
//! - Records shared behind a mutex
//!
//! ## Knobs
//! - `drop_next(n)`: swallow the next `n` requests without replying
//! - `force_status(code)`: answer every request with this status
//! - `set_delay(d)`: sleep before each reply
//! - `set_ping_reply_ip(ip)`: address carried in discovery replies
//!
//! Opaques of received requests and the number of discovery pings are kept
//! for inspection.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{RelayError, Result};
use crate::protocol::{
    FrameDecoder, Message, MessageHeader, MetaField, MetadataComponent, Opcode, PayloadComponent,
    PayloadValue, ServerStatus, SourceInfo,
};

use super::discovery::{is_ping_reply, INTERNAL_APP_NAME};

/// TTL given to records created without one
const DEFAULT_TTL_SECS: u32 = 1800;

#[derive(Debug, Clone)]
struct Record {
    value: Option<PayloadValue>,
    version: u32,
    ttl: u32,
    creation_time: u32,
}

#[derive(Debug)]
struct Shared {
    records: Mutex<HashMap<(Bytes, Bytes), Record>>,
    drop_next: AtomicU32,
    forced_status: Mutex<Option<u8>>,
    delay: Mutex<Duration>,
    ping_reply_ip: Mutex<Ipv4Addr>,
    requests: AtomicU64,
    pings: AtomicU64,
    opaques: Mutex<Vec<u32>>,
    connections: AtomicU64,
    shutdown: AtomicBool,
}

/// In-memory proxy bound to a local port
pub struct MockProxy {
    addr: SocketAddr,
    shared: Arc<Shared>,
    acceptor: Option<JoinHandle<()>>,
}

impl MockProxy {
    /// Bind to `addr` (use port 0 for an ephemeral port) and start serving
    pub fn start(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared {
            records: Mutex::new(HashMap::new()),
            drop_next: AtomicU32::new(0),
            forced_status: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            ping_reply_ip: Mutex::new(Ipv4Addr::LOCALHOST),
            requests: AtomicU64::new(0),
            pings: AtomicU64::new(0),
            opaques: Mutex::new(Vec::new()),
            connections: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });

        let acceptor = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("mock-proxy-accept".to_string())
                .spawn(move || accept_loop(listener, shared))?
        };

        tracing::info!("Mock proxy listening on {}", addr);
        Ok(Self {
            addr,
            shared,
            acceptor: Some(acceptor),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Swallow the next `count` requests
    pub fn drop_next(&self, count: u32) {
        self.shared.drop_next.store(count, Ordering::SeqCst);
    }

    /// Answer every request with `status` until cleared with `None`
    pub fn force_status(&self, status: Option<ServerStatus>) {
        *self.shared.forced_status.lock() = status.map(|s| s.code());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.shared.delay.lock() = delay;
    }

    pub fn set_ping_reply_ip(&self, ip: Ipv4Addr) {
        *self.shared.ping_reply_ip.lock() = ip;
    }

    /// Requests received (including dropped ones)
    pub fn request_count(&self) -> u64 {
        self.shared.requests.load(Ordering::SeqCst)
    }

    /// Discovery pings received
    pub fn ping_count(&self) -> u64 {
        self.shared.pings.load(Ordering::SeqCst)
    }

    /// Opaques of the non-ping requests received, in arrival order
    pub fn received_opaques(&self) -> Vec<u32> {
        self.shared.opaques.lock().clone()
    }

    pub fn connection_count(&self) -> u64 {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn record_count(&self) -> usize {
        self.shared.records.lock().len()
    }

    /// Stop accepting; live connections end when their clients hang up
    pub fn shutdown(&mut self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        // Unblock accept()
        let _ = TcpStream::connect(self.addr);
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
        tracing::info!("Mock proxy on {} stopped", self.addr);
    }
}

impl Drop for MockProxy {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    for stream in listener.incoming() {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let id = shared.connections.fetch_add(1, Ordering::SeqCst) + 1;
                let shared = Arc::clone(&shared);
                let spawned = thread::Builder::new()
                    .name(format!("mock-proxy-conn-{}", id))
                    .spawn(move || {
                        if let Err(e) = serve_connection(stream, &shared) {
                            tracing::debug!("Mock proxy connection {} ended: {}", id, e);
                        }
                    });
                if let Err(e) = spawned {
                    tracing::error!("Failed to spawn connection thread: {}", e);
                }
            }
            Err(e) => tracing::warn!("Accept failed: {}", e),
        }
    }
}

fn serve_connection(mut stream: TcpStream, shared: &Shared) -> Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(Duration::from_millis(100)))?;
    let mut decoder = FrameDecoder::new(4 * 1024 * 1024);
    let mut buf = [0u8; 8192];

    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            return Ok(());
        }
        let n = match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => return Err(e.into()),
        };
        decoder.extend(&buf[..n]);

        loop {
            let request = match decoder.next_message() {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(RelayError::Decode(detail)) => {
                    tracing::warn!("Mock proxy skipping bad frame: {}", detail);
                    continue;
                }
                Err(e) => return Err(e),
            };
            shared.requests.fetch_add(1, Ordering::SeqCst);
            if is_ping_reply(&request) {
                shared.pings.fetch_add(1, Ordering::SeqCst);
            } else {
                shared.opaques.lock().push(request.header.opaque);
            }

            if take_drop(shared) {
                tracing::debug!(opaque = request.header.opaque, "Mock proxy dropping request");
                continue;
            }

            let delay = *shared.delay.lock();
            if !delay.is_zero() {
                thread::sleep(delay);
            }

            let reply = handle(&request, shared);
            stream.write_all(&reply.encode()?)?;
        }
    }
}

fn take_drop(shared: &Shared) -> bool {
    shared
        .drop_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// =============================================================================
// Request Handling
// =============================================================================

fn now_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn handle(request: &Message, shared: &Shared) -> Message {
    let header = &request.header;
    let metadata = request.metadata.clone().unwrap_or_default();

    if header.opcode == Opcode::Nop && is_ping_reply(request) {
        let ip = *shared.ping_reply_ip.lock();
        let source = SourceInfo::new(IpAddr::V4(ip), 0, INTERNAL_APP_NAME);
        return Message::new(MessageHeader::response(Opcode::Nop, header.opaque, 0))
            .with_metadata(MetadataComponent::new().with(MetaField::SourceInfo(source)));
    }

    let mut reply_meta = MetadataComponent::new();
    if let Some(id) = metadata.request_id() {
        reply_meta.push(MetaField::RequestId(id));
    }
    if let Some(id) = metadata.correlation_id() {
        reply_meta.push(MetaField::CorrelationId(id.to_vec()));
    }

    if let Some(code) = *shared.forced_status.lock() {
        return Message::new(MessageHeader::response(header.opcode, header.opaque, code))
            .with_metadata(reply_meta);
    }

    let Some(payload) = request.payload.as_ref() else {
        let status = if header.opcode == Opcode::Nop {
            ServerStatus::Success
        } else {
            ServerStatus::BadParam
        };
        return Message::new(MessageHeader::response(header.opcode, header.opaque, status.code()))
            .with_metadata(reply_meta);
    };

    let key = (payload.namespace.clone(), payload.key.clone());
    let mut records = shared.records.lock();
    let (status, record) = match header.opcode {
        Opcode::Create => {
            if records.contains_key(&key) {
                (ServerStatus::DuplicateKey, None)
            } else {
                let record = Record {
                    value: payload.value.clone(),
                    version: 1,
                    ttl: metadata.ttl().unwrap_or(DEFAULT_TTL_SECS),
                    creation_time: metadata.creation_time().unwrap_or_else(now_secs),
                };
                records.insert(key.clone(), record.clone());
                (ServerStatus::Success, Some(record))
            }
        }
        Opcode::Get => match records.get_mut(&key) {
            None => (ServerStatus::NoKey, None),
            Some(record) => {
                if let Some(ttl) = metadata.ttl() {
                    record.ttl = record.ttl.max(ttl);
                }
                (ServerStatus::Success, Some(record.clone()))
            }
        },
        Opcode::Update => match records.get_mut(&key) {
            None => (ServerStatus::NoKey, None),
            Some(record) => match metadata.version() {
                Some(version) if version != 0 && version != record.version => {
                    (ServerStatus::VersionConflict, Some(record.clone()))
                }
                _ => {
                    if payload.value.is_some() {
                        record.value = payload.value.clone();
                    }
                    if let Some(ttl) = metadata.ttl() {
                        record.ttl = record.ttl.max(ttl);
                    }
                    record.version += 1;
                    (ServerStatus::Success, Some(record.clone()))
                }
            },
        },
        Opcode::Set => {
            let record = match records.get(&key) {
                Some(existing) => Record {
                    value: payload.value.clone(),
                    version: existing.version + 1,
                    ttl: metadata.ttl().unwrap_or(existing.ttl),
                    creation_time: existing.creation_time,
                },
                None => Record {
                    value: payload.value.clone(),
                    version: 1,
                    ttl: metadata.ttl().unwrap_or(DEFAULT_TTL_SECS),
                    creation_time: metadata.creation_time().unwrap_or_else(now_secs),
                },
            };
            records.insert(key.clone(), record.clone());
            (ServerStatus::Success, Some(record))
        }
        Opcode::Destroy => {
            records.remove(&key);
            (ServerStatus::Success, None)
        }
        _ => (ServerStatus::BadMessage, None),
    };
    drop(records);

    let mut reply_payload = PayloadComponent::new(key.0, key.1, None);
    if let Some(record) = record {
        reply_meta.push(MetaField::Version(record.version));
        reply_meta.push(MetaField::TimeToLive(record.ttl));
        reply_meta.push(MetaField::CreationTime(record.creation_time));
        if header.opcode == Opcode::Get && status == ServerStatus::Success {
            reply_payload.value = record.value;
        }
    }
    reply_meta.push(MetaField::RequestHandlingTime(50));

    Message::new(MessageHeader::response(header.opcode, header.opaque, status.code()))
        .with_metadata(reply_meta)
        .with_payload(reply_payload)
}
