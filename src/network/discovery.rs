//! Proxy Discovery
//!
//! Learns the address of the proxy behind the load balancer so the client can
//! talk to it directly.
//!
//! ## Exchange
//!
//! ```text
//! client ── Nop { source: <local ip>, app: INTERNAL_APP_NAME } ──▶ LB ──▶ proxy
//! client ◀── Nop { source: <proxy ip>, app: INTERNAL_APP_NAME } ─────────┘
//! ```
//!
//! A reply carrying a loopback or local address means the client already
//! talks to the proxy (or the proxy cannot tell), so it stays put.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::context::PING_OPAQUE;
use crate::protocol::{Message, MessageHeader, MetaField, MetadataComponent, Opcode, SourceInfo};

/// App name marking discovery pings and their replies
pub const INTERNAL_APP_NAME: &str = "RelayKvInternal";

/// First re-check interval after a failed relocation
pub const INITIAL_RECHECK_INTERVAL: Duration = Duration::from_millis(337_500);

/// Discovery stops once the interval reaches a day
pub const MAX_RECHECK_INTERVAL: Duration = Duration::from_millis(86_400_000);

/// This host's primary IPv4 address, or loopback if it cannot be determined.
///
/// Connecting a UDP socket sends nothing; it only selects the outbound route.
pub fn local_ipv4() -> Ipv4Addr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
        Ok(socket.local_addr()?.ip())
    };
    match probe() {
        Ok(IpAddr::V4(ip)) if !ip.is_unspecified() => ip,
        _ => Ipv4Addr::LOCALHOST,
    }
}

/// Build the discovery ping
pub fn ping_message(local_ip: Ipv4Addr) -> Message {
    let metadata = MetadataComponent::new().with(MetaField::SourceInfo(SourceInfo::new(
        IpAddr::V4(local_ip),
        0,
        INTERNAL_APP_NAME,
    )));
    Message::new(MessageHeader::request(Opcode::Nop, PING_OPAQUE)).with_metadata(metadata)
}

/// Whether `message` answers a discovery ping
pub fn is_ping_reply(message: &Message) -> bool {
    if message.header.opcode != Opcode::Nop {
        return false;
    }
    message
        .metadata
        .as_ref()
        .and_then(MetadataComponent::source_info)
        .is_some_and(|source| source.app_name == INTERNAL_APP_NAME.as_bytes())
}

/// What to do with a ping reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Keep the current connection
    Stay,
    /// Try a direct connection to this proxy address
    Relocate(Ipv4Addr),
}

/// Discovery state owned by the connection manager
#[derive(Debug)]
pub struct ProxyDiscovery {
    enabled: bool,
    allow_loopback: bool,
    local_addrs: HashSet<IpAddr>,
    interval: Duration,
    next_check: Instant,
    candidate: Option<Ipv4Addr>,
}

impl ProxyDiscovery {
    /// Discovery runs only when bypassing is on and the host is not loopback
    /// (unless `loopback_discovery` is set)
    pub fn new(config: &Config, local_ip: Ipv4Addr) -> Self {
        let enabled =
            config.bypass_lb && (config.loopback_discovery || !config.is_loopback_host());
        if !enabled {
            tracing::debug!("Proxy discovery disabled for {}", config.endpoint());
        }
        let mut discovery = Self::with_local_addrs(enabled, [IpAddr::V4(local_ip)]);
        discovery.allow_loopback = config.loopback_discovery;
        discovery
    }

    pub fn with_local_addrs(enabled: bool, local_addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            enabled,
            allow_loopback: false,
            local_addrs: local_addrs.into_iter().collect(),
            interval: INITIAL_RECHECK_INTERVAL,
            next_check: Instant::now(),
            candidate: None,
        }
    }

    /// Treat loopback replies like any other address
    pub fn allowing_loopback(mut self) -> Self {
        self.allow_loopback = true;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Remember an address this host uses (e.g. a connection's local end)
    pub fn add_local_addr(&mut self, ip: IpAddr) {
        self.local_addrs.insert(ip);
    }

    /// Whether a ping should go out on the next load-balancer connection
    pub fn is_due(&self, now: Instant) -> bool {
        self.enabled && now >= self.next_check && self.interval < MAX_RECHECK_INTERVAL
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn candidate(&self) -> Option<Ipv4Addr> {
        self.candidate
    }

    /// Classify a ping reply received while connected to `current_peer`
    pub fn decide(&mut self, reply: &Message, current_peer: Option<IpAddr>) -> Decision {
        self.candidate = None;
        if !self.enabled {
            return Decision::Stay;
        }

        let source_ip = reply
            .metadata
            .as_ref()
            .and_then(MetadataComponent::source_info)
            .map(|source| source.ip);
        let ip = match source_ip {
            Some(IpAddr::V4(ip)) => ip,
            other => {
                tracing::warn!("Ping reply without an IPv4 address: {:?}", other);
                return Decision::Stay;
            }
        };

        if (ip.is_loopback() && !self.allow_loopback) || ip.is_unspecified() {
            tracing::warn!("Ping reply ip={}, staying on load balancer", ip);
            return Decision::Stay;
        }
        if self.local_addrs.contains(&IpAddr::V4(ip)) {
            tracing::debug!("Ping reply ip={} is a local address", ip);
            return Decision::Stay;
        }
        if current_peer == Some(IpAddr::V4(ip)) {
            tracing::debug!("Already connected to proxy {}", ip);
            return Decision::Stay;
        }

        tracing::debug!("Ping reply ip={}", ip);
        self.candidate = Some(ip);
        Decision::Relocate(ip)
    }

    /// A direct connection was established
    pub fn relocated(&mut self, now: Instant) {
        self.candidate = None;
        self.interval = INITIAL_RECHECK_INTERVAL;
        self.next_check = now;
    }

    /// The candidate could not be reached in time
    pub fn relocation_failed(&mut self, now: Instant) {
        self.candidate = None;
        self.next_check = self.next_check.max(now) + self.interval;
        if self.interval < MAX_RECHECK_INTERVAL {
            self.interval = (self.interval * 2).min(MAX_RECHECK_INTERVAL);
        }
    }
}
