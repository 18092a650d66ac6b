//! relaykv Mock Proxy Binary
//!
//! Serves the wire protocol from memory on a local port, for trying the CLI
//! without a real proxy.

use std::net::Ipv4Addr;
use std::time::Duration;

use clap::Parser;
use relaykv::network::MockProxy;
use relaykv::ServerStatus;
use tracing_subscriber::{fmt, EnvFilter};

/// relaykv Mock Proxy
#[derive(Parser, Debug)]
#[command(name = "relaykv-mock-proxy")]
#[command(about = "In-memory proxy speaking the relaykv wire protocol")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Address returned in discovery ping replies
    #[arg(long, default_value = "127.0.0.1")]
    ping_ip: Ipv4Addr,

    /// Delay every reply by this many milliseconds
    #[arg(long, default_value = "0")]
    delay_ms: u64,

    /// Answer every request with this status code
    #[arg(long)]
    status: Option<u8>,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,relaykv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("relaykv mock proxy v{}", relaykv::VERSION);

    let proxy = match MockProxy::start(&args.listen) {
        Ok(proxy) => proxy,
        Err(e) => {
            tracing::error!("Failed to start mock proxy on {}: {}", args.listen, e);
            std::process::exit(1);
        }
    };

    proxy.set_ping_reply_ip(args.ping_ip);
    proxy.set_delay(Duration::from_millis(args.delay_ms));
    proxy.force_status(args.status.map(ServerStatus::from_code));

    tracing::info!("Serving on {} (Ctrl+C to stop)", proxy.addr());
    loop {
        std::thread::sleep(Duration::from_secs(60));
        tracing::info!(
            "connections={} requests={} records={}",
            proxy.connection_count(),
            proxy.request_count(),
            proxy.record_count()
        );
    }
}
