//! relaykv CLI Client
//!
//! Command-line interface for reading and writing records through a proxy.

use clap::{Parser, Subcommand};
use relaykv::{Client, Config, Response};
use tracing_subscriber::{fmt, EnvFilter};

/// relaykv CLI
#[derive(Parser, Debug)]
#[command(name = "relaykv-cli")]
#[command(about = "CLI for a proxied key-value store")]
#[command(version)]
struct Args {
    /// TOML config file (flags below override it)
    #[arg(short, long)]
    config: Option<String>,

    /// Proxy host
    #[arg(long)]
    host: Option<String>,

    /// Proxy port
    #[arg(short, long)]
    port: Option<u16>,

    /// Record namespace
    #[arg(short, long)]
    namespace: Option<String>,

    /// Application name sent with every request
    #[arg(long)]
    app_name: Option<String>,

    /// Response timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Retry once on timeout
    #[arg(long)]
    retry: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        key: String,

        /// Extend the TTL to at least this many seconds
        #[arg(long)]
        ttl: Option<u32>,
    },

    /// Create a record (fails if it exists)
    Create {
        key: String,
        value: String,

        /// TTL in seconds
        #[arg(long)]
        ttl: Option<u32>,
    },

    /// Create or replace a record
    Set {
        key: String,
        value: String,

        /// TTL in seconds
        #[arg(long)]
        ttl: Option<u32>,
    },

    /// Update an existing record
    Update {
        key: String,
        value: String,

        /// Only update if the stored version matches
        #[arg(long)]
        version: Option<u32>,
    },

    /// Delete a record
    Destroy { key: String },

    /// Connect and report the connection state
    Ping,
}

fn build_config(args: &Args) -> relaykv::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(namespace) = &args.namespace {
        config.namespace = namespace.clone();
    }
    if let Some(app_name) = &args.app_name {
        config.app_name = app_name.clone();
    }
    if let Some(timeout) = args.timeout_ms {
        config.response_timeout_ms = timeout;
    }
    if args.retry {
        config.retry_enabled = true;
    }
    // Single-shot process: no reason to keep a large pool around
    config.worker_threads = 1;
    Ok(config)
}

fn print_response(response: &Response) {
    println!("status:   {}", response.status);
    if let Some(value) = &response.value {
        println!("value:    {}", String::from_utf8_lossy(value));
    }
    println!("version:  {}", response.version);
    println!("ttl:      {}s", response.ttl_secs);
    println!("rht:      {}us", response.request_handling_time_us);
}

fn run(args: Args) -> relaykv::Result<()> {
    let config = build_config(&args)?;
    let connect_wait = config.connect_timeout() * 10;
    let client = Client::connect(config)?;

    if !client.wait_connected(connect_wait) {
        return Err(relaykv::RelayError::Connection(format!(
            "could not connect to {} within {:?}",
            client.config().endpoint(),
            connect_wait
        )));
    }

    let response = match args.command {
        Commands::Ping => {
            println!(
                "connected to {} ({:?})",
                client.config().endpoint(),
                client.connection_state()
            );
            return Ok(());
        }
        Commands::Get { key, ttl } => client.get_with_ttl(key, ttl.unwrap_or(0))?,
        Commands::Create { key, value, ttl } => {
            client.create_with_ttl(key, value, ttl.unwrap_or(0))?
        }
        Commands::Set { key, value, ttl } => client.submit(
            relaykv::Request::set(key, value).with_ttl(ttl.unwrap_or(0)),
        )
        .wait()?,
        Commands::Update { key, value, version } => match version {
            Some(version) => client.compare_and_set(key, value, version)?,
            None => client.update(key, value)?,
        },
        Commands::Destroy { key } => client.destroy(key)?,
    };

    print_response(&response);
    Ok(())
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,relaykv=debug"));

    // Logs go to stderr so command output stays clean
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
