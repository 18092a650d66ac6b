//! Configuration for relaykv
//!
//! Centralized client configuration with sensible defaults. A `Config` can be
//! assembled with the builder or read from a TOML file; either way it is
//! validated once and then shared read-only through the client context.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{RelayError, Result};

/// Upper bound for `response_timeout_ms`
pub const MAX_RESPONSE_TIMEOUT_MS: u64 = 5000;

/// Upper bound for `connect_timeout_ms`
pub const MAX_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Upper bound for `connection_lifetime_ms`
pub const MAX_CONNECTION_LIFETIME_MS: u64 = 30_000;

/// App names share their length byte with the IPv6 flag bit on the wire
pub const MAX_APP_NAME_LEN: usize = 127;

/// Main configuration for a relaykv client
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Proxy Endpoint
    // -------------------------------------------------------------------------
    /// Proxy (or load balancer) host name or address
    pub host: String,

    /// Proxy port
    pub port: u16,

    /// Application name reported in every request's source info
    pub app_name: String,

    /// Namespace all records of this client live in
    pub namespace: String,

    // -------------------------------------------------------------------------
    // Timeouts
    // -------------------------------------------------------------------------
    /// How long a request waits for its correlated response (milliseconds)
    pub response_timeout_ms: u64,

    /// TCP connect timeout, also used for the TLS handshake (milliseconds)
    pub connect_timeout_ms: u64,

    /// Proactive connection recycle period (milliseconds)
    pub connection_lifetime_ms: u64,

    // -------------------------------------------------------------------------
    // Record Limits
    // -------------------------------------------------------------------------
    /// TTL applied when a request does not carry one (seconds)
    pub default_ttl_secs: u32,

    /// Largest TTL a request may ask for (seconds)
    pub max_ttl_secs: u32,

    /// Largest key in bytes
    pub max_key_size: usize,

    /// Largest value in bytes (after compression)
    pub max_value_size: usize,

    /// Longest namespace in bytes
    pub max_namespace_length: usize,

    // -------------------------------------------------------------------------
    // Features
    // -------------------------------------------------------------------------
    /// Compress large values with Snappy
    pub use_compression: bool,

    /// Values at or below this size are never compressed (bytes)
    pub compression_threshold: usize,

    /// Retry once after a response timeout
    pub retry_enabled: bool,

    /// Ask the load balancer for a direct proxy address
    pub bypass_lb: bool,

    /// Run discovery against a loopback host and accept loopback proxy
    /// addresses other than this host's own. Local test rigs only.
    pub loopback_discovery: bool,

    /// Force a recycle when the failure ratio stays high
    pub reconnect_on_fail: bool,

    /// TLS settings
    pub tls: TlsConfig,

    // -------------------------------------------------------------------------
    // Pipeline Sizing
    // -------------------------------------------------------------------------
    /// Capacity of the outbound request queue
    pub queue_capacity: usize,

    /// Threads in the dispatch worker pool
    pub worker_threads: usize,

    /// Jobs that may wait for a free worker before submissions are rejected
    pub worker_queue_capacity: usize,

    /// Largest frame accepted from the proxy (bytes)
    pub max_frame_size: usize,

    // -------------------------------------------------------------------------
    // Backoff
    // -------------------------------------------------------------------------
    /// First reconnect delay (milliseconds)
    pub reconnect_initial_wait_ms: u64,

    /// Reconnect delay cap (milliseconds)
    pub reconnect_max_wait_ms: u64,

    /// Lower bound of the sleep before a retry (milliseconds)
    pub retry_min_interval_ms: u64,

    /// Upper bound of the sleep before a retry (milliseconds)
    pub retry_max_interval_ms: u64,
}

/// TLS configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Wrap proxy connections in TLS
    pub enabled: bool,

    /// PEM bundle with the CA certificates to trust
    pub ca_cert_path: Option<PathBuf>,

    /// Name to verify the certificate against (defaults to `host`)
    pub server_name: Option<String>,

    /// Skip certificate verification (test rigs only)
    pub accept_invalid_certs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            app_name: "relaykv".to_string(),
            namespace: "default".to_string(),
            response_timeout_ms: 200,
            connect_timeout_ms: 200,
            connection_lifetime_ms: 30_000,
            default_ttl_secs: 259_200, // 3 days
            max_ttl_secs: 259_200,
            max_key_size: 128,
            max_value_size: 204_800, // 200 KB
            max_namespace_length: 64,
            use_compression: false,
            compression_threshold: 1024,
            retry_enabled: false,
            bypass_lb: true,
            loopback_discovery: false,
            reconnect_on_fail: false,
            tls: TlsConfig::default(),
            queue_capacity: 13_000,
            worker_threads: 8,
            worker_queue_capacity: 1024,
            max_frame_size: 4 * 1024 * 1024, // 4 MB
            reconnect_initial_wait_ms: 200,
            reconnect_max_wait_ms: 60_000,
            retry_min_interval_ms: 10,
            retry_max_interval_ms: 90,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| RelayError::Config(e.to_string()))
    }

    /// Read and parse a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Check the settings against the protocol and client limits
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(RelayError::Config("host must be set".to_string()));
        }
        if self.port == 0 {
            return Err(RelayError::Config("port must be set".to_string()));
        }
        if self.namespace.is_empty() {
            return Err(RelayError::Config("namespace must be set".to_string()));
        }
        if self.namespace.len() > self.max_namespace_length || self.namespace.len() > u8::MAX as usize {
            return Err(RelayError::Config(format!(
                "namespace length {} exceeds {}",
                self.namespace.len(),
                self.max_namespace_length.min(u8::MAX as usize)
            )));
        }
        if self.app_name.len() > MAX_APP_NAME_LEN {
            return Err(RelayError::Config(format!(
                "app name length {} exceeds {}",
                self.app_name.len(),
                MAX_APP_NAME_LEN
            )));
        }
        if self.response_timeout_ms == 0 || self.response_timeout_ms > MAX_RESPONSE_TIMEOUT_MS {
            return Err(RelayError::Config(format!(
                "response_timeout_ms must be in 1..={}",
                MAX_RESPONSE_TIMEOUT_MS
            )));
        }
        if self.connect_timeout_ms == 0 || self.connect_timeout_ms > MAX_CONNECT_TIMEOUT_MS {
            return Err(RelayError::Config(format!(
                "connect_timeout_ms must be in 1..={}",
                MAX_CONNECT_TIMEOUT_MS
            )));
        }
        if self.connection_lifetime_ms == 0 || self.connection_lifetime_ms > MAX_CONNECTION_LIFETIME_MS {
            return Err(RelayError::Config(format!(
                "connection_lifetime_ms must be in 1..={}",
                MAX_CONNECTION_LIFETIME_MS
            )));
        }
        if self.max_key_size == 0 || self.max_key_size > u16::MAX as usize {
            return Err(RelayError::Config("max_key_size must be in 1..=65535".to_string()));
        }
        if self.default_ttl_secs > self.max_ttl_secs {
            return Err(RelayError::Config(format!(
                "default_ttl_secs {} exceeds max_ttl_secs {}",
                self.default_ttl_secs, self.max_ttl_secs
            )));
        }
        if self.queue_capacity == 0 || self.worker_threads == 0 || self.worker_queue_capacity == 0 {
            return Err(RelayError::Config(
                "queue_capacity, worker_threads and worker_queue_capacity must be non-zero".to_string(),
            ));
        }
        if self.retry_min_interval_ms > self.retry_max_interval_ms {
            return Err(RelayError::Config(
                "retry_min_interval_ms exceeds retry_max_interval_ms".to_string(),
            ));
        }
        if self.reconnect_initial_wait_ms == 0 || self.reconnect_initial_wait_ms > self.reconnect_max_wait_ms {
            return Err(RelayError::Config(
                "reconnect_initial_wait_ms must be non-zero and not exceed reconnect_max_wait_ms".to_string(),
            ));
        }
        if self.tls.enabled && !self.tls.accept_invalid_certs && self.tls.ca_cert_path.is_none() {
            return Err(RelayError::Config(
                "tls.ca_cert_path is required when TLS verification is on".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` of the configured endpoint
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the configured host is the IPv4 loopback
    pub fn is_loopback_host(&self) -> bool {
        self.host == "localhost"
            || self
                .host
                .parse::<Ipv4Addr>()
                .map(|ip| ip.is_loopback())
                .unwrap_or(false)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn connection_lifetime(&self) -> Duration {
        Duration::from_millis(self.connection_lifetime_ms)
    }

    /// How long a replaced connection keeps draining responses
    pub fn drain_grace(&self) -> Duration {
        self.response_timeout() * 2
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the proxy host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the proxy port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the application name
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = name.into();
        self
    }

    /// Set the record namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Set the response timeout (in milliseconds)
    pub fn response_timeout_ms(mut self, ms: u64) -> Self {
        self.config.response_timeout_ms = ms;
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the connection recycle period (in milliseconds)
    pub fn connection_lifetime_ms(mut self, ms: u64) -> Self {
        self.config.connection_lifetime_ms = ms;
        self
    }

    /// Set the default record TTL (in seconds)
    pub fn default_ttl_secs(mut self, secs: u32) -> Self {
        self.config.default_ttl_secs = secs;
        self
    }

    /// Set the maximum record TTL (in seconds)
    pub fn max_ttl_secs(mut self, secs: u32) -> Self {
        self.config.max_ttl_secs = secs;
        self
    }

    /// Set the maximum key size (in bytes)
    pub fn max_key_size(mut self, size: usize) -> Self {
        self.config.max_key_size = size;
        self
    }

    /// Set the maximum value size (in bytes)
    pub fn max_value_size(mut self, size: usize) -> Self {
        self.config.max_value_size = size;
        self
    }

    /// Enable or disable payload compression
    pub fn use_compression(mut self, enabled: bool) -> Self {
        self.config.use_compression = enabled;
        self
    }

    /// Set the compression threshold (in bytes)
    pub fn compression_threshold(mut self, size: usize) -> Self {
        self.config.compression_threshold = size;
        self
    }

    /// Enable or disable the single retry after a timeout
    pub fn retry_enabled(mut self, enabled: bool) -> Self {
        self.config.retry_enabled = enabled;
        self
    }

    /// Enable or disable load balancer bypass
    pub fn bypass_lb(mut self, enabled: bool) -> Self {
        self.config.bypass_lb = enabled;
        self
    }

    /// Allow discovery on loopback (local test rigs)
    pub fn loopback_discovery(mut self, enabled: bool) -> Self {
        self.config.loopback_discovery = enabled;
        self
    }

    /// Enable or disable forced recycles on a high failure ratio
    pub fn reconnect_on_fail(mut self, enabled: bool) -> Self {
        self.config.reconnect_on_fail = enabled;
        self
    }

    /// Set the TLS configuration
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = tls;
        self
    }

    /// Set the outbound queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Set the dispatch worker count
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.config.worker_threads = count;
        self
    }

    /// Set the dispatch job queue capacity
    pub fn worker_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.worker_queue_capacity = capacity;
        self
    }

    /// Set the reconnect backoff bounds (in milliseconds)
    pub fn reconnect_wait_ms(mut self, initial: u64, max: u64) -> Self {
        self.config.reconnect_initial_wait_ms = initial;
        self.config.reconnect_max_wait_ms = max;
        self
    }

    /// Set the retry sleep bounds (in milliseconds)
    pub fn retry_interval_ms(mut self, min: u64, max: u64) -> Self {
        self.config.retry_min_interval_ms = min;
        self.config.retry_max_interval_ms = max;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
