//! Error types for relaykv
//!
//! Provides a unified error type for the codec, the connection engine and the
//! request dispatcher.

use thiserror::Error;

use crate::protocol::ServerStatus;

/// Result type alias using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;

/// Unified error type for relaykv operations
#[derive(Debug, Error)]
pub enum RelayError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Request Errors (local, never hit the network)
    // -------------------------------------------------------------------------
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Outbound request queue is full")]
    QueueFull,

    #[error("Too many requests in flight")]
    TooManyRequests,

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Response timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("TLS error: {0}")]
    Tls(String),

    // -------------------------------------------------------------------------
    // Remote Errors
    // -------------------------------------------------------------------------
    #[error("Server error {}: {message}", status.code())]
    Server { status: ServerStatus, message: String },

    // -------------------------------------------------------------------------
    // Wire Errors
    // -------------------------------------------------------------------------
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Compression error: {0}")]
    Compression(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Internal Errors
    // -------------------------------------------------------------------------
    #[error("Opaque {0} is already registered")]
    OpaqueCollision(u32),

    #[error("Client is shutting down")]
    Shutdown,
}

impl RelayError {
    /// Whether the dispatcher may spend its retry budget on this failure.
    ///
    /// Only a missing response is retried; everything else is a definitive
    /// local or remote answer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::Timeout { .. })
    }
}
