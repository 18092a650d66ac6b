//! # relaykv
//!
//! Client engine for a proxied key-value store:
//! - Binary wire codec with tagged, padded metadata and payload components
//! - Bounded request queue with opaque-based response correlation
//! - A single I/O loop that recycles, relocates and reconnects proxy connections
//! - A bounded worker pool dispatching requests with one retry on timeout
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Client                               │
//! │              (submit / blocking operations)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 RequestDispatcher                           │
//! │       (bounded worker pool, validate / retry / classify)    │
//! └──────────┬──────────────────────────────────▲───────────────┘
//!            │ push                             │ response slot
//!            ▼                                  │
//!   ┌─────────────────┐                ┌────────┴──────────┐
//!   │  RequestQueue   │                │ ResponseCorrelator│
//!   │   (bounded)     │                │ (opaque → slot)   │
//!   └────────┬────────┘                └────────▲──────────┘
//!            │ pop                              │ deliver
//!            ▼                                  │
//! ┌─────────────────────────────────────────────┴───────────────┐
//! │                 ConnectionManager (I/O loop)                │
//! │     connect / recycle / discovery / backoff / health        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ TCP or TLS
//!                       ▼
//!                     Proxy
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod protocol;
pub mod queue;
pub mod network;
pub mod compression;
pub mod context;
pub mod request;
pub mod dispatcher;
pub mod client;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{RelayError, Result};
pub use config::{Config, TlsConfig};
pub use client::Client;
pub use context::{ClientContext, ClientStats};
pub use dispatcher::{RequestDispatcher, ResponseHandle};
pub use request::{Operation, Request, Response};
pub use protocol::ServerStatus;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of relaykv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
