//! Network Tests
//!
//! Connection policies (backoff, discovery, reconnect-on-fail) and the
//! configuration they read.

mod backoff_tests;
mod config_tests;
mod health_tests;
