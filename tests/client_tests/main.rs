//! Client Tests
//!
//! End-to-end tests against an in-process mock proxy.

mod harness;

mod backpressure_tests;
mod operation_tests;
mod relocation_tests;
