//! Queue Tests
//!
//! The bounded request queue, the response correlator and opaque allocation.

mod correlator_tests;
