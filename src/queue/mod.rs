//! Queue Module
//!
//! The hand-off points between dispatch workers and the connection I/O loop.
//!
//! ## Flow
//!
//! ```text
//!  worker ──register(opaque)──▶ ResponseCorrelator ◀──deliver(opaque)── reader
//!     │                                │
//!     └──push(bytes)──▶ RequestQueue ──pop()──▶ writer
//!                                      │
//!  worker ◀──────── ResponseSlot ◀─────┘
//! ```
//!
//! ## Responsibilities
//! - Bounded, non-blocking admission of encoded requests (backpressure)
//! - One single-use response slot per pending opaque

mod request_queue;
mod correlator;

pub use request_queue::{QueueEntry, RequestQueue};
pub use correlator::{DeliveryOutcome, ResponseCorrelator, ResponseSlot};
