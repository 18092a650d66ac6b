//! Response Correlator
//!
//! Maps an opaque to the single-use slot its worker is waiting on.
//!
//! ## Invariants
//! - At most one slot per opaque; registering a live opaque is an error
//! - A slot is removed exactly once: by `deliver` or by `cleanup`
//! - A response for an unknown opaque touches no other slot

use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{RelayError, Result};
use crate::protocol::Message;

/// Result of handing a response to the correlator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// A waiting worker received the message
    Delivered,
    /// Nobody was waiting (late, duplicate or unsolicited)
    NoSlot,
    /// The slot was already filled
    SlotFull,
}

/// Receiving end held by a dispatch worker
#[derive(Debug)]
pub struct ResponseSlot {
    opaque: u32,
    receiver: Receiver<Message>,
}

impl ResponseSlot {
    pub fn opaque(&self) -> u32 {
        self.opaque
    }

    /// Block until the response arrives or `timeout` elapses
    pub fn wait(&self, timeout: Duration) -> Option<Message> {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_take(&self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }
}

/// Concurrent opaque → slot map
#[derive(Debug, Default)]
pub struct ResponseCorrelator {
    pending: DashMap<u32, Sender<Message>>,
}

impl ResponseCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the slot for `opaque`
    pub fn register(&self, opaque: u32) -> Result<ResponseSlot> {
        match self.pending.entry(opaque) {
            Entry::Occupied(_) => Err(RelayError::OpaqueCollision(opaque)),
            Entry::Vacant(vacant) => {
                let (sender, receiver) = channel::bounded(1);
                vacant.insert(sender);
                Ok(ResponseSlot { opaque, receiver })
            }
        }
    }

    /// Remove the slot for `opaque` and hand it the message
    pub fn deliver(&self, opaque: u32, message: Message) -> DeliveryOutcome {
        let Some((_, sender)) = self.pending.remove(&opaque) else {
            tracing::debug!(opaque, "No pending request, dropping response");
            return DeliveryOutcome::NoSlot;
        };
        match sender.try_send(message) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(opaque, "Response slot already filled, dropping response");
                DeliveryOutcome::SlotFull
            }
            // The worker dropped its receiver after giving up
            Err(TrySendError::Disconnected(_)) => DeliveryOutcome::NoSlot,
        }
    }

    /// Remove the slot for `opaque` if it is still registered
    pub fn cleanup(&self, opaque: u32) {
        self.pending.remove(&opaque);
    }

    pub fn is_pending(&self, opaque: u32) -> bool {
        self.pending.contains_key(&opaque)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
