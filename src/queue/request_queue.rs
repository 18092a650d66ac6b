//! Request Queue
//!
//! Bounded MPSC queue of encoded requests. Dispatch workers push; the
//! connection writer is the only consumer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use tokio::sync::Notify;
use uuid::Uuid;

/// An encoded request waiting for the writer
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub buffer: Bytes,
    pub request_id: Uuid,
    pub opaque: u32,
    pub enqueued_at: Instant,
}

impl QueueEntry {
    pub fn new(buffer: Bytes, request_id: Uuid, opaque: u32) -> Self {
        Self {
            buffer,
            request_id,
            opaque,
            enqueued_at: Instant::now(),
        }
    }
}

/// Bounded request queue with a wake-up signal for the writer
pub struct RequestQueue {
    entries: ArrayQueue<QueueEntry>,
    notify: Notify,
    /// Entries older than this are dropped on pop
    max_age: Duration,
    expired: AtomicU64,
}

impl RequestQueue {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            entries: ArrayQueue::new(capacity.max(1)),
            notify: Notify::new(),
            max_age,
            expired: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking; `false` means the queue is full
    pub fn push(&self, entry: QueueEntry) -> bool {
        match self.entries.push(entry) {
            Ok(()) => {
                self.notify.notify_one();
                true
            }
            Err(rejected) => {
                tracing::debug!(opaque = rejected.opaque, "Request queue full");
                false
            }
        }
    }

    /// Dequeue the oldest live entry, skipping ones whose caller gave up
    pub fn pop(&self) -> Option<QueueEntry> {
        while let Some(entry) = self.entries.pop() {
            let age = entry.enqueued_at.elapsed();
            if age > self.max_age {
                self.expired.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    opaque = entry.opaque,
                    request_id = %entry.request_id,
                    "Discarding expired request ({:?} in queue)",
                    age
                );
                continue;
            }
            return Some(entry);
        }
        None
    }

    /// Wait until a producer has pushed (returns immediately if a push
    /// happened since the last wait)
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Number of entries dropped for exceeding their age limit
    pub fn expired_count(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("max_age", &self.max_age)
            .finish()
    }
}
