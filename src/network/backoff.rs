//! Reconnect backoff
//!
//! Exponential delay with multiplicative jitter:
//! `min(initial * 2^attempt, max) * (1 + rand[0, 0.3))`.

use std::time::Duration;

use rand::Rng;

/// Upper bound of the jitter factor added on top of the base delay
pub const MAX_JITTER: f64 = 0.3;

/// Exponential backoff state for one reconnect sequence
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    /// Delay before the next attempt, without jitter
    pub fn base_delay(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(31)).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Delay before the next attempt; advances the sequence
    pub fn next_delay(&mut self) -> Duration {
        let base = self.base_delay();
        self.attempt = self.attempt.saturating_add(1);
        let jitter: f64 = rand::thread_rng().gen_range(0.0..MAX_JITTER);
        base.mul_f64(1.0 + jitter)
    }

    /// Attempts made since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Start over after a successful connect
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
