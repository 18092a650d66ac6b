//! Reconnect-on-fail monitor
//!
//! Folds per-interval request outcomes into an exponential moving average of
//! the failure ratio. When the average crosses the threshold the manager is
//! told to recycle the connection, a bounded number of times before backing
//! off for a cool-down period.

use std::time::{Duration, Instant};

/// Weight of the newest sample
pub const EMA_ALPHA: f64 = 0.1;

/// Average failure ratio that triggers a forced recycle
pub const FAILURE_THRESHOLD: f64 = 0.3;

/// Added to the denominator so a quiet interval cannot spike the ratio
pub const SAFETY_BUFFER: u64 = 30;

/// Forced recycles allowed before cooling down
pub const MAX_FORCED_RECYCLES: u32 = 2;

pub const COOL_DOWN: Duration = Duration::from_secs(180);

/// How often the manager samples the counters
pub const CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// What the manager should do after a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    /// Recycle the connection now
    Recycle,
    /// Too many forced recycles; suppressed until the cool-down ends
    CoolingDown,
}

#[derive(Debug, Clone)]
pub struct FailureMonitor {
    average: f64,
    forced_recycles: u32,
    next_allowed: Instant,
}

impl Default for FailureMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureMonitor {
    pub fn new() -> Self {
        Self {
            average: 0.0,
            forced_recycles: 0,
            next_allowed: Instant::now(),
        }
    }

    pub fn average(&self) -> f64 {
        self.average
    }

    /// Fold one interval's outcomes into the average
    pub fn observe(&mut self, success: u64, failed: u64, now: Instant) -> HealthVerdict {
        let total = (success + failed + SAFETY_BUFFER) as f64;
        let sample = failed as f64 / total;
        let ema = EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * self.average;
        if ema.is_finite() {
            self.average = ema;
        }

        if self.average < FAILURE_THRESHOLD {
            return HealthVerdict::Healthy;
        }
        if now < self.next_allowed {
            return HealthVerdict::CoolingDown;
        }
        if self.forced_recycles >= MAX_FORCED_RECYCLES {
            tracing::warn!(
                "Failure ratio {:.3} persists after {} recycles, cooling down for {:?}",
                self.average,
                self.forced_recycles,
                COOL_DOWN
            );
            self.forced_recycles = 0;
            self.next_allowed = now + COOL_DOWN;
            return HealthVerdict::CoolingDown;
        }

        self.forced_recycles += 1;
        HealthVerdict::Recycle
    }

    /// Forget the history once a fresh connection is in place
    pub fn reset_average(&mut self) {
        self.average = 0.0;
    }
}
