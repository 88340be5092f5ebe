//! # Exponential Backoff
//!
//! Requeue delays for transient failures. Starts at a small base, doubles on
//! every consecutive failure and stays at the ceiling once reached.
//! Sequence with the defaults: 1s, 2s, 4s, 8s, ... 256s, 300s (max).

use std::time::Duration;

/// Exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// First delay, also used after a reset
    base: Duration,
    /// Delay returned by the next call
    current: Duration,
    /// Ceiling
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `base` and capped at `max`
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            current: base.min(max),
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.base.min(self.max);
    }
}
