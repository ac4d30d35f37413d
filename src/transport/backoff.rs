//! Reconnect delays.
//!
//! Exponential backoff with full jitter: each delay is drawn from
//! `0..=min(max, initial * 2^attempt)`, so bridges that lose the same bus
//! do not retry in lockstep.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Growth factor between attempts.
const MULTIPLIER: u32 = 2;

// ============================================================================
// Backoff
// ============================================================================

/// Exponential backoff with full jitter, capped at `max`.
///
/// Attempts are unbounded; the bus is expected to come back eventually.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    ceiling: Duration,
    attempts: u32,
}

impl Backoff {
    /// Creates a backoff. `max` is raised to `initial` if smaller.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            ceiling: initial,
            attempts: 0,
        }
    }

    /// Returns the upper bound of the next delay.
    #[inline]
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Returns a random delay up to the current ceiling and advances.
    pub fn next_delay(&mut self) -> Duration {
        let cap_ms = u64::try_from(self.ceiling.as_millis()).unwrap_or(u64::MAX);
        let delay = if cap_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(fastrand::u64(0..=cap_ms))
        };
        self.ceiling = self.ceiling.saturating_mul(MULTIPLIER).min(self.max);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Starts over after a successful connection.
    pub fn reset(&mut self) {
        self.ceiling = self.initial;
        self.attempts = 0;
    }

    /// Returns the number of delays handed out since the last reset.
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

// ============================================================================
// Tests
// ============================================================================
