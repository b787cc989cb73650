//! Reconnect backoff policy for the upstream connection.

use crate::defaults::{BACKOFF_BASE_SECS, BACKOFF_CAP_SECS, BACKOFF_MAX_ATTEMPTS};
use std::time::Duration;

/// Exponential backoff: `base * 2^(attempt-1)`, capped, with an attempt
/// ceiling. The counter resets on every successful open.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::with_limits(
            Duration::from_secs(BACKOFF_BASE_SECS),
            Duration::from_secs(BACKOFF_CAP_SECS),
            BACKOFF_MAX_ATTEMPTS,
        )
    }

    pub fn with_limits(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            attempt: 0,
        }
    }

    /// Returns the delay before the next attempt, or `None` when the
    /// attempt ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        let factor = 1u32 << (self.attempt - 1).min(31);
        Some((self.base * factor).min(self.cap))
    }

    /// Attempts consumed since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Resets the attempt counter after a successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
