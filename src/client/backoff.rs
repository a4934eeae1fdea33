//! Reconnection backoff math. No I/O; the agent owns the sleeping.

use serde::{Deserialize, Serialize};

/// Bounds for the exponential retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 10,
            multiplier: 2.0,
        }
    }
}

/// Exponential backoff state for one run of reconnect attempts.
#[derive(Debug, Clone, Copy)]
pub struct BackoffState {
    policy: BackoffPolicy,
    attempts: u32,
    delay_ms: u64,
}

impl BackoffState {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
            delay_ms: policy.initial_delay_ms.min(policy.max_delay_ms),
        }
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        *self = Self::new(self.policy);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    /// Advance to the next attempt and return the delay to wait before it,
    /// or `None` once the attempt cap is reached.
    pub fn next_delay_and_advance(&mut self) -> Option<u64> {
        if self.is_exhausted() {
            return None;
        }

        let current_delay = self.delay_ms;
        self.attempts += 1;
        self.delay_ms = ((self.delay_ms as f64) * self.policy.multiplier)
            .min(self.policy.max_delay_ms as f64) as u64;
        Some(current_delay)
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}
