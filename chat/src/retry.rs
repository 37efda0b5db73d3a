//! Reconnect backoff policy.
//!
//! Delay doubles per consecutive failure from `base`, capped at `max`. With
//! jitter enabled the delay is drawn uniformly from the upper half of that
//! window so a room full of clients does not reconnect in lockstep.

use std::time::Duration;

use rand::Rng;

#[cfg(test)]
#[path = "retry_test.rs"]
mod retry_test;

pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BASE_MS: u64 = 1000;
pub const DEFAULT_RETRY_MAX_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before the session gives up.
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            max: Duration::from_millis(DEFAULT_RETRY_MAX_MS),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Never reconnect: the first failure ends the session.
    #[must_use]
    pub fn none() -> Self {
        Self { max_attempts: 0, ..Self::default() }
    }

    /// Delay before the next attempt after `failures` consecutive failures,
    /// or `None` once the budget is spent.
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        if failures == 0 || failures > self.max_attempts {
            return None;
        }
        let exponent = (failures - 1).min(31);
        let delay = self.base.saturating_mul(1_u32 << exponent).min(self.max);
        if !self.jitter {
            return Some(delay);
        }

        let ceiling = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        let floor = ceiling / 2;
        Some(Duration::from_millis(rand::rng().random_range(floor..=ceiling)))
    }
}
