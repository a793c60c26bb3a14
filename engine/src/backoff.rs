//! Retry delay policies.
//!
//! A policy maps the number of failures a key has accumulated to the delay
//! before its next attempt. Policies must be deterministic and monotonically
//! non-decreasing in the retry count.

use std::fmt;
use std::time::Duration;

/// Computes the delay before the next attempt of a failed key.
pub trait Backoff: Send + Sync + fmt::Debug {
    /// `retries` is the number of failures so far, starting at 1.
    fn delay(&self, retries: u32) -> Duration;
}

/// `min(base * 2^(retries - 1), max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, retries: u32) -> Duration {
        let exponent = retries.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

/// The same delay for every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff(pub Duration);

impl Backoff for FixedBackoff {
    fn delay(&self, _retries: u32) -> Duration {
        self.0
    }
}
