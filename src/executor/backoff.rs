//! Retry backoff policy
//!
//! `base * multiplier^(attempt - 1) * (1 + jitter)`, capped at `max_delay`,
//! with jitter drawn uniformly from `[0, max_jitter)`.

use std::time::Duration;

use rand::Rng;

/// Multiplier applied between consecutive retries, used by every call site.
pub const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Upper bound (exclusive) of the random jitter fraction.
pub const MAX_JITTER: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: BACKOFF_MULTIPLIER,
            max_delay: Duration::from_secs(30),
            max_jitter: MAX_JITTER,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), with random jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter > 0.0 {
            rand::rng().random_range(0.0..self.max_jitter)
        } else {
            0.0
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// Delay before retry number `attempt` for a given jitter fraction.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent) * (1.0 + jitter);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }
}
