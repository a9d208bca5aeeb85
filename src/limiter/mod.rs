//! Rate Limiter Module
//!
//! Sliding-window admission checks keyed by arbitrary strings (usually a user
//! or user+operation). Each key's window is locked independently.

mod window;

#[cfg(test)]
mod property_tests;

pub use window::RateWindow;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::tasks::{spawn_sweep_task, SweepHandle};

/// Denial returned by [`RateLimiter::allow`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("rate limit exceeded, retry after {}ms", .retry_after.as_millis())]
pub struct RateLimitExceeded {
    /// Time until the oldest counted request leaves the window
    pub retry_after: Duration,
}

/// Sliding-window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, RateWindow>>,
    /// Quiet time after which a key's window is reclaimed by the sweep
    idle_after: Duration,
    sweeper: SweepHandle,
}

impl RateLimiter {
    pub fn new(idle_after: Duration) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            idle_after,
            sweeper: SweepHandle::new(),
        }
    }

    // == Allow ==
    /// Admits one request for `key` if fewer than `max_requests` were admitted
    /// within the last `window`. Returns the remaining capacity.
    pub fn allow(
        &self,
        key: &str,
        max_requests: usize,
        window: Duration,
    ) -> Result<usize, RateLimitExceeded> {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateWindow::new(now));

        entry
            .try_record(now, max_requests, window)
            .map_err(|retry_after| {
                debug!(key, ?retry_after, "Rate limit exceeded");
                RateLimitExceeded { retry_after }
            })
    }

    /// Remaining capacity for `key` without consuming any.
    pub fn remaining(&self, key: &str, max_requests: usize, window: Duration) -> usize {
        match self.windows.get_mut(key) {
            Some(mut entry) => entry.remaining(Instant::now(), max_requests, window),
            None => max_requests,
        }
    }

    /// Forgets all recorded requests for `key`.
    pub fn reset(&self, key: &str) -> bool {
        self.windows.remove(key).is_some()
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    // == Reclaim ==
    /// Drops windows of keys that have been idle for `idle_after`. Returns
    /// the number of keys removed.
    pub fn sweep_idle(&self) -> usize {
        sweep_windows(&self.windows, self.idle_after)
    }

    /// Starts the periodic reclaim of idle keys.
    pub fn spawn_sweeper(&self, interval: Duration) {
        let windows = self.windows.clone();
        let idle_after = self.idle_after;
        let handle = spawn_sweep_task("rate_limiter", interval, move || {
            let removed = sweep_windows(&windows, idle_after);
            async move { removed }
        });
        self.sweeper.install(handle);
    }

    pub fn shutdown(&self) {
        if self.sweeper.cancel() {
            debug!("Rate limiter sweep stopped");
        }
    }
}

fn sweep_windows(windows: &DashMap<String, RateWindow>, idle_after: Duration) -> usize {
    let now = Instant::now();
    let before = windows.len();
    windows.retain(|_, window| !window.is_idle(now, idle_after));
    before.saturating_sub(windows.len())
}
