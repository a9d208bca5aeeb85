//! Rate Window Module
//!
//! Timestamp log for one limiter key.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Admission timestamps of one key, oldest first.
#[derive(Debug, Clone)]
pub struct RateWindow {
    timestamps: VecDeque<Instant>,
    /// Window length used by the most recent check
    window: Duration,
    last_seen: Instant,
}

impl RateWindow {
    pub fn new(now: Instant) -> Self {
        Self {
            timestamps: VecDeque::new(),
            window: Duration::ZERO,
            last_seen: now,
        }
    }

    // == Prune ==
    /// Drops timestamps that are `window` old or older.
    pub fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    // == Try Record ==
    /// Records `now` if fewer than `max_requests` timestamps are inside the
    /// window. On success returns the remaining capacity, otherwise how long
    /// until the oldest timestamp leaves the window.
    pub fn try_record(
        &mut self,
        now: Instant,
        max_requests: usize,
        window: Duration,
    ) -> Result<usize, Duration> {
        self.window = window;
        self.last_seen = now;
        self.prune(now, window);

        if self.timestamps.len() >= max_requests {
            let retry_after = match self.timestamps.front() {
                Some(&oldest) => window.saturating_sub(now.saturating_duration_since(oldest)),
                None => window,
            };
            return Err(retry_after);
        }

        self.timestamps.push_back(now);
        Ok(max_requests - self.timestamps.len())
    }

    /// Remaining capacity without recording anything.
    pub fn remaining(&mut self, now: Instant, max_requests: usize, window: Duration) -> usize {
        self.prune(now, window);
        max_requests.saturating_sub(self.timestamps.len())
    }

    /// True once the window holds no live timestamps and the key has been
    /// quiet for at least `idle_after`.
    pub fn is_idle(&mut self, now: Instant, idle_after: Duration) -> bool {
        let window = self.window;
        self.prune(now, window);
        self.timestamps.is_empty() && now.saturating_duration_since(self.last_seen) >= idle_after
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(1000);

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn test_sliding_window_scenario() {
        let t0 = Instant::now();
        let mut window = RateWindow::new(t0);

        assert_eq!(window.try_record(at(t0, 0), 3, WINDOW), Ok(2));
        assert_eq!(window.try_record(at(t0, 10), 3, WINDOW), Ok(1));
        assert_eq!(window.try_record(at(t0, 20), 3, WINDOW), Ok(0));

        let retry = window.try_record(at(t0, 500), 3, WINDOW).unwrap_err();
        assert_eq!(retry, Duration::from_millis(500));
        assert!(retry > Duration::ZERO && retry <= WINDOW);

        assert!(window.try_record(at(t0, 1001), 3, WINDOW).is_ok());
    }

    #[test]
    fn test_timestamp_exactly_window_old_is_excluded() {
        let t0 = Instant::now();
        let mut window = RateWindow::new(t0);

        window.try_record(t0, 1, WINDOW).unwrap();
        assert!(window.try_record(at(t0, 999), 1, WINDOW).is_err());
        assert!(window.try_record(at(t0, 1000), 1, WINDOW).is_ok());
    }

    #[test]
    fn test_denied_call_is_not_recorded() {
        let t0 = Instant::now();
        let mut window = RateWindow::new(t0);

        window.try_record(t0, 1, WINDOW).unwrap();
        for ms in [100, 200, 300] {
            assert!(window.try_record(at(t0, ms), 1, WINDOW).is_err());
        }
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_unbounded_window_reports_retry_after() {
        let t0 = Instant::now();
        let mut window = RateWindow::new(t0);

        window.try_record(t0, 1, Duration::MAX).unwrap();
        let retry = window.try_record(at(t0, 10), 1, Duration::MAX).unwrap_err();
        assert_eq!(retry, Duration::MAX - Duration::from_millis(10));
    }

    #[test]
    fn test_zero_limit_always_denies() {
        let t0 = Instant::now();
        let mut window = RateWindow::new(t0);
        assert_eq!(window.try_record(t0, 0, WINDOW), Err(WINDOW));
    }

    #[test]
    fn test_remaining_does_not_record() {
        let t0 = Instant::now();
        let mut window = RateWindow::new(t0);

        window.try_record(t0, 5, WINDOW).unwrap();
        assert_eq!(window.remaining(at(t0, 1), 5, WINDOW), 4);
        assert_eq!(window.remaining(at(t0, 2), 5, WINDOW), 4);
        assert_eq!(window.remaining(at(t0, 1000), 5, WINDOW), 5);
    }

    #[test]
    fn test_idle_detection() {
        let t0 = Instant::now();
        let mut window = RateWindow::new(t0);
        window.try_record(t0, 5, WINDOW).unwrap();

        let idle = Duration::from_secs(5);
        assert!(!window.is_idle(at(t0, 500), idle));
        assert!(!window.is_idle(at(t0, 2000), idle), "empty but not quiet long enough");
        assert!(window.is_idle(at(t0, 5000), idle));
        assert!(window.is_empty());
    }
}
