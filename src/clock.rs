//! Clock helpers
//!
//! TTLs, rate windows and cooldowns are caller-supplied durations added to
//! the current instant. Durations too large to represent are clamped.

use std::time::Duration;

use tokio::time::Instant;

/// Longest span added to an instant, about thirty years. Anything longer is
/// treated as "never" for expiry and cooldown purposes.
pub const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after`, with `after` clamped to [`FAR_FUTURE`].
pub fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after.min(FAR_FUTURE)).unwrap_or(now)
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_durations_are_added() {
        let now = Instant::now();
        assert_eq!(
            deadline_after(now, Duration::from_secs(5)),
            now + Duration::from_secs(5)
        );
        assert_eq!(deadline_after(now, Duration::ZERO), now);
    }

    #[test]
    fn test_huge_durations_are_clamped() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::MAX), now + FAR_FUTURE);
        assert_eq!(
            deadline_after(now, FAR_FUTURE + Duration::from_secs(1)),
            now + FAR_FUTURE
        );
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
