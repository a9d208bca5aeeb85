//! Property-Based Tests for the Rate Window
//!
//! Replays arbitrary request schedules against a [`RateWindow`] and checks
//! the sliding-window invariants against a brute-force count.

use proptest::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

use crate::limiter::RateWindow;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // After every admitted request, no more than max_requests admitted
    // timestamps lie strictly inside the window.
    #[test]
    fn prop_window_never_over_admits(
        max_requests in 1usize..8,
        window_ms in 10u64..500,
        gaps in prop::collection::vec(0u64..120, 1..120)
    ) {
        let base = Instant::now();
        let window = Duration::from_millis(window_ms);
        let mut rate_window = RateWindow::new(base);
        let mut admitted: Vec<u64> = Vec::new();
        let mut t = 0u64;

        for gap in gaps {
            t += gap;
            let now = base + Duration::from_millis(t);
            let live = admitted.iter().filter(|&&ts| t - ts < window_ms).count();

            match rate_window.try_record(now, max_requests, window) {
                Ok(remaining) => {
                    prop_assert!(live < max_requests, "admitted while {} live", live);
                    admitted.push(t);
                    prop_assert_eq!(remaining, max_requests - live - 1);
                }
                Err(retry_after) => {
                    prop_assert_eq!(live, max_requests);
                    prop_assert!(retry_after > Duration::ZERO);
                    prop_assert!(retry_after <= window);
                }
            }
        }
    }

    // Waiting exactly the reported retry_after is always enough.
    #[test]
    fn prop_retry_after_is_sufficient(
        max_requests in 1usize..5,
        window_ms in 10u64..500,
        burst in 1usize..20
    ) {
        let base = Instant::now();
        let window = Duration::from_millis(window_ms);
        let mut rate_window = RateWindow::new(base);

        let mut denial = None;
        for _ in 0..burst {
            if let Err(retry_after) = rate_window.try_record(base, max_requests, window) {
                denial = Some(retry_after);
            }
        }

        if let Some(retry_after) = denial {
            prop_assert!(rate_window.try_record(base + retry_after, max_requests, window).is_ok());
        }
    }
}
