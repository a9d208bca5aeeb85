//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::Duration;

use tokio::time::Instant;

use crate::clock::deadline_after;

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Expiration instant
    pub expires_at: Instant,
    /// Last successful read (or the write, if never read)
    pub last_accessed_at: Instant,
    /// Tie-breaker for entries sharing an expiration instant
    slot: u64,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry that expires `ttl` after `now`. A TTL
    /// beyond [`crate::clock::FAR_FUTURE`] is clamped to it.
    pub fn new(value: V, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            expires_at: deadline_after(now, ttl),
            last_accessed_at: now,
            slot: 0,
        }
    }

    /// Tags the entry with its position in the store's expiry index.
    pub(crate) fn with_slot(mut self, slot: u64) -> Self {
        self.slot = slot;
        self
    }

    /// Key of this entry in the store's expiry index.
    pub(crate) fn expiry_key(&self) -> (Instant, u64) {
        (self.expires_at, self.slot)
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// Boundary condition: an entry is still readable at exactly its
    /// expiration instant and expired strictly after it.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    // == Time To Live ==
    /// Returns remaining TTL, zero once expired.
    pub fn ttl_remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    // == Touch ==
    /// Records a read at `now`.
    pub fn touch(&mut self, now: Instant) {
        self.last_accessed_at = now;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_creation() {
        let now = Instant::now();
        let entry = CacheEntry::new("test_value".to_string(), Duration::from_secs(60), now);

        assert_eq!(entry.value, "test_value");
        assert_eq!(entry.last_accessed_at, now);
        assert!(!entry.is_expired_at(now));
    }

    #[test]
    fn test_entry_expiration() {
        let now = Instant::now();
        let entry = CacheEntry::new("test_value".to_string(), Duration::from_secs(1), now);

        assert!(!entry.is_expired_at(now + Duration::from_millis(999)));
        assert!(entry.is_expired_at(now + Duration::from_millis(1001)));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let now = Instant::now();
        let entry = CacheEntry::new("test", Duration::from_secs(1), now);

        // exactly at expires_at the entry is still valid
        assert!(!entry.is_expired_at(entry.expires_at));
        assert!(entry.is_expired_at(entry.expires_at + Duration::from_nanos(1)));
    }

    #[test]
    fn test_ttl_remaining() {
        let now = Instant::now();
        let entry = CacheEntry::new("test", Duration::from_secs(10), now);

        assert_eq!(entry.ttl_remaining(now), Duration::from_secs(10));
        assert_eq!(
            entry.ttl_remaining(now + Duration::from_secs(4)),
            Duration::from_secs(6)
        );
        assert_eq!(entry.ttl_remaining(now + Duration::from_secs(11)), Duration::ZERO);
    }

    #[test]
    fn test_unbounded_ttl_is_clamped() {
        let now = Instant::now();
        let entry = CacheEntry::new("forever", Duration::MAX, now);

        assert_eq!(entry.expires_at, now + crate::clock::FAR_FUTURE);
        assert!(!entry.is_expired_at(now + Duration::from_secs(86_400 * 365)));
    }

    #[test]
    fn test_touch_updates_last_access() {
        let now = Instant::now();
        let mut entry = CacheEntry::new(1u32, Duration::from_secs(10), now);
        let later = now + Duration::from_secs(3);

        entry.touch(later);
        assert_eq!(entry.last_accessed_at, later);
        // touching never extends the TTL
        assert_eq!(entry.expires_at, now + Duration::from_secs(10));
    }
}
