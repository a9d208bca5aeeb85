//! Cache Store Module
//!
//! Synchronous cache engine combining HashMap storage with LRU tracking and
//! TTL expiration. [`crate::cache::Cache`] wraps it for shared async use.
//!
//! Entries are also indexed by expiration instant, so expired entries can be
//! reclaimed one at a time from the front of the index.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::{CacheEntry, CacheStats, LruTracker, EVICTION_DIVISOR};

// == Cache Store ==
/// Cache storage with batch LRU eviction and TTL support.
#[derive(Debug)]
pub struct CacheStore<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// (expires_at, slot) -> key, soonest first
    expiry: BTreeMap<(Instant, u64), String>,
    next_slot: u64,
    lru: LruTracker,
    stats: CacheStats,
    /// Maximum number of entries allowed
    max_entries: usize,
    /// TTL for entries stored without an explicit one
    default_ttl: Duration,
}

/// Number of entries to evict when `len` entries are stored and the cache is
/// full: `ceil(len / EVICTION_DIVISOR)`, at least one.
pub fn eviction_batch(len: usize) -> usize {
    len.div_ceil(EVICTION_DIVISOR).max(1)
}

impl<V: Clone> CacheStore<V> {
    // == Constructor ==
    /// Creates a new CacheStore with specified capacity and default TTL.
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            expiry: BTreeMap::new(),
            next_slot: 0,
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            max_entries,
            default_ttl,
        }
    }

    // == Set ==
    /// Stores a key-value pair, using the default TTL when `ttl` is None.
    ///
    /// Overwriting a key replaces value and TTL and never evicts. Inserting a
    /// new key into a full cache first evicts a batch of least recently used
    /// entries. Returns the number of evicted entries.
    pub fn set(&mut self, key: String, value: V, ttl: Option<Duration>) -> usize {
        if self.max_entries == 0 {
            return 0;
        }

        let now = Instant::now();
        let mut evicted = 0;

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            for old in self.lru.evict_oldest(eviction_batch(self.entries.len())) {
                if let Some(entry) = self.entries.remove(&old) {
                    self.expiry.remove(&entry.expiry_key());
                    evicted += 1;
                }
            }
            self.stats.record_evictions(evicted);
        }

        let slot = self.next_slot;
        self.next_slot += 1;
        let entry = CacheEntry::new(value, ttl.unwrap_or(self.default_ttl), now).with_slot(slot);
        self.expiry.insert(entry.expiry_key(), key.clone());
        if let Some(replaced) = self.entries.insert(key.clone(), entry) {
            self.expiry.remove(&replaced.expiry_key());
        }
        self.lru.touch(&key);
        self.stats.set_total_entries(self.entries.len());

        evicted
    }

    // == Get ==
    /// Returns the value if present and not expired.
    ///
    /// Expired entries are removed on the spot and count as misses.
    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = Instant::now();

        let expired = match self.entries.get(key) {
            Some(entry) => entry.is_expired_at(now),
            None => {
                self.stats.record_miss();
                return None;
            }
        };

        if expired {
            self.remove_entry(key);
            self.stats.record_expiration();
            self.stats.record_miss();
            return None;
        }

        let entry = self.entries.get_mut(key)?;
        entry.touch(now);
        let value = entry.value.clone();
        self.lru.touch(key);
        self.stats.record_hit();
        Some(value)
    }

    // == Has ==
    /// Whether a live entry exists. Does not count as an access for LRU or
    /// hit/miss purposes; an expired entry is dropped.
    pub fn has(&mut self, key: &str) -> bool {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_expired_at(now) => {
                self.remove_entry(key);
                self.stats.record_expiration();
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    // == Delete ==
    /// Removes an entry by key. Returns whether it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        self.remove_entry(key)
    }

    // == Clear ==
    /// Drops every entry and returns how many were stored. Statistics
    /// counters are kept.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.expiry.clear();
        self.lru.clear();
        self.stats.set_total_entries(0);
        removed
    }

    // == Expiry Sweep ==
    /// Removes the entry that expires soonest if it is expired at `now`, and
    /// returns its key. Touches at most one entry.
    pub fn pop_expired(&mut self, now: Instant) -> Option<String> {
        let (expires_at, key) = self
            .expiry
            .first_key_value()
            .map(|(&(expires_at, _), key)| (expires_at, key.clone()))?;
        if now <= expires_at {
            return None;
        }

        self.remove_entry(&key);
        self.stats.record_expiration();
        Some(key)
    }

    /// Removes all expired entries. Returns the number removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        while self.pop_expired(now).is_some() {
            removed += 1;
        }
        removed
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.expiry.remove(&entry.expiry_key());
                self.lru.remove(key);
                self.stats.set_total_entries(self.entries.len());
                true
            }
            None => false,
        }
    }
}
