//! Shared Cache Handle
//!
//! Async, thread-safe wrapper around [`CacheStore`] that reports every access
//! to the metrics sink and owns the background expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::cache::{CacheStats, CacheStore};
use crate::metrics::Metrics;
use crate::tasks::{spawn_sweep_task, SweepHandle};

/// TTL + LRU cache shared between tasks.
#[derive(Debug)]
pub struct Cache<V> {
    store: Arc<RwLock<CacheStore<V>>>,
    metrics: Metrics,
    sweeper: SweepHandle,
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(max_entries: usize, default_ttl: Duration, metrics: Metrics) -> Self {
        Self {
            store: Arc::new(RwLock::new(CacheStore::new(max_entries, default_ttl))),
            metrics,
            sweeper: SweepHandle::new(),
        }
    }

    /// Returns the value for `key`, or None on a miss or expired entry.
    pub async fn get(&self, key: &str) -> Option<V> {
        let started = Instant::now();
        // write lock: a hit updates the access time
        let value = self.store.write().await.get(key);
        self.metrics
            .record("cache.get", started.elapsed(), value.is_some());
        value
    }

    /// Stores `value`; `ttl` of None uses the configured default.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let started = Instant::now();
        let key = key.into();
        let evicted = self.store.write().await.set(key, value, ttl);
        self.metrics.record("cache.set", started.elapsed(), true);
        if evicted > 0 {
            debug!("Cache full, evicted {} least recently used entries", evicted);
        }
    }

    pub async fn has(&self, key: &str) -> bool {
        let started = Instant::now();
        let present = self.store.write().await.has(key);
        self.metrics.record("cache.has", started.elapsed(), present);
        present
    }

    /// Removes `key`. Returns whether it existed.
    pub async fn delete(&self, key: &str) -> bool {
        let started = Instant::now();
        let existed = self.store.write().await.delete(key);
        self.metrics.record("cache.delete", started.elapsed(), existed);
        existed
    }

    pub async fn clear(&self) -> usize {
        let started = Instant::now();
        let removed = self.store.write().await.clear();
        self.metrics.record("cache.clear", started.elapsed(), true);
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        self.store.read().await.stats()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    /// Removes every expired entry. Returns the number removed.
    ///
    /// Each removal takes its own short write lock, so readers and writers
    /// are never held up for more than a single entry.
    pub async fn sweep_expired(&self) -> usize {
        sweep_store(&self.store).await
    }

    /// Starts the periodic expiry sweep. Restarting replaces the old task.
    pub fn spawn_sweeper(&self, interval: Duration) {
        let store = self.store.clone();
        let handle = spawn_sweep_task("cache", interval, move || {
            let store = store.clone();
            async move { sweep_store(&store).await }
        });
        self.sweeper.install(handle);
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.is_running()
    }

    /// Stops the background sweep. Stored entries stay readable.
    pub fn shutdown(&self) {
        if self.sweeper.cancel() {
            debug!("Cache sweep stopped");
        }
    }
}

async fn sweep_store<V: Clone>(store: &RwLock<CacheStore<V>>) -> usize {
    let now = Instant::now();
    let mut removed = 0;
    loop {
        let popped = store.write().await.pop_expired(now);
        if popped.is_none() {
            return removed;
        }
        removed += 1;
    }
}
