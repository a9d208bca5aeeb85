//! Cache Module
//!
//! In-memory caching with TTL expiration and batch LRU eviction.

mod entry;
mod lru;
mod shared;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use lru::LruTracker;
pub use shared::Cache;
pub use stats::CacheStats;
pub use store::{eviction_batch, CacheStore};

// == Public Constants ==
/// A full cache evicts `ceil(len / EVICTION_DIVISOR)` entries at once
/// (one tenth of its contents).
pub const EVICTION_DIVISOR: usize = 10;
