//! Response DTOs for the admin API
//!
//! Defines the structure of outgoing HTTP response bodies.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cache::CacheStats;
use crate::executor::CircuitSnapshot;
use crate::metrics::EventStats;
use crate::scheduler::LaneSnapshot;

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub cache: CacheStats,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    /// Keys currently tracked by the rate limiter
    pub rate_limited_keys: usize,
    /// Aggregated metrics per event name
    pub events: BTreeMap<String, EventStats>,
}

impl StatsResponse {
    pub fn new(
        cache: CacheStats,
        rate_limited_keys: usize,
        events: BTreeMap<String, EventStats>,
    ) -> Self {
        Self {
            hit_rate: cache.hit_rate(),
            cache,
            rate_limited_keys,
            events,
        }
    }
}

/// Response body for GET /circuits
#[derive(Debug, Clone, Serialize)]
pub struct CircuitsResponse {
    pub circuits: Vec<CircuitSnapshot>,
}

/// Response body for POST /circuits/:operation/reset
#[derive(Debug, Clone, Serialize)]
pub struct ResetResponse {
    pub message: String,
    pub operation: String,
}

impl ResetResponse {
    pub fn new(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        Self {
            message: format!("Circuit '{}' reset", operation),
            operation,
        }
    }
}

/// Response body for GET /scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerResponse {
    pub lanes: Vec<LaneSnapshot>,
}

/// Response body for DELETE /cache/:key
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was deleted
    pub key: String,
}

impl DeleteResponse {
    /// Creates a new DeleteResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted successfully", key),
            key,
        }
    }
}

/// Response body for DELETE /cache
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
    /// Entries dropped by the clear
    pub removed: usize,
}

impl ClearResponse {
    pub fn new(removed: usize) -> Self {
        Self {
            message: "Cache cleared".to_string(),
            removed,
        }
    }
}

/// Response body for an admitted POST /limits/check
#[derive(Debug, Clone, Serialize)]
pub struct LimitCheckResponse {
    pub key: String,
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: usize,
}

impl LimitCheckResponse {
    pub fn allowed(key: impl Into<String>, remaining: usize) -> Self {
        Self {
            key: key.into(),
            allowed: true,
            remaining,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
