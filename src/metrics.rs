//! Metrics Module
//!
//! Sink interface for timing events plus an in-memory aggregating sink.
//! Delivery failures are logged and dropped; they never reach callers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

// == Sink Interface ==
/// Error reported by a metrics sink.
#[derive(Error, Debug)]
#[error("metrics sink error: {0}")]
pub struct MetricsError(pub String);

/// Receives one record per cache access, executor attempt and scheduled
/// item completion.
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: &str, duration: Duration, success: bool) -> Result<(), MetricsError>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record(&self, _event: &str, _duration: Duration, _success: bool) -> Result<(), MetricsError> {
        Ok(())
    }
}

// == Metrics Handle ==
/// Cloneable handle the components record through.
#[derive(Clone)]
pub struct Metrics {
    sink: Arc<dyn MetricsSink>,
}

impl Metrics {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink))
    }

    /// Forwards to the sink. Sink errors are logged and discarded.
    pub fn record(&self, event: &str, duration: Duration, success: bool) {
        if let Err(err) = self.sink.record(event, duration, success) {
            warn!(event, error = %err, "Dropping metrics event");
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::noop()
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

// == In-Memory Sink ==
/// Aggregated counters for one event name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventStats {
    pub count: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
    pub max_duration_ms: u64,
}

impl EventStats {
    /// Mean duration in milliseconds, 0.0 before the first record.
    pub fn avg_duration_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.count as f64
        }
    }

    fn add(&mut self, duration: Duration, success: bool) {
        let ms = crate::clock::millis(duration);
        self.count += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration_ms = self.total_duration_ms.saturating_add(ms);
        self.max_duration_ms = self.max_duration_ms.max(ms);
    }
}

/// Keeps per-event aggregates in memory, exposed by the admin API.
#[derive(Debug, Default)]
pub struct InMemorySink {
    events: DashMap<String, EventStats>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats for one event name.
    pub fn get(&self, event: &str) -> Option<EventStats> {
        self.events.get(event).map(|stats| stats.clone())
    }

    /// All events, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, EventStats> {
        self.events
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl MetricsSink for InMemorySink {
    fn record(&self, event: &str, duration: Duration, success: bool) -> Result<(), MetricsError> {
        self.events
            .entry(event.to_string())
            .or_default()
            .add(duration, success);
        Ok(())
    }
}
