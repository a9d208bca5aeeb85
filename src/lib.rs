//! Gatekeeper - admission control and resilience for unreliable dependencies
//!
//! Bounds concurrency, absorbs transient failures, stops hammering failing
//! dependencies and caches repeated lookups. The building blocks are usable
//! on their own; [`Gateway`] wires them together.

pub mod api;
pub mod cache;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod gateway;
pub mod limiter;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod tasks;

pub use api::AppState;
pub use cache::Cache;
pub use classifier::{ActionError, ClassifiedError, Dependency, ErrorClassifier, ErrorKind};
pub use config::Config;
pub use error::{GateError, Result};
pub use executor::{ExecuteOptions, ResilientExecutor};
pub use gateway::{Command, Gateway};
pub use limiter::{RateLimitExceeded, RateLimiter};
pub use metrics::{InMemorySink, Metrics, MetricsSink};
pub use scheduler::{CommandHandle, CommandScheduler, OperationPolicy};
