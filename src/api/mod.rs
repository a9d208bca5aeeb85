//! API Module
//!
//! HTTP handlers and routing for the gateway admin API.
//!
//! # Endpoints
//! - `GET /health` - Health check endpoint
//! - `GET /stats` - Cache statistics and aggregated metrics
//! - `GET /circuits` - Circuit breaker states
//! - `POST /circuits/:operation/reset` - Discard a circuit's state
//! - `GET /scheduler` - Queue depth and running count per operation
//! - `DELETE /cache/:key` - Delete a cached entry
//! - `DELETE /cache` - Clear the cache
//! - `POST /limits/check` - Consume one request from a rate window

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
