//! API Handlers
//!
//! HTTP request handlers for each admin endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::{GateError, Result};
use crate::gateway::Gateway;
use crate::metrics::InMemorySink;
use crate::models::{
    CircuitsResponse, ClearResponse, DeleteResponse, HealthResponse, LimitCheckRequest,
    LimitCheckResponse, ResetResponse, SchedulerResponse, StatsResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    /// Sink the gateway's components record into
    pub sink: Arc<InMemorySink>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, sink: Arc<InMemorySink>) -> Self {
        Self { gateway, sink }
    }

    /// Builds a gateway from `config` that records into a fresh in-memory sink.
    pub fn from_config(config: &crate::config::Config) -> Self {
        let sink = Arc::new(InMemorySink::new());
        let gateway = Gateway::new(config, crate::metrics::Metrics::new(sink.clone()));
        Self::new(Arc::new(gateway), sink)
    }
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// Handler for GET /stats
///
/// Cache statistics plus the aggregated metrics of every component.
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let cache = state.gateway.cache().stats().await;
    let tracked = state.gateway.limiter().tracked_keys();

    Json(StatsResponse::new(cache, tracked, state.sink.snapshot()))
}

/// Handler for GET /circuits
pub async fn circuits_handler(State(state): State<AppState>) -> Json<CircuitsResponse> {
    let circuits = state.gateway.executor().circuits().await;
    Json(CircuitsResponse { circuits })
}

/// Handler for POST /circuits/:operation/reset
///
/// Forces the operation's circuit back to Closed.
pub async fn reset_circuit_handler(
    State(state): State<AppState>,
    Path(operation): Path<String>,
) -> Result<Json<ResetResponse>> {
    if !state.gateway.executor().reset_circuit(&operation).await {
        return Err(GateError::NotFound(format!("circuit '{}'", operation)));
    }
    Ok(Json(ResetResponse::new(operation)))
}

/// Handler for GET /scheduler
pub async fn scheduler_handler(State(state): State<AppState>) -> Json<SchedulerResponse> {
    Json(SchedulerResponse {
        lanes: state.gateway.scheduler().snapshot(),
    })
}

/// Handler for DELETE /cache/:key
pub async fn delete_cache_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if !state.gateway.cache().delete(&key).await {
        return Err(GateError::NotFound(format!("key '{}'", key)));
    }
    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for DELETE /cache
pub async fn clear_cache_handler(State(state): State<AppState>) -> Json<ClearResponse> {
    let removed = state.gateway.cache().clear().await;
    Json(ClearResponse::new(removed))
}

/// Handler for POST /limits/check
///
/// Consumes one request from the key's window; a denial is returned as 429
/// with `retry_after_ms`.
pub async fn limit_check_handler(
    State(state): State<AppState>,
    Json(req): Json<LimitCheckRequest>,
) -> Result<Json<LimitCheckResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(GateError::InvalidRequest(error_msg));
    }

    let remaining = state
        .gateway
        .limiter()
        .allow(&req.key, req.max_requests, req.window())?;

    Ok(Json(LimitCheckResponse::allowed(req.key, remaining)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ActionError;
    use crate::config::Config;
    use crate::executor::{CircuitStatus, ExecuteOptions};

    fn state() -> AppState {
        AppState::from_config(&Config::default())
    }

    fn limit(key: &str, max_requests: usize) -> LimitCheckRequest {
        LimitCheckRequest {
            key: key.to_string(),
            max_requests,
            window_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn test_health_handler() {
        let response = health_handler().await;
        assert_eq!(response.status, "healthy");
    }

    #[tokio::test]
    async fn test_stats_handler_reports_cache_metrics() {
        let state = state();
        state.gateway.cache().get("missing").await;

        let response = stats_handler(State(state)).await;
        assert_eq!(response.cache.misses, 1);
        assert_eq!(response.events["cache.get"].failures, 1);
    }

    #[tokio::test]
    async fn test_limit_check_handler() {
        let state = state();

        let ok = limit_check_handler(State(state.clone()), Json(limit("u1", 1)))
            .await
            .unwrap();
        assert_eq!(ok.remaining, 0);

        let denied = limit_check_handler(State(state.clone()), Json(limit("u1", 1))).await;
        assert!(matches!(denied, Err(GateError::RateLimited { .. })));

        let invalid = limit_check_handler(State(state), Json(limit("u1", 0))).await;
        assert!(matches!(invalid, Err(GateError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_delete_cache_handler() {
        let state = state();
        state
            .gateway
            .cache()
            .set("k", serde_json::json!({"v": 1}), None)
            .await;

        let result = delete_cache_handler(State(state.clone()), Path("k".to_string())).await;
        assert!(result.is_ok());

        let result = delete_cache_handler(State(state), Path("k".to_string())).await;
        assert!(matches!(result, Err(GateError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_clear_cache_handler() {
        let state = state();
        state.gateway.cache().set("a", serde_json::json!(1), None).await;
        state.gateway.cache().set("b", serde_json::json!(2), None).await;

        let response = clear_cache_handler(State(state.clone())).await;
        assert_eq!(response.removed, 2);
        assert!(state.gateway.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_circuit_listing_and_reset() {
        let state = state();
        let executor = state.gateway.executor();
        for _ in 0..5 {
            let _ = executor
                .execute(
                    "payments",
                    || async { Err::<(), _>(ActionError::new("boom")) },
                    &ExecuteOptions::default().with_max_retries(0),
                )
                .await;
        }

        let listed = circuits_handler(State(state.clone())).await;
        assert_eq!(listed.circuits.len(), 1);
        assert_eq!(listed.circuits[0].status, CircuitStatus::Open);

        let reset = reset_circuit_handler(State(state.clone()), Path("payments".to_string())).await;
        assert!(reset.is_ok());
        let listed = circuits_handler(State(state.clone())).await;
        assert_eq!(listed.circuits.len(), 1);
        assert_eq!(listed.circuits[0].status, CircuitStatus::Closed);

        let missing = reset_circuit_handler(State(state), Path("refunds".to_string())).await;
        assert!(matches!(missing, Err(GateError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_scheduler_handler() {
        let state = state();
        state
            .gateway
            .scheduler()
            .submit("search", "u1", || async { Ok(()) })
            .unwrap()
            .await
            .unwrap();

        let response = scheduler_handler(State(state)).await;
        assert_eq!(response.lanes.len(), 1);
        assert_eq!(response.lanes[0].operation, "search");
        assert_eq!(response.lanes[0].cooling_down, 1);
    }
}
