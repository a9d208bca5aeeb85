//! API Routes
//!
//! Configures the Axum router with all admin endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    circuits_handler, clear_cache_handler, delete_cache_handler, health_handler,
    limit_check_handler, reset_circuit_handler, scheduler_handler, stats_handler, AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    // Configure CORS middleware
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/circuits", get(circuits_handler))
        .route("/circuits/:operation/reset", post(reset_circuit_handler))
        .route("/scheduler", get(scheduler_handler))
        .route("/cache", delete(clear_cache_handler))
        .route("/cache/:key", delete(delete_cache_handler))
        .route("/limits/check", post(limit_check_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        create_router(AppState::from_config(&Config::default()))
    }

    async fn status_of(app: Router, method: &str, uri: &str) -> StatusCode {
        app.oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        assert_eq!(status_of(create_test_app(), "GET", "/health").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        assert_eq!(status_of(create_test_app(), "GET", "/stats").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_listing_endpoints() {
        assert_eq!(status_of(create_test_app(), "GET", "/circuits").await, StatusCode::OK);
        assert_eq!(status_of(create_test_app(), "GET", "/scheduler").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_circuit_reset() {
        assert_eq!(
            status_of(create_test_app(), "POST", "/circuits/nope/reset").await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_delete_missing_key() {
        assert_eq!(
            status_of(create_test_app(), "DELETE", "/cache/nonexistent").await,
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_of(create_test_app(), "DELETE", "/cache").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_limit_check_endpoint() {
        let response = create_test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/limits/check")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"key":"u1","max_requests":5,"window_ms":1000}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
