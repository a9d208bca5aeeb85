//! Error types for the gatekeeper
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::classifier::{ClassifiedError, ErrorKind};
use crate::limiter::RateLimitExceeded;

// == Gate Error Enum ==
/// Unified error type returned by the executor, scheduler and gateway.
///
/// `CircuitOpen`, `OnCooldown` and `QueueFull` are structural: they are
/// produced before the wrapped action runs and are never retried. Failures of
/// the action itself arrive as `Classified`.
#[derive(Error, Debug, Clone)]
pub enum GateError {
    /// The wrapped action failed
    #[error(transparent)]
    Classified(#[from] ClassifiedError),

    /// Circuit breaker for the operation is open
    #[error("Circuit open for '{operation}', retry in {}ms", .retry_after.as_millis())]
    CircuitOpen {
        operation: String,
        retry_after: Duration,
    },

    /// The user ran this operation too recently
    #[error("'{operation}' is on cooldown for another {}ms", .remaining.as_millis())]
    OnCooldown {
        operation: String,
        remaining: Duration,
    },

    /// Too many items already waiting for the operation
    #[error("Queue for '{operation}' is full ({capacity} pending)")]
    QueueFull { operation: String, capacity: usize },

    /// Rejected by a sliding-window rate limit
    #[error("Rate limit exceeded, retry in {}ms", .retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    /// The work was dropped before it produced a result
    #[error("Command was cancelled before completion")]
    Cancelled,

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Requested item does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GateError {
    // == Retry Hint ==
    /// How long the caller should wait before trying again, if known.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GateError::CircuitOpen { retry_after, .. } => Some(*retry_after),
            GateError::OnCooldown { remaining, .. } => Some(*remaining),
            GateError::RateLimited { retry_after } => Some(*retry_after),
            GateError::Classified(err) => err.retry_after,
            _ => None,
        }
    }

    // == User Message ==
    /// Message suitable for showing to the end user who issued the command.
    pub fn user_message(&self) -> String {
        match self {
            GateError::Classified(err) => err.user_message(),
            GateError::CircuitOpen { .. } => {
                "This feature is temporarily unavailable. Please try again later.".to_string()
            }
            GateError::OnCooldown { remaining, .. } => format!(
                "Please wait {} more second(s) before using this command again.",
                whole_seconds(*remaining)
            ),
            GateError::QueueFull { .. } => {
                "Too many requests are waiting. Please try again shortly.".to_string()
            }
            GateError::RateLimited { retry_after } => format!(
                "Too many requests. Please wait {} second(s) before trying again.",
                whole_seconds(*retry_after)
            ),
            GateError::InvalidRequest(msg) => msg.clone(),
            _ => "Something went wrong. Please try again later.".to_string(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            GateError::Classified(err) => match err.kind {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
                ErrorKind::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
                ErrorKind::ExternalService | ErrorKind::Persistence => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
            },
            GateError::CircuitOpen { .. } | GateError::QueueFull { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GateError::OnCooldown { .. } | GateError::RateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            GateError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GateError::NotFound(_) => StatusCode::NOT_FOUND,
            GateError::Cancelled | GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RateLimitExceeded> for GateError {
    fn from(err: RateLimitExceeded) -> Self {
        GateError::RateLimited {
            retry_after: err.retry_after,
        }
    }
}

/// Rounds up to whole seconds so a user never retries a moment too early.
pub(crate) fn whole_seconds(duration: Duration) -> u64 {
    crate::clock::millis(duration).div_ceil(1000)
}

// == IntoResponse Implementation ==
impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match self.retry_after() {
            Some(retry_after) => json!({
                "error": self.to_string(),
                "retry_after_ms": crate::clock::millis(retry_after),
            }),
            None => json!({
                "error": self.to_string()
            }),
        };

        (status, Json(body)).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the gatekeeper.
pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_seconds_rounds_up() {
        assert_eq!(whole_seconds(Duration::from_millis(0)), 0);
        assert_eq!(whole_seconds(Duration::from_millis(1)), 1);
        assert_eq!(whole_seconds(Duration::from_millis(1000)), 1);
        assert_eq!(whole_seconds(Duration::from_millis(2500)), 3);
    }

    #[test]
    fn test_cooldown_message_mentions_wait() {
        let err = GateError::OnCooldown {
            operation: "search".to_string(),
            remaining: Duration::from_millis(1500),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_millis(1500)));
        assert!(err.user_message().contains("2 more second"));
        assert!(err.to_string().contains("search"));
    }

    #[test]
    fn test_status_codes() {
        let open = GateError::CircuitOpen {
            operation: "x".to_string(),
            retry_after: Duration::from_secs(1),
        };
        assert_eq!(open.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            GateError::RateLimited {
                retry_after: Duration::from_secs(1)
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GateError::NotFound("k".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_rate_limit_conversion() {
        let err: GateError = RateLimitExceeded {
            retry_after: Duration::from_millis(250),
        }
        .into();
        assert!(matches!(err, GateError::RateLimited { retry_after } if retry_after == Duration::from_millis(250)));
    }
}
