//! Request DTOs for the admin API
//!
//! Defines the structure of incoming HTTP request bodies.

use std::time::Duration;

use serde::Deserialize;

/// Longest key accepted by the admin API.
pub const MAX_KEY_LENGTH: usize = 256;

/// Request body for POST /limits/check
///
/// Consumes one request from `key`'s sliding window.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitCheckRequest {
    /// Rate limit key, usually `user:operation`
    pub key: String,
    /// Requests allowed per window
    pub max_requests: usize,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl LimitCheckRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.key.is_empty() {
            return Some("Key cannot be empty".to_string());
        }
        if self.key.len() > MAX_KEY_LENGTH {
            return Some(format!(
                "Key exceeds maximum length of {} characters",
                MAX_KEY_LENGTH
            ));
        }
        if self.max_requests == 0 {
            return Some("max_requests must be at least 1".to_string());
        }
        if self.window_ms == 0 {
            return Some("window_ms must be at least 1".to_string());
        }
        None
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str, max_requests: usize, window_ms: u64) -> LimitCheckRequest {
        LimitCheckRequest {
            key: key.to_string(),
            max_requests,
            window_ms,
        }
    }

    #[test]
    fn test_limit_request_deserialize() {
        let json = r#"{"key": "u1:search", "max_requests": 3, "window_ms": 1000}"#;
        let req: LimitCheckRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.key, "u1:search");
        assert_eq!(req.max_requests, 3);
        assert_eq!(req.window(), Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        assert!(request("", 3, 1000).validate().is_some());
        assert!(request(&"k".repeat(MAX_KEY_LENGTH + 1), 3, 1000)
            .validate()
            .is_some());
        assert!(request("k", 0, 1000).validate().is_some());
        assert!(request("k", 3, 0).validate().is_some());
    }

    #[test]
    fn test_validate_valid_request() {
        assert!(request("valid_key", 1, 1).validate().is_none());
    }
}
