//! Error Classifier Module
//!
//! Maps raw action failures onto a closed taxonomy of kinds. Each kind has a
//! fixed retry policy and a fixed user-facing message.

use std::fmt;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::whole_seconds;

// == Error Kind ==
/// Closed set of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    ExternalService,
    RateLimitExceeded,
    PermissionDenied,
    Persistence,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::ExternalService => "external_service_error",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Persistence => "persistence_error",
            ErrorKind::Unknown => "unknown_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Dependency ==
/// What kind of dependency an operation talks to.
///
/// Decides whether an untagged transient failure is reported as an external
/// service error or a persistence error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    #[default]
    ExternalService,
    Persistence,
}

impl Dependency {
    fn transient_kind(self) -> ErrorKind {
        match self {
            Dependency::ExternalService => ErrorKind::ExternalService,
            Dependency::Persistence => ErrorKind::Persistence,
        }
    }
}

// == Action Error ==
/// Failure returned by a caller-supplied action.
///
/// Carries an optional explicit kind tag. Untagged errors are classified from
/// their message.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ActionError {
    message: String,
    kind: Option<ErrorKind>,
    transient: Option<bool>,
    retry_after: Option<Duration>,
    detail: Option<String>,
}

impl ActionError {
    /// Untagged failure; classification falls back to the message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            transient: None,
            retry_after: None,
            detail: None,
        }
    }

    /// Input rejected by the action. The message is shown to the user verbatim.
    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            detail: Some(message.clone()),
            ..Self::new(message).with_kind(ErrorKind::Validation)
        }
    }

    /// Caller lacks `permission`.
    pub fn permission_denied(permission: impl Into<String>) -> Self {
        let permission = permission.into();
        Self {
            detail: Some(permission.clone()),
            ..Self::new(format!("missing permission: {}", permission))
                .with_kind(ErrorKind::PermissionDenied)
        }
    }

    /// Upstream asked us to back off for `retry_after`.
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::new(format!(
                "upstream rate limit, retry after {}ms",
                retry_after.as_millis()
            ))
            .with_kind(ErrorKind::RateLimitExceeded)
        }
    }

    /// Failure of an external API.
    pub fn external(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::ExternalService)
    }

    /// Failure of the persistence store.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(message).with_kind(ErrorKind::Persistence)
    }

    /// An attempt that did not finish within `after`.
    pub fn timeout(after: Duration) -> Self {
        Self::new(format!("attempt timeout after {}ms", after.as_millis())).with_transient(true)
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Overrides message-based transience detection.
    pub fn with_transient(mut self, transient: bool) -> Self {
        self.transient = Some(transient);
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.kind
    }
}

impl From<io::Error> for ActionError {
    fn from(err: io::Error) -> Self {
        let transient = matches!(
            err.kind(),
            io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
                | io::ErrorKind::TimedOut
                | io::ErrorKind::BrokenPipe
        );
        ActionError::new(err.to_string()).with_transient(transient)
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        ActionError::new(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        ActionError::new(message)
    }
}

// == Classified Error ==
/// An action failure after classification.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    /// Whether the failure looked like a timeout or connection problem
    pub transient: bool,
    pub retry_after: Option<Duration>,
    /// Validation message or missing permission name
    pub detail: Option<String>,
}

impl ClassifiedError {
    pub fn is_retryable(&self) -> bool {
        is_retryable(self.kind, self.transient)
    }

    /// Failures that say something about the health of the dependency.
    ///
    /// Caller mistakes (bad input, missing permission) and upstream rate
    /// limits leave the circuit breaker alone.
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ExternalService | ErrorKind::Persistence | ErrorKind::Unknown
        )
    }

    pub fn user_message(&self) -> String {
        user_message(
            self.kind,
            &MessageContext {
                detail: self.detail.clone(),
                retry_after: self.retry_after,
            },
        )
    }
}

// == Message Context ==
/// Extra information some kinds include in their user message.
#[derive(Debug, Clone, Default)]
pub struct MessageContext {
    pub detail: Option<String>,
    pub retry_after: Option<Duration>,
}

// == Policy Table ==
/// Retry policy per kind.
///
/// External and persistence failures are retried only when transient.
pub fn is_retryable(kind: ErrorKind, transient: bool) -> bool {
    match kind {
        ErrorKind::Validation => false,
        ErrorKind::ExternalService => transient,
        ErrorKind::RateLimitExceeded => true,
        ErrorKind::PermissionDenied => false,
        ErrorKind::Persistence => transient,
        ErrorKind::Unknown => false,
    }
}

/// User-facing message per kind.
pub fn user_message(kind: ErrorKind, context: &MessageContext) -> String {
    match kind {
        ErrorKind::Validation => context
            .detail
            .clone()
            .unwrap_or_else(|| "The provided input is invalid.".to_string()),
        ErrorKind::ExternalService => {
            "The service is currently unavailable. Please try again later.".to_string()
        }
        ErrorKind::RateLimitExceeded => match context.retry_after {
            Some(wait) => format!(
                "Too many requests. Please wait {} second(s) before trying again.",
                whole_seconds(wait)
            ),
            None => "Too many requests. Please wait a moment before trying again.".to_string(),
        },
        ErrorKind::PermissionDenied => match &context.detail {
            Some(permission) => format!("You need the '{}' permission to do this.", permission),
            None => "You do not have permission to do this.".to_string(),
        },
        ErrorKind::Persistence => "A storage error occurred. Please try again later.".to_string(),
        ErrorKind::Unknown => "Something went wrong. Please try again later.".to_string(),
    }
}

// == Classifier ==
/// Message fragments that mark a failure as transient.
pub const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "econnrefused",
    "econnreset",
    "connection",
    "network",
    "server selection",
];

/// Classifies [`ActionError`]s.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    patterns: Vec<String>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(TRANSIENT_PATTERNS.iter().map(|p| p.to_string()).collect())
    }
}

impl ErrorClassifier {
    /// Creates a classifier with custom transient patterns (matched
    /// case-insensitively).
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns: patterns.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Explicit kind tag first, then message patterns interpreted in the
    /// operation's dependency context. Anything else is `Unknown`.
    pub fn classify(&self, error: &ActionError, dependency: Dependency) -> ClassifiedError {
        let transient = error
            .transient
            .unwrap_or_else(|| self.is_transient_message(&error.message));

        let kind = match error.kind {
            Some(kind) => kind,
            None if transient => dependency.transient_kind(),
            None => ErrorKind::Unknown,
        };

        ClassifiedError {
            kind,
            message: error.message.clone(),
            transient,
            retry_after: error.retry_after,
            detail: error.detail.clone(),
        }
    }

    fn is_transient_message(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.patterns.iter().any(|p| message.contains(p.as_str()))
    }
}
