//! Circuit Breaker State Machine
//!
//! One [`CircuitState`] per operation name. Transitions only along
//! Closed -> Open -> HalfOpen -> (Closed | Open).

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::clock::millis;

/// State of a circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    /// Requests pass through
    Closed,
    /// Requests fail immediately until the reset timeout elapses
    Open,
    /// Trial requests decide whether the dependency recovered
    HalfOpen,
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    /// How long a circuit stays open before allowing a trial
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// A state change, returned so the caller can log it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CircuitStatus,
    pub to: CircuitStatus,
}

/// Breaker bookkeeping for one operation.
#[derive(Debug, Clone)]
pub struct CircuitState {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_successes: u32,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitState {
    pub fn new() -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_successes: 0,
        }
    }

    pub fn status(&self) -> CircuitStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn half_open_successes(&self) -> u32 {
        self.half_open_successes
    }

    // == Admission ==
    /// Decides whether a call may proceed at `now`.
    ///
    /// An open circuit whose reset timeout has elapsed moves to HalfOpen and
    /// admits the call as a trial. Otherwise an open circuit rejects with the
    /// time left until the next trial.
    pub fn try_acquire(
        &mut self,
        config: &BreakerConfig,
        now: Instant,
    ) -> Result<Option<Transition>, Duration> {
        match self.status {
            CircuitStatus::Closed | CircuitStatus::HalfOpen => Ok(None),
            CircuitStatus::Open => {
                let opened_at = self.opened_at.unwrap_or(now);
                let open_for = now.saturating_duration_since(opened_at);
                if open_for >= config.reset_timeout {
                    self.half_open_successes = 0;
                    Ok(Some(self.transition(CircuitStatus::HalfOpen)))
                } else {
                    Err(config.reset_timeout - open_for)
                }
            }
        }
    }

    // == Outcomes ==
    pub fn on_success(&mut self, config: &BreakerConfig) -> Option<Transition> {
        match self.status {
            CircuitStatus::Closed => {
                self.consecutive_failures = 0;
                None
            }
            CircuitStatus::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= config.success_threshold {
                    self.consecutive_failures = 0;
                    self.half_open_successes = 0;
                    self.opened_at = None;
                    Some(self.transition(CircuitStatus::Closed))
                } else {
                    None
                }
            }
            // a call admitted before another caller opened the circuit
            CircuitStatus::Open => None,
        }
    }

    pub fn on_failure(&mut self, config: &BreakerConfig, now: Instant) -> Option<Transition> {
        match self.status {
            CircuitStatus::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= config.failure_threshold {
                    self.opened_at = Some(now);
                    Some(self.transition(CircuitStatus::Open))
                } else {
                    None
                }
            }
            CircuitStatus::HalfOpen => {
                self.half_open_successes = 0;
                self.opened_at = Some(now);
                Some(self.transition(CircuitStatus::Open))
            }
            CircuitStatus::Open => None,
        }
    }

    /// Read-only view for status reporting.
    pub fn snapshot(&self, operation: &str, config: &BreakerConfig, now: Instant) -> CircuitSnapshot {
        let retry_after_ms = match (self.status, self.opened_at) {
            (CircuitStatus::Open, Some(opened_at)) => Some(millis(
                config
                    .reset_timeout
                    .saturating_sub(now.saturating_duration_since(opened_at)),
            )),
            _ => None,
        };

        CircuitSnapshot {
            operation: operation.to_string(),
            status: self.status,
            consecutive_failures: self.consecutive_failures,
            half_open_successes: self.half_open_successes,
            retry_after_ms,
        }
    }

    fn transition(&mut self, to: CircuitStatus) -> Transition {
        let from = self.status;
        debug_assert!(
            matches!(
                (from, to),
                (CircuitStatus::Closed, CircuitStatus::Open)
                    | (CircuitStatus::Open, CircuitStatus::HalfOpen)
                    | (CircuitStatus::HalfOpen, CircuitStatus::Closed)
                    | (CircuitStatus::HalfOpen, CircuitStatus::Open)
            ),
            "illegal circuit transition {:?} -> {:?}",
            from,
            to
        );
        self.status = to;
        Transition { from, to }
    }
}

/// Serializable view of one circuit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub operation: String,
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    /// Time until an open circuit admits a trial call
    pub retry_after_ms: Option<u64>,
}
