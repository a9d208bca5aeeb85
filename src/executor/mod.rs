//! Resilient Executor Module
//!
//! Runs caller-supplied actions under a per-attempt timeout, retries
//! retryable failures with exponential backoff, and guards every operation
//! name with its own circuit breaker.

mod backoff;
mod circuit;

pub use backoff::{BackoffPolicy, BACKOFF_MULTIPLIER, MAX_JITTER};
pub use circuit::{BreakerConfig, CircuitSnapshot, CircuitState, CircuitStatus, Transition};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::classifier::{ActionError, ClassifiedError, Dependency, ErrorClassifier};
use crate::error::{GateError, Result};
use crate::metrics::Metrics;

// == Execute Options ==
/// Per-call retry and timeout settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteOptions {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff before the first retry
    pub base_delay: Duration,
    /// Hard limit for a single attempt
    pub attempt_timeout: Duration,
    /// Context used to classify untagged transient failures
    pub dependency: Dependency,
    /// Optional budget across all attempts and backoff waits
    pub deadline: Option<Duration>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            attempt_timeout: Duration::from_secs(10),
            dependency: Dependency::ExternalService,
            deadline: None,
        }
    }
}

impl ExecuteOptions {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependency = dependency;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

// == Resilient Executor ==
/// Circuit breaker + retry + timeout around arbitrary async actions.
///
/// Circuit state lives in a sharded map with one mutex per operation name;
/// the mutex is held only while reading or updating the state, never while
/// the action runs.
#[derive(Debug)]
pub struct ResilientExecutor {
    circuits: DashMap<String, Arc<Mutex<CircuitState>>>,
    breaker: BreakerConfig,
    overrides: DashMap<String, BreakerConfig>,
    max_delay: Duration,
    classifier: ErrorClassifier,
    metrics: Metrics,
}

impl ResilientExecutor {
    pub fn new(breaker: BreakerConfig, max_delay: Duration, metrics: Metrics) -> Self {
        Self {
            circuits: DashMap::new(),
            breaker,
            overrides: DashMap::new(),
            max_delay,
            classifier: ErrorClassifier::default(),
            metrics,
        }
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Uses `config` instead of the default breaker settings for `operation`.
    pub fn configure_breaker(&self, operation: &str, config: BreakerConfig) {
        self.overrides.insert(operation.to_string(), config);
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    // == Execute ==
    /// Runs `action` for `operation` with breaker protection, per-attempt
    /// timeout and retries.
    ///
    /// Circuit state is re-checked before every attempt, so a breaker that
    /// opens during a backoff wait cancels the remaining retries.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        mut action: F,
        options: &ExecuteOptions,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ActionError>>,
    {
        let circuit = self.circuit(operation);
        let breaker = self.breaker_config(operation);
        let backoff = BackoffPolicy::new(options.base_delay, self.max_delay);
        let attempt_event = format!("executor.attempt.{}", operation);
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.admit(operation, &circuit, &breaker).await?;

            let attempt_started = Instant::now();
            let outcome = match tokio::time::timeout(options.attempt_timeout, action()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ActionError::timeout(options.attempt_timeout)),
            };
            let elapsed = attempt_started.elapsed();

            let error = match outcome {
                Ok(value) => {
                    self.metrics.record(&attempt_event, elapsed, true);
                    self.on_success(operation, &circuit, &breaker).await;
                    if attempt > 1 {
                        debug!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    self.metrics.record(&attempt_event, elapsed, false);
                    self.classifier.classify(&error, options.dependency)
                }
            };

            if error.trips_breaker() {
                self.on_failure(operation, &circuit, &breaker).await;
            }

            if !error.is_retryable() {
                debug!(operation, attempt, kind = %error.kind, "Non-retryable failure");
                return Err(error.into());
            }
            if attempt > options.max_retries {
                warn!(
                    operation,
                    attempts = attempt,
                    "Max retries exceeded. Last error: {}",
                    error
                );
                return Err(error.into());
            }

            let delay = retry_delay(&backoff, attempt, &error);
            if let Some(deadline) = options.deadline {
                if started.elapsed().saturating_add(delay) >= deadline {
                    warn!(operation, attempt, ?deadline, "Deadline reached, giving up");
                    return Err(error.into());
                }
            }

            warn!(
                operation,
                attempt,
                "Attempt failed: {}. Retrying in {:?}",
                error,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    // == Circuit Inspection ==
    /// Snapshot of one circuit, if it has been used.
    pub async fn circuit_snapshot(&self, operation: &str) -> Option<CircuitSnapshot> {
        let circuit = self.circuits.get(operation).map(|c| c.clone())?;
        let breaker = self.breaker_config(operation);
        let state = circuit.lock().await;
        Some(state.snapshot(operation, &breaker, Instant::now()))
    }

    /// Snapshots of all circuits, sorted by operation name.
    pub async fn circuits(&self) -> Vec<CircuitSnapshot> {
        let mut names: Vec<String> = self.circuits.iter().map(|c| c.key().clone()).collect();
        names.sort();

        let mut snapshots = Vec::with_capacity(names.len());
        for name in names {
            if let Some(snapshot) = self.circuit_snapshot(&name).await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    /// Forces the circuit of `operation` back to a fresh Closed state.
    ///
    /// The state is reset in place, so calls already in flight observe the
    /// reset on their next attempt. Returns false if the operation was never
    /// used.
    pub async fn reset_circuit(&self, operation: &str) -> bool {
        let Some(circuit) = self.circuits.get(operation).map(|c| c.clone()) else {
            return false;
        };
        let mut state = circuit.lock().await;
        let previous = state.status();
        *state = CircuitState::new();
        info!(operation, "Circuit reset from {:?} to Closed", previous);
        true
    }

    fn circuit(&self, operation: &str) -> Arc<Mutex<CircuitState>> {
        self.circuits
            .entry(operation.to_string())
            .or_default()
            .clone()
    }

    fn breaker_config(&self, operation: &str) -> BreakerConfig {
        self.overrides
            .get(operation)
            .map(|c| c.clone())
            .unwrap_or_else(|| self.breaker.clone())
    }

    async fn admit(
        &self,
        operation: &str,
        circuit: &Mutex<CircuitState>,
        breaker: &BreakerConfig,
    ) -> Result<()> {
        let mut state = circuit.lock().await;
        match state.try_acquire(breaker, Instant::now()) {
            Ok(Some(transition)) => {
                info!(operation, "Circuit {:?} -> {:?}, admitting trial call", transition.from, transition.to);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(retry_after) => {
                debug!(operation, ?retry_after, "Circuit open, rejecting call");
                Err(GateError::CircuitOpen {
                    operation: operation.to_string(),
                    retry_after,
                })
            }
        }
    }

    async fn on_success(&self, operation: &str, circuit: &Mutex<CircuitState>, breaker: &BreakerConfig) {
        let mut state = circuit.lock().await;
        if let Some(transition) = state.on_success(breaker) {
            info!(operation, "Circuit {:?} -> {:?}", transition.from, transition.to);
        }
    }

    async fn on_failure(&self, operation: &str, circuit: &Mutex<CircuitState>, breaker: &BreakerConfig) {
        let mut state = circuit.lock().await;
        if let Some(transition) = state.on_failure(breaker, Instant::now()) {
            warn!(
                operation,
                failures = state.consecutive_failures(),
                "Circuit {:?} -> {:?}",
                transition.from,
                transition.to
            );
        }
    }
}

/// Backoff for the given attempt, never shorter than an upstream retry hint.
fn retry_delay(backoff: &BackoffPolicy, attempt: u32, error: &ClassifiedError) -> Duration {
    let delay = backoff.delay_for(attempt);
    match error.retry_after {
        Some(hint) => delay.max(hint),
        None => delay,
    }
}
