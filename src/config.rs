//! Configuration Module
//!
//! Handles loading gateway configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::executor::{BreakerConfig, ExecuteOptions};
use crate::scheduler::OperationPolicy;

/// Gateway configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries the cache can hold
    pub cache_max_entries: usize,
    /// TTL in milliseconds for entries stored without an explicit TTL
    pub cache_default_ttl_ms: u64,
    /// Expired-entry sweep interval in milliseconds
    pub cache_sweep_interval_ms: u64,
    /// Idle rate window reclaim interval in milliseconds
    pub limiter_sweep_interval_ms: u64,
    /// Quiet time in milliseconds after which a rate window is reclaimed
    pub limiter_idle_ms: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_success_threshold: u32,
    pub breaker_reset_timeout_ms: u64,
    /// Retries after the first attempt
    pub retry_max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Per-attempt timeout in milliseconds
    pub attempt_timeout_ms: u64,
    /// Elapsed cooldown reclaim interval in milliseconds
    pub scheduler_sweep_interval_ms: u64,
    /// Per-operation scheduling presets
    pub operation_policies: Vec<(String, OperationPolicy)>,
    /// Admin API port
    pub server_port: u16,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_ENTRIES` (default: 1000)
    /// - `CACHE_DEFAULT_TTL_MS` (default: 300000)
    /// - `CACHE_SWEEP_INTERVAL_MS` (default: 60000)
    /// - `LIMITER_SWEEP_INTERVAL_MS` (default: 60000)
    /// - `LIMITER_IDLE_MS` (default: 300000)
    /// - `BREAKER_FAILURE_THRESHOLD` (default: 5)
    /// - `BREAKER_SUCCESS_THRESHOLD` (default: 3)
    /// - `BREAKER_RESET_TIMEOUT_MS` (default: 60000)
    /// - `RETRY_MAX_RETRIES` (default: 3)
    /// - `RETRY_BASE_DELAY_MS` (default: 1000)
    /// - `RETRY_MAX_DELAY_MS` (default: 30000)
    /// - `ATTEMPT_TIMEOUT_MS` (default: 10000)
    /// - `SCHEDULER_SWEEP_INTERVAL_MS` (default: 60000)
    /// - `OPERATION_POLICIES` - e.g. `search=high,import=heavy` (default: empty)
    /// - `SERVER_PORT` (default: 3000)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a Config from any key lookup. Unparseable values fall back to
    /// the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str, default| parse_or(&lookup, key, default);

        Self {
            cache_max_entries: get("CACHE_MAX_ENTRIES", defaults.cache_max_entries as u64) as usize,
            cache_default_ttl_ms: get("CACHE_DEFAULT_TTL_MS", defaults.cache_default_ttl_ms),
            cache_sweep_interval_ms: get("CACHE_SWEEP_INTERVAL_MS", defaults.cache_sweep_interval_ms),
            limiter_sweep_interval_ms: get(
                "LIMITER_SWEEP_INTERVAL_MS",
                defaults.limiter_sweep_interval_ms,
            ),
            limiter_idle_ms: get("LIMITER_IDLE_MS", defaults.limiter_idle_ms),
            breaker_failure_threshold: parse_or(
                &lookup,
                "BREAKER_FAILURE_THRESHOLD",
                defaults.breaker_failure_threshold,
            ),
            breaker_success_threshold: parse_or(
                &lookup,
                "BREAKER_SUCCESS_THRESHOLD",
                defaults.breaker_success_threshold,
            ),
            breaker_reset_timeout_ms: get(
                "BREAKER_RESET_TIMEOUT_MS",
                defaults.breaker_reset_timeout_ms,
            ),
            retry_max_retries: parse_or(&lookup, "RETRY_MAX_RETRIES", defaults.retry_max_retries),
            retry_base_delay_ms: get("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms),
            retry_max_delay_ms: get("RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms),
            attempt_timeout_ms: get("ATTEMPT_TIMEOUT_MS", defaults.attempt_timeout_ms),
            scheduler_sweep_interval_ms: get(
                "SCHEDULER_SWEEP_INTERVAL_MS",
                defaults.scheduler_sweep_interval_ms,
            ),
            operation_policies: lookup("OPERATION_POLICIES")
                .map(|raw| parse_policies(&raw))
                .unwrap_or_default(),
            server_port: parse_or(&lookup, "SERVER_PORT", defaults.server_port),
        }
    }

    pub fn cache_default_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_default_ttl_ms)
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sweep_interval_ms)
    }

    pub fn limiter_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.limiter_sweep_interval_ms)
    }

    pub fn limiter_idle(&self) -> Duration {
        Duration::from_millis(self.limiter_idle_ms)
    }

    pub fn scheduler_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_sweep_interval_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker_failure_threshold,
            success_threshold: self.breaker_success_threshold,
            reset_timeout: Duration::from_millis(self.breaker_reset_timeout_ms),
        }
    }

    /// Default per-call options for commands that do not set their own.
    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions::default()
            .with_max_retries(self.retry_max_retries)
            .with_base_delay(Duration::from_millis(self.retry_base_delay_ms))
            .with_attempt_timeout(Duration::from_millis(self.attempt_timeout_ms))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_max_entries: 1000,
            cache_default_ttl_ms: 300_000,
            cache_sweep_interval_ms: 60_000,
            limiter_sweep_interval_ms: 60_000,
            limiter_idle_ms: 300_000,
            breaker_failure_threshold: 5,
            breaker_success_threshold: 3,
            breaker_reset_timeout_ms: 60_000,
            retry_max_retries: 3,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            attempt_timeout_ms: 10_000,
            scheduler_sweep_interval_ms: 60_000,
            operation_policies: Vec::new(),
            server_port: 3000,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Ignoring unparseable setting");
            default
        }),
        None => default,
    }
}

/// Parses `operation=preset` pairs separated by commas. Unknown presets and
/// malformed pairs are skipped.
fn parse_policies(raw: &str) -> Vec<(String, OperationPolicy)> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let parsed = pair.split_once('=').and_then(|(operation, preset)| {
                let operation = operation.trim();
                if operation.is_empty() {
                    return None;
                }
                OperationPolicy::preset(preset).map(|policy| (operation.to_string(), policy))
            });
            if parsed.is_none() {
                warn!(entry = pair, "Ignoring invalid operation policy");
            }
            parsed
        })
        .collect()
}
