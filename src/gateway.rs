//! Gateway
//!
//! Wires the cache, rate limiter, executor and scheduler into a single entry
//! point for user commands.
//!
//! A command is queued on its operation's lane. When it runs it is answered
//! from the cache if possible, then checked against the user's rate limit,
//! then executed with breaker, retry and timeout protection. Successful
//! results are cached as JSON.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::classifier::ActionError;
use crate::config::Config;
use crate::error::Result;
use crate::executor::{ExecuteOptions, ResilientExecutor};
use crate::limiter::RateLimiter;
use crate::metrics::Metrics;
use crate::scheduler::{CommandHandle, CommandScheduler, OperationPolicy};

// == Command ==
/// Sliding-window limit applied per user and operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: usize,
    pub window: Duration,
}

/// Describes one user command.
#[derive(Debug, Clone)]
pub struct Command {
    pub operation: String,
    pub user_id: String,
    /// Results are cached under this key when set
    pub cache_key: Option<String>,
    /// Overrides the cache's default TTL
    pub cache_ttl: Option<Duration>,
    pub rate_limit: Option<RateLimit>,
    /// Overrides the gateway's default execute options
    pub options: Option<ExecuteOptions>,
    /// Overrides the operation's queue priority
    pub priority: Option<u8>,
}

impl Command {
    pub fn new(operation: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            user_id: user_id.into(),
            cache_key: None,
            cache_ttl: None,
            rate_limit: None,
            options: None,
            priority: None,
        }
    }

    pub fn cached(mut self, key: impl Into<String>, ttl: Option<Duration>) -> Self {
        self.cache_key = Some(key.into());
        self.cache_ttl = ttl;
        self
    }

    pub fn rate_limited(mut self, max_requests: usize, window: Duration) -> Self {
        self.rate_limit = Some(RateLimit {
            max_requests,
            window,
        });
        self
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    fn limit_key(&self) -> String {
        format!("{}:{}", self.user_id, self.operation)
    }
}

// == Gateway ==
#[derive(Debug)]
pub struct Gateway {
    config: Config,
    cache: Arc<Cache<Value>>,
    limiter: Arc<RateLimiter>,
    executor: Arc<ResilientExecutor>,
    scheduler: CommandScheduler,
    default_options: ExecuteOptions,
}

impl Gateway {
    /// Builds all components from `config`. Background sweeps are started
    /// separately with [`start`](Self::start).
    pub fn new(config: &Config, metrics: Metrics) -> Self {
        let cache = Cache::new(
            config.cache_max_entries,
            config.cache_default_ttl(),
            metrics.clone(),
        );
        let limiter = RateLimiter::new(config.limiter_idle());
        let executor = ResilientExecutor::new(
            config.breaker_config(),
            config.retry_max_delay(),
            metrics.clone(),
        );
        let scheduler = CommandScheduler::new(OperationPolicy::default(), metrics);
        for (operation, policy) in &config.operation_policies {
            scheduler.register(operation, policy.clone());
        }

        Self {
            config: config.clone(),
            cache: Arc::new(cache),
            limiter: Arc::new(limiter),
            executor: Arc::new(executor),
            scheduler,
            default_options: config.execute_options(),
        }
    }

    /// Spawns the cache, rate limiter and cooldown sweeps.
    pub fn start(&self) {
        self.cache.spawn_sweeper(self.config.cache_sweep_interval());
        self.limiter
            .spawn_sweeper(self.config.limiter_sweep_interval());
        self.scheduler
            .spawn_sweeper(self.config.scheduler_sweep_interval());
        info!("Gateway background sweeps started");
    }

    // == Run ==
    /// Queues `action` as `command`.
    ///
    /// Admission errors (`OnCooldown`, `QueueFull`) are returned immediately;
    /// everything else arrives through the handle.
    pub fn run<T, F, Fut>(&self, command: Command, action: F) -> Result<CommandHandle<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, ActionError>> + Send + 'static,
    {
        let cache = self.cache.clone();
        let limiter = self.limiter.clone();
        let executor = self.executor.clone();
        let options = command
            .options
            .clone()
            .unwrap_or_else(|| self.default_options.clone());
        let operation = command.operation.clone();
        let user_id = command.user_id.clone();
        let priority = command.priority;

        let job = move || run_command(cache, limiter, executor, command, options, action);

        match priority {
            Some(priority) => self
                .scheduler
                .submit_with_priority(&operation, &user_id, priority, job),
            None => self.scheduler.submit(&operation, &user_id, job),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Cache<Value> {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn executor(&self) -> &ResilientExecutor {
        &self.executor
    }

    pub fn scheduler(&self) -> &CommandScheduler {
        &self.scheduler
    }

    /// Stops every background sweep. Queued commands still run.
    pub fn shutdown(&self) {
        self.cache.shutdown();
        self.limiter.shutdown();
        self.scheduler.shutdown();
        info!("Gateway background sweeps stopped");
    }
}

async fn run_command<T, F, Fut>(
    cache: Arc<Cache<Value>>,
    limiter: Arc<RateLimiter>,
    executor: Arc<ResilientExecutor>,
    command: Command,
    options: ExecuteOptions,
    action: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, ActionError>>,
{
    if let Some(key) = &command.cache_key {
        if let Some(cached) = cache.get(key).await {
            match serde_json::from_value::<T>(cached) {
                Ok(value) => {
                    debug!(operation = %command.operation, key = %key, "Answered from cache");
                    return Ok(value);
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "Discarding cached value of unexpected shape");
                    cache.delete(key).await;
                }
            }
        }
    }

    if let Some(limit) = command.rate_limit {
        limiter.allow(&command.limit_key(), limit.max_requests, limit.window)?;
    }

    let value = executor
        .execute(&command.operation, action, &options)
        .await?;

    if let Some(key) = command.cache_key {
        match serde_json::to_value(&value) {
            Ok(json) => cache.set(key, json, command.cache_ttl).await,
            Err(err) => warn!(error = %err, "Result not cacheable"),
        }
    }
    Ok(value)
}
