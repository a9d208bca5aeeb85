//! Command Scheduler Module
//!
//! Admission control for user commands. Each operation name gets a lane: a
//! priority queue, a running count bounded by the operation's concurrency
//! cap, and a per-user cooldown table. A lane is drained by at most one
//! work loop at a time; the loop exits when the queue is empty and is
//! restarted by the next submission.

mod policy;
mod queue;

pub use policy::{OperationPolicy, DEFAULT_MAX_QUEUE};

use std::collections::{BinaryHeap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clock::deadline_after;
use crate::error::{GateError, Result};
use crate::metrics::Metrics;
use crate::tasks::{spawn_sweep_task, SweepHandle};
use queue::{Completion, Job, QueueItem};

// == Command Handle ==
/// Deferred result of a submitted command.
///
/// Resolves once the command has run (or was rejected at dequeue time).
/// Dropping the handle does not cancel the command.
#[derive(Debug)]
pub struct CommandHandle<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for CommandHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(GateError::Cancelled)))
    }
}

// == Lane ==
#[derive(Debug)]
struct LaneState {
    policy: OperationPolicy,
    queue: BinaryHeap<QueueItem>,
    running: usize,
    /// user id -> instant the cooldown ends
    cooldowns: HashMap<String, Instant>,
    draining: bool,
    next_seq: u64,
}

impl LaneState {
    fn new(policy: OperationPolicy) -> Self {
        Self {
            policy,
            queue: BinaryHeap::new(),
            running: 0,
            cooldowns: HashMap::new(),
            draining: false,
            next_seq: 0,
        }
    }

    fn cooldown_remaining(&self, user_id: &str, now: Instant) -> Option<Duration> {
        self.cooldowns
            .get(user_id)
            .filter(|until| now < **until)
            .map(|until| *until - now)
    }
}

#[derive(Debug)]
struct Lane {
    state: Mutex<LaneState>,
    /// Signalled whenever a running item settles
    settled: Notify,
}

impl Lane {
    fn new(policy: OperationPolicy) -> Self {
        Self {
            state: Mutex::new(LaneState::new(policy)),
            settled: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LaneState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Queue and capacity view of one lane.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneSnapshot {
    pub operation: String,
    pub policy: OperationPolicy,
    pub queued: usize,
    pub running: usize,
    pub cooling_down: usize,
}

// == Scheduler ==
/// Per-operation priority queues with concurrency caps and user cooldowns.
#[derive(Debug)]
pub struct CommandScheduler {
    lanes: Arc<DashMap<String, Arc<Lane>>>,
    default_policy: OperationPolicy,
    metrics: Metrics,
    sweeper: SweepHandle,
}

impl CommandScheduler {
    pub fn new(default_policy: OperationPolicy, metrics: Metrics) -> Self {
        Self {
            lanes: Arc::new(DashMap::new()),
            default_policy,
            metrics,
            sweeper: SweepHandle::new(),
        }
    }

    /// Sets the policy for `operation`. Items already queued keep the
    /// priority they were submitted with.
    pub fn register(&self, operation: &str, policy: OperationPolicy) {
        let lane = self.lane(operation);
        lane.lock().policy = policy;
        // a raised cap can free capacity for waiting items
        lane.settled.notify_one();
    }

    pub fn policy(&self, operation: &str) -> OperationPolicy {
        match self.lanes.get(operation) {
            Some(lane) => lane.lock().policy.clone(),
            None => self.default_policy.clone(),
        }
    }

    // == Submit ==
    /// Queues `action` for `operation` on behalf of `user_id` at the
    /// operation's priority.
    ///
    /// Fails immediately with `OnCooldown` while the user's cooldown for the
    /// operation is running, or `QueueFull` when the lane is at capacity. In
    /// both cases nothing is enqueued. Must be called within a tokio runtime.
    pub fn submit<T, F, Fut>(&self, operation: &str, user_id: &str, action: F) -> Result<CommandHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.enqueue(operation, user_id, None, action)
    }

    /// Like [`submit`](Self::submit) but overrides the operation's priority
    /// for this item.
    pub fn submit_with_priority<T, F, Fut>(
        &self,
        operation: &str,
        user_id: &str,
        priority: u8,
        action: F,
    ) -> Result<CommandHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.enqueue(operation, user_id, Some(priority), action)
    }

    fn enqueue<T, F, Fut>(
        &self,
        operation: &str,
        user_id: &str,
        priority: Option<u8>,
        action: F,
    ) -> Result<CommandHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let lane = self.lane(operation);
        let (tx, rx) = oneshot::channel();

        let start_drain = {
            let mut state = lane.lock();
            let now = Instant::now();

            if let Some(remaining) = state.cooldown_remaining(user_id, now) {
                debug!(operation, user_id, ?remaining, "Rejected, user on cooldown");
                return Err(GateError::OnCooldown {
                    operation: operation.to_string(),
                    remaining,
                });
            }
            if state.queue.len() >= state.policy.max_queue {
                warn!(operation, capacity = state.policy.max_queue, "Rejected, queue full");
                return Err(GateError::QueueFull {
                    operation: operation.to_string(),
                    capacity: state.policy.max_queue,
                });
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            let priority = priority.unwrap_or(state.policy.priority);
            state.queue.push(QueueItem {
                priority,
                enqueued_at: now,
                seq,
                user_id: user_id.to_string(),
                job: into_job(action, tx),
            });

            let start = !state.draining;
            state.draining = true;
            start
        };

        if start_drain {
            tokio::spawn(drain(operation.to_string(), lane, self.metrics.clone()));
        }
        Ok(CommandHandle { rx })
    }

    // == Status ==
    /// Lanes sorted by operation name.
    pub fn snapshot(&self) -> Vec<LaneSnapshot> {
        let now = Instant::now();
        let mut lanes: Vec<LaneSnapshot> = self
            .lanes
            .iter()
            .map(|entry| {
                let state = entry.value().lock();
                LaneSnapshot {
                    operation: entry.key().clone(),
                    policy: state.policy.clone(),
                    queued: state.queue.len(),
                    running: state.running,
                    cooling_down: state.cooldowns.values().filter(|until| now < **until).count(),
                }
            })
            .collect();
        lanes.sort_by(|a, b| a.operation.cmp(&b.operation));
        lanes
    }

    /// Remaining cooldown of `user_id` for `operation`, if any.
    pub fn cooldown_remaining(&self, operation: &str, user_id: &str) -> Option<Duration> {
        let lane = self.lanes.get(operation)?;
        let remaining = lane.lock().cooldown_remaining(user_id, Instant::now());
        remaining
    }

    // == Reclaim ==
    /// Forgets elapsed cooldowns. Returns the number removed.
    pub fn sweep_cooldowns(&self) -> usize {
        sweep_lanes(&self.lanes)
    }

    /// Starts the periodic reclaim of elapsed cooldowns.
    pub fn spawn_sweeper(&self, interval: Duration) {
        let lanes = self.lanes.clone();
        let handle = spawn_sweep_task("scheduler_cooldowns", interval, move || {
            let removed = sweep_lanes(&lanes);
            async move { removed }
        });
        self.sweeper.install(handle);
    }

    pub fn shutdown(&self) {
        if self.sweeper.cancel() {
            debug!("Scheduler cooldown sweep stopped");
        }
    }

    fn lane(&self, operation: &str) -> Arc<Lane> {
        self.lanes
            .entry(operation.to_string())
            .or_insert_with(|| Arc::new(Lane::new(self.default_policy.clone())))
            .clone()
    }
}

fn sweep_lanes(lanes: &DashMap<String, Arc<Lane>>) -> usize {
    let now = Instant::now();
    lanes
        .iter()
        .map(|entry| {
            let mut state = entry.value().lock();
            let before = state.cooldowns.len();
            state.cooldowns.retain(|_, until| now < *until);
            before - state.cooldowns.len()
        })
        .sum()
}

/// Erases the result type. A panicking action is reported to its own caller
/// as an internal error.
fn into_job<T, F, Fut>(action: F, tx: oneshot::Sender<Result<T>>) -> Job
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    Box::new(move |admission: Result<()>| {
        async move {
            let outcome = match admission {
                Ok(()) => AssertUnwindSafe(async move { action().await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(GateError::Internal("command panicked".to_string()))),
                Err(rejection) => Err(rejection),
            };
            Completion {
                success: outcome.is_ok(),
                deliver: Box::new(move || {
                    // receiver gone: caller stopped waiting
                    let _ = tx.send(outcome);
                }),
            }
        }
        .boxed()
    })
}

enum Step {
    Run(QueueItem),
    Reject(QueueItem, GateError),
    Wait,
    Done,
}

// == Drain Loop ==
/// Single consumer of one lane. Starts items while capacity is free and
/// exits once the queue is empty.
async fn drain(operation: String, lane: Arc<Lane>, metrics: Metrics) {
    let complete_event = format!("scheduler.complete.{}", operation);

    loop {
        let step = {
            let mut state = lane.lock();
            if state.queue.is_empty() {
                state.draining = false;
                Step::Done
            } else if state.running >= state.policy.max_concurrent {
                Step::Wait
            } else {
                match state.queue.pop() {
                    None => Step::Wait,
                    Some(item) => {
                        match state.cooldown_remaining(&item.user_id, Instant::now()) {
                            // an earlier item of the same user settled while this one waited
                            Some(remaining) => Step::Reject(
                                item,
                                GateError::OnCooldown {
                                    operation: operation.clone(),
                                    remaining,
                                },
                            ),
                            None => {
                                state.running += 1;
                                Step::Run(item)
                            }
                        }
                    }
                }
            }
        };

        match step {
            Step::Done => return,
            Step::Wait => lane.settled.notified().await,
            Step::Reject(item, rejection) => {
                debug!(operation = %operation, user_id = %item.user_id, "Dequeued item rejected, user on cooldown");
                let completion = (item.job)(Err(rejection)).await;
                (completion.deliver)();
            }
            Step::Run(item) => {
                let lane = lane.clone();
                let metrics = metrics.clone();
                let event = complete_event.clone();
                let operation = operation.clone();
                tokio::spawn(async move {
                    let started = Instant::now();
                    let waited = started.saturating_duration_since(item.enqueued_at);
                    debug!(operation = %operation, user_id = %item.user_id, ?waited, "Starting command");

                    let completion = (item.job)(Ok(())).await;
                    metrics.record(&event, started.elapsed(), completion.success);

                    let settled_at = Instant::now();
                    {
                        let mut state = lane.lock();
                        let until = deadline_after(settled_at, state.policy.cooldown);
                        state.running = state.running.saturating_sub(1);
                        state.cooldowns.insert(item.user_id, until);
                    }
                    if !completion.success {
                        debug!(operation = %operation, "Command failed");
                    }
                    (completion.deliver)();
                    lane.settled.notify_one();
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InMemorySink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scheduler() -> CommandScheduler {
        CommandScheduler::new(OperationPolicy::default(), Metrics::noop())
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_one_runs_sequentially() {
        let scheduler = scheduler();
        scheduler.register("import", OperationPolicy::heavy());
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for user in ["alice", "bob"] {
            let log = log.clone();
            handles.push(
                scheduler
                    .submit("import", user, move || async move {
                        log.lock().unwrap().push(format!("start {}", user));
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        log.lock().unwrap().push(format!("end {}", user));
                        Ok(user)
                    })
                    .unwrap(),
            );
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start alice", "end alice", "start bob", "end bob"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_rejects_without_enqueueing() {
        let scheduler = scheduler();

        let value = scheduler
            .submit("search", "u1", || async { Ok(42) })
            .unwrap()
            .await
            .unwrap();
        assert_eq!(value, 42);

        let err = scheduler
            .submit("search", "u1", || async { Ok(0) })
            .unwrap_err();
        match err {
            GateError::OnCooldown { remaining, .. } => assert!(remaining > Duration::ZERO),
            other => panic!("expected cooldown, got {:?}", other),
        }
        assert_eq!(scheduler.snapshot()[0].queued, 0);

        // other users are unaffected
        assert!(scheduler.submit("search", "u2", || async { Ok(1) }).is_ok());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(scheduler.cooldown_remaining("search", "u1").is_none());
        assert!(scheduler.submit("search", "u1", || async { Ok(2) }).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_is_respected() {
        let scheduler = scheduler();
        scheduler.register(
            "render",
            OperationPolicy::default()
                .with_max_concurrent(2)
                .with_cooldown(Duration::ZERO),
        );
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            handles.push(
                scheduler
                    .submit("render", &format!("user-{}", i), move || async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap(),
            );
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_order_when_capacity_frees() {
        let scheduler = scheduler();
        scheduler.register("x", OperationPolicy::default().with_max_concurrent(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        // occupies the only slot while the others queue up
        let blocker = scheduler
            .submit("x", "blocker", || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            })
            .unwrap();
        tokio::task::yield_now().await;

        let mut handles = Vec::new();
        for (user, priority) in [("low", 1u8), ("high", 5), ("mid", 2), ("high-2", 5)] {
            let order = order.clone();
            handles.push(
                scheduler
                    .submit_with_priority("x", user, priority, move || async move {
                        order.lock().unwrap().push(user);
                        Ok(())
                    })
                    .unwrap(),
            );
        }

        blocker.await.unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["high", "high-2", "mid", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_only_reaches_its_caller() {
        let scheduler = scheduler();

        let failing = scheduler
            .submit("op", "a", || async {
                Err::<u32, _>(GateError::Internal("exploded".to_string()))
            })
            .unwrap();
        let ok = scheduler.submit("op", "b", || async { Ok(1u32) }).unwrap();
        let panicking = scheduler
            .submit("op", "c", || async {
                if true {
                    panic!("bug in command");
                }
                Ok(0u32)
            })
            .unwrap();

        assert!(matches!(failing.await, Err(GateError::Internal(_))));
        assert_eq!(ok.await.unwrap(), 1);
        assert!(matches!(panicking.await, Err(GateError::Internal(msg)) if msg.contains("panicked")));

        // the lane keeps working after a failure
        let next = scheduler.submit("op", "d", || async { Ok(2u32) }).unwrap();
        assert_eq!(next.await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_full() {
        let scheduler = scheduler();
        scheduler.register(
            "bulk",
            OperationPolicy::default().with_max_concurrent(1).with_max_queue(2),
        );

        let mut handles = Vec::new();
        for user in ["a", "b", "c"] {
            handles.push(
                scheduler
                    .submit("bulk", user, || async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok(())
                    })
                    .unwrap(),
            );
            // let the drain loop start the first item
            tokio::task::yield_now().await;
        }

        let err = scheduler
            .submit("bulk", "d", || async { Ok(()) })
            .unwrap_err();
        assert!(matches!(err, GateError::QueueFull { capacity: 2, .. }));

        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_item_rechecks_cooldown() {
        let scheduler = scheduler();
        scheduler.register("x", OperationPolicy::default().with_max_concurrent(1));

        let first = scheduler
            .submit("x", "same", || async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(1)
            })
            .unwrap();
        let second = scheduler.submit("x", "same", || async { Ok(2) }).unwrap();

        assert_eq!(first.await.unwrap(), 1);
        assert!(matches!(second.await, Err(GateError::OnCooldown { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_cooldown_keeps_lane_draining() {
        let scheduler = scheduler();
        scheduler.register(
            "archive",
            OperationPolicy::default()
                .with_max_concurrent(1)
                .with_cooldown(Duration::MAX),
        );

        let first = scheduler.submit("archive", "a", || async { Ok(1) }).unwrap();
        let second = scheduler.submit("archive", "b", || async { Ok(2) }).unwrap();

        assert_eq!(first.await.unwrap(), 1);
        let second = tokio::time::timeout(Duration::from_secs(2), second)
            .await
            .expect("queued item settles");
        assert_eq!(second.unwrap(), 2);

        let lane = &scheduler.snapshot()[0];
        assert_eq!((lane.queued, lane.running, lane.cooling_down), (0, 0, 2));
        assert!(scheduler.cooldown_remaining("archive", "a").unwrap() > Duration::from_secs(86_400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_lane_does_not_block_other_operations() {
        let scheduler = scheduler();
        scheduler.register("slow", OperationPolicy::heavy());

        let slow: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|user| {
                scheduler
                    .submit("slow", user, || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(())
                    })
                    .unwrap()
            })
            .collect();
        tokio::task::yield_now().await;

        let fast = scheduler.submit("fast", "a", || async { Ok("done") }).unwrap();
        let value = tokio::time::timeout(Duration::from_secs(1), fast)
            .await
            .expect("fast lane is not held up by slow");
        assert_eq!(value.unwrap(), "done");

        let slow_lane = scheduler
            .snapshot()
            .into_iter()
            .find(|lane| lane.operation == "slow")
            .unwrap();
        assert_eq!(slow_lane.running, 1);
        assert_eq!(slow_lane.queued, 2);
        drop(slow);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_and_metrics() {
        let sink = Arc::new(InMemorySink::new());
        let scheduler = CommandScheduler::new(OperationPolicy::default(), Metrics::new(sink.clone()));

        scheduler.submit("op", "a", || async { Ok(()) }).unwrap().await.unwrap();
        scheduler
            .submit("op", "b", || async { Err::<(), _>(GateError::Internal("x".to_string())) })
            .unwrap()
            .await
            .unwrap_err();

        let stats = sink.get("scheduler.complete.op").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.failures, 1);

        assert_eq!(scheduler.sweep_cooldowns(), 0);
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(scheduler.sweep_cooldowns(), 2);
        assert_eq!(scheduler.snapshot()[0].cooling_down, 0);
    }
}
