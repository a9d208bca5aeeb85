//! Periodic Sweep Task
//!
//! Background task that periodically reclaims stale state (expired cache
//! entries, idle rate windows, elapsed cooldowns). Each task is owned by the
//! component that spawned it through a [`SweepHandle`].

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Spawns a background task that calls `sweep` every `interval`.
///
/// `sweep` returns the number of items it removed, which is logged.
///
/// # Example
/// ```ignore
/// let handle = spawn_sweep_task("cache", Duration::from_secs(60), move || {
///     let store = store.clone();
///     async move { sweep_expired(&store).await }
/// });
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_sweep_task<F, Fut>(name: &'static str, interval: Duration, mut sweep: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = usize> + Send + 'static,
{
    tokio::spawn(async move {
        info!(task = name, "Starting sweep task with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let removed = sweep().await;

            if removed > 0 {
                info!(task = name, "Sweep removed {} stale entries", removed);
            } else {
                debug!(task = name, "Sweep found nothing to remove");
            }
        }
    })
}

// == Sweep Handle ==
/// Owns at most one running sweep task.
#[derive(Debug, Default)]
pub struct SweepHandle {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SweepHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `handle`, aborting any task installed earlier.
    pub fn install(&self, handle: JoinHandle<()>) {
        let previous = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Aborts the task. Returns false if nothing was running.
    pub fn cancel(&self) -> bool {
        match self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_sweep_runs_every_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let handle = spawn_sweep_task("test", Duration::from_secs(1), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                0
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        handle.abort();
    }

    #[tokio::test]
    async fn test_cancel_stops_task() {
        let sweeper = SweepHandle::new();
        sweeper.install(spawn_sweep_task("test", Duration::from_secs(1), || async { 0 }));
        assert!(sweeper.is_running());

        assert!(sweeper.cancel());
        assert!(!sweeper.is_running());
        assert!(!sweeper.cancel(), "second cancel has nothing to stop");
    }

    #[tokio::test]
    async fn test_install_replaces_previous() {
        let sweeper = SweepHandle::new();
        let first = spawn_sweep_task("first", Duration::from_secs(1), || async { 0 });
        let abort = first.abort_handle();
        sweeper.install(first);
        sweeper.install(spawn_sweep_task("second", Duration::from_secs(1), || async { 0 }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(abort.is_finished(), "first task should have been aborted");
        assert!(sweeper.is_running());
    }
}
