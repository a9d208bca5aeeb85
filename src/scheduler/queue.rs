//! Lane queue items
//!
//! Items are type-erased jobs ordered by priority (descending), then
//! enqueue time and submission sequence (ascending).

use std::cmp::Ordering;
use std::fmt;

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::error::Result;

/// Outcome of a settled job. `deliver` hands the result to the waiting
/// caller and is invoked after the lane bookkeeping is updated.
pub(crate) struct Completion {
    pub success: bool,
    pub deliver: Box<dyn FnOnce() + Send>,
}

/// A queued unit of work. Called with `Ok(())` to run it, or with the
/// rejection to deliver instead of running.
pub(crate) type Job = Box<dyn FnOnce(Result<()>) -> BoxFuture<'static, Completion> + Send>;

pub(crate) struct QueueItem {
    pub priority: u8,
    pub enqueued_at: Instant,
    pub seq: u64,
    pub user_id: String,
    pub job: Job,
}

impl fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueItem")
            .field("priority", &self.priority)
            .field("enqueued_at", &self.enqueued_at)
            .field("seq", &self.seq)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap pops the greatest item first.
impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
