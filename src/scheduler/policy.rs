//! Per-operation scheduling policy

use std::time::Duration;

use serde::Serialize;

/// Default bound on items waiting in one operation's queue.
pub const DEFAULT_MAX_QUEUE: usize = 100;

/// Scheduling settings for one operation name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationPolicy {
    /// Higher runs first
    pub priority: u8,
    /// Per-user wait after a command settles
    #[serde(serialize_with = "serialize_millis")]
    pub cooldown: Duration,
    /// Items of this operation running at once
    pub max_concurrent: usize,
    /// Items allowed to wait before submissions are rejected
    pub max_queue: usize,
}

impl Default for OperationPolicy {
    fn default() -> Self {
        Self {
            priority: 2,
            cooldown: Duration::from_secs(3),
            max_concurrent: 5,
            max_queue: DEFAULT_MAX_QUEUE,
        }
    }
}

impl OperationPolicy {
    /// Interactive lookups that should jump ahead of everything else.
    pub fn high() -> Self {
        Self {
            priority: 5,
            ..Self::default()
        }
    }

    /// Expensive exclusive work: one at a time, long per-user cooldown.
    pub fn heavy() -> Self {
        Self {
            priority: 1,
            cooldown: Duration::from_secs(300),
            max_concurrent: 1,
            ..Self::default()
        }
    }

    /// Looks up a preset by name (`high`, `default`, `heavy`).
    pub fn preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::high()),
            "default" => Some(Self::default()),
            "heavy" => Some(Self::heavy()),
            _ => None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Clamped to at least one so a lane can always make progress.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(crate::clock::millis(*duration))
}
