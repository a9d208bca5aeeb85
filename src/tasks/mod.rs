//! Background Tasks Module
//!
//! Periodic sweeps that keep component state bounded.
//!
//! # Tasks
//! - Cache expiry sweep: removes entries whose TTL has elapsed
//! - Rate window reclaim: drops limiter keys with no recent activity
//! - Cooldown sweep: forgets elapsed per-user cooldowns

mod sweep;

pub use sweep::{spawn_sweep_task, SweepHandle};
