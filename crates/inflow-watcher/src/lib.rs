//! inflow-watcher: per-source poll loops with activity-aware scheduling,
//! incremental-sync checkpoints, and one-shot full-resync recovery.

pub mod calendar;
pub mod drive;
pub mod mail;
pub mod scheduler;
pub mod watcher;

pub use inflow_core::types;
