//! Recurring-trigger scheduler for adpulse jobs.
//!
//! This crate provides:
//!
//! - **Triggers**: cron-like and fixed-interval fire time computation
//! - **Scheduled entries**: a unit of work bound to a trigger and its limits
//! - **Scheduler**: the background loop, worker pool, coalescing, misfire
//!   handling and single-instance enforcement

pub mod entry;
pub mod error;
pub mod scheduler;
pub mod trigger;

pub use entry::{EntrySnapshot, ScheduledEntry};
pub use error::SchedulerError;
pub use scheduler::{SchedulerOptions, SchedulerStats, TriggerScheduler};
pub use trigger::{CronField, CronSpec, Trigger};
