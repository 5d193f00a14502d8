//! Health and metrics aggregation for the adpulse orchestrator.
//!
//! This crate provides:
//!
//! - **Probes**: liveness and error-rate contracts for external components
//! - **Error-rate tracker**: a rolling outcome window integrations can feed
//! - **Aggregator**: on-demand health reports and counter snapshots

pub mod aggregator;
pub mod probe;
pub mod report;
pub mod tracker;

pub use aggregator::{HealthAggregator, SCHEDULER_COMPONENT};
pub use probe::{ErrorRateProbe, LivenessProbe};
pub use report::{
    DEGRADED_ERROR_RATE, HealthReport, HealthStatus, JobHealth, MetricsSnapshot, ProbeHealth,
    UNHEALTHY_ERROR_RATE,
};
pub use tracker::ErrorRateTracker;
