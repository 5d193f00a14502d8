//! adpulse job orchestrator.
//!
//! Composes the trigger scheduler, the workflow engine and health
//! aggregation behind one [`Orchestrator`] facade, configured from the
//! environment.

pub mod app;
pub mod config;
pub mod error;

pub use app::{HEARTBEAT_ENTRY_ID, Orchestrator};
pub use config::{HealthConfig, OrchestratorConfig, SchedulerConfig};
pub use error::OrchestratorError;
