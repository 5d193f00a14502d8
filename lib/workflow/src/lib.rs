//! Workflow engine for adpulse jobs.
//!
//! This crate provides:
//!
//! - **Job records**: the idle/running/completed/failed state machine
//! - **Workflows**: ordered job lists with a failure policy
//! - **Engine**: registries plus the dependency-checked sequential runner

pub mod definition;
pub mod engine;
pub mod error;
pub mod job;
pub mod result;

pub use definition::{FailurePolicy, Workflow};
pub use engine::WorkflowEngine;
pub use error::WorkflowError;
pub use job::{JobRecord, JobSnapshot, JobStatus};
pub use result::{JobOutcome, JobRunResult, WorkflowResult};
