//! Error types for the workflow crate.
//!
//! Lookup and state machine failures are returned as
//! `rootcause::Report<WorkflowError>`. Failures raised by a job's own work are
//! not errors of the engine; they are recorded on the job and in the run
//! result instead.

use crate::job::JobStatus;
use std::fmt;

/// Errors from workflow engine operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    /// No workflow is registered under this id.
    NotFound { workflow_id: String },
    /// No job is registered under this id.
    JobNotFound { job_id: String },
    /// A job's prerequisite has not completed.
    DependencyUnmet {
        job_id: String,
        dependency_id: String,
        reason: String,
    },
    /// A job record was asked to move along an edge its state machine lacks.
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

impl fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { workflow_id } => write!(f, "workflow not found: {workflow_id}"),
            Self::JobNotFound { job_id } => write!(f, "job not found: {job_id}"),
            Self::DependencyUnmet {
                job_id,
                dependency_id,
                reason,
            } => write!(
                f,
                "dependency {dependency_id} of job {job_id} is unmet: {reason}"
            ),
            Self::InvalidTransition { job_id, from, to } => {
                write!(f, "job {job_id} cannot move from {from} to {to}")
            }
        }
    }
}

impl std::error::Error for WorkflowError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = WorkflowError::NotFound {
            workflow_id: "daily_ingest".to_string(),
        };
        assert_eq!(err.to_string(), "workflow not found: daily_ingest");
    }

    #[test]
    fn dependency_unmet_display() {
        let err = WorkflowError::DependencyUnmet {
            job_id: "transform".to_string(),
            dependency_id: "extract".to_string(),
            reason: "status is failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "dependency extract of job transform is unmet: status is failed"
        );
    }

    #[test]
    fn invalid_transition_display() {
        let err = WorkflowError::InvalidTransition {
            job_id: "extract".to_string(),
            from: JobStatus::Idle,
            to: JobStatus::Completed,
        };
        assert_eq!(err.to_string(), "job extract cannot move from idle to completed");
    }
}
