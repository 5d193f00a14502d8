//! Outcomes of workflow and standalone job runs.

use adpulse_core::{WorkError, WorkflowRunId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

/// What happened to one slot of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// The job ran and returned a result.
    Completed { result: JsonValue },
    /// The job ran and failed, or could not be started.
    Failed { error: WorkError },
    /// The slot names a job that is not registered.
    JobNotFound,
    /// A declared dependency is missing or has not completed.
    DependencyUnmet { dependency: String, reason: String },
    /// The run was aborted before reaching this slot.
    Skipped,
}

/// Result of one job within a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRunResult {
    pub job_id: String,
    pub display_name: Option<String>,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

impl JobRunResult {
    pub(crate) fn new(
        job_id: impl Into<String>,
        display_name: Option<String>,
        duration_ms: u64,
        outcome: JobOutcome,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            display_name,
            success: matches!(outcome, JobOutcome::Completed { .. }),
            duration_ms,
            outcome,
        }
    }

    /// The job's result, if it completed.
    #[must_use]
    pub fn result(&self) -> Option<&JsonValue> {
        match &self.outcome {
            JobOutcome::Completed { result } => Some(result),
            _ => None,
        }
    }

    /// A human-readable reason the slot did not complete.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        match &self.outcome {
            JobOutcome::Completed { .. } => None,
            JobOutcome::Failed { error } => Some(error.to_string()),
            JobOutcome::JobNotFound => Some(format!("job not found: {}", self.job_id)),
            JobOutcome::DependencyUnmet { dependency, reason } => {
                Some(format!("dependency {dependency} unmet: {reason}"))
            }
            JobOutcome::Skipped => Some("skipped after an earlier failure".to_string()),
        }
    }

    /// True for slots that count toward `jobs_failed`.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self.outcome,
            JobOutcome::Failed { .. } | JobOutcome::JobNotFound | JobOutcome::DependencyUnmet { .. }
        )
    }
}

/// Aggregate result of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowResult {
    pub run_id: WorkflowRunId,
    pub workflow_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub jobs_completed: usize,
    pub jobs_failed: usize,
    pub jobs_skipped: usize,
    pub job_results: Vec<JobRunResult>,
}

impl WorkflowResult {
    pub(crate) fn from_slots(
        run_id: WorkflowRunId,
        workflow_id: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        job_results: Vec<JobRunResult>,
    ) -> Self {
        let jobs_completed = job_results.iter().filter(|r| r.success).count();
        let jobs_failed = job_results.iter().filter(|r| r.is_failure()).count();
        let jobs_skipped = job_results
            .iter()
            .filter(|r| r.outcome == JobOutcome::Skipped)
            .count();
        Self {
            run_id,
            workflow_id: workflow_id.into(),
            started_at,
            finished_at: Utc::now(),
            duration_ms,
            success: jobs_failed == 0,
            jobs_completed,
            jobs_failed,
            jobs_skipped,
            job_results,
        }
    }
}
