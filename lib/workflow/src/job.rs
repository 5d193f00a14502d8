//! Job records and their status state machine.
//!
//! A job moves `idle -> running -> completed | failed`, and may be re-run from
//! either terminal state. No edge skips `running`.

use crate::error::WorkflowError;
use adpulse_core::{Result, UnitOfWork};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Status of a job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Returns true if the state machine has an edge from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use JobStatus::{Completed, Failed, Idle, Running};
        match (self, next) {
            (Idle | Completed | Failed, Running) | (Running, Completed | Failed) => true,
            (Idle, Idle | Completed | Failed)
            | (Running, Idle | Running)
            | (Completed | Failed, Idle | Completed | Failed) => false,
        }
    }

    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state for one registered unit of work.
#[derive(Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub display_name: String,
    pub work: Arc<dyn UnitOfWork>,
    pub dependency_ids: BTreeSet<String>,
    status: JobStatus,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_result: Option<JsonValue>,
    run_count: u64,
    generation: u64,
}

impl JobRecord {
    /// Creates an idle record.
    #[must_use]
    pub fn new(
        job_id: impl Into<String>,
        display_name: impl Into<String>,
        work: Arc<dyn UnitOfWork>,
        dependency_ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            display_name: display_name.into(),
            work,
            dependency_ids: dependency_ids.into_iter().map(Into::into).collect(),
            status: JobStatus::Idle,
            started_at: None,
            finished_at: None,
            last_error: None,
            last_result: None,
            run_count: 0,
            generation: 0,
        }
    }

    /// Tags the record with the registration it belongs to.
    #[must_use]
    pub(crate) fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub fn last_result(&self) -> Option<&JsonValue> {
        self.last_result.as_ref()
    }

    #[must_use]
    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), WorkflowError> {
        if !self.status.can_transition_to(to) {
            return Err(WorkflowError::InvalidTransition {
                job_id: self.job_id.clone(),
                from: self.status,
                to,
            }
            .into());
        }
        self.status = to;
        Ok(())
    }

    /// Enters `running`, clearing the previous run's outcome.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::InvalidTransition` if the job is already running.
    pub fn start(&mut self) -> Result<(), WorkflowError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
        self.last_error = None;
        self.last_result = None;
        self.run_count += 1;
        Ok(())
    }

    /// Leaves `running` successfully with the work's result.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::InvalidTransition` if the job is not running.
    pub fn complete(&mut self, result: JsonValue) -> Result<(), WorkflowError> {
        self.transition(JobStatus::Completed)?;
        self.finished_at = Some(Utc::now());
        self.last_result = Some(result);
        Ok(())
    }

    /// Leaves `running` with an error.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::InvalidTransition` if the job is not running.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), WorkflowError> {
        self.transition(JobStatus::Failed)?;
        self.finished_at = Some(Utc::now());
        self.last_error = Some(error.into());
        Ok(())
    }

    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id.clone(),
            display_name: self.display_name.clone(),
            dependency_ids: self.dependency_ids.clone(),
            status: self.status,
            started_at: self.started_at,
            finished_at: self.finished_at,
            last_error: self.last_error.clone(),
            last_result: self.last_result.clone(),
            run_count: self.run_count,
        }
    }
}

impl fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRecord")
            .field("job_id", &self.job_id)
            .field("display_name", &self.display_name)
            .field("dependency_ids", &self.dependency_ids)
            .field("status", &self.status)
            .field("started_at", &self.started_at)
            .field("finished_at", &self.finished_at)
            .field("last_error", &self.last_error)
            .field("run_count", &self.run_count)
            .finish_non_exhaustive()
    }
}

/// Read-only copy of a job record, without its work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub display_name: String,
    pub dependency_ids: BTreeSet<String>,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_result: Option<JsonValue>,
    pub run_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use adpulse_core::work_fn;
    use serde_json::json;

    const ALL: [JobStatus; 4] = [
        JobStatus::Idle,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    fn record() -> JobRecord {
        JobRecord::new("extract", "Extract spend", work_fn(|| Ok(json!(null))), ["auth"])
    }

    #[test]
    fn only_documented_edges_are_allowed() {
        let allowed: Vec<(JobStatus, JobStatus)> = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();
        assert_eq!(
            allowed,
            vec![
                (JobStatus::Idle, JobStatus::Running),
                (JobStatus::Running, JobStatus::Completed),
                (JobStatus::Running, JobStatus::Failed),
                (JobStatus::Completed, JobStatus::Running),
                (JobStatus::Failed, JobStatus::Running),
            ]
        );
    }

    #[test]
    fn successful_run_records_result() {
        let mut job = record();
        assert_eq!(job.status(), JobStatus::Idle);
        job.start().expect("idle -> running");
        assert_eq!(job.status(), JobStatus::Running);
        assert!(job.started_at().is_some());
        job.complete(json!({"rows": 10})).expect("running -> completed");
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.last_result(), Some(&json!({"rows": 10})));
        assert_eq!(job.last_error(), None);
        assert!(job.finished_at().is_some());
        assert_eq!(job.run_count(), 1);
    }

    #[test]
    fn rerun_clears_previous_outcome() {
        let mut job = record();
        job.start().expect("start");
        job.fail("timeout").expect("fail");
        assert_eq!(job.last_error(), Some("timeout"));

        job.start().expect("failed -> running");
        assert_eq!(job.last_error(), None);
        assert_eq!(job.last_result(), None);
        assert_eq!(job.finished_at(), None);
        assert_eq!(job.run_count(), 2);
    }

    #[test]
    fn completing_an_idle_job_is_rejected() {
        let mut job = record();
        let err = job.complete(json!(1)).unwrap_err();
        assert!(err.to_string().contains("cannot move from idle to completed"));
        assert_eq!(job.status(), JobStatus::Idle);
        assert_eq!(job.last_result(), None);
    }

    #[test]
    fn starting_a_running_job_is_rejected() {
        let mut job = record();
        job.start().expect("start");
        assert!(job.start().is_err());
        assert_eq!(job.run_count(), 1);
    }

    #[test]
    fn snapshot_serializes_status_in_snake_case() {
        let job = record();
        let value = serde_json::to_value(job.snapshot()).expect("serializes");
        assert_eq!(value["status"], json!("idle"));
        assert_eq!(value["dependency_ids"], json!(["auth"]));
    }
}
