//! Workflow definitions.
//!
//! A workflow is an ordered list of job ids. The engine walks the list in
//! order and checks each job's declared dependencies; it does not sort them.

use serde::{Deserialize, Serialize};

/// What to do with the rest of a workflow once one job fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first failed job; later jobs are skipped.
    #[default]
    AbortRemaining,
    /// Keep going. Jobs depending on a failed job still fail their
    /// dependency check.
    ContinueRemaining,
}

/// A named, ordered sequence of jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub ordered_job_ids: Vec<String>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Workflow {
    /// Creates a workflow that aborts on the first failure.
    #[must_use]
    pub fn new(
        workflow_id: impl Into<String>,
        ordered_job_ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            ordered_job_ids: ordered_job_ids.into_iter().map(Into::into).collect(),
            failure_policy: FailurePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered_job_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered_job_ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_to_abort_remaining() {
        let workflow = Workflow::new("daily_ingest", ["extract", "transform"]);
        assert_eq!(workflow.failure_policy, FailurePolicy::AbortRemaining);
        assert_eq!(workflow.len(), 2);
    }

    #[test]
    fn policy_is_optional_when_deserializing() {
        let workflow: Workflow = serde_json::from_value(json!({
            "workflow_id": "weekly_mmm",
            "ordered_job_ids": ["features", "fit"]
        }))
        .expect("deserializes");
        assert_eq!(workflow.failure_policy, FailurePolicy::AbortRemaining);

        let continuing = workflow.with_failure_policy(FailurePolicy::ContinueRemaining);
        let value = serde_json::to_value(&continuing).expect("serializes");
        assert_eq!(value["failure_policy"], json!("continue_remaining"));
    }
}
