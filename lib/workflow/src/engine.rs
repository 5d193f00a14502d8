//! The workflow engine.
//!
//! Holds the job and workflow registries and walks a workflow's job list in
//! order. A job only runs when every declared dependency is registered and
//! completed. Work runs on the caller's thread; no lock is held while it does.

use crate::definition::{FailurePolicy, Workflow};
use crate::error::WorkflowError;
use crate::job::{JobRecord, JobSnapshot, JobStatus};
use crate::result::{JobOutcome, JobRunResult, WorkflowResult};
use adpulse_core::{Result, UnitOfWork, WorkError, WorkflowRunId, execute_caught};
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Outcome of trying to move a job into `running`.
enum Begin {
    Started {
        display_name: String,
        work: Arc<dyn UnitOfWork>,
        generation: u64,
    },
    Missing,
    Unmet {
        display_name: String,
        dependency: String,
        reason: String,
    },
    Rejected {
        display_name: String,
        from: JobStatus,
    },
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Registry of jobs and workflows plus the sequential runner.
#[derive(Debug, Default)]
pub struct WorkflowEngine {
    jobs: RwLock<HashMap<String, JobRecord>>,
    workflows: RwLock<HashMap<String, Workflow>>,
    generations: AtomicU64,
}

impl WorkflowEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job, replacing any job with the same id.
    ///
    /// A replaced job starts over in `idle` with no history.
    pub fn register_job(
        &self,
        job_id: impl Into<String>,
        display_name: impl Into<String>,
        work: Arc<dyn UnitOfWork>,
        dependency_ids: impl IntoIterator<Item = impl Into<String>>,
    ) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let record =
            JobRecord::new(job_id, display_name, work, dependency_ids).with_generation(generation);
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        info!(
            job_id = %record.job_id,
            dependencies = record.dependency_ids.len(),
            replaced = jobs.contains_key(&record.job_id),
            "registered job"
        );
        jobs.insert(record.job_id.clone(), record);
    }

    /// Registers a workflow, replacing any workflow with the same id.
    pub fn register_workflow(&self, workflow: Workflow) {
        let mut workflows = self
            .workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        info!(
            workflow_id = %workflow.workflow_id,
            jobs = workflow.len(),
            policy = ?workflow.failure_policy,
            replaced = workflows.contains_key(&workflow.workflow_id),
            "registered workflow"
        );
        workflows.insert(workflow.workflow_id.clone(), workflow);
    }

    /// Runs a workflow to completion.
    ///
    /// Job failures do not make this return an error; they are reported in
    /// the returned [`WorkflowResult`].
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::NotFound` if the workflow is not registered.
    #[instrument(skip(self))]
    pub fn run(&self, workflow_id: &str) -> Result<WorkflowResult, WorkflowError> {
        let workflow = self
            .workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound {
                workflow_id: workflow_id.to_string(),
            })?;

        let run_id = WorkflowRunId::new();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(%run_id, jobs = workflow.len(), "workflow run started");

        let mut slots = Vec::with_capacity(workflow.len());
        let mut aborted = false;
        for job_id in &workflow.ordered_job_ids {
            if aborted {
                debug!(%run_id, job_id = %job_id, "skipping job after earlier failure");
                slots.push(JobRunResult::new(
                    job_id.as_str(),
                    self.display_name(job_id),
                    0,
                    JobOutcome::Skipped,
                ));
                continue;
            }

            let slot = self.run_slot(job_id, true);
            let aborts = matches!(
                slot.outcome,
                JobOutcome::Failed { .. } | JobOutcome::DependencyUnmet { .. }
            );
            if aborts && workflow.failure_policy == FailurePolicy::AbortRemaining {
                warn!(%run_id, job_id = %job_id, "aborting remaining jobs");
                aborted = true;
            }
            slots.push(slot);
        }

        let result = WorkflowResult::from_slots(
            run_id,
            workflow.workflow_id,
            started_at,
            elapsed_ms(clock),
            slots,
        );
        if result.success {
            info!(
                %run_id,
                completed = result.jobs_completed,
                duration_ms = result.duration_ms,
                "workflow run succeeded"
            );
        } else {
            warn!(
                %run_id,
                completed = result.jobs_completed,
                failed = result.jobs_failed,
                skipped = result.jobs_skipped,
                duration_ms = result.duration_ms,
                "workflow run failed"
            );
        }
        Ok(result)
    }

    /// Runs one job on its own, without checking its dependencies.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::JobNotFound` if the job is not registered, or
    /// `WorkflowError::InvalidTransition` if it is already running.
    pub fn run_job(&self, job_id: &str) -> Result<JobRunResult, WorkflowError> {
        match self.begin(job_id, false) {
            Begin::Started {
                display_name,
                work,
                generation,
            } => Ok(self.execute(job_id, display_name, work, generation)),
            Begin::Missing => Err(WorkflowError::JobNotFound {
                job_id: job_id.to_string(),
            }
            .into()),
            Begin::Rejected { from, .. } => Err(WorkflowError::InvalidTransition {
                job_id: job_id.to_string(),
                from,
                to: JobStatus::Running,
            }
            .into()),
            Begin::Unmet {
                dependency, reason, ..
            } => Err(WorkflowError::DependencyUnmet {
                job_id: job_id.to_string(),
                dependency_id: dependency,
                reason,
            }
            .into()),
        }
    }

    fn run_slot(&self, job_id: &str, check_dependencies: bool) -> JobRunResult {
        match self.begin(job_id, check_dependencies) {
            Begin::Started {
                display_name,
                work,
                generation,
            } => self.execute(job_id, display_name, work, generation),
            Begin::Missing => {
                let err = WorkflowError::JobNotFound {
                    job_id: job_id.to_string(),
                };
                warn!(job_id = %job_id, error = %err, "workflow references an unregistered job");
                JobRunResult::new(job_id, None, 0, JobOutcome::JobNotFound)
            }
            Begin::Unmet {
                display_name,
                dependency,
                reason,
            } => {
                let err = WorkflowError::DependencyUnmet {
                    job_id: job_id.to_string(),
                    dependency_id: dependency.clone(),
                    reason: reason.clone(),
                };
                warn!(job_id = %job_id, error = %err, "job not run");
                JobRunResult::new(
                    job_id,
                    Some(display_name),
                    0,
                    JobOutcome::DependencyUnmet { dependency, reason },
                )
            }
            Begin::Rejected { display_name, from } => {
                let err = WorkflowError::InvalidTransition {
                    job_id: job_id.to_string(),
                    from,
                    to: JobStatus::Running,
                };
                warn!(job_id = %job_id, error = %err, "job could not be started");
                JobRunResult::new(
                    job_id,
                    Some(display_name),
                    0,
                    JobOutcome::Failed {
                        error: WorkError::failed(err),
                    },
                )
            }
        }
    }

    /// Checks dependencies and enters `running` under one write lock.
    fn begin(&self, job_id: &str, check_dependencies: bool) -> Begin {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let Some(record) = jobs.get(job_id) else {
            return Begin::Missing;
        };
        let display_name = record.display_name.clone();

        if check_dependencies {
            let unmet = record.dependency_ids.iter().find_map(|dep| match jobs.get(dep) {
                None => Some((dep.clone(), "not registered".to_string())),
                Some(d) if d.status() != JobStatus::Completed => {
                    Some((dep.clone(), format!("status is {}", d.status())))
                }
                Some(_) => None,
            });
            if let Some((dependency, reason)) = unmet {
                return Begin::Unmet {
                    display_name,
                    dependency,
                    reason,
                };
            }
        }

        let Some(record) = jobs.get_mut(job_id) else {
            return Begin::Missing;
        };
        let from = record.status();
        if record.start().is_err() {
            return Begin::Rejected { display_name, from };
        }
        debug!(job_id = %job_id, run = record.run_count(), "job started");
        Begin::Started {
            display_name,
            work: Arc::clone(&record.work),
            generation: record.generation(),
        }
    }

    fn execute(
        &self,
        job_id: &str,
        display_name: String,
        work: Arc<dyn UnitOfWork>,
        generation: u64,
    ) -> JobRunResult {
        let clock = Instant::now();
        let outcome = execute_caught(work.as_ref());
        let duration_ms = elapsed_ms(clock);

        let recorded = {
            let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
            jobs.get_mut(job_id)
                .filter(|record| record.generation() == generation)
                .is_some_and(|record| {
                    match &outcome {
                        Ok(value) => record.complete(value.clone()),
                        Err(err) => record.fail(err.to_string()),
                    }
                    .is_ok()
                })
        };
        if !recorded {
            warn!(job_id = %job_id, "job was replaced or removed while running; outcome not recorded");
        }

        match outcome {
            Ok(result) => {
                info!(job_id = %job_id, duration_ms, "job completed");
                JobRunResult::new(
                    job_id,
                    Some(display_name),
                    duration_ms,
                    JobOutcome::Completed { result },
                )
            }
            Err(err) => {
                error!(job_id = %job_id, duration_ms, error = %err, "job failed");
                JobRunResult::new(
                    job_id,
                    Some(display_name),
                    duration_ms,
                    JobOutcome::Failed { error: err },
                )
            }
        }
    }

    fn display_name(&self, job_id: &str) -> Option<String> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_id)
            .map(|r| r.display_name.clone())
    }

    /// Exposes a workflow as a unit of work the scheduler can fire.
    ///
    /// The unit fails when the workflow is unknown or any of its jobs fail,
    /// and otherwise returns the serialized [`WorkflowResult`].
    #[must_use]
    pub fn workflow_work(self: &Arc<Self>, workflow_id: impl Into<String>) -> Arc<dyn UnitOfWork> {
        Arc::new(WorkflowWork {
            engine: Arc::clone(self),
            workflow_id: workflow_id.into(),
        })
    }

    /// Exposes a single job as a unit of work the scheduler can fire.
    #[must_use]
    pub fn job_work(self: &Arc<Self>, job_id: impl Into<String>) -> Arc<dyn UnitOfWork> {
        Arc::new(JobWork {
            engine: Arc::clone(self),
            job_id: job_id.into(),
        })
    }

    /// Returns a copy of one job's state.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::JobNotFound` if the job is not registered.
    pub fn job_snapshot(&self, job_id: &str) -> Result<JobSnapshot, WorkflowError> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let record = jobs.get(job_id).ok_or_else(|| WorkflowError::JobNotFound {
            job_id: job_id.to_string(),
        })?;
        Ok(record.snapshot())
    }

    /// Returns a copy of every job's state, ordered by id.
    #[must_use]
    pub fn job_snapshots(&self) -> Vec<JobSnapshot> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut snapshots: Vec<JobSnapshot> = jobs.values().map(JobRecord::snapshot).collect();
        snapshots.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        snapshots
    }

    #[must_use]
    pub fn workflow(&self, workflow_id: &str) -> Option<Workflow> {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workflow_id)
            .cloned()
    }

    /// Registered workflow ids, sorted.
    #[must_use]
    pub fn workflow_ids(&self) -> Vec<String> {
        let workflows = self.workflows.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = workflows.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn workflow_count(&self) -> usize {
        self.workflows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct WorkflowWork {
    engine: Arc<WorkflowEngine>,
    workflow_id: String,
}

impl UnitOfWork for WorkflowWork {
    fn execute(&self) -> std::result::Result<JsonValue, WorkError> {
        let result = self
            .engine
            .run(&self.workflow_id)
            .map_err(WorkError::failed)?;
        if !result.success {
            return Err(WorkError::failed(format!(
                "workflow {} finished with {} failed job(s)",
                self.workflow_id, result.jobs_failed
            )));
        }
        serde_json::to_value(&result).map_err(WorkError::failed)
    }
}

struct JobWork {
    engine: Arc<WorkflowEngine>,
    job_id: String,
}

impl UnitOfWork for JobWork {
    fn execute(&self) -> std::result::Result<JsonValue, WorkError> {
        let slot = self.engine.run_job(&self.job_id).map_err(WorkError::failed)?;
        match slot.outcome {
            JobOutcome::Completed { result } => Ok(result),
            JobOutcome::Failed { error } => Err(error),
            other => Err(WorkError::failed(format!(
                "job {} did not run: {other:?}",
                self.job_id
            ))),
        }
    }
}
