//! The orchestrator facade.
//!
//! Owns one scheduler, one workflow engine and one health aggregator, and
//! exposes the operations collaborators use to register and schedule work.

use crate::config::OrchestratorConfig;
use adpulse_core::{Result, UnitOfWork, WorkError};
use adpulse_health::{
    ErrorRateProbe, HealthAggregator, HealthReport, LivenessProbe, MetricsSnapshot,
};
use adpulse_scheduler::{EntrySnapshot, ScheduledEntry, SchedulerError, TriggerScheduler};
use adpulse_workflow::{Workflow, WorkflowEngine, WorkflowError, WorkflowResult};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::info;

/// Scheduled entry id of the built-in metrics heartbeat.
pub const HEARTBEAT_ENTRY_ID: &str = "orchestrator.heartbeat";

/// The collaborator-facing orchestration API.
#[derive(Debug)]
pub struct Orchestrator {
    scheduler: Arc<TriggerScheduler>,
    engine: Arc<WorkflowEngine>,
    health: HealthAggregator,
}

impl Orchestrator {
    #[must_use]
    pub fn new(config: &OrchestratorConfig) -> Self {
        let scheduler = Arc::new(TriggerScheduler::new(config.scheduler.options()));
        let engine = Arc::new(WorkflowEngine::new());
        let health = HealthAggregator::new(
            Arc::clone(&scheduler),
            Arc::clone(&engine),
            config.health.error_rate_window_hours,
        );
        Self {
            scheduler,
            engine,
            health,
        }
    }

    /// Registers a job, replacing any job with the same id.
    pub fn register_job(
        &self,
        job_id: impl Into<String>,
        display_name: impl Into<String>,
        work: Arc<dyn UnitOfWork>,
        dependency_ids: impl IntoIterator<Item = impl Into<String>>,
    ) {
        self.engine
            .register_job(job_id, display_name, work, dependency_ids);
    }

    /// Registers a workflow, replacing any workflow with the same id.
    pub fn register_workflow(&self, workflow: Workflow) {
        self.engine.register_workflow(workflow);
    }

    /// Runs a workflow now, on the caller's thread.
    ///
    /// # Errors
    ///
    /// Returns `WorkflowError::NotFound` if the workflow is not registered.
    pub fn run_workflow(&self, workflow_id: &str) -> Result<WorkflowResult, WorkflowError> {
        self.engine.run(workflow_id)
    }

    /// Schedules an arbitrary unit of work.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Configuration` for an invalid entry.
    pub fn schedule(&self, entry: ScheduledEntry) -> Result<String, SchedulerError> {
        self.scheduler.register(entry)
    }

    /// Schedules a registered workflow. `configure` sets the trigger and
    /// limits on an entry that already carries the workflow as its work.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Configuration` if the workflow is unknown or
    /// the entry is invalid.
    pub fn schedule_workflow(
        &self,
        entry_id: impl Into<String>,
        workflow_id: &str,
        configure: impl FnOnce(ScheduledEntry) -> ScheduledEntry,
    ) -> Result<String, SchedulerError> {
        if self.engine.workflow(workflow_id).is_none() {
            return Err(SchedulerError::Configuration {
                reason: format!("cannot schedule unknown workflow {workflow_id}"),
            }
            .into());
        }
        let entry = ScheduledEntry::new(entry_id, self.engine.workflow_work(workflow_id));
        self.scheduler.register(configure(entry))
    }

    /// Schedules a registered job to run on its own.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Configuration` if the job is unknown or the
    /// entry is invalid.
    pub fn schedule_job(
        &self,
        entry_id: impl Into<String>,
        job_id: &str,
        configure: impl FnOnce(ScheduledEntry) -> ScheduledEntry,
    ) -> Result<String, SchedulerError> {
        if self.engine.job_snapshot(job_id).is_err() {
            return Err(SchedulerError::Configuration {
                reason: format!("cannot schedule unknown job {job_id}"),
            }
            .into());
        }
        let entry = ScheduledEntry::new(entry_id, self.engine.job_work(job_id));
        self.scheduler.register(configure(entry))
    }

    pub fn unschedule(&self, entry_id: &str) {
        self.scheduler.unregister(entry_id);
    }

    #[must_use]
    pub fn list_schedule(&self) -> Vec<EntrySnapshot> {
        self.scheduler.list()
    }

    /// Pauses a scheduled entry. Returns `false` for an unknown id.
    pub fn pause(&self, entry_id: &str) -> bool {
        self.scheduler.pause(entry_id)
    }

    /// Resumes a paused entry. Returns `false` for an unknown id.
    pub fn resume(&self, entry_id: &str) -> bool {
        self.scheduler.resume(entry_id)
    }

    pub fn register_liveness(&self, name: impl Into<String>, probe: Arc<dyn LivenessProbe>) {
        self.health.register_liveness(name, probe);
    }

    pub fn register_error_rate(&self, subsystem: impl Into<String>, probe: Arc<dyn ErrorRateProbe>) {
        self.health.register_error_rate(subsystem, probe);
    }

    #[must_use]
    pub fn health(&self) -> HealthReport {
        self.health.health()
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.health.metrics()
    }

    /// Starts the scheduler's background loop.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Stops the scheduler, optionally waiting for in-flight fires.
    pub async fn shutdown(&self, wait: bool) {
        self.scheduler.stop(wait).await;
        info!(wait, "orchestrator shut down");
    }

    /// Schedules an entry that logs a metrics snapshot every `every`.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Configuration` if `every` is below 1ms.
    pub fn install_heartbeat(self: &Arc<Self>, every: Duration) -> Result<String, SchedulerError> {
        let orchestrator = Arc::downgrade(self);
        let work = adpulse_core::work_fn(move || heartbeat(&orchestrator));
        self.schedule(ScheduledEntry::new(HEARTBEAT_ENTRY_ID, work).with_interval(every))
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<TriggerScheduler> {
        &self.scheduler
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }
}

fn heartbeat(orchestrator: &Weak<Orchestrator>) -> std::result::Result<JsonValue, WorkError> {
    let orchestrator = orchestrator
        .upgrade()
        .ok_or_else(|| WorkError::failed("orchestrator dropped"))?;
    let metrics = orchestrator.metrics();
    info!(
        total_jobs = metrics.total_jobs,
        running_jobs = metrics.running_jobs,
        failed_jobs = metrics.failed_jobs,
        scheduled_entries = metrics.scheduled_entry_count,
        dispatched = metrics.scheduler.dispatched,
        misfired = metrics.scheduler.misfired,
        "orchestrator heartbeat"
    );
    serde_json::to_value(&metrics).map_err(WorkError::failed)
}
