//! Reduces scheduler, job and probe state into one health report.
//!
//! Nothing is cached: every call reads the live state of the scheduler and
//! the job registry and polls every registered probe.

use crate::probe::{ErrorRateProbe, LivenessProbe};
use crate::report::{HealthReport, HealthStatus, JobHealth, MetricsSnapshot, ProbeHealth};
use adpulse_scheduler::TriggerScheduler;
use adpulse_workflow::{JobStatus, WorkflowEngine};
use chrono::Utc;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, warn};

/// Component name under which the scheduler's running flag is reported.
pub const SCHEDULER_COMPONENT: &str = "scheduler";

/// Polls the orchestrator's parts and registered probes on demand.
pub struct HealthAggregator {
    scheduler: Arc<TriggerScheduler>,
    engine: Arc<WorkflowEngine>,
    window_hours: u32,
    liveness: RwLock<BTreeMap<String, Arc<dyn LivenessProbe>>>,
    error_rates: RwLock<BTreeMap<String, Arc<dyn ErrorRateProbe>>>,
}

impl HealthAggregator {
    #[must_use]
    pub fn new(
        scheduler: Arc<TriggerScheduler>,
        engine: Arc<WorkflowEngine>,
        window_hours: u32,
    ) -> Self {
        Self {
            scheduler,
            engine,
            window_hours,
            liveness: RwLock::new(BTreeMap::new()),
            error_rates: RwLock::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn window_hours(&self) -> u32 {
        self.window_hours
    }

    /// Adds a liveness probe reported under `components`, replacing any
    /// probe of the same name.
    pub fn register_liveness(&self, name: impl Into<String>, probe: Arc<dyn LivenessProbe>) {
        let name = name.into();
        debug!(component = %name, "registered liveness probe");
        self.liveness
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, probe);
    }

    /// Adds an error-rate probe reported under `external_probes`, replacing
    /// any probe for the same subsystem.
    pub fn register_error_rate(&self, subsystem: impl Into<String>, probe: Arc<dyn ErrorRateProbe>) {
        let subsystem = subsystem.into();
        debug!(subsystem = %subsystem, "registered error-rate probe");
        self.error_rates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subsystem, probe);
    }

    /// Builds a fresh health report.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let mut components = BTreeMap::new();
        components.insert(SCHEDULER_COMPONENT.to_string(), self.scheduler.is_running());
        for (name, probe) in self.liveness_probes() {
            let alive = catch_unwind(AssertUnwindSafe(|| probe.is_alive())).unwrap_or_else(|_| {
                warn!(component = %name, "liveness probe panicked; reporting as down");
                false
            });
            components.insert(name, alive);
        }

        let jobs = self
            .engine
            .job_snapshots()
            .into_iter()
            .map(|job| {
                (
                    job.job_id,
                    JobHealth {
                        status: job.status,
                        last_run_time: job.started_at,
                        last_error: job.last_error,
                    },
                )
            })
            .collect();

        let mut external_probes = BTreeMap::new();
        for (subsystem, probe) in self.error_rate_probes() {
            let rate = self.poll_error_rate(&subsystem, probe.as_ref());
            external_probes.insert(
                subsystem,
                ProbeHealth {
                    error_rate: rate,
                    tier: HealthStatus::from_error_rate(rate),
                },
            );
        }

        let status = HealthReport::overall(&components, &external_probes);
        if status != HealthStatus::Healthy {
            warn!(%status, "health check not healthy");
        }
        HealthReport {
            status,
            checked_at: Utc::now(),
            components,
            jobs,
            external_probes,
        }
    }

    /// Builds a fresh counter snapshot.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        let jobs = self.engine.job_snapshots();
        let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();
        MetricsSnapshot {
            total_jobs: jobs.len(),
            completed_jobs: count(JobStatus::Completed),
            failed_jobs: count(JobStatus::Failed),
            running_jobs: count(JobStatus::Running),
            total_workflows: self.engine.workflow_count(),
            scheduled_entry_count: self.scheduler.len(),
            scheduler: self.scheduler.stats(),
        }
    }

    fn poll_error_rate(&self, subsystem: &str, probe: &dyn ErrorRateProbe) -> f64 {
        let polled = catch_unwind(AssertUnwindSafe(|| {
            probe.error_rate(subsystem, self.window_hours)
        }));
        match polled {
            Ok(rate) if rate.is_nan() => {
                warn!(subsystem = %subsystem, "error-rate probe returned NaN; reporting as 1.0");
                1.0
            }
            Ok(rate) => rate.clamp(0.0, 1.0),
            Err(_) => {
                warn!(subsystem = %subsystem, "error-rate probe panicked; reporting as 1.0");
                1.0
            }
        }
    }

    fn liveness_probes(&self) -> Vec<(String, Arc<dyn LivenessProbe>)> {
        self.liveness
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, probe)| (name.clone(), Arc::clone(probe)))
            .collect()
    }

    fn error_rate_probes(&self) -> Vec<(String, Arc<dyn ErrorRateProbe>)> {
        self.error_rates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, probe)| (name.clone(), Arc::clone(probe)))
            .collect()
    }
}

impl std::fmt::Debug for HealthAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthAggregator")
            .field("window_hours", &self.window_hours)
            .finish_non_exhaustive()
    }
}
