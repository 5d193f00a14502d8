//! Health and metrics report types.

use adpulse_scheduler::SchedulerStats;
use adpulse_workflow::JobStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Error rate at or above which a subsystem is degraded.
pub const DEGRADED_ERROR_RATE: f64 = 0.10;
/// Error rate at or above which a subsystem is unhealthy.
pub const UNHEALTHY_ERROR_RATE: f64 = 0.30;

/// Overall or per-probe health tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Maps an error rate onto a tier.
    #[must_use]
    pub fn from_error_rate(rate: f64) -> Self {
        if rate >= UNHEALTHY_ERROR_RATE {
            Self::Unhealthy
        } else if rate >= DEGRADED_ERROR_RATE {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of one registered job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobHealth {
    pub status: JobStatus,
    pub last_run_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Health of one external subsystem.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeHealth {
    pub error_rate: f64,
    pub tier: HealthStatus,
}

/// Point-in-time health of the whole orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub components: BTreeMap<String, bool>,
    pub jobs: BTreeMap<String, JobHealth>,
    pub external_probes: BTreeMap<String, ProbeHealth>,
}

impl HealthReport {
    /// Unhealthy if any probe is unhealthy, degraded if any component is
    /// down, healthy otherwise.
    #[must_use]
    pub fn overall(
        components: &BTreeMap<String, bool>,
        external_probes: &BTreeMap<String, ProbeHealth>,
    ) -> HealthStatus {
        if external_probes
            .values()
            .any(|p| p.tier == HealthStatus::Unhealthy)
        {
            HealthStatus::Unhealthy
        } else if components.values().any(|alive| !alive) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Counts over the job registry and the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub running_jobs: usize,
    pub total_workflows: usize,
    pub scheduled_entry_count: usize,
    pub scheduler: SchedulerStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(rate: f64) -> ProbeHealth {
        ProbeHealth {
            error_rate: rate,
            tier: HealthStatus::from_error_rate(rate),
        }
    }

    #[test]
    fn tiers_follow_thresholds() {
        assert_eq!(HealthStatus::from_error_rate(0.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_error_rate(0.099), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_error_rate(0.10), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_error_rate(0.299), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_error_rate(0.30), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::from_error_rate(1.0), HealthStatus::Unhealthy);
    }

    #[test]
    fn unhealthy_probe_outranks_down_component() {
        let components = BTreeMap::from([("persistence".to_string(), false)]);
        let probes = BTreeMap::from([("meta_ads".to_string(), probe(0.4))]);
        assert_eq!(
            HealthReport::overall(&components, &probes),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn degraded_probe_alone_does_not_change_overall_status() {
        let components = BTreeMap::from([("scheduler".to_string(), true)]);
        let probes = BTreeMap::from([("meta_ads".to_string(), probe(0.2))]);
        assert_eq!(
            HealthReport::overall(&components, &probes),
            HealthStatus::Healthy
        );
    }
}
