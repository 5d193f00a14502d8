//! Scheduled entries: a unit of work plus the trigger that fires it.

use crate::error::SchedulerError;
use crate::trigger::{CronSpec, Trigger};
use adpulse_core::UnitOfWork;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A recurring trigger bound to a unit of work.
///
/// Exactly one of cron or interval must be set. Options left unset fall back
/// to the scheduler's defaults at registration.
#[derive(Clone)]
pub struct ScheduledEntry {
    pub id: String,
    pub cron: Option<CronSpec>,
    pub interval: Option<Duration>,
    pub interval_anchor: Option<DateTime<Utc>>,
    pub job: Arc<dyn UnitOfWork>,
    pub coalesce: Option<bool>,
    pub max_concurrent_instances: usize,
    pub misfire_grace: Option<Duration>,
}

impl ScheduledEntry {
    /// Creates an entry with no trigger and a concurrency limit of one.
    #[must_use]
    pub fn new(id: impl Into<String>, job: Arc<dyn UnitOfWork>) -> Self {
        Self {
            id: id.into(),
            cron: None,
            interval: None,
            interval_anchor: None,
            job,
            coalesce: None,
            max_concurrent_instances: 1,
            misfire_grace: None,
        }
    }

    #[must_use]
    pub fn with_cron(mut self, spec: CronSpec) -> Self {
        self.cron = Some(spec);
        self
    }

    #[must_use]
    pub fn with_interval(mut self, every: Duration) -> Self {
        self.interval = Some(every);
        self
    }

    /// Fixes the start of an interval series instead of using registration time.
    #[must_use]
    pub fn with_interval_anchor(mut self, anchor: DateTime<Utc>) -> Self {
        self.interval_anchor = Some(anchor);
        self
    }

    #[must_use]
    pub fn with_coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = Some(coalesce);
        self
    }

    #[must_use]
    pub fn with_max_concurrent_instances(mut self, max: usize) -> Self {
        self.max_concurrent_instances = max;
        self
    }

    #[must_use]
    pub fn with_misfire_grace(mut self, grace: Duration) -> Self {
        self.misfire_grace = Some(grace);
        self
    }

    /// Resolves the entry's trigger.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Configuration` when neither or both trigger
    /// kinds are set, when the trigger itself is invalid, or when the
    /// concurrency limit is zero.
    pub fn trigger(&self) -> Result<Trigger, SchedulerError> {
        let trigger = match (&self.cron, self.interval) {
            (Some(spec), None) => Trigger::Cron(spec.clone()),
            (None, Some(every)) => Trigger::Interval {
                every,
                anchor: self.interval_anchor,
            },
            (None, None) => {
                return Err(SchedulerError::configuration(format!(
                    "entry {} has neither a cron nor an interval trigger",
                    self.id
                )));
            }
            (Some(_), Some(_)) => {
                return Err(SchedulerError::configuration(format!(
                    "entry {} has both a cron and an interval trigger",
                    self.id
                )));
            }
        };
        trigger.validate()?;
        if self.max_concurrent_instances == 0 {
            return Err(SchedulerError::configuration(format!(
                "entry {} must allow at least one concurrent instance",
                self.id
            )));
        }
        Ok(trigger)
    }
}

impl fmt::Debug for ScheduledEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledEntry")
            .field("id", &self.id)
            .field("cron", &self.cron)
            .field("interval", &self.interval)
            .field("interval_anchor", &self.interval_anchor)
            .field("coalesce", &self.coalesce)
            .field("max_concurrent_instances", &self.max_concurrent_instances)
            .field("misfire_grace", &self.misfire_grace)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a registered entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySnapshot {
    pub id: String,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub trigger: String,
    pub paused: bool,
    pub running_instances: usize,
    pub last_fired_at: Option<DateTime<Utc>>,
}
