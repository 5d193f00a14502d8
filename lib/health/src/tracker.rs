//! Rolling error-rate tracking for upstream subsystems.
//!
//! Integrations record the outcome of each call; the tracker answers "what
//! share of calls failed in the last N hours" per subsystem.

use crate::probe::ErrorRateProbe;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone, Copy)]
struct Outcome {
    at: DateTime<Utc>,
    failed: bool,
}

/// Per-subsystem record of recent call outcomes.
#[derive(Debug)]
pub struct ErrorRateTracker {
    /// Outcomes older than this are dropped on the next write.
    retention: Duration,
    state: RwLock<HashMap<String, VecDeque<Outcome>>>,
}

impl ErrorRateTracker {
    /// Creates a tracker that keeps `retention_hours` of history.
    #[must_use]
    pub fn new(retention_hours: u32) -> Self {
        Self {
            retention: Duration::hours(i64::from(retention_hours.max(1))),
            state: RwLock::new(HashMap::new()),
        }
    }

    pub fn record_success(&self, subsystem: &str) {
        self.record_at(subsystem, Utc::now(), false);
    }

    pub fn record_failure(&self, subsystem: &str) {
        self.record_at(subsystem, Utc::now(), true);
    }

    /// Records an outcome observed at `at`.
    pub fn record_at(&self, subsystem: &str, at: DateTime<Utc>, failed: bool) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let outcomes = state.entry(subsystem.to_string()).or_default();
        outcomes.push_back(Outcome { at, failed });

        let cutoff = at - self.retention;
        while outcomes.front().is_some_and(|o| o.at < cutoff) {
            outcomes.pop_front();
        }
    }

    /// Failure share over the `window_hours` before `now`.
    ///
    /// Returns 0.0 when nothing was recorded in the window.
    #[must_use]
    pub fn error_rate_at(&self, subsystem: &str, window_hours: u32, now: DateTime<Utc>) -> f64 {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let Some(outcomes) = state.get(subsystem) else {
            return 0.0;
        };

        let cutoff = now - Duration::hours(i64::from(window_hours));
        let (total, failed) = outcomes
            .iter()
            .filter(|o| o.at >= cutoff && o.at <= now)
            .fold((0u32, 0u32), |(total, failed), o| {
                (total + 1, failed + u32::from(o.failed))
            });
        if total == 0 {
            return 0.0;
        }
        f64::from(failed) / f64::from(total)
    }

    /// Subsystems with any recorded outcome, sorted.
    #[must_use]
    pub fn subsystems(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = state.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ErrorRateTracker {
    fn default() -> Self {
        Self::new(24)
    }
}

impl ErrorRateProbe for ErrorRateTracker {
    fn error_rate(&self, subsystem: &str, window_hours: u32) -> f64 {
        self.error_rate_at(subsystem, window_hours, Utc::now())
    }
}
