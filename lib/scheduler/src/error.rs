//! Error types for the scheduler crate.
//!
//! Errors are returned as `rootcause::Report<SchedulerError>` so callers can
//! layer their own context on top.

use std::fmt;

/// Errors from scheduler operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The entry's trigger or limits are malformed.
    Configuration { reason: String },
    /// No entry is registered under this id.
    NotFound { id: String },
}

impl SchedulerError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { reason } => {
                write!(f, "invalid schedule configuration: {reason}")
            }
            Self::NotFound { id } => write!(f, "scheduled entry not found: {id}"),
        }
    }
}

impl std::error::Error for SchedulerError {}
