//! Errors surfaced by the orchestrator process itself.

use std::fmt;

/// Process-level failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// Configuration could not be loaded or is invalid.
    Config { details: String },
    /// Waiting for the shutdown signal failed.
    Signal { details: String },
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "invalid configuration: {details}"),
            Self::Signal { details } => write!(f, "failed to listen for shutdown signal: {details}"),
        }
    }
}

impl std::error::Error for OrchestratorError {}
