//! The unit-of-work contract shared by the scheduler and the workflow engine.
//!
//! Jobs are opaque to the orchestrator: it only knows how to call them and
//! how to read back a structured result or a failure.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;

/// Failure reported by a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkError {
    /// The work returned an error.
    Failed { message: String },
    /// The work panicked while executing.
    Panicked { message: String },
}

impl WorkError {
    /// Creates a `Failed` error from any displayable message.
    #[must_use]
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed {
            message: message.to_string(),
        }
    }

    /// Builds a `Panicked` error from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked { message }
    }
}

impl fmt::Display for WorkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { message } => write!(f, "{message}"),
            Self::Panicked { message } => write!(f, "panicked: {message}"),
        }
    }
}

impl std::error::Error for WorkError {}

/// A synchronous, blocking unit of work.
///
/// Implementations must return eventually; no timeout is enforced and a hung
/// call holds one worker slot for as long as it runs.
pub trait UnitOfWork: Send + Sync {
    /// Runs the work once.
    fn execute(&self) -> Result<JsonValue, WorkError>;
}

/// Adapter turning a closure into a [`UnitOfWork`].
pub struct FnWork<F>(F);

impl<F> UnitOfWork for FnWork<F>
where
    F: Fn() -> Result<JsonValue, WorkError> + Send + Sync,
{
    fn execute(&self) -> Result<JsonValue, WorkError> {
        (self.0)()
    }
}

/// Wraps a closure as a shareable unit of work.
pub fn work_fn<F>(f: F) -> Arc<dyn UnitOfWork>
where
    F: Fn() -> Result<JsonValue, WorkError> + Send + Sync + 'static,
{
    Arc::new(FnWork(f))
}

/// Runs a unit of work, converting a panic into [`WorkError::Panicked`].
pub fn execute_caught(work: &dyn UnitOfWork) -> Result<JsonValue, WorkError> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| work.execute()))
        .unwrap_or_else(|payload| Err(WorkError::from_panic(payload.as_ref())))
}
