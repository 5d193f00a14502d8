//! Core types shared across the adpulse orchestration crates.
//!
//! - `Result`: rootcause-backed result alias
//! - Ids for workflow runs and scheduler fires
//! - The `UnitOfWork` contract every job implements

pub mod error;
pub mod id;
pub mod work;

pub use error::Result;
pub use id::{FireId, ParseIdError, WorkflowRunId};
pub use work::{FnWork, UnitOfWork, WorkError, execute_caught, work_fn};
