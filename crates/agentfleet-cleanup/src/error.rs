//! Per-item sweep failures.

use thiserror::Error;

use agentfleet_state::CleanUpAction;

pub type SweepResult<T> = Result<T, SweepError>;

/// One record or worker the sweep could not process. Logged and collected
/// in the report; never propagated out of the sweep.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SweepError {
    #[error("status of deployment {deployment} unavailable: {message}")]
    DeploymentStatus { deployment: String, message: String },

    #[error("failed to delete deployment {deployment}: {message}")]
    DeploymentDelete { deployment: String, message: String },

    #[error("lookup of vm {worker} failed: {message}")]
    VmLookup { worker: String, message: String },

    #[error("{action} of worker {worker} failed: {message}")]
    Action {
        worker: String,
        action: CleanUpAction,
        message: String,
    },
}
