//! Provisioning failures observed by a single planned unit.

use std::time::Duration;

use thiserror::Error;

use agentfleet_core::format_duration;

/// Result type alias for provisioning a single unit.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Why a planned unit failed. `Clone` so one submission failure can reach
/// every unit of the batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    /// The deployment request was never accepted; no VM exists.
    #[error("deployment {deployment} was not submitted: {message}")]
    Submission { deployment: String, message: String },

    /// The VM resource reached a terminal failure state.
    #[error("vm {vm} failed to deploy: {message}")]
    DeploymentFailed { vm: String, message: String },

    #[error("vm {vm} did not finish deploying within {}", human(.waited))]
    DeploymentTimeout { vm: String, waited: Duration },

    #[error("worker {vm} did not come online within {}", human(.waited))]
    OnlineTimeout { vm: String, waited: Duration },

    #[error("worker {vm} bring-up failed: {message}")]
    BringUp { vm: String, message: String },

    #[error("vm {vm} no longer exists")]
    VmGone { vm: String },

    #[error("provisioning of {vm} was cancelled")]
    Cancelled { vm: String },

    #[error("provisioning task for {vm} aborted: {message}")]
    Aborted { vm: String, message: String },
}

fn human(d: &Duration) -> String {
    format_duration(*d)
}

impl ProvisionError {
    /// Failure before any VM was created; no cloud resources to roll back.
    pub fn is_pre_creation(&self) -> bool {
        matches!(self, ProvisionError::Submission { .. })
    }
}
