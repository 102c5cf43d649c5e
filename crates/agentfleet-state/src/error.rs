//! Error types for worker state transitions.

use thiserror::Error;

use crate::worker::CleanUpAction;

/// Result type alias for worker state operations.
pub type WorkerStateResult<T> = Result<T, WorkerStateError>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerStateError {
    /// DEFAULT and BLOCK are set through `clear()` and `block()` only.
    #[error("cleanup action {0} cannot be set explicitly")]
    InvalidAction(CleanUpAction),
}
