//! Execution engine errors.

use std::fmt::Display;
use std::time::Duration;

use thiserror::Error;

/// Why a task run through the [`ExecutionEngine`](crate::ExecutionEngine) failed.
#[derive(Debug, Error)]
pub enum ExecError<E> {
    /// The last attempt failed and no retries remain (or the error is not retryable).
    #[error("{task} failed after {attempts} attempt(s): {last}")]
    Failed { task: String, attempts: u32, last: E },

    /// The strategy's wall-clock budget ran out.
    #[error("{task} timed out after {elapsed:?}")]
    TimedOut {
        task: String,
        elapsed: Duration,
        last: Option<E>,
    },
}

impl<E> ExecError<E> {
    /// The most recent error returned by the task, if any.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            ExecError::Failed { last, .. } => Some(last),
            ExecError::TimedOut { last, .. } => last.as_ref(),
        }
    }

    /// Consume the error, keeping the most recent task error.
    pub fn into_last_error(self) -> Option<E> {
        match self {
            ExecError::Failed { last, .. } => Some(last),
            ExecError::TimedOut { last, .. } => last,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::TimedOut { .. })
    }
}

impl<E: Display> ExecError<E> {
    /// Short message for status fields: the task error itself when the
    /// attempts ran out, the timeout otherwise.
    pub fn root_message(&self) -> String {
        match self {
            ExecError::Failed { last, .. } => last.to_string(),
            ExecError::TimedOut { last: Some(last), .. } => format!("{self} (last error: {last})"),
            ExecError::TimedOut { .. } => self.to_string(),
        }
    }
}
