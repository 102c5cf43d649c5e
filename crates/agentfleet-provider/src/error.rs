//! Typed error kinds returned by every collaborator.

use thiserror::Error;

use agentfleet_exec::Retryable;

/// Result type alias for collaborator calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The resource does not exist. Delete paths treat this as success.
    #[error("not found: {0}")]
    NotFound(String),

    /// Conflict, quota or bad request. Never retried blindly.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Throttling, timeouts and generic service errors.
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    /// The message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            ProviderError::NotFound(m)
            | ProviderError::Conflict(m)
            | ProviderError::Transient(m)
            | ProviderError::Fatal(m) => m,
        }
    }
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Map `NotFound` to success for idempotent deletes.
pub fn ignore_not_found(result: ProviderResult<()>) -> ProviderResult<()> {
    match result {
        Err(ProviderError::NotFound(_)) => Ok(()),
        other => other,
    }
}
