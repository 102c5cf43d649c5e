//! Error types for fleet and template lookups.

use thiserror::Error;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown fleet '{0}'")]
    UnknownFleet(String),

    #[error("unknown template '{template}' in fleet '{fleet}'")]
    UnknownTemplate { fleet: String, template: String },
}
