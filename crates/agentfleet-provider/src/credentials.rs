//! Credential resolution.

use std::fmt;

use async_trait::async_trait;

use crate::error::ProviderResult;

/// A secret value that never appears in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: Secret,
}

/// Resolves credential ids to usable credentials. Storage is opaque.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `NotFound` when no credential carries the id.
    async fn resolve(&self, id: &str) -> ProviderResult<Credentials>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_redacted() {
        let c = Credentials {
            username: "ci".into(),
            secret: Secret::new("hunter2"),
        };
        let rendered = format!("{c:?}");
        assert!(rendered.contains("ci"));
        assert!(!rendered.contains("hunter2"));
        assert_eq!(c.secret.expose(), "hunter2");
    }
}
