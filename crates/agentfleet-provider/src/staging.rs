//! Bootstrap script staging.

use async_trait::async_trait;

use crate::error::ProviderResult;

/// Uploads a bootstrap script and returns a URL the VM can fetch it from.
#[async_trait]
pub trait ScriptStager: Send + Sync {
    async fn upload(
        &self,
        storage_account: Option<&str>,
        name: &str,
        content: &str,
    ) -> ProviderResult<String>;
}
