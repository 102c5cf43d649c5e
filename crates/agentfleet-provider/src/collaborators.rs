//! The host-side collaborators bundled for injection.

use std::sync::Arc;

use crate::credentials::CredentialStore;
use crate::node::{NodeRegistry, WorkerLauncher};
use crate::staging::ScriptStager;

/// Everything outside the compute provider that the orchestration crates
/// call into. Compute providers are per fleet and live on the fleet.
#[derive(Clone)]
pub struct Collaborators {
    pub nodes: Arc<dyn NodeRegistry>,
    pub launcher: Arc<dyn WorkerLauncher>,
    pub credentials: Arc<dyn CredentialStore>,
    pub stager: Arc<dyn ScriptStager>,
}
