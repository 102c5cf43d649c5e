//! agentfleet-provider: the interfaces agentfleet orchestrates over.
//!
//! Nothing in this crate talks to a real cloud. It defines the seams the
//! orchestration crates are written against:
//!
//! ```text
//! ComputeProvider   deployments, deployment operations, VMs, NICs, IPs, sanity checks
//! CredentialStore   credential id -> {username, secret}
//! ScriptStager      bootstrap script -> fetchable URL
//! NodeRegistry      the host's live node set (sync, thread-safe)
//! WorkerLauncher    push connect / pull online wait
//! ```
//!
//! Errors are classified into [`ProviderError`] kinds so callers pattern
//! match on `NotFound`/`Conflict`/`Transient`/`Fatal` instead of inspecting
//! messages. With the `sim` feature, [`sim`] provides scriptable in-memory
//! implementations of every trait.

pub mod collaborators;
pub mod compute;
pub mod credentials;
pub mod error;
pub mod names;
pub mod node;
pub mod staging;

#[cfg(feature = "sim")]
pub mod sim;

pub use collaborators::Collaborators;
pub use compute::{
    ComputeProvider, delete_vm_resources, DeploymentInfo, DeploymentOperation, DeploymentRequest, PowerState,
    ProvisioningState, VmInfo, VmPage, VM_RESOURCE_TYPE,
};
pub use credentials::{CredentialStore, Credentials, Secret};
pub use error::{ProviderError, ProviderResult, ignore_not_found};
pub use node::{NodeRegistry, NodeView, WorkerLauncher};
pub use staging::ScriptStager;
