//! Compute provider contract: deployments, VMs and their network resources.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use agentfleet_core::{OsType, TemplateSpec};

use crate::credentials::Credentials;
use crate::error::{ProviderResult, ignore_not_found};
use crate::names;

/// Resource type of VM entries in a deployment's operation list.
pub const VM_RESOURCE_TYPE: &str = "Microsoft.Compute/virtualMachines";

/// One batched deployment of `count` VMs named `base_name + index`.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub fleet: String,
    pub resource_group: String,
    pub location: String,
    pub deployment_name: String,
    pub base_name: String,
    pub count: u32,
    pub template: TemplateSpec,
    /// VM administrator credentials, when the template names some.
    pub admin: Option<Credentials>,
    /// Fetchable URL of a staged bootstrap script.
    pub script_url: Option<String>,
    /// Tags applied to every VM in the deployment.
    pub tags: BTreeMap<String, String>,
}

impl DeploymentRequest {
    /// VM names this request will create, in index order.
    pub fn vm_names(&self) -> Vec<String> {
        (0..self.count)
            .map(|i| names::vm_name(&self.base_name, i))
            .collect()
    }
}

/// Provisioning state of a single deployment resource or of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    /// Non-terminal; carries the raw state string ("Running", "Accepted", ...).
    InProgress(String),
    Succeeded,
    Failed,
    Canceled,
    /// Missing or unknown state. Terminal.
    Unspecified,
}

impl ProvisioningState {
    /// Classify a raw provider state string.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "succeeded" => ProvisioningState::Succeeded,
            "failed" => ProvisioningState::Failed,
            "canceled" | "cancelled" => ProvisioningState::Canceled,
            "accepted" | "creating" | "running" | "updating" | "ready" | "deleting" => {
                ProvisioningState::InProgress(raw.trim().to_string())
            }
            _ => ProvisioningState::Unspecified,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProvisioningState::InProgress(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProvisioningState::Succeeded)
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisioningState::InProgress(s) => f.write_str(s),
            ProvisioningState::Succeeded => f.write_str("Succeeded"),
            ProvisioningState::Failed => f.write_str("Failed"),
            ProvisioningState::Canceled => f.write_str("Canceled"),
            ProvisioningState::Unspecified => f.write_str("Unspecified"),
        }
    }
}

/// One entry of a deployment's operation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentOperation {
    pub resource_type: String,
    pub resource_name: String,
    pub state: ProvisioningState,
    pub status_message: Option<String>,
}

/// Top-level status of a remote deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentInfo {
    pub timestamp: SystemTime,
    pub state: ProvisioningState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    Running,
    Stopped,
    Deallocated,
    Unknown,
}

/// VM details needed to build and reach a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmInfo {
    pub name: String,
    pub os_type: OsType,
    pub power_state: PowerState,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub fqdn: Option<String>,
    pub tags: BTreeMap<String, String>,
}

impl VmInfo {
    /// Public FQDN, then public IP, then private IP.
    pub fn reachable_host(&self) -> Option<&str> {
        self.fqdn
            .as_deref()
            .or(self.public_ip.as_deref())
            .or(self.private_ip.as_deref())
    }
}

/// One page of a VM listing.
#[derive(Debug, Clone, Default)]
pub struct VmPage {
    pub vms: Vec<VmInfo>,
    pub next: Option<String>,
}

/// The remote compute control plane. All calls are single attempts; retry
/// belongs to the execution engine.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Submit a batched deployment. Returns once the request is accepted.
    async fn create_deployment(&self, request: &DeploymentRequest) -> ProviderResult<()>;

    async fn deployment_operations(
        &self,
        resource_group: &str,
        deployment_name: &str,
    ) -> ProviderResult<Vec<DeploymentOperation>>;

    async fn deployment_status(
        &self,
        resource_group: &str,
        deployment_name: &str,
    ) -> ProviderResult<DeploymentInfo>;

    async fn delete_deployment(&self, resource_group: &str, deployment_name: &str) -> ProviderResult<()>;

    async fn get_vm(&self, resource_group: &str, vm_name: &str) -> ProviderResult<VmInfo>;

    async fn start_vm(&self, resource_group: &str, vm_name: &str) -> ProviderResult<()>;

    async fn restart_vm(&self, resource_group: &str, vm_name: &str) -> ProviderResult<()>;

    async fn power_off_vm(&self, resource_group: &str, vm_name: &str) -> ProviderResult<()>;

    async fn delete_vm(&self, resource_group: &str, vm_name: &str) -> ProviderResult<()>;

    async fn delete_network_interface(&self, resource_group: &str, nic_name: &str) -> ProviderResult<()>;

    async fn delete_public_ip(&self, resource_group: &str, ip_name: &str) -> ProviderResult<()>;

    async fn list_vms(&self, resource_group: &str, page_token: Option<&str>) -> ProviderResult<VmPage>;

    /// Fleet configuration check: the credentials can act on the resource group.
    async fn verify_credentials(&self, resource_group: &str, credentials: &Credentials) -> ProviderResult<()>;

    async fn image_exists(&self, location: &str, image: &str) -> ProviderResult<bool>;

    async fn network_exists(
        &self,
        resource_group: &str,
        virtual_network: &str,
        subnet: Option<&str>,
    ) -> ProviderResult<bool>;

    /// Storage account name is free or already owned by the resource group.
    async fn storage_account_available(&self, resource_group: &str, account: &str) -> ProviderResult<bool>;
}

/// Delete a VM, then its NIC, then its public IP. Already-gone resources
/// count as deleted, so the whole sequence is safe to repeat.
pub async fn delete_vm_resources(provider: &dyn ComputeProvider, resource_group: &str, vm: &str) -> ProviderResult<()> {
    ignore_not_found(provider.delete_vm(resource_group, vm).await)?;
    ignore_not_found(provider.delete_network_interface(resource_group, &names::nic_name(vm)).await)?;
    ignore_not_found(provider.delete_public_ip(resource_group, &names::public_ip_name(vm)).await)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_states() {
        assert_eq!(ProvisioningState::parse("Succeeded"), ProvisioningState::Succeeded);
        assert_eq!(ProvisioningState::parse("FAILED"), ProvisioningState::Failed);
        assert_eq!(ProvisioningState::parse("Cancelled"), ProvisioningState::Canceled);
        assert_eq!(
            ProvisioningState::parse("Running"),
            ProvisioningState::InProgress("Running".into())
        );
        assert_eq!(ProvisioningState::parse(""), ProvisioningState::Unspecified);
        assert!(ProvisioningState::Unspecified.is_terminal());
        assert!(!ProvisioningState::parse("Accepted").is_terminal());
    }

    #[test]
    fn reachable_host_prefers_public_names() {
        let mut vm = VmInfo {
            name: "vm".into(),
            os_type: OsType::Linux,
            power_state: PowerState::Running,
            private_ip: Some("10.0.0.4".into()),
            public_ip: Some("52.1.2.3".into()),
            fqdn: None,
            tags: BTreeMap::new(),
        };
        assert_eq!(vm.reachable_host(), Some("52.1.2.3"));
        vm.fqdn = Some("vm.westeurope.example".into());
        assert_eq!(vm.reachable_host(), Some("vm.westeurope.example"));
        vm.fqdn = None;
        vm.public_ip = None;
        assert_eq!(vm.reachable_host(), Some("10.0.0.4"));
    }
}
