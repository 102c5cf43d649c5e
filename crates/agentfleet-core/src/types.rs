//! Resolved fleet and template specifications shared across agentfleet crates.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a worker is brought online once its VM is reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMethod {
    /// The controller connects out to the worker.
    Push,
    /// The worker calls back to the controller.
    Pull,
}

impl fmt::Display for LaunchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchMethod::Push => f.write_str("push"),
            LaunchMethod::Pull => f.write_str("pull"),
        }
    }
}

/// Which workload labels a template may serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateMode {
    /// Serves any workload, labelled or not.
    #[default]
    Always,
    /// Serves only workloads that explicitly ask for its label.
    Exclusive,
}

/// Guest operating system of a worker VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsType {
    #[default]
    Linux,
    Windows,
}

/// Existing virtual network a template attaches its workers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub virtual_network: String,
    pub subnet: Option<String>,
}

/// A worker template: what to deploy and how to bring it online.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSpec {
    pub name: String,
    /// Whitespace-separated label string.
    pub labels: String,
    pub mode: TemplateMode,
    pub image: String,
    pub vm_size: String,
    pub os_type: OsType,
    pub launch_method: LaunchMethod,
    /// Maximum concurrent jobs per worker.
    pub parallelism: u32,
    /// Idle time before an online worker is reclaimed. Zero disables it.
    pub retention: Duration,
    /// Power idle workers off instead of deleting them.
    pub shutdown_on_idle: bool,
    pub disabled: bool,
    pub admin_credentials_id: Option<String>,
    /// Bootstrap script staged for pull-mode workers.
    pub init_script: Option<String>,
    pub storage_account: Option<String>,
    pub network: Option<NetworkSpec>,
}

/// A fleet ("cloud"): one resource group, one credential, one ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct FleetSpec {
    pub name: String,
    pub resource_group: String,
    pub credentials_id: String,
    pub location: String,
    pub max_workers: u32,
    pub deployment_timeout: Duration,
    /// Templates in declaration order.
    pub templates: Vec<TemplateSpec>,
}

impl FleetSpec {
    /// Look up a template by name.
    pub fn template(&self, name: &str) -> Option<&TemplateSpec> {
        self.templates.iter().find(|t| t.name == name)
    }
}

/// Timing for the provisioning path.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningSettings {
    /// Interval between deployment-operation polls.
    pub poll_interval: Duration,
    /// Upper bound on the pull-mode online wait.
    pub online_timeout: Duration,
    /// Per-check timeout in the verification gate.
    pub check_timeout: Duration,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            online_timeout: Duration::from_secs(30 * 60),
            check_timeout: Duration::from_secs(60),
        }
    }
}

/// Periods and retention thresholds for the background sweeps.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSettings {
    pub cleanup_interval: Duration,
    pub verification_interval: Duration,
    /// Age after which a SUCCEEDED deployment record is deleted.
    pub success_retention: Duration,
    /// Age after which any other deployment record is deleted.
    pub failure_retention: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(15 * 60),
            verification_interval: Duration::from_secs(5 * 60),
            success_retention: Duration::from_secs(60 * 60),
            failure_retention: Duration::from_secs(8 * 60 * 60),
        }
    }
}

/// Backoff parameters for remote calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(60),
            max_elapsed: Duration::from_secs(5 * 60),
        }
    }
}
