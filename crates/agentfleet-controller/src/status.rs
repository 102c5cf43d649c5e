//! Serialisable snapshot of the controller.

use serde::Serialize;

use agentfleet_core::TemplateMode;
use agentfleet_provider::NodeView;
use agentfleet_registry::{Fleet, Template};
use agentfleet_state::{DeploymentRecord, WorkerSnapshot};
use agentfleet_verify::TemplateKey;

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub fleets: Vec<FleetStatus>,
    pub pending_fleets: Vec<String>,
    pub pending_templates: Vec<TemplateKey>,
    pub queued_deployments: Vec<DeploymentRecord>,
    pub workers: Vec<WorkerStatus>,
    /// Rollback deletes still running.
    pub background_tasks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FleetStatus {
    pub name: String,
    pub resource_group: String,
    pub worker_count: u32,
    pub max_workers: u32,
    pub configuration_valid: bool,
    pub templates: Vec<TemplateStatusView>,
}

impl FleetStatus {
    pub fn of(fleet: &Fleet) -> Self {
        Self {
            name: fleet.name().to_string(),
            resource_group: fleet.resource_group().to_string(),
            worker_count: fleet.capacity().count(),
            max_workers: fleet.capacity().max_workers(),
            configuration_valid: fleet.capacity().is_configuration_valid(),
            templates: fleet.templates().iter().map(|t| TemplateStatusView::of(t)).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateStatusView {
    pub name: String,
    pub labels: String,
    pub mode: TemplateMode,
    pub verified: bool,
    pub disabled: bool,
    pub status_details: Option<String>,
}

impl TemplateStatusView {
    pub fn of(template: &Template) -> Self {
        let status = template.status();
        Self {
            name: template.name().to_string(),
            labels: template.spec().labels.clone(),
            mode: template.spec().mode,
            verified: status.verified,
            disabled: template.spec().disabled,
            status_details: status.status_details,
        }
    }
}

/// A registered worker with its host-side state.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    #[serde(flatten)]
    pub worker: WorkerSnapshot,
    pub online: bool,
    pub idle: bool,
    pub manually_offline: bool,
}

impl From<NodeView> for WorkerStatus {
    fn from(node: NodeView) -> Self {
        Self {
            worker: node.worker.snapshot(),
            online: node.online,
            idle: node.idle,
            manually_offline: node.manually_offline,
        }
    }
}
