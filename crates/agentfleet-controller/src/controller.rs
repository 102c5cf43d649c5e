//! The fleet controller and the operations it exposes.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info};

use agentfleet_cleanup::{CleanupSweep, SweepReport};
use agentfleet_core::{FleetSpec, Settings};
use agentfleet_deploy::{DeploymentOrchestrator, PlannedUnit};
use agentfleet_exec::ExecutionEngine;
use agentfleet_provider::{Collaborators, ComputeProvider};
use agentfleet_registry::{Fleet, FleetRegistry, RegistryResult, Template, number_of_agents};
use agentfleet_state::{DeploymentQueue, DeploymentRecord};
use agentfleet_verify::{VerificationGate, VerificationReport};

use crate::status::{ControllerStatus, FleetStatus, WorkerStatus};

/// Owns the fleet registry, the deployment queue, the verification gate,
/// the orchestrator and the sweep. Shared as `Arc<FleetController>`.
pub struct FleetController {
    settings: Settings,
    collab: Collaborators,
    exec: ExecutionEngine,
    fleets: Arc<FleetRegistry>,
    queue: Arc<DeploymentQueue>,
    gate: Arc<VerificationGate>,
    orchestrator: DeploymentOrchestrator,
    sweep: CleanupSweep,
}

impl FleetController {
    /// Build a controller whose retry engine follows `settings.retry`.
    pub fn new(settings: Settings, collab: Collaborators) -> Self {
        let exec = ExecutionEngine::from_settings(&settings.retry);
        Self::with_engine(settings, collab, exec)
    }

    pub fn with_engine(settings: Settings, collab: Collaborators, exec: ExecutionEngine) -> Self {
        let fleets = Arc::new(FleetRegistry::new());
        let queue = Arc::new(DeploymentQueue::new());
        let gate = Arc::new(VerificationGate::new(
            fleets.clone(),
            collab.credentials.clone(),
            exec.clone(),
            settings.provisioning.check_timeout,
        ));
        let orchestrator = DeploymentOrchestrator::new(
            collab.clone(),
            gate.clone(),
            queue.clone(),
            exec.clone(),
            settings.provisioning.clone(),
        );
        let sweep = CleanupSweep::new(
            fleets.clone(),
            collab.nodes.clone(),
            queue.clone(),
            exec.clone(),
            settings.sweep.clone(),
        );

        Self {
            settings,
            collab,
            exec,
            fleets,
            queue,
            gate,
            orchestrator,
            sweep,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn fleets(&self) -> &Arc<FleetRegistry> {
        &self.fleets
    }

    pub fn queue(&self) -> &Arc<DeploymentQueue> {
        &self.queue
    }

    pub fn gate(&self) -> &Arc<VerificationGate> {
        &self.gate
    }

    pub fn exec(&self) -> &ExecutionEngine {
        &self.exec
    }

    // ── configuration ──────────────────────────────────────────────

    /// Load (or reload) a fleet. Its configuration starts unverified and it
    /// is queued for verification together with all of its templates.
    /// Queued deployment records and pending checks of other fleets survive.
    pub fn add_fleet(&self, spec: FleetSpec, provider: Arc<dyn ComputeProvider>) -> Arc<Fleet> {
        let fleet = self.fleets.insert(Fleet::new(spec, provider));
        self.gate.register_fleet(fleet.name());
        self.gate.register_templates(fleet.templates());
        fleet
    }

    pub fn remove_fleet(&self, name: &str) -> Option<Arc<Fleet>> {
        self.fleets.remove(name)
    }

    // ── provisioning ───────────────────────────────────────────────

    /// Provision for `workload` jobs carrying `label` on the first fleet, in
    /// declaration order, whose configuration is valid and which resolves
    /// an eligible template. Declining returns no units.
    pub fn provision(&self, label: Option<&str>, workload: u32) -> Vec<PlannedUnit> {
        for fleet in self.fleets.list() {
            if let Some(units) = self.provision_fleet(&fleet, label, workload) {
                return units;
            }
        }
        debug!(label = label.unwrap_or(""), workload, "no fleet can serve workload");
        Vec::new()
    }

    /// Provision on one named fleet.
    pub fn provision_on(&self, fleet: &str, label: Option<&str>, workload: u32) -> RegistryResult<Vec<PlannedUnit>> {
        let fleet = self.fleets.require(fleet)?;
        Ok(self.provision_fleet(&fleet, label, workload).unwrap_or_default())
    }

    /// `None` when the fleet cannot serve the label at all.
    fn provision_fleet(&self, fleet: &Arc<Fleet>, label: Option<&str>, workload: u32) -> Option<Vec<PlannedUnit>> {
        if !fleet.capacity().is_configuration_valid() {
            debug!(fleet = %fleet.name(), "fleet configuration not verified, skipping");
            return None;
        }
        let template = fleet.resolve_template(label)?;
        let count = number_of_agents(workload, template.spec().parallelism);
        info!(
            fleet = %fleet.name(),
            template = %template.name(),
            label = label.unwrap_or(""),
            workload,
            count,
            "provisioning workers"
        );
        Some(self.orchestrator.provision(fleet, &template, count))
    }

    /// Queue a remote deployment for the cleanup sweep.
    pub fn register_deployment(&self, fleet: &str, resource_group: &str, deployment_name: &str) {
        self.queue.push(DeploymentRecord::new(
            fleet,
            resource_group,
            deployment_name,
            SystemTime::now(),
        ));
        debug!(fleet = %fleet, deployment = %deployment_name, "deployment registered for cleanup");
    }

    pub fn register_fleet(&self, name: &str) {
        self.gate.register_fleet(name);
    }

    pub fn register_template(&self, template: &Template) {
        self.gate.register_template(template);
    }

    pub fn register_templates<'a>(&self, templates: impl IntoIterator<Item = &'a Arc<Template>>) {
        self.gate.register_templates(templates);
    }

    // ── background passes ──────────────────────────────────────────

    pub async fn run_cleanup_sweep(&self) -> SweepReport {
        self.sweep.run(SystemTime::now()).await
    }

    /// Run the sweep as of a given instant.
    pub async fn run_cleanup_sweep_at(&self, now: SystemTime) -> SweepReport {
        self.sweep.run(now).await
    }

    pub async fn run_verification_pass(&self) -> VerificationReport {
        self.gate.run_pass().await
    }

    /// Wait for background rollback deletes to finish.
    pub async fn quiesce(&self) {
        self.exec.quiesce().await;
    }

    // ── status ─────────────────────────────────────────────────────

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            fleets: self.fleets.list().iter().map(|f| FleetStatus::of(f)).collect(),
            pending_fleets: self.gate.pending_fleets(),
            pending_templates: self.gate.pending_templates(),
            queued_deployments: self.queue.snapshot(),
            workers: self
                .collab
                .nodes
                .nodes()
                .into_iter()
                .map(WorkerStatus::from)
                .collect(),
            background_tasks: self.exec.pending_background(),
        }
    }
}
