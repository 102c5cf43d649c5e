//! Cleanup sweep: deployment retention, idle retention and worker actions.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};

use agentfleet_core::{SweepSettings, format_duration};
use agentfleet_exec::ExecutionEngine;
use agentfleet_provider::{
    DeploymentInfo, NodeRegistry, NodeView, PowerState, ProviderError, ProvisioningState, VmInfo,
    delete_vm_resources, ignore_not_found,
};
use agentfleet_registry::{Fleet, FleetRegistry};
use agentfleet_state::{CleanUpAction, DeploymentQueue, DeploymentRecord, Worker};

use crate::error::{SweepError, SweepResult};

/// Offline reason recorded by the idle retention pass.
pub const IDLE_TIMEOUT_REASON: &str = "idle timeout reached";

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub deployments_deleted: Vec<String>,
    pub deployments_kept: usize,
    /// Records discarded without deleting anything (fleet or deployment gone, or an error).
    pub deployments_dropped: usize,
    pub workers_idled_out: Vec<String>,
    pub workers_shut_down: Vec<String>,
    pub workers_deleted: Vec<String>,
    /// Workers whose VM had already disappeared.
    pub workers_deregistered: Vec<String>,
    pub errors: Vec<String>,
}

impl SweepReport {
    fn fail(&mut self, error: SweepError) {
        warn!(error = %error, "cleanup item failed");
        self.errors.push(error.to_string());
    }
}

/// Whether a deployment in `state` and `age` old is past retention.
pub fn retention_expired(state: &ProvisioningState, age: Duration, settings: &SweepSettings) -> bool {
    if state.is_success() {
        age > settings.success_retention
    } else {
        age > settings.failure_retention
    }
}

enum Disposition {
    Deleted,
    Keep,
    Drop,
}

/// Reconciles remote state against the in-memory model.
pub struct CleanupSweep {
    fleets: Arc<FleetRegistry>,
    nodes: Arc<dyn NodeRegistry>,
    queue: Arc<DeploymentQueue>,
    exec: ExecutionEngine,
    settings: SweepSettings,
}

impl CleanupSweep {
    pub fn new(
        fleets: Arc<FleetRegistry>,
        nodes: Arc<dyn NodeRegistry>,
        queue: Arc<DeploymentQueue>,
        exec: ExecutionEngine,
        settings: SweepSettings,
    ) -> Self {
        Self {
            fleets,
            nodes,
            queue,
            exec,
            settings,
        }
    }

    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    /// Run every pass once, as of `now`.
    pub async fn run(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();
        self.sweep_deployments(now, &mut report).await;
        self.sweep_idle(now, &mut report);
        self.sweep_workers(&mut report).await;
        info!(
            deployments_deleted = report.deployments_deleted.len(),
            deployments_kept = report.deployments_kept,
            workers_idled_out = report.workers_idled_out.len(),
            workers_shut_down = report.workers_shut_down.len(),
            workers_deleted = report.workers_deleted.len(),
            workers_deregistered = report.workers_deregistered.len(),
            errors = report.errors.len(),
            "cleanup sweep finished"
        );
        report
    }

    // ── deployments ────────────────────────────────────────────────

    /// Visit each queued record at most once. The first record re-enqueued
    /// becomes the sentinel; meeting it again ends the pass.
    pub async fn sweep_deployments(&self, now: SystemTime, report: &mut SweepReport) {
        let mut sentinel: Option<(String, String)> = None;

        while let Some(record) = self.queue.pop_front() {
            let key = (record.resource_group.clone(), record.deployment_name.clone());
            if sentinel.as_ref() == Some(&key) {
                self.queue.push(record);
                break;
            }

            match self.process_record(&record, now).await {
                Ok(Disposition::Deleted) => report.deployments_deleted.push(record.deployment_name),
                Ok(Disposition::Keep) => {
                    sentinel.get_or_insert(key);
                    report.deployments_kept += 1;
                    self.queue.push(record);
                }
                Ok(Disposition::Drop) => report.deployments_dropped += 1,
                Err(e) => {
                    report.deployments_dropped += 1;
                    report.fail(e);
                }
            }
        }
    }

    async fn process_record(&self, record: &DeploymentRecord, now: SystemTime) -> SweepResult<Disposition> {
        let Some(fleet) = self.fleets.get(&record.fleet) else {
            debug!(fleet = %record.fleet, deployment = %record.deployment_name, "fleet gone, dropping deployment record");
            return Ok(Disposition::Drop);
        };

        let provider = fleet.provider().as_ref();
        let rg = record.resource_group.as_str();
        let name = record.deployment_name.as_str();
        let strategy = self.exec.default_strategy().clone();

        let status = self
            .exec
            .execute_with_retry("deployment status", &strategy, move || provider.deployment_status(rg, name))
            .await;
        let DeploymentInfo { timestamp, state } = match status {
            Ok(info) => info,
            Err(e) if matches!(e.last_error(), Some(ProviderError::NotFound(_))) => {
                debug!(deployment = %name, "deployment already gone");
                return Ok(Disposition::Drop);
            }
            Err(e) => {
                return Err(SweepError::DeploymentStatus {
                    deployment: name.to_string(),
                    message: e.root_message(),
                });
            }
        };

        let age = now.duration_since(timestamp).unwrap_or_default();
        if !retention_expired(&state, age, &self.settings) {
            return Ok(Disposition::Keep);
        }

        self.exec
            .execute_with_retry("delete deployment", &strategy, move || async move {
                ignore_not_found(provider.delete_deployment(rg, name).await)
            })
            .await
            .map_err(|e| SweepError::DeploymentDelete {
                deployment: name.to_string(),
                message: e.root_message(),
            })?;

        info!(fleet = %record.fleet, deployment = %name, %state, age = %format_duration(age), "deleted stale deployment");
        Ok(Disposition::Deleted)
    }

    // ── idle retention ─────────────────────────────────────────────

    /// Take online workers offline once idle past their template retention.
    /// Their cleanup action stays DEFAULT so the worker pass reclaims them.
    pub fn sweep_idle(&self, now: SystemTime, report: &mut SweepReport) {
        for node in self.nodes.nodes() {
            if !node.online || !node.idle || node.worker.action() == CleanUpAction::Block {
                continue;
            }
            let retention = node.worker.identity().retention;
            if retention.is_zero() {
                continue;
            }
            let Some(since) = node.idle_since else {
                continue;
            };
            let idle_for = now.duration_since(since).unwrap_or_default();
            if idle_for <= retention {
                continue;
            }

            info!(
                fleet = %node.worker.fleet(),
                worker = %node.worker.name(),
                idle = %format_duration(idle_for),
                "idle retention reached, taking worker offline"
            );
            self.nodes.take_offline(node.worker.name(), IDLE_TIMEOUT_REASON);
            report.workers_idled_out.push(node.worker.name().to_string());
        }
    }

    // ── workers ────────────────────────────────────────────────────

    pub async fn sweep_workers(&self, report: &mut SweepReport) {
        for node in self.nodes.nodes() {
            if !is_candidate(&node) {
                continue;
            }
            let worker = node.worker;
            let Some(action) = worker.effective_action() else {
                continue;
            };
            let Some(fleet) = self.fleets.get(worker.fleet()) else {
                debug!(fleet = %worker.fleet(), worker = %worker.name(), "fleet gone, leaving worker alone");
                continue;
            };

            if let Err(e) = self.reclaim(&fleet, &worker, action, report).await {
                report.fail(e);
            }
        }
    }

    async fn reclaim(
        &self,
        fleet: &Fleet,
        worker: &Arc<Worker>,
        action: CleanUpAction,
        report: &mut SweepReport,
    ) -> SweepResult<()> {
        let Some(vm) = self.lookup_vm(fleet, worker).await? else {
            if self.nodes.remove_node(worker.name()) {
                fleet.capacity().release(1);
            }
            info!(fleet = %fleet.name(), worker = %worker.name(), "vm gone, worker deregistered");
            report.workers_deregistered.push(worker.name().to_string());
            return Ok(());
        };

        // Already powered off and waiting for the reuse path.
        if action == CleanUpAction::Shutdown && vm.power_state != PowerState::Running && worker.is_eligible_for_reuse()
        {
            return Ok(());
        }

        let provider = fleet.provider().as_ref();
        let rg = fleet.resource_group();
        let name = worker.name();
        let strategy = self.exec.default_strategy().clone();

        let outcome = match action {
            CleanUpAction::Shutdown => self
                .exec
                .execute_with_retry("power off vm", &strategy, move || provider.power_off_vm(rg, name))
                .await
                .map(|()| {
                    worker.set_eligible_for_reuse(true);
                    info!(fleet = %fleet.name(), worker = %name, "worker shut down");
                    report.workers_shut_down.push(name.to_string());
                }),
            _ => self
                .exec
                .execute_with_retry("delete worker resources", &strategy, move || {
                    delete_vm_resources(provider, rg, name)
                })
                .await
                .map(|()| {
                    if self.nodes.remove_node(name) {
                        fleet.capacity().release(1);
                    }
                    info!(fleet = %fleet.name(), worker = %name, "worker deleted");
                    report.workers_deleted.push(name.to_string());
                }),
        };

        outcome.map_err(|e| {
            let message = e.root_message();
            // Force DELETE so a failing action cannot wedge the worker.
            if let Err(state_err) = worker.set_action(CleanUpAction::Delete, format!("{action} failed: {message}")) {
                warn!(worker = %name, error = %state_err, "could not force delete");
            }
            SweepError::Action {
                worker: name.to_string(),
                action,
                message,
            }
        })
    }

    /// `Ok(None)` when the VM no longer exists.
    async fn lookup_vm(&self, fleet: &Fleet, worker: &Worker) -> SweepResult<Option<VmInfo>> {
        let provider = fleet.provider().as_ref();
        let rg = fleet.resource_group();
        let name = worker.name();
        let strategy = self.exec.default_strategy().clone();
        match self
            .exec
            .execute_with_retry("get vm", &strategy, move || provider.get_vm(rg, name))
            .await
        {
            Ok(vm) => Ok(Some(vm)),
            Err(e) if matches!(e.last_error(), Some(ProviderError::NotFound(_))) => Ok(None),
            Err(e) => Err(SweepError::VmLookup {
                worker: name.to_string(),
                message: e.root_message(),
            }),
        }
    }
}

fn is_candidate(node: &NodeView) -> bool {
    !node.online && node.idle && !node.manually_offline
}
