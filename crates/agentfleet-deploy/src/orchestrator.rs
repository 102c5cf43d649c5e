//! Deployment orchestrator: reuse, batched creation, per-unit bring-up and
//! rollback.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use agentfleet_core::{LaunchMethod, OsType, ProvisioningSettings};
use agentfleet_exec::ExecutionEngine;
use agentfleet_provider::names::{self, FLEET_TAG, TEMPLATE_TAG};
use agentfleet_provider::{
    Collaborators, DeploymentRequest, PowerState, ProviderError, ProvisioningState, VM_RESOURCE_TYPE, VmInfo,
    delete_vm_resources,
};
use agentfleet_registry::{Fleet, Template};
use agentfleet_state::{DeploymentQueue, DeploymentRecord, Endpoint, Worker, WorkerIdentity};
use agentfleet_verify::VerificationGate;

use crate::error::{ProvisionError, ProvisionResult};
use crate::unit::{PlannedUnit, cancelled};

/// Port push-mode connections target.
const CONNECT_PORT: u16 = 22;

/// An accepted batched deployment.
#[derive(Debug)]
struct Submitted {
    deployment_name: String,
}

type SubmitResult = Result<Arc<Submitted>, ProvisionError>;
type SharedSubmit = Shared<BoxFuture<'static, SubmitResult>>;

/// Provisions workers for one template at a time.
///
/// Cheap to clone; every unit task holds its own clone.
#[derive(Clone)]
pub struct DeploymentOrchestrator {
    collab: Collaborators,
    gate: Arc<VerificationGate>,
    queue: Arc<DeploymentQueue>,
    exec: ExecutionEngine,
    settings: ProvisioningSettings,
}

impl DeploymentOrchestrator {
    pub fn new(
        collab: Collaborators,
        gate: Arc<VerificationGate>,
        queue: Arc<DeploymentQueue>,
        exec: ExecutionEngine,
        settings: ProvisioningSettings,
    ) -> Self {
        Self {
            collab,
            gate,
            queue,
            exec,
            settings,
        }
    }

    /// Plan `count` workers from `template`: reuse idle ones first, then
    /// create as many as capacity grants in one deployment.
    ///
    /// Returns fewer units than requested when capacity runs out. Must be
    /// called inside a tokio runtime.
    pub fn provision(&self, fleet: &Arc<Fleet>, template: &Arc<Template>, count: u32) -> Vec<PlannedUnit> {
        let mut units = self.reuse_pass(fleet, template, count);
        let remaining = count.saturating_sub(units.len() as u32);
        if remaining == 0 {
            return units;
        }

        let granted = fleet.capacity().reserve(remaining);
        if granted == 0 {
            info!(fleet = %fleet.name(), template = %template.name(), requested = remaining, "no capacity left, declining");
            return units;
        }

        units.extend(self.deploy_new(fleet, template, granted));
        units
    }

    // ── reuse ──────────────────────────────────────────────────────

    fn reuse_pass(&self, fleet: &Arc<Fleet>, template: &Arc<Template>, count: u32) -> Vec<PlannedUnit> {
        let mut units = Vec::new();
        if count == 0 {
            return units;
        }

        for node in self.collab.nodes.nodes() {
            if units.len() as u32 >= count {
                break;
            }
            let worker = &node.worker;
            if node.online
                || node.manually_offline
                || worker.fleet() != fleet.name()
                || !worker.matches_template_labels(&template.spec().labels)
            {
                continue;
            }
            if !worker.claim_for_reuse() {
                continue;
            }
            // Block before the revive task first runs so a sweep never sees
            // a claimed worker as reclaimable.
            worker.block();

            debug!(fleet = %fleet.name(), template = %template.name(), worker = %worker.name(), "reusing worker");
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let handle = tokio::spawn(self.clone().revive(fleet.clone(), worker.clone(), cancel_rx));
            units.push(PlannedUnit::new(
                worker.name().to_string(),
                fleet.name().to_string(),
                template.name().to_string(),
                true,
                cancel_tx,
                handle,
            ));
        }
        units
    }

    async fn revive(
        self,
        fleet: Arc<Fleet>,
        worker: Arc<Worker>,
        mut cancel: watch::Receiver<bool>,
    ) -> ProvisionResult<Arc<Worker>> {
        match self.restart_existing(&fleet, &worker, &mut cancel).await {
            Ok(()) => {
                worker.clear();
                worker.set_eligible_for_reuse(false);
                info!(fleet = %fleet.name(), worker = %worker.name(), "reused worker online");
                Ok(worker)
            }
            Err(e) => {
                warn!(fleet = %fleet.name(), worker = %worker.name(), error = %e, "worker reuse failed");
                worker.clear_with_reason(format!("reuse failed: {e}"));
                Err(e)
            }
        }
    }

    async fn restart_existing(
        &self,
        fleet: &Fleet,
        worker: &Arc<Worker>,
        cancel: &mut watch::Receiver<bool>,
    ) -> ProvisionResult<()> {
        let vm = worker.name();
        let info = self.fetch_vm(fleet, vm).await?;

        let provider = fleet.provider().as_ref();
        let rg = fleet.resource_group();
        let strategy = self.exec.default_strategy().clone();
        let restarted = if info.power_state == PowerState::Running {
            self.exec
                .execute_with_retry("restart vm", &strategy, move || provider.restart_vm(rg, vm))
                .await
        } else {
            self.exec
                .execute_with_retry("start vm", &strategy, move || provider.start_vm(rg, vm))
                .await
        };
        restarted.map_err(|e| ProvisionError::BringUp {
            vm: vm.to_string(),
            message: e.root_message(),
        })?;

        // Addresses may change across a power cycle.
        let info = self.fetch_vm(fleet, vm).await?;
        if let Some(endpoint) = endpoint_for(&info) {
            worker.set_endpoint(endpoint);
        }

        self.collab.nodes.add_node(worker.clone());
        self.bring_online(worker, cancel).await
    }

    // ── new deployments ────────────────────────────────────────────

    fn deploy_new(&self, fleet: &Arc<Fleet>, template: &Arc<Template>, granted: u32) -> Vec<PlannedUnit> {
        let deployment_name = names::deployment_name(template.name());
        let base_name = names::base_vm_name(template.name());

        let submit: SharedSubmit = {
            let this = self.clone();
            let fleet = fleet.clone();
            let template = template.clone();
            let deployment = deployment_name.clone();
            let base = base_name.clone();
            let task = tokio::spawn(async move { this.submit(&fleet, &template, deployment, base, granted).await });

            let deployment = deployment_name.clone();
            task.map(move |joined| {
                joined.unwrap_or_else(|e| {
                    Err(ProvisionError::Submission {
                        deployment,
                        message: e.to_string(),
                    })
                })
            })
            .boxed()
            .shared()
        };

        (0..granted)
            .map(|index| {
                let vm = names::vm_name(&base_name, index);
                let (cancel_tx, cancel_rx) = watch::channel(false);
                let handle = tokio::spawn(self.clone().bring_up_new(
                    fleet.clone(),
                    template.clone(),
                    submit.clone(),
                    vm.clone(),
                    cancel_rx,
                ));
                PlannedUnit::new(
                    vm,
                    fleet.name().to_string(),
                    template.name().to_string(),
                    false,
                    cancel_tx,
                    handle,
                )
            })
            .collect()
    }

    /// Stage the bootstrap script, submit the batched deployment and enqueue
    /// its record for the cleanup sweep.
    async fn submit(
        &self,
        fleet: &Fleet,
        template: &Template,
        deployment_name: String,
        base_name: String,
        count: u32,
    ) -> SubmitResult {
        let spec = template.spec();
        let strategy = self.exec.default_strategy().clone();
        let fail = |message: String| ProvisionError::Submission {
            deployment: deployment_name.clone(),
            message,
        };

        let admin = match spec.admin_credentials_id.as_deref() {
            Some(id) => {
                let store = self.collab.credentials.as_ref();
                let creds = self
                    .exec
                    .execute_with_retry("resolve admin credentials", &strategy, move || store.resolve(id))
                    .await
                    .map_err(|e| fail(format!("admin credentials: {}", e.root_message())))?;
                Some(creds)
            }
            None => None,
        };

        let script_url = match (spec.launch_method, spec.init_script.as_deref()) {
            (LaunchMethod::Pull, Some(script)) => {
                let stager = self.collab.stager.as_ref();
                let account = spec.storage_account.as_deref();
                let file = script_file_name(&deployment_name, spec.os_type);
                let file = file.as_str();
                let url = self
                    .exec
                    .execute_with_retry("stage init script", &strategy, move || stager.upload(account, file, script))
                    .await
                    .map_err(|e| fail(format!("init script: {}", e.root_message())))?;
                Some(url)
            }
            _ => None,
        };

        let request = DeploymentRequest {
            fleet: fleet.name().to_string(),
            resource_group: fleet.resource_group().to_string(),
            location: fleet.spec().location.clone(),
            deployment_name: deployment_name.clone(),
            base_name,
            count,
            template: spec.clone(),
            admin,
            script_url,
            tags: BTreeMap::from([
                (FLEET_TAG.to_string(), fleet.name().to_string()),
                (TEMPLATE_TAG.to_string(), template.name().to_string()),
            ]),
        };

        let provider = fleet.provider().as_ref();
        let req = &request;
        let outcome = self
            .exec
            .execute_with_retry("create deployment", &strategy, move || provider.create_deployment(req))
            .await;

        // A rejected submission can still leave a remote record behind.
        self.queue.push(DeploymentRecord::new(
            fleet.name(),
            fleet.resource_group(),
            &deployment_name,
            SystemTime::now(),
        ));

        match outcome {
            Ok(()) => {
                info!(fleet = %fleet.name(), template = %template.name(), deployment = %deployment_name, count, "deployment submitted");
                Ok(Arc::new(Submitted {
                    deployment_name: deployment_name.clone(),
                }))
            }
            Err(e) => {
                let message = e.root_message();
                error!(fleet = %fleet.name(), template = %template.name(), deployment = %deployment_name, error = %message, "deployment submission failed");
                Err(fail(message))
            }
        }
    }

    async fn bring_up_new(
        self,
        fleet: Arc<Fleet>,
        template: Arc<Template>,
        submit: SharedSubmit,
        vm: String,
        mut cancel: watch::Receiver<bool>,
    ) -> ProvisionResult<Arc<Worker>> {
        let submitted = match submit.await {
            Ok(s) => s,
            Err(e) => {
                // Nothing was created; only the reservation and the template need fixing.
                fleet.capacity().release(1);
                self.flag_template(&template, &e);
                return Err(e);
            }
        };

        match self
            .complete_new(&fleet, &template, &submitted, &vm, &mut cancel)
            .await
        {
            Ok(worker) => Ok(worker),
            Err(e) => {
                self.compensate(&fleet, &template, &vm, &e);
                Err(e)
            }
        }
    }

    async fn complete_new(
        &self,
        fleet: &Fleet,
        template: &Template,
        submitted: &Submitted,
        vm: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> ProvisionResult<Arc<Worker>> {
        self.await_vm(fleet, &submitted.deployment_name, vm, cancel)
            .await?;
        let info = self.fetch_vm(fleet, vm).await?;

        let spec = template.spec();
        let worker = Arc::new(Worker::new(WorkerIdentity {
            name: vm.to_string(),
            fleet: fleet.name().to_string(),
            template: template.name().to_string(),
            deployment_name: submitted.deployment_name.clone(),
            resource_group: fleet.resource_group().to_string(),
            launch_method: spec.launch_method,
            labels: spec.labels.clone(),
            mode: spec.mode,
            os_type: info.os_type,
            retention: spec.retention,
            shutdown_on_idle: spec.shutdown_on_idle,
        }));

        match endpoint_for(&info) {
            Some(endpoint) => worker.set_endpoint(endpoint),
            None if spec.launch_method == LaunchMethod::Push => {
                return Err(ProvisionError::BringUp {
                    vm: vm.to_string(),
                    message: "vm has no reachable address".into(),
                });
            }
            None => {}
        }

        worker.block();
        self.collab.nodes.add_node(worker.clone());
        self.bring_online(&worker, cancel).await?;

        worker.clear();
        worker.set_eligible_for_reuse(false);
        info!(fleet = %fleet.name(), template = %template.name(), worker = %vm, "worker online");
        Ok(worker)
    }

    /// Poll the deployment's operation list until this unit's VM resource
    /// reaches a terminal state or the poll budget runs out.
    async fn await_vm(
        &self,
        fleet: &Fleet,
        deployment: &str,
        vm: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> ProvisionResult<()> {
        let interval = self.settings.poll_interval;
        let budget = fleet.spec().deployment_timeout;
        let tries = (budget.as_millis() / interval.as_millis().max(1)).max(1);

        let provider = fleet.provider().as_ref();
        let rg = fleet.resource_group();
        let strategy = self.exec.default_strategy().clone();

        for attempt in 1..=tries {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancelled(cancel) => return Err(ProvisionError::Cancelled { vm: vm.to_string() }),
            }

            let ops = match self
                .exec
                .execute_with_retry("list deployment operations", &strategy, move || {
                    provider.deployment_operations(rg, deployment)
                })
                .await
            {
                Ok(ops) => ops,
                Err(e) => {
                    warn!(deployment = %deployment, vm = %vm, attempt = attempt as u64, error = %e, "deployment poll failed");
                    continue;
                }
            };

            let op = ops
                .iter()
                .find(|o| o.resource_type.eq_ignore_ascii_case(VM_RESOURCE_TYPE) && o.resource_name == vm);
            match op {
                None => debug!(deployment = %deployment, vm = %vm, "vm not listed yet"),
                Some(op) => match &op.state {
                    ProvisioningState::InProgress(state) => {
                        debug!(deployment = %deployment, vm = %vm, %state, "vm still deploying")
                    }
                    ProvisioningState::Succeeded => {
                        debug!(deployment = %deployment, vm = %vm, "vm deployed");
                        return Ok(());
                    }
                    terminal => {
                        let message = op
                            .status_message
                            .clone()
                            .unwrap_or_else(|| format!("provisioning state {terminal}"));
                        return Err(ProvisionError::DeploymentFailed {
                            vm: vm.to_string(),
                            message,
                        });
                    }
                },
            }
        }

        Err(ProvisionError::DeploymentTimeout {
            vm: vm.to_string(),
            waited: budget,
        })
    }

    async fn fetch_vm(&self, fleet: &Fleet, vm: &str) -> ProvisionResult<VmInfo> {
        let provider = fleet.provider().as_ref();
        let rg = fleet.resource_group();
        let strategy = self.exec.default_strategy().clone();
        self.exec
            .execute_with_retry("get vm", &strategy, move || provider.get_vm(rg, vm))
            .await
            .map_err(|e| match e.last_error() {
                Some(ProviderError::NotFound(_)) => ProvisionError::VmGone { vm: vm.to_string() },
                _ => ProvisionError::BringUp {
                    vm: vm.to_string(),
                    message: e.root_message(),
                },
            })
    }

    /// Push: connect out with retry. Pull: wait for the callback, bounded
    /// by the online timeout. Both stop on cancellation.
    async fn bring_online(&self, worker: &Worker, cancel: &mut watch::Receiver<bool>) -> ProvisionResult<()> {
        let launcher = self.collab.launcher.as_ref();
        match worker.launch_method() {
            LaunchMethod::Push => {
                let strategy = self.exec.default_strategy().clone();
                tokio::select! {
                    r = self.exec.execute_with_retry("connect worker", &strategy, move || launcher.connect(worker)) => {
                        r.map_err(|e| ProvisionError::BringUp {
                            vm: worker.name().to_string(),
                            message: e.root_message(),
                        })
                    }
                    _ = cancelled(cancel) => Err(ProvisionError::Cancelled { vm: worker.name().to_string() }),
                }
            }
            LaunchMethod::Pull => {
                let waited = self.settings.online_timeout;
                tokio::select! {
                    r = tokio::time::timeout(waited, launcher.wait_online(worker)) => match r {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(e)) => Err(ProvisionError::BringUp {
                            vm: worker.name().to_string(),
                            message: e.to_string(),
                        }),
                        Err(_) => Err(ProvisionError::OnlineTimeout {
                            vm: worker.name().to_string(),
                            waited,
                        }),
                    },
                    _ = cancelled(cancel) => Err(ProvisionError::Cancelled { vm: worker.name().to_string() }),
                }
            }
        }
    }

    /// Roll back a unit whose VM may exist: delete its resources in the
    /// background, release its capacity, flag the template and deregister.
    fn compensate(&self, fleet: &Arc<Fleet>, template: &Template, vm: &str, error: &ProvisionError) {
        warn!(fleet = %fleet.name(), template = %template.name(), vm = %vm, error = %error, "rolling back worker");

        let provider = fleet.provider().clone();
        let rg = fleet.resource_group().to_string();
        let vm_name = vm.to_string();
        self.exec.execute_async(
            format!("delete resources of {vm}"),
            self.exec.default_strategy().clone(),
            move || {
                let provider = provider.clone();
                let rg = rg.clone();
                let vm = vm_name.clone();
                async move { delete_vm_resources(provider.as_ref(), &rg, &vm).await }
            },
        );

        fleet.capacity().release(1);
        if !matches!(error, ProvisionError::Cancelled { .. }) {
            self.flag_template(template, error);
        }
        if self.collab.nodes.remove_node(vm) {
            debug!(vm = %vm, "worker deregistered");
        }
    }

    fn flag_template(&self, template: &Template, error: &ProvisionError) {
        template.mark_unverified(error.to_string());
        self.gate.register_template(template);
    }
}

fn endpoint_for(info: &VmInfo) -> Option<Endpoint> {
    info.reachable_host().map(|host| Endpoint {
        host: host.to_string(),
        port: CONNECT_PORT,
    })
}

fn script_file_name(deployment: &str, os: OsType) -> String {
    match os {
        OsType::Linux => format!("{deployment}-init.sh"),
        OsType::Windows => format!("{deployment}-init.ps1"),
    }
}
