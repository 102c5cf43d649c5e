//! Orchestrator behaviour against the simulated backend.
//!
//! Intervals are milliseconds so every scenario runs the real polling,
//! bring-up and rollback paths quickly.

use std::sync::Arc;
use std::time::Duration;

use agentfleet_core::{FleetSpec, LaunchMethod, OsType, ProvisioningSettings, TemplateMode, TemplateSpec};
use agentfleet_deploy::{DeploymentOrchestrator, ProvisionError};
use agentfleet_exec::{BackoffPolicy, ExecutionEngine, RetryStrategy};
use agentfleet_provider::sim::{
    OnlineBehavior, SimLauncher, SimNodeRegistry, SimScriptStager, SimulatedProvider, StaticCredentialStore,
    UnitOutcome,
};
use agentfleet_provider::{Collaborators, ComputeProvider, NodeRegistry, ProviderError};
use agentfleet_registry::{Fleet, FleetRegistry, Template};
use agentfleet_state::{CleanUpAction, DeploymentQueue};
use agentfleet_verify::VerificationGate;

fn template(name: &str, labels: &str) -> TemplateSpec {
    TemplateSpec {
        name: name.into(),
        labels: labels.into(),
        mode: TemplateMode::Always,
        image: "ubuntu-22".into(),
        vm_size: "small".into(),
        os_type: OsType::Linux,
        launch_method: LaunchMethod::Push,
        parallelism: 1,
        retention: Duration::from_secs(3600),
        shutdown_on_idle: false,
        disabled: false,
        admin_credentials_id: None,
        init_script: None,
        storage_account: None,
        network: None,
    }
}

struct Harness {
    sim: Arc<SimulatedProvider>,
    nodes: Arc<SimNodeRegistry>,
    launcher: Arc<SimLauncher>,
    stager: Arc<SimScriptStager>,
    gate: Arc<VerificationGate>,
    queue: Arc<DeploymentQueue>,
    exec: ExecutionEngine,
    orch: DeploymentOrchestrator,
    fleet: Arc<Fleet>,
}

impl Harness {
    fn template(&self) -> Arc<Template> {
        self.fleet.templates()[0].clone()
    }
}

fn harness_with(max_workers: u32, deployment_timeout: Duration, spec: TemplateSpec) -> Harness {
    let sim = Arc::new(SimulatedProvider::new());
    let nodes = Arc::new(SimNodeRegistry::new());
    let launcher = Arc::new(SimLauncher::new(nodes.clone()));
    let stager = Arc::new(SimScriptStager::new());
    let credentials = Arc::new(StaticCredentialStore::new().with("sp", "ci", "secret").with("admin", "azureuser", "pw"));

    let fleets = Arc::new(FleetRegistry::new());
    let fleet = fleets.insert(Fleet::new(
        FleetSpec {
            name: "linux-pool".into(),
            resource_group: "ci-agents".into(),
            credentials_id: "sp".into(),
            location: "westeurope".into(),
            max_workers,
            deployment_timeout,
            templates: vec![spec],
        },
        sim.clone(),
    ));
    fleet.capacity().set_configuration_valid(true);
    for t in fleet.templates() {
        t.mark_verified();
    }

    let exec = ExecutionEngine::new(RetryStrategy::Backoff(BackoffPolicy::fixed(2, Duration::from_millis(1))));
    let gate = Arc::new(VerificationGate::new(
        fleets.clone(),
        credentials.clone(),
        exec.clone(),
        Duration::from_millis(200),
    ));
    let queue = Arc::new(DeploymentQueue::new());
    let collab = Collaborators {
        nodes: nodes.clone(),
        launcher: launcher.clone(),
        credentials,
        stager: stager.clone(),
    };
    let settings = ProvisioningSettings {
        poll_interval: Duration::from_millis(5),
        online_timeout: Duration::from_millis(60),
        check_timeout: Duration::from_millis(200),
    };
    let orch = DeploymentOrchestrator::new(collab, gate.clone(), queue.clone(), exec.clone(), settings);

    Harness {
        sim,
        nodes,
        launcher,
        stager,
        gate,
        queue,
        exec,
        orch,
        fleet,
    }
}

fn harness(max_workers: u32) -> Harness {
    harness_with(max_workers, Duration::from_secs(2), template("ubuntu", "linux"))
}

#[tokio::test]
async fn grants_are_capped_and_batched_into_one_deployment() {
    let h = harness(2);
    let units = h.orch.provision(&h.fleet, &h.template(), 3);

    assert_eq!(units.len(), 2);
    assert_eq!(h.fleet.capacity().count(), 2);

    let mut workers = Vec::new();
    for unit in units {
        assert!(!unit.is_reused());
        workers.push(unit.wait().await.unwrap());
    }

    assert_eq!(h.sim.calls("create_deployment"), 1);
    assert_eq!(h.sim.deployment_names().len(), 1);
    assert_eq!(h.queue.len(), 1);
    for w in &workers {
        assert_eq!(w.action(), CleanUpAction::Default);
        assert!(!w.is_eligible_for_reuse());
        assert!(w.endpoint().is_some());
        assert!(h.nodes.node(w.name()).unwrap().online);
    }
    assert_eq!(h.sim.vm_names().len(), 2);
}

#[tokio::test]
async fn concurrent_request_is_declined_while_first_is_pending() {
    let h = harness(2);
    h.sim.set_polls_until_ready(5);

    let first = h.orch.provision(&h.fleet, &h.template(), 3);
    let second = h.orch.provision(&h.fleet, &h.template(), 1);
    assert_eq!(first.len(), 2);
    assert!(second.is_empty());

    for unit in first {
        unit.wait().await.unwrap();
    }
    assert_eq!(h.sim.calls("create_deployment"), 1);
}

#[tokio::test]
async fn failed_vm_rolls_back_only_itself() {
    let h = harness(2);
    h.sim.script_units([UnitOutcome::Succeed, UnitOutcome::Fail("OperationNotAllowed: quota exceeded".into())]);

    let units = h.orch.provision(&h.fleet, &h.template(), 2);
    let failed_name = units[1].name().to_string();
    let mut results = Vec::new();
    for unit in units {
        results.push(unit.wait().await);
    }
    h.exec.quiesce().await;

    assert!(results[0].is_ok());
    match &results[1] {
        Err(ProvisionError::DeploymentFailed { message, .. }) => assert!(message.contains("quota exceeded")),
        other => panic!("unexpected result: {other:?}"),
    }

    assert_eq!(h.fleet.capacity().count(), 1);
    let t = h.template();
    assert!(!t.is_verified());
    assert!(t.status_details().unwrap().contains("quota exceeded"));
    assert_eq!(h.gate.pending_templates().len(), 1);

    assert!(h.sim.vm(&failed_name).is_none());
    assert!(!h.sim.has_nic(&failed_name));
    assert!(!h.sim.has_public_ip(&failed_name));
    assert!(!h.nodes.contains(&failed_name));
    assert_eq!(h.nodes.len(), 1);
}

#[tokio::test]
async fn poll_budget_exhaustion_is_a_failure() {
    let h = harness_with(2, Duration::from_millis(30), template("ubuntu", "linux"));
    h.sim.script_units([UnitOutcome::Hang]);

    let unit = h.orch.provision(&h.fleet, &h.template(), 1).pop().unwrap();
    let name = unit.name().to_string();
    let err = unit.wait().await.unwrap_err();
    h.exec.quiesce().await;

    assert!(matches!(err, ProvisionError::DeploymentTimeout { .. }));
    assert_eq!(h.fleet.capacity().count(), 0);
    assert!(h.sim.vm(&name).is_none());
}

#[tokio::test]
async fn rejected_submission_releases_every_unit() {
    let h = harness(3);
    h.sim.fail_next_submit(ProviderError::Conflict("InvalidTemplate: bad size".into()));

    let units = h.orch.provision(&h.fleet, &h.template(), 3);
    assert_eq!(units.len(), 3);
    for unit in units {
        let err = unit.wait().await.unwrap_err();
        assert!(err.is_pre_creation());
    }
    h.exec.quiesce().await;

    assert_eq!(h.fleet.capacity().count(), 0);
    assert!(!h.template().is_verified());
    assert_eq!(h.sim.calls("delete_vm"), 0);
    assert_eq!(h.sim.calls("create_deployment"), 1);
    assert_eq!(h.queue.len(), 1);
}

#[tokio::test]
async fn transient_submit_errors_are_retried() {
    let h = harness(1);
    h.sim.fail_transiently("create_deployment", 2);

    let unit = h.orch.provision(&h.fleet, &h.template(), 1).pop().unwrap();
    unit.wait().await.unwrap();
    assert_eq!(h.sim.calls("create_deployment"), 3);
}

#[tokio::test]
async fn connect_failure_triggers_full_compensation() {
    let h = harness(2);
    h.launcher.fail_next_connect(ProviderError::Fatal("ssh handshake failed".into()));

    let unit = h.orch.provision(&h.fleet, &h.template(), 1).pop().unwrap();
    let name = unit.name().to_string();
    let err = unit.wait().await.unwrap_err();
    h.exec.quiesce().await;

    assert!(matches!(err, ProvisionError::BringUp { .. }));
    assert!(err.to_string().contains("ssh handshake failed"));
    assert!(!h.nodes.contains(&name));
    assert_eq!(h.sim.calls("delete_vm"), 1);
    assert_eq!(h.fleet.capacity().count(), 0);
}

#[tokio::test]
async fn pull_worker_that_never_calls_back_times_out() {
    let mut spec = template("ubuntu", "linux");
    spec.launch_method = LaunchMethod::Pull;
    let h = harness_with(2, Duration::from_secs(2), spec);
    h.launcher.set_online_behavior(OnlineBehavior::Never);

    let unit = h.orch.provision(&h.fleet, &h.template(), 1).pop().unwrap();
    let name = unit.name().to_string();
    let err = unit.wait().await.unwrap_err();
    h.exec.quiesce().await;

    assert!(matches!(err, ProvisionError::OnlineTimeout { .. }));
    assert!(h.sim.vm(&name).is_none());
    assert!(!h.nodes.contains(&name));
    assert_eq!(h.fleet.capacity().count(), 0);
}

#[tokio::test]
async fn pull_templates_stage_their_init_script() {
    let mut spec = template("ubuntu", "linux");
    spec.launch_method = LaunchMethod::Pull;
    spec.init_script = Some("#!/bin/sh\necho hello".into());
    spec.admin_credentials_id = Some("admin".into());
    let h = harness_with(1, Duration::from_secs(2), spec);

    let unit = h.orch.provision(&h.fleet, &h.template(), 1).pop().unwrap();
    unit.wait().await.unwrap();

    let uploads = h.stager.uploads();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].0.ends_with("-init.sh"));
    assert_eq!(h.launcher.calls("wait_online"), 1);
    assert_eq!(h.launcher.calls("connect"), 0);
}

#[tokio::test]
async fn cancelled_unit_is_rolled_back_without_flagging_template() {
    let h = harness(2);
    h.sim.set_polls_until_ready(10_000);

    let unit = h.orch.provision(&h.fleet, &h.template(), 1).pop().unwrap();
    let name = unit.name().to_string();
    tokio::time::sleep(Duration::from_millis(20)).await;
    unit.cancel();
    let err = unit.wait().await.unwrap_err();
    h.exec.quiesce().await;

    assert!(matches!(err, ProvisionError::Cancelled { .. }));
    assert_eq!(h.fleet.capacity().count(), 0);
    assert!(h.template().is_verified());
    assert!(h.sim.vm(&name).is_none());
}

#[tokio::test]
async fn offline_eligible_worker_is_reused_before_creating() {
    let h = harness(2);
    let worker = h.orch.provision(&h.fleet, &h.template(), 1).pop().unwrap().wait().await.unwrap();

    // Idle shutdown happened: offline, powered off, reusable.
    h.nodes.set_online(worker.name(), false);
    h.sim.power_off_vm("ci-agents", worker.name()).await.unwrap();
    worker.set_eligible_for_reuse(true);

    let units = h.orch.provision(&h.fleet, &h.template(), 1);
    assert_eq!(units.len(), 1);
    assert!(units[0].is_reused());
    let revived = units.into_iter().next().unwrap().wait().await.unwrap();

    assert_eq!(revived.name(), worker.name());
    assert_eq!(revived.action(), CleanUpAction::Default);
    assert!(!revived.is_eligible_for_reuse());
    assert!(h.nodes.node(worker.name()).unwrap().online);
    assert_eq!(h.sim.calls("start_vm"), 1);
    assert_eq!(h.sim.calls("create_deployment"), 1);
    // Reuse does not reserve capacity.
    assert_eq!(h.fleet.capacity().count(), 1);
}

#[tokio::test]
async fn reuse_of_vanished_vm_leaves_worker_for_the_sweep() {
    let h = harness(2);
    let worker = h.orch.provision(&h.fleet, &h.template(), 1).pop().unwrap().wait().await.unwrap();
    h.nodes.set_online(worker.name(), false);
    worker.set_eligible_for_reuse(true);
    h.sim.remove_vm(worker.name());

    let unit = h.orch.provision(&h.fleet, &h.template(), 1).pop().unwrap();
    assert!(unit.is_reused());
    let err = unit.wait().await.unwrap_err();

    assert!(matches!(err, ProvisionError::VmGone { .. }));
    assert_eq!(worker.action(), CleanUpAction::Default);
    assert!(worker.reason().unwrap().contains("reuse failed"));
    assert!(!h.nodes.node(worker.name()).unwrap().online);
}

#[tokio::test]
async fn reuse_requires_matching_labels() {
    let h = harness(3);
    let worker = h.orch.provision(&h.fleet, &h.template(), 1).pop().unwrap().wait().await.unwrap();
    h.nodes.set_online(worker.name(), false);
    worker.set_eligible_for_reuse(true);

    let other = Arc::new(Template::new("linux-pool", template("big", "linux large")));
    other.mark_verified();
    let units = h.orch.provision(&h.fleet, &other, 1);

    assert_eq!(units.len(), 1);
    assert!(!units[0].is_reused());
    assert!(worker.is_eligible_for_reuse());
    units.into_iter().next().unwrap().wait().await.unwrap();
}

#[tokio::test]
async fn zero_count_plans_nothing() {
    let h = harness(2);
    assert!(h.orch.provision(&h.fleet, &h.template(), 0).is_empty());
    assert_eq!(h.fleet.capacity().count(), 0);
}
