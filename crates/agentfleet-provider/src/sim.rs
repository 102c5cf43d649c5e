//! In-memory, scriptable implementations of every collaborator.
//!
//! Used by the test suites and by `agentfleetd run --simulate`. Every
//! method call is counted so tests can assert on exact call numbers.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::debug;

use agentfleet_state::Worker;

use crate::compute::*;
use crate::credentials::{CredentialStore, Credentials, Secret};
use crate::error::{ProviderError, ProviderResult};
use crate::names;
use crate::node::{NodeRegistry, NodeView, WorkerLauncher};
use crate::staging::ScriptStager;

const NIC_RESOURCE_TYPE: &str = "Microsoft.Network/networkInterfaces";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted outcome for one VM of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Succeed,
    Fail(String),
    Cancel,
    /// Stays in progress forever.
    Hang,
}

#[derive(Debug)]
struct SimDeployment {
    timestamp: SystemTime,
    state: ProvisioningState,
    units: Vec<(String, UnitOutcome)>,
    polls: u32,
}

#[derive(Debug)]
struct SimVm {
    resource_group: String,
    info: VmInfo,
}

#[derive(Debug)]
struct SimState {
    deployments: BTreeMap<(String, String), SimDeployment>,
    vms: BTreeMap<String, SimVm>,
    nics: BTreeSet<String>,
    ips: BTreeSet<String>,
    outcomes: VecDeque<UnitOutcome>,
    submit_failures: VecDeque<ProviderError>,
    transient_failures: HashMap<&'static str, u32>,
    calls: HashMap<&'static str, u32>,
    polls_until_ready: u32,
    credentials_valid: bool,
    missing_images: BTreeSet<String>,
    networks: BTreeSet<String>,
    taken_storage: BTreeSet<String>,
    page_size: usize,
    next_host: u32,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            deployments: BTreeMap::new(),
            vms: BTreeMap::new(),
            nics: BTreeSet::new(),
            ips: BTreeSet::new(),
            outcomes: VecDeque::new(),
            submit_failures: VecDeque::new(),
            transient_failures: HashMap::new(),
            calls: HashMap::new(),
            polls_until_ready: 0,
            credentials_valid: true,
            missing_images: BTreeSet::new(),
            networks: BTreeSet::new(),
            taken_storage: BTreeSet::new(),
            page_size: 2,
            next_host: 4,
        }
    }
}

/// Simulated compute provider.
///
/// Deployments create their VMs (plus NIC and public IP) immediately; the
/// per-VM operation state is driven by [`script_units`](Self::script_units)
/// and [`set_polls_until_ready`](Self::set_polls_until_ready).
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    state: Mutex<SimState>,
}

impl SimulatedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the call and consume an injected transient failure, if any.
    fn enter(&self, method: &'static str) -> ProviderResult<MutexGuard<'_, SimState>> {
        let mut st = lock(&self.state);
        *st.calls.entry(method).or_default() += 1;
        if let Some(left) = st.transient_failures.get_mut(method)
            && *left > 0
        {
            *left -= 1;
            return Err(ProviderError::Transient(format!("{method}: throttled")));
        }
        Ok(st)
    }

    // ── scripting ──────────────────────────────────────────────────

    /// Outcomes for the next VMs created, in creation order. VMs beyond the
    /// script succeed.
    pub fn script_units(&self, outcomes: impl IntoIterator<Item = UnitOutcome>) {
        lock(&self.state).outcomes.extend(outcomes);
    }

    /// Make the next deployment submission fail.
    pub fn fail_next_submit(&self, error: ProviderError) {
        lock(&self.state).submit_failures.push_back(error);
    }

    /// Make the next `times` calls of `method` fail with a transient error.
    pub fn fail_transiently(&self, method: &'static str, times: u32) {
        lock(&self.state).transient_failures.insert(method, times);
    }

    /// Operation polls that report "Running" before the scripted outcome.
    pub fn set_polls_until_ready(&self, polls: u32) {
        lock(&self.state).polls_until_ready = polls;
    }

    pub fn set_credentials_valid(&self, valid: bool) {
        lock(&self.state).credentials_valid = valid;
    }

    pub fn mark_image_missing(&self, image: &str) {
        lock(&self.state).missing_images.insert(image.to_string());
    }

    pub fn add_network(&self, virtual_network: &str, subnet: Option<&str>) {
        let mut st = lock(&self.state);
        st.networks.insert(virtual_network.to_string());
        if let Some(subnet) = subnet {
            st.networks.insert(format!("{virtual_network}/{subnet}"));
        }
    }

    pub fn mark_storage_taken(&self, account: &str) {
        lock(&self.state).taken_storage.insert(account.to_string());
    }

    pub fn set_page_size(&self, size: usize) {
        lock(&self.state).page_size = size.max(1);
    }

    /// Insert a deployment record directly, as if created earlier.
    pub fn seed_deployment(
        &self,
        resource_group: &str,
        deployment_name: &str,
        timestamp: SystemTime,
        state: ProvisioningState,
    ) {
        lock(&self.state).deployments.insert(
            (resource_group.to_string(), deployment_name.to_string()),
            SimDeployment {
                timestamp,
                state,
                units: Vec::new(),
                polls: 0,
            },
        );
    }

    /// Insert a VM with its NIC and public IP directly, tagged with `fleet`.
    pub fn seed_vm(&self, resource_group: &str, name: &str, fleet: Option<&str>, power_state: PowerState) {
        let mut st = lock(&self.state);
        let host = st.next_host;
        st.next_host += 1;
        st.nics.insert(names::nic_name(name));
        st.ips.insert(names::public_ip_name(name));
        let mut tags = BTreeMap::new();
        if let Some(fleet) = fleet {
            tags.insert(names::FLEET_TAG.to_string(), fleet.to_string());
        }
        st.vms.insert(
            name.to_string(),
            SimVm {
                resource_group: resource_group.to_string(),
                info: VmInfo {
                    name: name.to_string(),
                    os_type: agentfleet_core::OsType::Linux,
                    power_state,
                    private_ip: Some(format!("10.0.{}.{}", host / 256, host % 256)),
                    public_ip: None,
                    fqdn: None,
                    tags,
                },
            },
        );
    }

    /// Drop a VM behind the orchestrator's back.
    pub fn remove_vm(&self, name: &str) {
        lock(&self.state).vms.remove(name);
    }

    // ── inspection ─────────────────────────────────────────────────

    pub fn calls(&self, method: &str) -> u32 {
        lock(&self.state).calls.get(method).copied().unwrap_or(0)
    }

    pub fn vm(&self, name: &str) -> Option<VmInfo> {
        lock(&self.state).vms.get(name).map(|v| v.info.clone())
    }

    pub fn vm_names(&self) -> Vec<String> {
        lock(&self.state).vms.keys().cloned().collect()
    }

    pub fn has_nic(&self, vm: &str) -> bool {
        lock(&self.state).nics.contains(&names::nic_name(vm))
    }

    pub fn has_public_ip(&self, vm: &str) -> bool {
        lock(&self.state).ips.contains(&names::public_ip_name(vm))
    }

    pub fn deployment_names(&self) -> Vec<String> {
        lock(&self.state)
            .deployments
            .keys()
            .map(|(_, name)| name.clone())
            .collect()
    }
}

#[async_trait]
impl ComputeProvider for SimulatedProvider {
    async fn create_deployment(&self, request: &DeploymentRequest) -> ProviderResult<()> {
        let mut st = self.enter("create_deployment")?;
        if let Some(err) = st.submit_failures.pop_front() {
            return Err(err);
        }

        let mut units = Vec::with_capacity(request.count as usize);
        for vm in request.vm_names() {
            let outcome = st.outcomes.pop_front().unwrap_or(UnitOutcome::Succeed);
            let host = st.next_host;
            st.next_host += 1;
            st.vms.insert(
                vm.clone(),
                SimVm {
                    resource_group: request.resource_group.clone(),
                    info: VmInfo {
                        name: vm.clone(),
                        os_type: request.template.os_type,
                        power_state: PowerState::Running,
                        private_ip: Some(format!("10.0.{}.{}", host / 256, host % 256)),
                        public_ip: None,
                        fqdn: None,
                        tags: request.tags.clone(),
                    },
                },
            );
            st.nics.insert(names::nic_name(&vm));
            st.ips.insert(names::public_ip_name(&vm));
            units.push((vm, outcome));
        }

        let state = if units.iter().all(|(_, o)| *o == UnitOutcome::Succeed) {
            ProvisioningState::Succeeded
        } else if units.iter().any(|(_, o)| *o == UnitOutcome::Hang) {
            ProvisioningState::InProgress("Running".into())
        } else {
            ProvisioningState::Failed
        };

        debug!(deployment = %request.deployment_name, count = request.count, "simulated deployment created");
        st.deployments.insert(
            (request.resource_group.clone(), request.deployment_name.clone()),
            SimDeployment {
                timestamp: SystemTime::now(),
                state,
                units,
                polls: 0,
            },
        );
        Ok(())
    }

    async fn deployment_operations(
        &self,
        resource_group: &str,
        deployment_name: &str,
    ) -> ProviderResult<Vec<DeploymentOperation>> {
        let mut st = self.enter("deployment_operations")?;
        let ready_after = st.polls_until_ready;
        let deployment = st
            .deployments
            .get_mut(&(resource_group.to_string(), deployment_name.to_string()))
            .ok_or_else(|| ProviderError::NotFound(format!("deployment {deployment_name}")))?;
        deployment.polls += 1;
        let ready = deployment.polls > ready_after;

        let mut ops = Vec::with_capacity(deployment.units.len() * 2);
        for (vm, outcome) in &deployment.units {
            let (state, status_message) = match (ready, outcome) {
                (false, _) | (_, UnitOutcome::Hang) => (ProvisioningState::InProgress("Running".into()), None),
                (true, UnitOutcome::Succeed) => (ProvisioningState::Succeeded, None),
                (true, UnitOutcome::Fail(msg)) => (ProvisioningState::Failed, Some(msg.clone())),
                (true, UnitOutcome::Cancel) => (ProvisioningState::Canceled, Some("deployment canceled".into())),
            };
            ops.push(DeploymentOperation {
                resource_type: NIC_RESOURCE_TYPE.to_string(),
                resource_name: names::nic_name(vm),
                state: ProvisioningState::Succeeded,
                status_message: None,
            });
            ops.push(DeploymentOperation {
                resource_type: VM_RESOURCE_TYPE.to_string(),
                resource_name: vm.clone(),
                state,
                status_message,
            });
        }
        Ok(ops)
    }

    async fn deployment_status(
        &self,
        resource_group: &str,
        deployment_name: &str,
    ) -> ProviderResult<DeploymentInfo> {
        let st = self.enter("deployment_status")?;
        st.deployments
            .get(&(resource_group.to_string(), deployment_name.to_string()))
            .map(|d| DeploymentInfo {
                timestamp: d.timestamp,
                state: d.state.clone(),
            })
            .ok_or_else(|| ProviderError::NotFound(format!("deployment {deployment_name}")))
    }

    async fn delete_deployment(&self, resource_group: &str, deployment_name: &str) -> ProviderResult<()> {
        let mut st = self.enter("delete_deployment")?;
        st.deployments
            .remove(&(resource_group.to_string(), deployment_name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(format!("deployment {deployment_name}")))
    }

    async fn get_vm(&self, resource_group: &str, vm_name: &str) -> ProviderResult<VmInfo> {
        let st = self.enter("get_vm")?;
        st.vms
            .get(vm_name)
            .filter(|v| v.resource_group == resource_group)
            .map(|v| v.info.clone())
            .ok_or_else(|| ProviderError::NotFound(format!("vm {vm_name}")))
    }

    async fn start_vm(&self, _resource_group: &str, vm_name: &str) -> ProviderResult<()> {
        let mut st = self.enter("start_vm")?;
        set_power(&mut st, vm_name, PowerState::Running)
    }

    async fn restart_vm(&self, _resource_group: &str, vm_name: &str) -> ProviderResult<()> {
        let mut st = self.enter("restart_vm")?;
        set_power(&mut st, vm_name, PowerState::Running)
    }

    async fn power_off_vm(&self, _resource_group: &str, vm_name: &str) -> ProviderResult<()> {
        let mut st = self.enter("power_off_vm")?;
        set_power(&mut st, vm_name, PowerState::Stopped)
    }

    async fn delete_vm(&self, _resource_group: &str, vm_name: &str) -> ProviderResult<()> {
        let mut st = self.enter("delete_vm")?;
        st.vms
            .remove(vm_name)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(format!("vm {vm_name}")))
    }

    async fn delete_network_interface(&self, _resource_group: &str, nic_name: &str) -> ProviderResult<()> {
        let mut st = self.enter("delete_network_interface")?;
        if st.nics.remove(nic_name) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(format!("nic {nic_name}")))
        }
    }

    async fn delete_public_ip(&self, _resource_group: &str, ip_name: &str) -> ProviderResult<()> {
        let mut st = self.enter("delete_public_ip")?;
        if st.ips.remove(ip_name) {
            Ok(())
        } else {
            Err(ProviderError::NotFound(format!("public ip {ip_name}")))
        }
    }

    async fn list_vms(&self, resource_group: &str, page_token: Option<&str>) -> ProviderResult<VmPage> {
        let st = self.enter("list_vms")?;
        let start = match page_token {
            Some(t) => t
                .parse::<usize>()
                .map_err(|_| ProviderError::Conflict(format!("bad page token {t}")))?,
            None => 0,
        };
        let all: Vec<&SimVm> = st
            .vms
            .values()
            .filter(|v| v.resource_group == resource_group)
            .collect();
        let end = (start + st.page_size).min(all.len());
        let vms = all
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|v| v.info.clone())
            .collect();
        let next = (end < all.len()).then(|| end.to_string());
        Ok(VmPage { vms, next })
    }

    async fn verify_credentials(&self, resource_group: &str, credentials: &Credentials) -> ProviderResult<()> {
        let st = self.enter("verify_credentials")?;
        if st.credentials_valid {
            Ok(())
        } else {
            Err(ProviderError::Fatal(format!(
                "authentication failed for '{}' on resource group {resource_group}",
                credentials.username
            )))
        }
    }

    async fn image_exists(&self, _location: &str, image: &str) -> ProviderResult<bool> {
        let st = self.enter("image_exists")?;
        Ok(!st.missing_images.contains(image))
    }

    async fn network_exists(
        &self,
        _resource_group: &str,
        virtual_network: &str,
        subnet: Option<&str>,
    ) -> ProviderResult<bool> {
        let st = self.enter("network_exists")?;
        let vnet_ok = st.networks.contains(virtual_network);
        let subnet_ok = subnet.is_none_or(|s| st.networks.contains(&format!("{virtual_network}/{s}")));
        Ok(vnet_ok && subnet_ok)
    }

    async fn storage_account_available(&self, _resource_group: &str, account: &str) -> ProviderResult<bool> {
        let st = self.enter("storage_account_available")?;
        Ok(!st.taken_storage.contains(account))
    }
}

fn set_power(st: &mut SimState, vm_name: &str, power: PowerState) -> ProviderResult<()> {
    let vm = st
        .vms
        .get_mut(vm_name)
        .ok_or_else(|| ProviderError::NotFound(format!("vm {vm_name}")))?;
    vm.info.power_state = power;
    Ok(())
}

// ── node registry ──────────────────────────────────────────────────

#[derive(Debug)]
struct SimNode {
    worker: Arc<Worker>,
    online: bool,
    idle: bool,
    manually_offline: bool,
    idle_since: Option<SystemTime>,
    offline_reason: Option<String>,
}

impl SimNode {
    fn view(&self) -> NodeView {
        NodeView {
            worker: self.worker.clone(),
            online: self.online,
            idle: self.idle,
            manually_offline: self.manually_offline,
            idle_since: self.idle_since,
        }
    }
}

/// In-memory host node registry. Nodes register offline and idle.
#[derive(Debug, Default)]
pub struct SimNodeRegistry {
    nodes: Mutex<BTreeMap<String, SimNode>>,
}

impl SimNodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_node(&self, name: &str, f: impl FnOnce(&mut SimNode)) {
        if let Some(node) = lock(&self.nodes).get_mut(name) {
            f(node);
        }
    }

    pub fn set_online(&self, name: &str, online: bool) {
        self.with_node(name, |n| {
            n.online = online;
            if online {
                n.offline_reason = None;
            }
        });
    }

    pub fn set_idle(&self, name: &str, idle: bool, since: Option<SystemTime>) {
        self.with_node(name, |n| {
            n.idle = idle;
            n.idle_since = if idle { since } else { None };
        });
    }

    pub fn set_manually_offline(&self, name: &str, manual: bool) {
        self.with_node(name, |n| {
            n.manually_offline = manual;
            if manual {
                n.online = false;
            }
        });
    }

    pub fn offline_reason(&self, name: &str) -> Option<String> {
        lock(&self.nodes).get(name).and_then(|n| n.offline_reason.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.nodes).contains_key(name)
    }

    pub fn len(&self) -> usize {
        lock(&self.nodes).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.nodes).is_empty()
    }
}

impl NodeRegistry for SimNodeRegistry {
    fn add_node(&self, worker: Arc<Worker>) {
        let name = worker.name().to_string();
        let mut nodes = lock(&self.nodes);
        // Re-adding a known node keeps its operator flags.
        let manually_offline = nodes.get(&name).is_some_and(|n| n.manually_offline);
        nodes.insert(
            name,
            SimNode {
                worker,
                online: false,
                idle: true,
                manually_offline,
                idle_since: None,
                offline_reason: None,
            },
        );
    }

    fn remove_node(&self, name: &str) -> bool {
        lock(&self.nodes).remove(name).is_some()
    }

    fn node(&self, name: &str) -> Option<NodeView> {
        lock(&self.nodes).get(name).map(SimNode::view)
    }

    fn nodes(&self) -> Vec<NodeView> {
        lock(&self.nodes).values().map(SimNode::view).collect()
    }

    fn take_offline(&self, name: &str, reason: &str) {
        self.with_node(name, |n| {
            n.online = false;
            n.offline_reason = Some(reason.to_string());
        });
    }
}

// ── launcher ───────────────────────────────────────────────────────

/// How the simulated pull-mode callback behaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnlineBehavior {
    Immediate,
    Never,
    Fail(ProviderError),
}

/// Launcher that flips nodes online in a [`SimNodeRegistry`].
#[derive(Debug)]
pub struct SimLauncher {
    registry: Arc<SimNodeRegistry>,
    connect_failures: Mutex<VecDeque<ProviderError>>,
    online: Mutex<OnlineBehavior>,
    calls: Mutex<HashMap<&'static str, u32>>,
}

impl SimLauncher {
    pub fn new(registry: Arc<SimNodeRegistry>) -> Self {
        Self {
            registry,
            connect_failures: Mutex::new(VecDeque::new()),
            online: Mutex::new(OnlineBehavior::Immediate),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail_next_connect(&self, error: ProviderError) {
        lock(&self.connect_failures).push_back(error);
    }

    pub fn set_online_behavior(&self, behavior: OnlineBehavior) {
        *lock(&self.online) = behavior;
    }

    pub fn calls(&self, method: &str) -> u32 {
        lock(&self.calls).get(method).copied().unwrap_or(0)
    }

    fn count(&self, method: &'static str) {
        *lock(&self.calls).entry(method).or_default() += 1;
    }

    fn bring_online(&self, worker: &Worker) {
        self.registry.set_online(worker.name(), true);
        self.registry
            .set_idle(worker.name(), true, Some(SystemTime::now()));
    }
}

#[async_trait]
impl WorkerLauncher for SimLauncher {
    async fn connect(&self, worker: &Worker) -> ProviderResult<()> {
        self.count("connect");
        if let Some(err) = lock(&self.connect_failures).pop_front() {
            return Err(err);
        }
        self.bring_online(worker);
        Ok(())
    }

    async fn wait_online(&self, worker: &Worker) -> ProviderResult<()> {
        self.count("wait_online");
        let behavior = lock(&self.online).clone();
        match behavior {
            OnlineBehavior::Immediate => {
                self.bring_online(worker);
                Ok(())
            }
            OnlineBehavior::Never => std::future::pending().await,
            OnlineBehavior::Fail(err) => Err(err),
        }
    }
}

// ── credentials & staging ──────────────────────────────────────────

#[derive(Debug, Default)]
pub struct StaticCredentialStore {
    entries: Mutex<HashMap<String, Credentials>>,
}

impl StaticCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, id: &str, username: &str, secret: &str) -> Self {
        self.insert(id, username, secret);
        self
    }

    pub fn insert(&self, id: &str, username: &str, secret: &str) {
        lock(&self.entries).insert(
            id.to_string(),
            Credentials {
                username: username.to_string(),
                secret: Secret::new(secret),
            },
        );
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn resolve(&self, id: &str) -> ProviderResult<Credentials> {
        lock(&self.entries)
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(format!("credentials '{id}'")))
    }
}

/// Records uploads and hands back `sim://` URLs.
#[derive(Debug, Default)]
pub struct SimScriptStager {
    uploads: Mutex<Vec<(String, String)>>,
}

impl SimScriptStager {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(name, content)` of every upload so far.
    pub fn uploads(&self) -> Vec<(String, String)> {
        lock(&self.uploads).clone()
    }
}

#[async_trait]
impl ScriptStager for SimScriptStager {
    async fn upload(&self, storage_account: Option<&str>, name: &str, content: &str) -> ProviderResult<String> {
        lock(&self.uploads).push((name.to_string(), content.to_string()));
        Ok(format!("sim://{}/{name}", storage_account.unwrap_or("scripts")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentfleet_core::{LaunchMethod, OsType, TemplateMode, TemplateSpec};
    use std::time::Duration;

    fn template() -> TemplateSpec {
        TemplateSpec {
            name: "ubuntu".into(),
            labels: "linux".into(),
            mode: TemplateMode::Always,
            image: "img".into(),
            vm_size: "small".into(),
            os_type: OsType::Linux,
            launch_method: LaunchMethod::Push,
            parallelism: 1,
            retention: Duration::from_secs(60),
            shutdown_on_idle: false,
            disabled: false,
            admin_credentials_id: None,
            init_script: None,
            storage_account: None,
            network: None,
        }
    }

    fn request(count: u32) -> DeploymentRequest {
        DeploymentRequest {
            fleet: "f".into(),
            resource_group: "rg".into(),
            location: "westeurope".into(),
            deployment_name: "ubuntu-000000000000".into(),
            base_name: "ubuntuaaaaa".into(),
            count,
            template: template(),
            admin: None,
            script_url: None,
            tags: BTreeMap::from([(names::FLEET_TAG.to_string(), "f".to_string())]),
        }
    }

    #[tokio::test]
    async fn scripted_units_report_their_outcome() {
        let sim = SimulatedProvider::new();
        sim.set_polls_until_ready(1);
        sim.script_units([UnitOutcome::Succeed, UnitOutcome::Fail("quota exceeded".into())]);
        sim.create_deployment(&request(2)).await.unwrap();

        let first = sim.deployment_operations("rg", "ubuntu-000000000000").await.unwrap();
        assert!(first.iter().filter(|o| o.resource_type == VM_RESOURCE_TYPE).all(|o| !o.state.is_terminal()));

        let second = sim.deployment_operations("rg", "ubuntu-000000000000").await.unwrap();
        let vm1 = second.iter().find(|o| o.resource_name == "ubuntuaaaaa1").unwrap();
        assert_eq!(vm1.state, ProvisioningState::Failed);
        assert_eq!(vm1.status_message.as_deref(), Some("quota exceeded"));
        assert_eq!(sim.vm_names().len(), 2);
    }

    #[tokio::test]
    async fn deletes_report_not_found_when_gone() {
        let sim = SimulatedProvider::new();
        sim.create_deployment(&request(1)).await.unwrap();
        assert!(sim.delete_vm("rg", "ubuntuaaaaa0").await.is_ok());
        assert!(sim.delete_vm("rg", "ubuntuaaaaa0").await.unwrap_err().is_not_found());
        assert_eq!(sim.calls("delete_vm"), 2);
    }

    #[tokio::test]
    async fn listing_is_paged() {
        let sim = SimulatedProvider::new();
        for i in 0..5 {
            sim.seed_vm("rg", &format!("vm{i}"), Some("f"), PowerState::Running);
        }
        let mut seen = 0;
        let mut token = None;
        loop {
            let page = sim.list_vms("rg", token.as_deref()).await.unwrap();
            seen += page.vms.len();
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, 5);
        assert_eq!(sim.calls("list_vms"), 3);
    }

    #[tokio::test]
    async fn transient_failures_are_consumed() {
        let sim = SimulatedProvider::new();
        sim.fail_transiently("image_exists", 1);
        assert!(matches!(sim.image_exists("l", "img").await, Err(ProviderError::Transient(_))));
        assert!(sim.image_exists("l", "img").await.unwrap());
    }
}
