//! Verification gate: periodic fleet and template checks.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use serde::Serialize;
use tracing::{debug, info, warn};

use agentfleet_core::format_duration;
use agentfleet_exec::{ExecError, ExecutionEngine};
use agentfleet_provider::names::FLEET_TAG;
use agentfleet_provider::{CredentialStore, ProviderError};
use agentfleet_registry::{Fleet, FleetRegistry, Template};

/// Status message for templates whose fleet has not passed its check yet.
pub const WAITING_FOR_FLEET: &str = "waiting for fleet verification";

/// Identifies a pending template.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TemplateKey {
    pub fleet: String,
    pub template: String,
}

impl TemplateKey {
    pub fn of(template: &Template) -> Self {
        Self {
            fleet: template.fleet().to_string(),
            template: template.name().to_string(),
        }
    }
}

/// Outcome of one verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub fleets_verified: Vec<String>,
    pub fleets_failed: Vec<(String, String)>,
    pub templates_verified: Vec<TemplateKey>,
    pub templates_failed: Vec<(TemplateKey, String)>,
    pub dropped: usize,
}

/// Holds the pending sets and runs the checks.
///
/// The fleet set and the template set have separate locks; neither is
/// held across a provider call.
pub struct VerificationGate {
    fleets: Arc<FleetRegistry>,
    credentials: Arc<dyn CredentialStore>,
    exec: ExecutionEngine,
    check_timeout: Duration,
    pending_fleets: Mutex<BTreeSet<String>>,
    pending_templates: Mutex<BTreeSet<TemplateKey>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl VerificationGate {
    pub fn new(
        fleets: Arc<FleetRegistry>,
        credentials: Arc<dyn CredentialStore>,
        exec: ExecutionEngine,
        check_timeout: Duration,
    ) -> Self {
        Self {
            fleets,
            credentials,
            exec,
            check_timeout,
            pending_fleets: Mutex::new(BTreeSet::new()),
            pending_templates: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn register_fleet(&self, name: &str) {
        if lock(&self.pending_fleets).insert(name.to_string()) {
            debug!(fleet = %name, "fleet registered for verification");
        }
    }

    pub fn register_template(&self, template: &Template) {
        if lock(&self.pending_templates).insert(TemplateKey::of(template)) {
            debug!(fleet = %template.fleet(), template = %template.name(), "template registered for verification");
        }
    }

    pub fn register_templates<'a>(&self, templates: impl IntoIterator<Item = &'a Arc<Template>>) {
        for t in templates {
            self.register_template(t);
        }
    }

    pub fn pending_fleets(&self) -> Vec<String> {
        lock(&self.pending_fleets).iter().cloned().collect()
    }

    pub fn pending_templates(&self) -> Vec<TemplateKey> {
        lock(&self.pending_templates).iter().cloned().collect()
    }

    /// Check every pending fleet, then every pending template.
    pub async fn run_pass(&self) -> VerificationReport {
        let mut report = VerificationReport::default();
        self.verify_fleets(&mut report).await;
        self.verify_templates(&mut report).await;

        if !report.fleets_failed.is_empty() || !report.templates_failed.is_empty() {
            warn!(
                fleets_failed = report.fleets_failed.len(),
                templates_failed = report.templates_failed.len(),
                "verification pass finished with failures"
            );
        } else {
            debug!(
                fleets = report.fleets_verified.len(),
                templates = report.templates_verified.len(),
                "verification pass finished"
            );
        }
        report
    }

    async fn verify_fleets(&self, report: &mut VerificationReport) {
        let pending = self.pending_fleets();
        for name in pending {
            let Some(fleet) = self.fleets.get(&name) else {
                debug!(fleet = %name, "fleet no longer configured, dropping");
                lock(&self.pending_fleets).remove(&name);
                report.dropped += 1;
                continue;
            };

            match self.check_fleet(&fleet).await {
                Ok(count) => {
                    fleet.capacity().reconcile(count);
                    lock(&self.pending_fleets).remove(&name);
                    info!(fleet = %name, count, "fleet configuration verified");
                    report.fleets_verified.push(name);
                }
                Err(msg) => {
                    fleet.capacity().set_configuration_valid(false);
                    warn!(fleet = %name, error = %msg, "fleet configuration check failed");
                    report.fleets_failed.push((name, msg));
                }
            }
        }
    }

    /// Credentials and sanity, then the authoritative worker count.
    async fn check_fleet(&self, fleet: &Fleet) -> Result<u32, String> {
        let spec = fleet.spec();
        if spec.resource_group.trim().is_empty() {
            return Err("resource group is empty".into());
        }
        if spec.max_workers == 0 {
            return Err("max_workers must be at least 1".into());
        }

        let strategy = self.exec.default_strategy().clone();
        let store = self.credentials.as_ref();
        let id = spec.credentials_id.as_str();
        let credentials = self
            .bounded(
                "credentials",
                self.exec.execute_with_retry("resolve credentials", &strategy, move || store.resolve(id)),
            )
            .await?;

        let provider = fleet.provider().as_ref();
        let rg = spec.resource_group.as_str();
        let creds = &credentials;
        self.bounded(
            "credential check",
            self.exec
                .execute_with_retry("verify credentials", &strategy, move || provider.verify_credentials(rg, creds)),
        )
        .await?;

        self.count_fleet_vms(fleet).await
    }

    /// Count VMs tagged with the fleet's name across every page.
    async fn count_fleet_vms(&self, fleet: &Fleet) -> Result<u32, String> {
        let strategy = self.exec.default_strategy().clone();
        let provider = fleet.provider().as_ref();
        let rg = fleet.resource_group();
        let mut count = 0u32;
        let mut token: Option<String> = None;

        loop {
            let page_token = token.as_deref();
            let page = self
                .bounded(
                    "vm listing",
                    self.exec
                        .execute_with_retry("list vms", &strategy, move || provider.list_vms(rg, page_token)),
                )
                .await?;
            count += page
                .vms
                .iter()
                .filter(|vm| vm.tags.get(FLEET_TAG).is_some_and(|f| f == fleet.name()))
                .count() as u32;
            match page.next {
                Some(next) => token = Some(next),
                None => return Ok(count),
            }
        }
    }

    async fn verify_templates(&self, report: &mut VerificationReport) {
        let pending = self.pending_templates();
        for key in pending {
            let Some(fleet) = self.fleets.get(&key.fleet) else {
                debug!(fleet = %key.fleet, template = %key.template, "fleet gone, dropping template");
                lock(&self.pending_templates).remove(&key);
                report.dropped += 1;
                continue;
            };
            let Some(template) = fleet.template(&key.template) else {
                debug!(fleet = %key.fleet, template = %key.template, "template gone, dropping");
                lock(&self.pending_templates).remove(&key);
                report.dropped += 1;
                continue;
            };

            if !fleet.capacity().is_configuration_valid() {
                template.set_status_details(WAITING_FOR_FLEET);
                continue;
            }

            let failures = self.check_template(&fleet, &template).await;
            if failures.is_empty() {
                template.mark_verified();
                lock(&self.pending_templates).remove(&key);
                report.templates_verified.push(key);
            } else {
                let msg = failures.join("; ");
                template.mark_unverified(msg.clone());
                report.templates_failed.push((key, msg));
            }
        }
    }

    /// Run every applicable sub-check concurrently and collect all failures.
    async fn check_template(&self, fleet: &Fleet, template: &Template) -> Vec<String> {
        let spec = template.spec();
        let strategy = self.exec.default_strategy().clone();
        let provider = fleet.provider().as_ref();
        let rg = fleet.resource_group();
        let strategy = &strategy;

        let mut checks: Vec<BoxFuture<'_, Result<(), String>>> = Vec::new();

        let location = fleet.spec().location.as_str();
        let image = spec.image.as_str();
        checks.push(
            async move {
                let found = self
                    .bounded(
                        "image",
                        self.exec
                            .execute_with_retry("image lookup", strategy, move || provider.image_exists(location, image)),
                    )
                    .await?;
                if found { Ok(()) } else { Err(format!("image '{image}' not found in {location}")) }
            }
            .boxed(),
        );

        if let Some(network) = &spec.network {
            let vnet = network.virtual_network.as_str();
            let subnet = network.subnet.as_deref();
            checks.push(
                async move {
                    let found = self
                        .bounded(
                            "network",
                            self.exec.execute_with_retry("network lookup", strategy, move || {
                                provider.network_exists(rg, vnet, subnet)
                            }),
                        )
                        .await?;
                    match (found, subnet) {
                        (true, _) => Ok(()),
                        (false, Some(s)) => Err(format!("subnet '{s}' of virtual network '{vnet}' not found")),
                        (false, None) => Err(format!("virtual network '{vnet}' not found")),
                    }
                }
                .boxed(),
            );
        }

        if let Some(account) = spec.storage_account.as_deref() {
            checks.push(
                async move {
                    let available = self
                        .bounded(
                            "storage account",
                            self.exec.execute_with_retry("storage account lookup", strategy, move || {
                                provider.storage_account_available(rg, account)
                            }),
                        )
                        .await?;
                    if available {
                        Ok(())
                    } else {
                        Err(format!("storage account name '{account}' is taken"))
                    }
                }
                .boxed(),
            );
        }

        if let Some(id) = spec.admin_credentials_id.as_deref() {
            let store = self.credentials.as_ref();
            checks.push(
                async move {
                    self.bounded(
                        "admin credentials",
                        self.exec
                            .execute_with_retry("resolve admin credentials", strategy, move || store.resolve(id)),
                    )
                    .await
                    .map(|_| ())
                }
                .boxed(),
            );
        }

        join_all(checks)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }

    /// Apply the per-check timeout and flatten errors into a message.
    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl Future<Output = Result<T, ExecError<ProviderError>>>,
    ) -> Result<T, String> {
        match tokio::time::timeout(self.check_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(format!("{what}: {}", e.root_message())),
            Err(_) => Err(format!("{what}: timed out after {}", format_duration(self.check_timeout))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentfleet_core::{FleetSpec, LaunchMethod, NetworkSpec, OsType, TemplateMode, TemplateSpec};
    use agentfleet_exec::{BackoffPolicy, RetryStrategy};
    use agentfleet_provider::PowerState;
    use agentfleet_provider::sim::{SimulatedProvider, StaticCredentialStore};

    fn template(name: &str) -> TemplateSpec {
        TemplateSpec {
            name: name.into(),
            labels: "linux".into(),
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
        fleets: Arc<FleetRegistry>,
        gate: VerificationGate,
    }

    fn harness(templates: Vec<TemplateSpec>) -> Harness {
        let sim = Arc::new(SimulatedProvider::new());
        let fleets = Arc::new(FleetRegistry::new());
        fleets.insert(Fleet::new(
            FleetSpec {
                name: "linux-pool".into(),
                resource_group: "rg".into(),
                credentials_id: "sp".into(),
                location: "westeurope".into(),
                max_workers: 5,
                deployment_timeout: Duration::from_secs(60),
                templates,
            },
            sim.clone(),
        ));
        let creds = Arc::new(StaticCredentialStore::new().with("sp", "ci", "secret"));
        let exec = ExecutionEngine::new(RetryStrategy::Backoff(BackoffPolicy::fixed(2, Duration::from_millis(1))));
        let gate = VerificationGate::new(fleets.clone(), creds, exec, Duration::from_millis(200));
        Harness { sim, fleets, gate }
    }

    #[tokio::test]
    async fn fleet_check_reconciles_count_from_tagged_vms() {
        let h = harness(vec![]);
        for i in 0..3 {
            h.sim.seed_vm("rg", &format!("ours{i}"), Some("linux-pool"), PowerState::Running);
        }
        h.sim.seed_vm("rg", "foreign", Some("other"), PowerState::Running);
        h.sim.seed_vm("rg", "untagged", None, PowerState::Running);

        h.gate.register_fleet("linux-pool");
        let report = h.gate.run_pass().await;

        assert_eq!(report.fleets_verified, ["linux-pool"]);
        let fleet = h.fleets.get("linux-pool").unwrap();
        assert!(fleet.capacity().is_configuration_valid());
        assert_eq!(fleet.capacity().count(), 3);
        assert!(h.gate.pending_fleets().is_empty());
        // Five VMs at two per page.
        assert_eq!(h.sim.calls("list_vms"), 3);
    }

    #[tokio::test]
    async fn failed_fleet_stays_pending_and_is_retried() {
        let h = harness(vec![template("ubuntu")]);
        h.sim.set_credentials_valid(false);
        h.gate.register_fleet("linux-pool");
        h.gate.register_templates(h.fleets.get("linux-pool").unwrap().templates());

        let report = h.gate.run_pass().await;
        assert_eq!(report.fleets_failed.len(), 1);
        assert!(report.fleets_failed[0].1.contains("authentication failed"));
        assert_eq!(h.gate.pending_fleets(), ["linux-pool"]);

        let t = h.fleets.template("linux-pool", "ubuntu").unwrap();
        assert!(!t.is_verified());
        assert_eq!(t.status_details().as_deref(), Some(WAITING_FOR_FLEET));

        h.sim.set_credentials_valid(true);
        let report = h.gate.run_pass().await;
        assert_eq!(report.fleets_verified.len(), 1);
        assert_eq!(report.templates_verified.len(), 1);
        assert!(t.is_eligible());
    }

    #[tokio::test]
    async fn template_failures_are_aggregated() {
        let mut spec = template("ubuntu");
        spec.network = Some(NetworkSpec {
            virtual_network: "ci-vnet".into(),
            subnet: Some("agents".into()),
        });
        spec.storage_account = Some("taken".into());
        let h = harness(vec![spec]);
        h.sim.mark_image_missing("ubuntu-22");
        h.sim.mark_storage_taken("taken");

        h.gate.register_fleet("linux-pool");
        h.gate.register_templates(h.fleets.get("linux-pool").unwrap().templates());
        let report = h.gate.run_pass().await;

        assert_eq!(report.templates_failed.len(), 1);
        let msg = &report.templates_failed[0].1;
        assert!(msg.contains("image 'ubuntu-22' not found"), "{msg}");
        assert!(msg.contains("subnet 'agents'"), "{msg}");
        assert!(msg.contains("storage account name 'taken'"), "{msg}");

        let t = h.fleets.template("linux-pool", "ubuntu").unwrap();
        assert!(!t.is_verified());
        assert_eq!(t.status_details().as_deref(), Some(msg.as_str()));
        assert_eq!(h.gate.pending_templates().len(), 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_inside_checks() {
        let h = harness(vec![template("ubuntu")]);
        h.sim.fail_transiently("image_exists", 2);
        h.gate.register_fleet("linux-pool");
        h.gate.register_templates(h.fleets.get("linux-pool").unwrap().templates());

        let report = h.gate.run_pass().await;
        assert_eq!(report.templates_verified.len(), 1);
        assert_eq!(h.sim.calls("image_exists"), 3);
    }

    #[tokio::test]
    async fn missing_admin_credentials_fail_the_template() {
        let mut spec = template("ubuntu");
        spec.admin_credentials_id = Some("nope".into());
        let h = harness(vec![spec]);
        h.gate.register_fleet("linux-pool");
        h.gate.register_templates(h.fleets.get("linux-pool").unwrap().templates());

        let report = h.gate.run_pass().await;
        assert!(report.templates_failed[0].1.contains("admin credentials"));
    }

    #[tokio::test]
    async fn removed_entries_are_dropped() {
        let h = harness(vec![template("ubuntu")]);
        h.gate.register_fleet("linux-pool");
        h.gate.register_templates(h.fleets.get("linux-pool").unwrap().templates());
        h.gate.register_fleet("deleted");
        h.fleets.remove("linux-pool");

        let report = h.gate.run_pass().await;
        assert_eq!(report.dropped, 3);
        assert!(h.gate.pending_fleets().is_empty());
        assert!(h.gate.pending_templates().is_empty());
    }

    #[tokio::test]
    async fn registration_is_idempotent() {
        let h = harness(vec![template("ubuntu")]);
        let fleet = h.fleets.get("linux-pool").unwrap();
        h.gate.register_fleet("linux-pool");
        h.gate.register_fleet("linux-pool");
        h.gate.register_templates(fleet.templates());
        h.gate.register_templates(fleet.templates());
        assert_eq!(h.gate.pending_fleets().len(), 1);
        assert_eq!(h.gate.pending_templates().len(), 1);
    }
}
