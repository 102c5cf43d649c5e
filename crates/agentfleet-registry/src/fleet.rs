//! Fleets and the registry that owns them.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use agentfleet_core::FleetSpec;
use agentfleet_provider::ComputeProvider;

use crate::capacity::CapacityTracker;
use crate::error::{RegistryError, RegistryResult};
use crate::template::Template;

/// A fleet ("cloud"): one resource group, one credential, one ceiling.
pub struct Fleet {
    spec: FleetSpec,
    templates: Vec<Arc<Template>>,
    capacity: CapacityTracker,
    provider: Arc<dyn ComputeProvider>,
}

impl std::fmt::Debug for Fleet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fleet")
            .field("name", &self.spec.name)
            .field("templates", &self.templates.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl Fleet {
    /// Build a fleet from its resolved spec. The configuration starts
    /// unverified.
    pub fn new(spec: FleetSpec, provider: Arc<dyn ComputeProvider>) -> Self {
        let templates = spec
            .templates
            .iter()
            .map(|t| Arc::new(Template::new(spec.name.clone(), t.clone())))
            .collect();
        let capacity = CapacityTracker::new(spec.name.clone(), spec.max_workers);
        Self {
            spec,
            templates,
            capacity,
            provider,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &FleetSpec {
        &self.spec
    }

    pub fn resource_group(&self) -> &str {
        &self.spec.resource_group
    }

    pub fn capacity(&self) -> &CapacityTracker {
        &self.capacity
    }

    pub fn provider(&self) -> &Arc<dyn ComputeProvider> {
        &self.provider
    }

    /// Templates in declaration order.
    pub fn templates(&self) -> &[Arc<Template>] {
        &self.templates
    }

    /// Name lookup regardless of eligibility.
    pub fn template(&self, name: &str) -> Option<Arc<Template>> {
        self.templates.iter().find(|t| t.name() == name).cloned()
    }

    /// First eligible template, in declaration order, serving `label`.
    pub fn resolve_template(&self, label: Option<&str>) -> Option<Arc<Template>> {
        let found = self
            .templates
            .iter()
            .find(|t| t.is_eligible() && t.matches_label(label))
            .cloned();
        if found.is_none() {
            debug!(fleet = %self.spec.name, label = label.unwrap_or(""), "no eligible template");
        }
        found
    }
}

/// Registered fleets in declaration order.
#[derive(Debug, Default)]
pub struct FleetRegistry {
    fleets: RwLock<Vec<Arc<Fleet>>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fleet, replacing one with the same name in place.
    pub fn insert(&self, fleet: Fleet) -> Arc<Fleet> {
        let fleet = Arc::new(fleet);
        let mut fleets = self.fleets.write().unwrap_or_else(PoisonError::into_inner);
        match fleets.iter_mut().find(|f| f.name() == fleet.name()) {
            Some(slot) => *slot = fleet.clone(),
            None => fleets.push(fleet.clone()),
        }
        info!(fleet = %fleet.name(), max_workers = fleet.spec().max_workers, templates = fleet.templates().len(), "fleet loaded");
        fleet
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Fleet>> {
        let mut fleets = self.fleets.write().unwrap_or_else(PoisonError::into_inner);
        let idx = fleets.iter().position(|f| f.name() == name)?;
        info!(fleet = %name, "fleet removed");
        Some(fleets.remove(idx))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Fleet>> {
        self.fleets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|f| f.name() == name)
            .cloned()
    }

    pub fn require(&self, name: &str) -> RegistryResult<Arc<Fleet>> {
        self.get(name)
            .ok_or_else(|| RegistryError::UnknownFleet(name.to_string()))
    }

    /// Look up a template by fleet and name.
    pub fn template(&self, fleet: &str, template: &str) -> RegistryResult<Arc<Template>> {
        self.require(fleet)?
            .template(template)
            .ok_or_else(|| RegistryError::UnknownTemplate {
                fleet: fleet.to_string(),
                template: template.to_string(),
            })
    }

    pub fn list(&self) -> Vec<Arc<Fleet>> {
        self.fleets.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentfleet_core::{LaunchMethod, OsType, TemplateMode, TemplateSpec};
    use agentfleet_provider::sim::SimulatedProvider;
    use std::time::Duration;

    fn template(name: &str, labels: &str, mode: TemplateMode) -> TemplateSpec {
        TemplateSpec {
            name: name.into(),
            labels: labels.into(),
            mode,
            image: "img".into(),
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

    fn fleet(name: &str, templates: Vec<TemplateSpec>) -> Fleet {
        let spec = FleetSpec {
            name: name.into(),
            resource_group: "rg".into(),
            credentials_id: "c".into(),
            location: "westeurope".into(),
            max_workers: 2,
            deployment_timeout: Duration::from_secs(60),
            templates,
        };
        Fleet::new(spec, Arc::new(SimulatedProvider::new()))
    }

    #[test]
    fn first_eligible_match_wins() {
        let f = fleet(
            "f",
            vec![
                template("gpu", "gpu", TemplateMode::Exclusive),
                template("small", "linux", TemplateMode::Always),
                template("large", "linux", TemplateMode::Always),
            ],
        );
        assert!(f.resolve_template(Some("linux")).is_none());

        for t in f.templates() {
            t.mark_verified();
        }
        assert_eq!(f.resolve_template(Some("linux")).unwrap().name(), "small");
        assert_eq!(f.resolve_template(Some("gpu")).unwrap().name(), "gpu");
        assert_eq!(f.resolve_template(None).unwrap().name(), "small");

        f.template("small").unwrap().mark_unverified("broken");
        assert_eq!(f.resolve_template(Some("linux")).unwrap().name(), "large");
        // Name lookup ignores eligibility.
        assert!(f.template("small").is_some());
    }

    #[test]
    fn new_fleets_start_unverified() {
        let f = fleet("f", vec![]);
        assert!(!f.capacity().is_configuration_valid());
        assert_eq!(f.capacity().max_workers(), 2);
    }

    #[test]
    fn registry_keeps_order_and_replaces_in_place() {
        let reg = FleetRegistry::new();
        reg.insert(fleet("a", vec![]));
        reg.insert(fleet("b", vec![]));
        reg.insert(fleet("a", vec![template("t", "", TemplateMode::Always)]));

        let names: Vec<_> = reg.list().iter().map(|f| f.name().to_string()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(reg.template("a", "t").is_ok());
        assert_eq!(
            reg.template("b", "t").unwrap_err(),
            RegistryError::UnknownTemplate { fleet: "b".into(), template: "t".into() }
        );

        assert!(reg.remove("a").is_some());
        assert_eq!(reg.require("a").unwrap_err(), RegistryError::UnknownFleet("a".into()));
    }
}
