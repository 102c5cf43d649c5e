//! Resource naming for deployments, VMs and their network resources.

use uuid::Uuid;

/// Tag carrying the owning fleet's name on every VM we create.
pub const FLEET_TAG: &str = "agentfleet-fleet";

/// Tag carrying the owning template's name.
pub const TEMPLATE_TAG: &str = "agentfleet-template";

const BASE_PREFIX_LEN: usize = 8;

fn random_hex(len: usize) -> String {
    Uuid::new_v4().simple().to_string()[..len].to_string()
}

/// Base VM name for one deployment: up to 8 lower-case alphanumerics of
/// the template name followed by 5 random hex characters.
pub fn base_vm_name(template: &str) -> String {
    let mut prefix: String = template
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(BASE_PREFIX_LEN)
        .collect();
    if prefix.is_empty() {
        prefix.push_str("agent");
    }
    format!("{prefix}{}", random_hex(5))
}

pub fn vm_name(base: &str, index: u32) -> String {
    format!("{base}{index}")
}

pub fn deployment_name(template: &str) -> String {
    format!("{template}-{}", random_hex(12))
}

pub fn nic_name(vm: &str) -> String {
    format!("{vm}-nic")
}

pub fn public_ip_name(vm: &str) -> String {
    format!("{vm}-ip")
}
