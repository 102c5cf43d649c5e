//! fleet.toml configuration parser.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};
use crate::types::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    pub provisioning: Option<ProvisioningConfig>,
    pub sweep: Option<SweepConfig>,
    pub retry: Option<RetryConfig>,
    #[serde(default, rename = "fleet")]
    pub fleets: Vec<FleetEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    pub poll_interval: Option<String>,
    pub online_timeout: Option<String>,
    pub check_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepConfig {
    pub cleanup_interval: Option<String>,
    pub verification_interval: Option<String>,
    pub success_retention: Option<String>,
    pub failure_retention: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: Option<u32>,
    pub base_interval: Option<String>,
    pub max_interval: Option<String>,
    pub max_elapsed: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetEntry {
    pub name: String,
    pub resource_group: String,
    pub credentials_id: String,
    pub location: Option<String>,
    pub max_workers: Option<u32>,
    pub deployment_timeout: Option<String>,
    #[serde(default, rename = "template")]
    pub templates: Vec<TemplateEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub name: String,
    pub labels: Option<String>,
    pub mode: Option<TemplateMode>,
    pub image: String,
    pub vm_size: String,
    pub os_type: Option<OsType>,
    pub launch_method: Option<LaunchMethod>,
    pub parallelism: Option<u32>,
    pub retention: Option<String>,
    pub shutdown_on_idle: Option<bool>,
    pub disabled: Option<bool>,
    pub admin_credentials_id: Option<String>,
    pub init_script: Option<String>,
    pub storage_account: Option<String>,
    pub network: Option<NetworkSpec>,
}

/// Process-wide settings resolved from the optional config sections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub provisioning: ProvisioningSettings,
    pub sweep: SweepSettings,
    pub retry: RetrySettings,
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: FleetConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Resolve the process-wide settings, applying defaults.
    pub fn settings(&self) -> ConfigResult<Settings> {
        let mut settings = Settings::default();

        if let Some(p) = &self.provisioning {
            let s = &mut settings.provisioning;
            s.poll_interval = duration_or("provisioning.poll_interval", &p.poll_interval, s.poll_interval)?;
            s.online_timeout = duration_or("provisioning.online_timeout", &p.online_timeout, s.online_timeout)?;
            s.check_timeout = duration_or("provisioning.check_timeout", &p.check_timeout, s.check_timeout)?;
        }

        if let Some(w) = &self.sweep {
            let s = &mut settings.sweep;
            s.cleanup_interval = duration_or("sweep.cleanup_interval", &w.cleanup_interval, s.cleanup_interval)?;
            s.verification_interval =
                duration_or("sweep.verification_interval", &w.verification_interval, s.verification_interval)?;
            s.success_retention = duration_or("sweep.success_retention", &w.success_retention, s.success_retention)?;
            s.failure_retention = duration_or("sweep.failure_retention", &w.failure_retention, s.failure_retention)?;
        }

        if let Some(r) = &self.retry {
            let s = &mut settings.retry;
            s.max_retries = r.max_retries.unwrap_or(s.max_retries);
            s.base_interval = duration_or("retry.base_interval", &r.base_interval, s.base_interval)?;
            s.max_interval = duration_or("retry.max_interval", &r.max_interval, s.max_interval)?;
            s.max_elapsed = duration_or("retry.max_elapsed", &r.max_elapsed, s.max_elapsed)?;
        }

        if settings.provisioning.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("provisioning.poll_interval must be non-zero".into()));
        }

        Ok(settings)
    }

    /// Resolve and validate all fleets, preserving declaration order.
    pub fn fleets(&self) -> ConfigResult<Vec<FleetSpec>> {
        let mut names = HashSet::new();
        let mut fleets = Vec::with_capacity(self.fleets.len());

        for entry in &self.fleets {
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate fleet '{}'", entry.name)));
            }
            fleets.push(entry.resolve()?);
        }

        Ok(fleets)
    }
}

impl FleetEntry {
    fn resolve(&self) -> ConfigResult<FleetSpec> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("fleet name must not be empty".into()));
        }
        if self.resource_group.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "fleet '{}' has an empty resource_group",
                self.name
            )));
        }
        let max_workers = self.max_workers.unwrap_or(10);
        if max_workers == 0 {
            return Err(ConfigError::Invalid(format!(
                "fleet '{}' must allow at least one worker",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        let mut templates = Vec::with_capacity(self.templates.len());
        for t in &self.templates {
            if !seen.insert(t.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate template '{}' in fleet '{}'",
                    t.name, self.name
                )));
            }
            templates.push(t.resolve(&self.name)?);
        }

        Ok(FleetSpec {
            name: self.name.clone(),
            resource_group: self.resource_group.clone(),
            credentials_id: self.credentials_id.clone(),
            location: self.location.clone().unwrap_or_else(|| "westeurope".to_string()),
            max_workers,
            deployment_timeout: duration_or(
                &format!("fleet.{}.deployment_timeout", self.name),
                &self.deployment_timeout,
                Duration::from_secs(20 * 60),
            )?,
            templates,
        })
    }
}

impl TemplateEntry {
    fn resolve(&self, fleet: &str) -> ConfigResult<TemplateSpec> {
        let parallelism = self.parallelism.unwrap_or(1);
        if parallelism == 0 {
            return Err(ConfigError::Invalid(format!(
                "template '{}' in fleet '{fleet}' must have parallelism >= 1",
                self.name
            )));
        }

        Ok(TemplateSpec {
            name: self.name.clone(),
            labels: self.labels.clone().unwrap_or_default(),
            mode: self.mode.unwrap_or_default(),
            image: self.image.clone(),
            vm_size: self.vm_size.clone(),
            os_type: self.os_type.unwrap_or_default(),
            launch_method: self.launch_method.unwrap_or(LaunchMethod::Push),
            parallelism,
            retention: duration_or(
                &format!("template.{}.retention", self.name),
                &self.retention,
                Duration::from_secs(60 * 60),
            )?,
            shutdown_on_idle: self.shutdown_on_idle.unwrap_or(false),
            disabled: self.disabled.unwrap_or(false),
            admin_credentials_id: self.admin_credentials_id.clone(),
            init_script: self.init_script.clone(),
            storage_account: self.storage_account.clone(),
            network: self.network.clone(),
        })
    }
}

fn duration_or(field: &str, value: &Option<String>, default: Duration) -> ConfigResult<Duration> {
    match value {
        None => Ok(default),
        Some(v) => parse_duration(v).ok_or_else(|| ConfigError::Duration {
            field: field.to_string(),
            value: v.clone(),
        }),
    }
}
