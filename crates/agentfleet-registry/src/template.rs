//! Worker templates and their verification status.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{info, warn};

use agentfleet_core::{TemplateMode, TemplateSpec};

/// Verification outcome of a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateStatus {
    pub verified: bool,
    /// Most recent human-readable failure.
    pub status_details: Option<String>,
}

/// A template owned by exactly one fleet.
#[derive(Debug)]
pub struct Template {
    fleet: String,
    spec: TemplateSpec,
    status: Mutex<TemplateStatus>,
}

impl Template {
    pub fn new(fleet: impl Into<String>, spec: TemplateSpec) -> Self {
        Self {
            fleet: fleet.into(),
            spec,
            status: Mutex::new(TemplateStatus::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TemplateStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn fleet(&self) -> &str {
        &self.fleet
    }

    pub fn spec(&self) -> &TemplateSpec {
        &self.spec
    }

    pub fn status(&self) -> TemplateStatus {
        self.lock().clone()
    }

    pub fn is_verified(&self) -> bool {
        self.lock().verified
    }

    pub fn status_details(&self) -> Option<String> {
        self.lock().status_details.clone()
    }

    /// Usable for new provisioning.
    pub fn is_eligible(&self) -> bool {
        !self.spec.disabled && self.is_verified()
    }

    pub fn mark_verified(&self) {
        let mut st = self.lock();
        if !st.verified {
            info!(fleet = %self.fleet, template = %self.spec.name, "template verified");
        }
        st.verified = true;
        st.status_details = None;
    }

    pub fn mark_unverified(&self, details: impl Into<String>) {
        let details = details.into();
        warn!(fleet = %self.fleet, template = %self.spec.name, %details, "template marked unverified");
        let mut st = self.lock();
        st.verified = false;
        st.status_details = Some(details);
    }

    /// Record a failure message without changing the verified flag.
    pub fn set_status_details(&self, details: impl Into<String>) {
        self.lock().status_details = Some(details.into());
    }

    /// Label policy: `Always` serves every label including none;
    /// `Exclusive` serves only an explicit label naming it.
    pub fn matches_label(&self, label: Option<&str>) -> bool {
        match self.spec.mode {
            TemplateMode::Always => true,
            TemplateMode::Exclusive => {
                let Some(label) = label.map(str::trim).filter(|l| !l.is_empty()) else {
                    return false;
                };
                let own = self.spec.labels.trim();
                own == label || own.split_whitespace().any(|t| t == label)
            }
        }
    }
}
