//! Worker records and the cleanup-action state machine.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use agentfleet_core::{LaunchMethod, OsType, TemplateMode};

use crate::error::{WorkerStateError, WorkerStateResult};

/// What the cleanup sweep should do with an offline, idle worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CleanUpAction {
    /// Apply template policy: SHUTDOWN when idle shutdown is configured, else DELETE.
    #[default]
    Default,
    /// Power off and keep resources for later reuse.
    Shutdown,
    /// Destroy the VM and its network resources, then deregister.
    Delete,
    /// Leave the worker alone.
    Block,
}

impl fmt::Display for CleanUpAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CleanUpAction::Default => "DEFAULT",
            CleanUpAction::Shutdown => "SHUTDOWN",
            CleanUpAction::Delete => "DELETE",
            CleanUpAction::Block => "BLOCK",
        };
        f.write_str(s)
    }
}

/// Address a push-mode connection targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Immutable facts about a worker, fixed when it is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerIdentity {
    pub name: String,
    pub fleet: String,
    pub template: String,
    pub deployment_name: String,
    pub resource_group: String,
    pub launch_method: LaunchMethod,
    /// Label string copied from the template at creation time.
    pub labels: String,
    pub mode: TemplateMode,
    pub os_type: OsType,
    /// Idle time before the worker is taken offline. Zero disables it.
    pub retention: Duration,
    pub shutdown_on_idle: bool,
}

#[derive(Debug, Default)]
struct Lifecycle {
    action: CleanUpAction,
    reason: Option<String>,
    eligible_for_reuse: bool,
    endpoint: Option<Endpoint>,
}

/// A provisioned worker ("agent").
#[derive(Debug)]
pub struct Worker {
    identity: WorkerIdentity,
    lifecycle: Mutex<Lifecycle>,
}

/// Point-in-time view of a worker, for status reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    #[serde(flatten)]
    pub identity: WorkerIdentity,
    pub action: CleanUpAction,
    pub reason: Option<String>,
    pub eligible_for_reuse: bool,
    pub endpoint: Option<Endpoint>,
}

impl Worker {
    pub fn new(identity: WorkerIdentity) -> Self {
        Self {
            identity,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn fleet(&self) -> &str {
        &self.identity.fleet
    }

    pub fn template(&self) -> &str {
        &self.identity.template
    }

    pub fn resource_group(&self) -> &str {
        &self.identity.resource_group
    }

    pub fn launch_method(&self) -> LaunchMethod {
        self.identity.launch_method
    }

    pub fn action(&self) -> CleanUpAction {
        self.lifecycle().action
    }

    /// Diagnostic reason recorded with the last explicit action.
    pub fn reason(&self) -> Option<String> {
        self.lifecycle().reason.clone()
    }

    /// Reset to DEFAULT and drop any recorded reason.
    pub fn clear(&self) {
        let mut lc = self.lifecycle();
        lc.action = CleanUpAction::Default;
        lc.reason = None;
    }

    /// Reset to DEFAULT, keeping a diagnostic reason for the sweep.
    pub fn clear_with_reason(&self, reason: impl Into<String>) {
        let mut lc = self.lifecycle();
        lc.action = CleanUpAction::Default;
        lc.reason = Some(reason.into());
    }

    /// Pin the worker so the cleanup sweep leaves it alone.
    pub fn block(&self) {
        self.lifecycle().action = CleanUpAction::Block;
    }

    /// Request SHUTDOWN or DELETE. Any other action is rejected.
    pub fn set_action(&self, action: CleanUpAction, reason: impl Into<String>) -> WorkerStateResult<()> {
        match action {
            CleanUpAction::Shutdown | CleanUpAction::Delete => {
                let reason = reason.into();
                debug!(worker = %self.identity.name, %action, %reason, "cleanup action set");
                let mut lc = self.lifecycle();
                lc.action = action;
                lc.reason = Some(reason);
                Ok(())
            }
            other => Err(WorkerStateError::InvalidAction(other)),
        }
    }

    /// The action the sweep should execute, with DEFAULT resolved against
    /// the idle-shutdown policy. `None` for BLOCK.
    pub fn effective_action(&self) -> Option<CleanUpAction> {
        match self.action() {
            CleanUpAction::Default if self.identity.shutdown_on_idle => Some(CleanUpAction::Shutdown),
            CleanUpAction::Default => Some(CleanUpAction::Delete),
            CleanUpAction::Block => None,
            explicit => Some(explicit),
        }
    }

    pub fn is_eligible_for_reuse(&self) -> bool {
        self.lifecycle().eligible_for_reuse
    }

    pub fn set_eligible_for_reuse(&self, eligible: bool) {
        self.lifecycle().eligible_for_reuse = eligible;
    }

    /// Atomically take reuse eligibility. Only one caller gets `true`.
    pub fn claim_for_reuse(&self) -> bool {
        std::mem::replace(&mut self.lifecycle().eligible_for_reuse, false)
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.lifecycle().endpoint.clone()
    }

    pub fn set_endpoint(&self, endpoint: Endpoint) {
        self.lifecycle().endpoint = Some(endpoint);
    }

    /// Reuse matching: an unlabelled worker in the default mode matches any
    /// template; otherwise labels must be equal ignoring case.
    pub fn matches_template_labels(&self, template_labels: &str) -> bool {
        let labels = self.identity.labels.trim();
        (labels.is_empty() && self.identity.mode == TemplateMode::Always)
            || labels.eq_ignore_ascii_case(template_labels.trim())
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        let lc = self.lifecycle();
        WorkerSnapshot {
            identity: self.identity.clone(),
            action: lc.action,
            reason: lc.reason.clone(),
            eligible_for_reuse: lc.eligible_for_reuse,
            endpoint: lc.endpoint.clone(),
        }
    }
}
