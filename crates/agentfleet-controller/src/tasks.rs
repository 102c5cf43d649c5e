//! Periodic task adapters for the two background passes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use agentfleet_exec::PeriodicTask;

use crate::controller::FleetController;

/// Runs a verification pass every `sweep.verification_interval`.
pub struct VerificationTask {
    controller: Arc<FleetController>,
}

impl VerificationTask {
    pub fn new(controller: Arc<FleetController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl PeriodicTask for VerificationTask {
    fn name(&self) -> &str {
        "verification"
    }

    fn period(&self) -> Duration {
        self.controller.settings().sweep.verification_interval
    }

    async fn run_once(&self) -> anyhow::Result<()> {
        let report = self.controller.run_verification_pass().await;
        debug!(
            fleets_verified = report.fleets_verified.len(),
            templates_verified = report.templates_verified.len(),
            still_pending = self.controller.gate().pending_templates().len(),
            "verification tick"
        );
        Ok(())
    }
}

/// Runs the cleanup sweep every `sweep.cleanup_interval`.
pub struct CleanupTask {
    controller: Arc<FleetController>,
}

impl CleanupTask {
    pub fn new(controller: Arc<FleetController>) -> Self {
        Self { controller }
    }
}

#[async_trait]
impl PeriodicTask for CleanupTask {
    fn name(&self) -> &str {
        "cleanup"
    }

    fn period(&self) -> Duration {
        self.controller.settings().sweep.cleanup_interval
    }

    async fn run_once(&self) -> anyhow::Result<()> {
        let report = self.controller.run_cleanup_sweep().await;
        if !report.errors.is_empty() {
            anyhow::bail!("{} cleanup item(s) failed: {}", report.errors.len(), report.errors.join("; "));
        }
        Ok(())
    }
}
