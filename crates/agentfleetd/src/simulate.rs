//! Daemon wiring over the simulated backend.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use agentfleet_controller::{CleanupTask, FleetController, VerificationTask};
use agentfleet_core::FleetConfig;
use agentfleet_exec::spawn_periodic;
use agentfleet_provider::Collaborators;
use agentfleet_provider::sim::{SimLauncher, SimNodeRegistry, SimScriptStager, SimulatedProvider, StaticCredentialStore};

/// One `--provision` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demand {
    pub label: Option<String>,
    pub workload: u32,
}

pub fn parse_demand(s: &str) -> Result<Demand, String> {
    let (label, workload) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected LABEL:WORKLOAD, got '{s}'"))?;
    let workload = workload
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("bad workload in '{s}': {e}"))?;
    let label = label.trim();
    Ok(Demand {
        label: (!label.is_empty()).then(|| label.to_string()),
        workload,
    })
}

/// Parse `path` and build a controller with every fleet loaded against one
/// simulated provider. Every credential id and network the config names
/// exists in the simulation.
pub fn load(path: &Path) -> anyhow::Result<Arc<FleetController>> {
    let config = FleetConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?;
    let settings = config.settings()?;
    let fleets = config.fleets()?;

    let provider = Arc::new(SimulatedProvider::new());
    let credentials = StaticCredentialStore::new();
    for fleet in &fleets {
        credentials.insert(&fleet.credentials_id, "sim", "sim");
        for template in &fleet.templates {
            if let Some(id) = template.admin_credentials_id.as_deref() {
                credentials.insert(id, "sim-admin", "sim");
            }
            if let Some(net) = &template.network {
                provider.add_network(&net.virtual_network, net.subnet.as_deref());
            }
        }
    }

    let nodes = Arc::new(SimNodeRegistry::new());
    let collab = Collaborators {
        nodes: nodes.clone(),
        launcher: Arc::new(SimLauncher::new(nodes)),
        credentials: Arc::new(credentials),
        stager: Arc::new(SimScriptStager::new()),
    };

    let controller = Arc::new(FleetController::new(settings, collab));
    for spec in fleets {
        controller.add_fleet(spec, provider.clone());
    }
    Ok(controller)
}

pub async fn run(path: &Path, demands: Vec<Demand>) -> anyhow::Result<()> {
    let controller = load(path)?;
    info!(
        fleets = controller.fleets().list().len(),
        "agentfleet daemon starting with the simulated backend"
    );

    // Verify up front so initial demand can be served immediately.
    let report = controller.run_verification_pass().await;
    info!(
        fleets_verified = report.fleets_verified.len(),
        templates_verified = report.templates_verified.len(),
        "initial verification finished"
    );

    for demand in demands {
        let units = controller.provision(demand.label.as_deref(), demand.workload);
        info!(
            label = demand.label.as_deref().unwrap_or(""),
            workload = demand.workload,
            planned = units.len(),
            "initial demand planned"
        );
        for unit in units {
            tokio::spawn(async move {
                let name = unit.name().to_string();
                match unit.wait().await {
                    Ok(worker) => info!(worker = %worker.name(), "worker ready"),
                    Err(e) => warn!(worker = %name, error = %e, "worker failed"),
                }
            });
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let verify = spawn_periodic(Arc::new(VerificationTask::new(controller.clone())), shutdown_rx.clone());
    let cleanup = spawn_periodic(Arc::new(CleanupTask::new(controller.clone())), shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .context("installing Ctrl-C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = verify.await;
    let _ = cleanup.await;
    controller.quiesce().await;

    info!("agentfleet daemon stopped");
    Ok(())
}
