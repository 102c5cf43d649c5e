//! agentfleet-controller: the long-lived owner of every shared piece of
//! provisioning state.
//!
//! ```text
//! FleetController
//!   ├── FleetRegistry ─────────── fleets, capacity, templates
//!   ├── DeploymentQueue ───────── records for the cleanup sweep
//!   ├── VerificationGate ──────── pending fleets / templates
//!   ├── DeploymentOrchestrator ── provision(fleet, template, n)
//!   ├── CleanupSweep
//!   └── ExecutionEngine ───────── shared retry + background deletes
//!
//! VerificationTask ─┐
//! CleanupTask ──────┴── PeriodicTask adapters driven by agentfleet_exec::spawn_periodic
//! ```
//!
//! All operations take `&self` and are safe to call concurrently.

pub mod controller;
pub mod status;
pub mod tasks;

pub use controller::FleetController;
pub use status::{ControllerStatus, FleetStatus, TemplateStatusView, WorkerStatus};
pub use tasks::{CleanupTask, VerificationTask};
