//! agentfleet-deploy: turns "N workers wanted" into running, registered
//! workers.
//!
//! ```text
//! provision(fleet, template, n)
//!   ├── reuse pass      offline + eligible workers ─► restart ─► re-register ─► bring up
//!   └── new pass        reserve(n - reused) = granted
//!         └── one shared deployment future (stage script, submit, enqueue record)
//!               └── granted × unit task: poll ─► build worker ─► BLOCK ─► register ─► bring up
//!                                         └── on failure: delete VM/NIC/IP, release(1),
//!                                             mark template unverified, deregister
//! ```
//!
//! Each unit resolves independently through its [`PlannedUnit`]; siblings
//! in one batch never fail each other.

pub mod error;
pub mod orchestrator;
pub mod unit;

pub use error::{ProvisionError, ProvisionResult};
pub use orchestrator::DeploymentOrchestrator;
pub use unit::PlannedUnit;
