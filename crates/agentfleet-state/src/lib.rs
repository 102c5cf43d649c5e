//! agentfleet-state: in-memory domain state shared by the orchestrator,
//! the cleanup sweep and the verification gate.
//!
//! ```text
//! Worker ──── lifecycle (Mutex) ── CleanUpAction: DEFAULT | SHUTDOWN | DELETE | BLOCK
//!                                  eligible_for_reuse, endpoint, reason
//!
//! DeploymentQueue ── Mutex<VecDeque<DeploymentRecord>>   (FIFO, re-enqueue at back)
//! ```
//!
//! Workers are shared as `Arc<Worker>` between the host node registry and
//! the provisioning tasks; only their lifecycle fields mutate after
//! construction.

pub mod deployment;
pub mod error;
pub mod worker;

pub use deployment::{DeploymentQueue, DeploymentRecord};
pub use error::{WorkerStateError, WorkerStateResult};
pub use worker::{CleanUpAction, Endpoint, Worker, WorkerIdentity, WorkerSnapshot};
