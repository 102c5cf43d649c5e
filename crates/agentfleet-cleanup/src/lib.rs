//! agentfleet-cleanup: the periodic reconciliation sweep.
//!
//! ```text
//! run(now)
//!   ├── deployments   pop ─► fleet? ─► remote status + age ─► delete | re-enqueue
//!   │                 (stops at the first re-enqueued record: one visit per sweep)
//!   ├── idle          online + idle longer than template retention ─► take offline
//!   └── workers       offline + idle + !manual + !BLOCK
//!                       ├── VM gone    ─► deregister, release(1)
//!                       └── VM exists  ─► SHUTDOWN: power off, eligible for reuse
//!                                         DELETE:   VM/NIC/IP, deregister, release(1)
//!                                         failure:  force DELETE with reason
//! ```
//!
//! A failure on one record or worker is logged and never aborts the rest
//! of the sweep.

pub mod error;
pub mod sweep;

pub use error::{SweepError, SweepResult};
pub use sweep::{CleanupSweep, IDLE_TIMEOUT_REASON, SweepReport, retention_expired};
