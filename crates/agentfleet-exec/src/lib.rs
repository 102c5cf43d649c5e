//! agentfleet-exec: the single place remote calls are retried.
//!
//! Every remote call site goes through an [`ExecutionEngine`] instead of
//! hand-rolling sleep loops:
//!
//! ```text
//! ExecutionEngine
//!   ├── execute_with_retry()  awaits the result, retrying Retryable errors
//!   ├── execute_async()       fire-and-forget on a tracked background set
//!   └── quiesce()             waits for every background task (tests, shutdown)
//! ```
//!
//! A [`RetryStrategy`] is either exponential/fixed backoff bounded by a
//! retry count and a total wall-clock budget, or a single attempt.
//!
//! The crate also defines the [`PeriodicTask`] contract used by the
//! verification gate and the cleanup sweep, and the loop that drives it
//! until a shutdown signal arrives.

pub mod error;
pub mod periodic;
pub mod retry;

pub use error::ExecError;
pub use periodic::{PeriodicTask, run_periodic, spawn_periodic};
pub use retry::{BackoffPolicy, ExecutionEngine, RetryStrategy, Retryable};
