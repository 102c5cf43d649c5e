//! The host's node registry and the worker bring-up transport.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;

use agentfleet_state::Worker;

use crate::error::ProviderResult;

/// A registered node as the host sees it right now.
#[derive(Debug, Clone)]
pub struct NodeView {
    pub worker: Arc<Worker>,
    pub online: bool,
    /// No jobs running.
    pub idle: bool,
    /// Taken offline by an operator; the sweep must not touch it.
    pub manually_offline: bool,
    /// When the node last became idle.
    pub idle_since: Option<SystemTime>,
}

/// The surrounding host's live node set. Called synchronously and assumed
/// thread-safe.
pub trait NodeRegistry: Send + Sync {
    fn add_node(&self, worker: Arc<Worker>);

    /// Returns whether a node was removed.
    fn remove_node(&self, name: &str) -> bool;

    fn node(&self, name: &str) -> Option<NodeView>;

    fn nodes(&self) -> Vec<NodeView>;

    /// Disconnect an online node, recording why.
    fn take_offline(&self, name: &str, reason: &str);
}

/// Brings a registered worker online once its VM is reachable.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Push mode: connect out to the worker.
    async fn connect(&self, worker: &Worker) -> ProviderResult<()>;

    /// Pull mode: resolve once the worker has called back and is online.
    /// Unbounded; callers apply their own timeout.
    async fn wait_online(&self, worker: &Worker) -> ProviderResult<()>;
}
