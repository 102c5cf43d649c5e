//! Deployment records awaiting cleanup and the queue that holds them.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// A remote deployment the cleanup sweep will eventually delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub fleet: String,
    pub resource_group: String,
    pub deployment_name: String,
    pub enqueued_at: SystemTime,
}

impl DeploymentRecord {
    pub fn new(
        fleet: impl Into<String>,
        resource_group: impl Into<String>,
        deployment_name: impl Into<String>,
        enqueued_at: SystemTime,
    ) -> Self {
        Self {
            fleet: fleet.into(),
            resource_group: resource_group.into(),
            deployment_name: deployment_name.into(),
            enqueued_at,
        }
    }

    /// Time since the record was enqueued; zero if `now` is earlier.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.enqueued_at).unwrap_or_default()
    }
}

/// Internally synchronised FIFO of deployment records.
///
/// Shared between provisioning (producers) and the cleanup sweep, which
/// pops from the front and re-enqueues records still within retention.
#[derive(Debug, Default)]
pub struct DeploymentQueue {
    inner: Mutex<VecDeque<DeploymentRecord>>,
}

impl DeploymentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DeploymentRecord>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, record: DeploymentRecord) {
        self.lock().push_back(record);
    }

    pub fn pop_front(&self) -> Option<DeploymentRecord> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the queue contents, front first.
    pub fn snapshot(&self) -> Vec<DeploymentRecord> {
        self.lock().iter().cloned().collect()
    }
}
