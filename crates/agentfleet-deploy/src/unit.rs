//! Handle to one worker under construction.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use agentfleet_state::Worker;

use crate::error::{ProvisionError, ProvisionResult};

/// One worker being created or revived.
///
/// Dropping the handle does not stop the unit; use [`cancel`](Self::cancel)
/// to abort it, which still runs compensation for anything created.
#[derive(Debug)]
pub struct PlannedUnit {
    name: String,
    fleet: String,
    template: String,
    reused: bool,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<ProvisionResult<Arc<Worker>>>,
}

impl PlannedUnit {
    pub(crate) fn new(
        name: String,
        fleet: String,
        template: String,
        reused: bool,
        cancel: watch::Sender<bool>,
        handle: JoinHandle<ProvisionResult<Arc<Worker>>>,
    ) -> Self {
        Self {
            name,
            fleet,
            template,
            reused,
            cancel,
            handle,
        }
    }

    /// Desired worker (VM) name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fleet(&self) -> &str {
        &self.fleet
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Whether this unit revives an existing worker.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the unit to stop at its next suspension point.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the unit to resolve.
    pub async fn wait(self) -> ProvisionResult<Arc<Worker>> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ProvisionError::Aborted {
                vm: self.name,
                message: e.to_string(),
            }),
        }
    }
}

/// Resolve once cancellation is requested. A dropped sender never cancels.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
