//! Periodic background work driven on a fixed wall-clock period.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// A unit of background work that runs once per period.
///
/// Implementors are registered explicitly with [`spawn_periodic`]; a failed
/// run is logged and the next period runs as usual.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &str;

    fn period(&self) -> Duration;

    async fn run_once(&self) -> anyhow::Result<()>;
}

/// Drive `task` every period until `shutdown` flips to `true` or its sender
/// is dropped. The first run happens one period after start.
pub async fn run_periodic(task: Arc<dyn PeriodicTask>, mut shutdown: watch::Receiver<bool>) {
    let period = task.period();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(task = task.name(), period_ms = period.as_millis() as u64, "periodic task started");

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                debug!(task = task.name(), "periodic run starting");
                if let Err(e) = task.run_once().await {
                    error!(task = task.name(), error = %e, "periodic run failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!(task = task.name(), "periodic task stopped");
}

/// Spawn [`run_periodic`] on the current runtime.
pub fn spawn_periodic(task: Arc<dyn PeriodicTask>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(run_periodic(task, shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter {
        runs: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl PeriodicTask for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn period(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn run_once(&self) -> anyhow::Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn runs_until_shutdown() {
        let task = Arc::new(Counter { runs: AtomicU32::new(0), fail: false });
        let (tx, rx) = watch::channel(false);
        let handle = spawn_periodic(task.clone(), rx);

        tokio::time::sleep(Duration::from_millis(80)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let runs = task.runs.load(Ordering::SeqCst);
        assert!(runs >= 2, "expected several runs, got {runs}");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), runs);
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_loop() {
        let task = Arc::new(Counter { runs: AtomicU32::new(0), fail: true });
        let (tx, rx) = watch::channel(false);
        let handle = spawn_periodic(task.clone(), rx);

        tokio::time::sleep(Duration::from_millis(60)).await;
        drop(tx);
        handle.await.unwrap();

        assert!(task.runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn already_shut_down_never_runs() {
        let task = Arc::new(Counter { runs: AtomicU32::new(0), fail: false });
        let (_tx, rx) = watch::channel(true);
        run_periodic(task.clone(), rx).await;
        assert_eq!(task.runs.load(Ordering::SeqCst), 0);
    }
}
