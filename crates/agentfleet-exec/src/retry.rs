//! Bounded retry with backoff, and tracked fire-and-forget execution.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use backoff::future::retry_notify;
use backoff::{Error as BackoffError, ExponentialBackoff};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use agentfleet_core::RetrySettings;

use crate::error::ExecError;

/// Classifies task errors as worth retrying or not.
///
/// Only transient failures (throttling, timeouts, generic service errors)
/// should return `true`; conflicts and bad requests are surfaced at once.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Backoff parameters for one retry strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_interval: Duration,
    /// Upper bound on a single delay.
    pub max_interval: Duration,
    /// Delay growth factor; 1.0 gives a fixed interval.
    pub multiplier: f64,
    /// Total wall-clock budget across all attempts.
    pub max_elapsed: Option<Duration>,
}

impl BackoffPolicy {
    /// Exponential backoff doubling from `base_interval` up to `max_interval`.
    pub fn exponential(max_retries: u32, base_interval: Duration, max_interval: Duration) -> Self {
        Self {
            max_retries,
            base_interval,
            max_interval,
            multiplier: 2.0,
            max_elapsed: None,
        }
    }

    /// The same delay between every attempt.
    pub fn fixed(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries,
            base_interval: interval,
            max_interval: interval,
            multiplier: 1.0,
            max_elapsed: None,
        }
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    /// A fresh, unjittered backoff clock for one `execute_with_retry` call.
    pub fn exponential_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.base_interval,
            initial_interval: self.base_interval,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max_interval,
            max_elapsed_time: self.max_elapsed,
            ..ExponentialBackoff::default()
        }
    }
}

impl From<&RetrySettings> for BackoffPolicy {
    fn from(settings: &RetrySettings) -> Self {
        let policy = BackoffPolicy::exponential(
            settings.max_retries,
            settings.base_interval,
            settings.max_interval,
        );
        if settings.max_elapsed.is_zero() {
            policy
        } else {
            policy.with_max_elapsed(settings.max_elapsed)
        }
    }
}

/// How the engine treats failures of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry retryable errors according to the policy.
    Backoff(BackoffPolicy),
    /// Run exactly once.
    NoRetry,
}

/// Runs remote tasks with retry, either inline or in the background.
///
/// Cloning is cheap; clones share the same background task set.
#[derive(Clone)]
pub struct ExecutionEngine {
    default_strategy: RetryStrategy,
    background: Arc<Mutex<JoinSet<()>>>,
}

impl ExecutionEngine {
    pub fn new(default_strategy: RetryStrategy) -> Self {
        Self {
            default_strategy,
            background: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self::new(RetryStrategy::Backoff(BackoffPolicy::from(settings)))
    }

    /// The strategy used when callers do not need a specific one.
    pub fn default_strategy(&self) -> &RetryStrategy {
        &self.default_strategy
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, runs
    /// out of retries, or exceeds the strategy's wall-clock budget.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        task: &str,
        strategy: &RetryStrategy,
        mut op: F,
    ) -> Result<T, ExecError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let policy = match strategy {
            RetryStrategy::Backoff(policy) => policy,
            RetryStrategy::NoRetry => {
                return op().await.map_err(|last| ExecError::Failed {
                    task: task.to_string(),
                    attempts: 1,
                    last,
                });
            }
        };

        let start = Instant::now();
        let max_retries = policy.max_retries;
        let max_elapsed = policy.max_elapsed;
        let attempts = AtomicU32::new(0);
        // Set when the error is final for reasons other than the budget.
        let gave_up = AtomicBool::new(false);

        // `None` is an attempt cut off by the wall-clock budget.
        let attempt = || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let fut = op();
            let gave_up = &gave_up;
            async move {
                let outcome = match max_elapsed {
                    Some(budget) => match tokio::time::timeout(budget.saturating_sub(start.elapsed()), fut).await {
                        Ok(outcome) => outcome,
                        Err(_) => return Err(BackoffError::<Option<E>>::permanent(None)),
                    },
                    None => fut.await,
                };
                outcome.map_err(|e| {
                    if !e.is_retryable() || n > max_retries {
                        gave_up.store(true, Ordering::SeqCst);
                        BackoffError::permanent(Some(e))
                    } else {
                        BackoffError::transient(Some(e))
                    }
                })
            }
        };
        let notify = |err: Option<E>, delay: Duration| {
            if let Some(e) = err {
                let attempt = attempts.load(Ordering::SeqCst);
                warn!(task, attempt, delay_ms = delay.as_millis() as u64, error = %e, "transient failure, retrying");
            }
        };

        let result = retry_notify(policy.exponential_backoff(), attempt, notify).await;
        let attempts = attempts.load(Ordering::SeqCst);
        match result {
            Ok(value) => {
                if attempts > 1 {
                    debug!(task, attempt = attempts, "succeeded after retry");
                }
                Ok(value)
            }
            Err(Some(last)) if gave_up.load(Ordering::SeqCst) => Err(ExecError::Failed {
                task: task.to_string(),
                attempts,
                last,
            }),
            Err(last) => Err(ExecError::TimedOut {
                task: task.to_string(),
                elapsed: start.elapsed(),
                last,
            }),
        }
    }

    /// Fire-and-forget: run `op` with retry on the background set and log
    /// the outcome. Use [`quiesce`](Self::quiesce) to wait for completion.
    pub fn execute_async<T, E, F, Fut>(&self, task: impl Into<String>, strategy: RetryStrategy, op: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Retryable + Display + Send + 'static,
    {
        let task = task.into();
        let engine = self.clone();
        let fut = async move {
            match engine.execute_with_retry(&task, &strategy, op).await {
                Ok(_) => debug!(%task, "background task completed"),
                Err(e) => error!(%task, error = %e, "background task failed"),
            }
        };

        let mut set = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap finished tasks so the set does not grow without bound.
        while set.try_join_next().is_some() {}
        set.spawn(fut);
    }

    /// Number of background tasks not yet reaped.
    pub fn pending_background(&self) -> usize {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait until every background task, including ones spawned while
    /// waiting, has finished.
    pub async fn quiesce(&self) {
        loop {
            let mut set = {
                let mut guard = self.background.lock().unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *guard)
            };
            if set.is_empty() {
                return;
            }
            while let Some(res) = set.join_next().await {
                if let Err(e) = res {
                    error!(error = %e, "background task panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Flaky,
        Broken,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Flaky => f.write_str("flaky"),
                TestError::Broken => f.write_str("broken"),
            }
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Flaky)
        }
    }

    fn fast(max_retries: u32) -> RetryStrategy {
        RetryStrategy::Backoff(BackoffPolicy::fixed(max_retries, Duration::from_millis(1)))
    }

    #[test]
    fn exponential_backoff_is_capped() {
        use backoff::backoff::Backoff;

        let p = BackoffPolicy::exponential(5, Duration::from_millis(10), Duration::from_millis(40));
        let mut b = p.exponential_backoff();
        assert_eq!(b.initial_interval, Duration::from_millis(10));
        assert_eq!(b.max_elapsed_time, None);

        let delays: Vec<Duration> = (0..5).map(|_| b.next_backoff().unwrap()).collect();
        assert!(delays[0] < Duration::from_millis(11));
        assert!(delays[1] >= Duration::from_millis(20));
        assert!(delays.iter().all(|d| *d < Duration::from_millis(41)));
        assert!(delays[4] >= Duration::from_millis(40));
    }

    #[test]
    fn fixed_backoff_never_grows() {
        use backoff::backoff::Backoff;

        let mut b = BackoffPolicy::fixed(3, Duration::from_millis(200)).exponential_backoff();
        for _ in 0..4 {
            let d = b.next_backoff().unwrap();
            assert!(d >= Duration::from_millis(200) && d < Duration::from_millis(201));
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let engine = ExecutionEngine::new(RetryStrategy::NoRetry);
        let calls = AtomicU32::new(0);

        let result = engine
            .execute_with_retry("flaky op", &fast(3), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err(TestError::Flaky) } else { Ok(n) } }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_last_error_when_retries_exhausted() {
        let engine = ExecutionEngine::new(RetryStrategy::NoRetry);
        let calls = AtomicU32::new(0);

        let err = engine
            .execute_with_retry("always flaky", &fast(2), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TestError::Flaky) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, ExecError::Failed { attempts: 3, .. }));
        assert!(err.to_string().contains("flaky"));
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let engine = ExecutionEngine::new(RetryStrategy::NoRetry);
        let calls = AtomicU32::new(0);

        let err = engine
            .execute_with_retry("broken op", &fast(5), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TestError::Broken) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err.last_error(), Some(TestError::Broken)));
    }

    #[tokio::test]
    async fn no_retry_runs_once() {
        let engine = ExecutionEngine::new(RetryStrategy::NoRetry);
        let calls = AtomicU32::new(0);

        let _ = engine
            .execute_with_retry("once", &RetryStrategy::NoRetry, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TestError::Flaky) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn wall_clock_budget_stops_retries() {
        let engine = ExecutionEngine::new(RetryStrategy::NoRetry);
        let strategy = RetryStrategy::Backoff(
            BackoffPolicy::fixed(100, Duration::from_millis(20)).with_max_elapsed(Duration::from_millis(50)),
        );

        let err = engine
            .execute_with_retry("slow", &strategy, || async { Err::<(), _>(TestError::Flaky) })
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(matches!(err.last_error(), Some(TestError::Flaky)));
    }

    #[tokio::test]
    async fn budget_cancels_a_hung_attempt() {
        let engine = ExecutionEngine::new(RetryStrategy::NoRetry);
        let strategy = RetryStrategy::Backoff(
            BackoffPolicy::fixed(1, Duration::from_millis(1)).with_max_elapsed(Duration::from_millis(20)),
        );

        let err = engine
            .execute_with_retry("hung", &strategy, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), TestError>(())
            })
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(err.last_error().is_none());
    }

    #[tokio::test]
    async fn background_tasks_can_be_awaited() {
        let engine = ExecutionEngine::new(fast(1));
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            engine.execute_async("bg", fast(1), move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), TestError>(())
                }
            });
        }

        engine.quiesce().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(engine.pending_background(), 0);
    }

    #[test]
    fn policy_from_settings() {
        let settings = RetrySettings::default();
        let p = BackoffPolicy::from(&settings);
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.multiplier, 2.0);
        assert_eq!(p.max_elapsed, Some(Duration::from_secs(300)));
    }
}
