//! Bounded-concurrency task scheduler.
//!
//! [`run`] executes independently-fallible units of work under a
//! [`StrategyConfig`]:
//!
//! - `parallel = false` runs units strictly in submission order.
//! - `parallel = true` keeps at most `max_concurrent` units in flight; the
//!   rest wait on a semaphore.
//! - Each unit is retried up to `retry_attempts` times with a fixed
//!   `retry_delay`, but only for transient [`Fault`]s.
//! - The batch `timeout` is global. On expiry unfinished units are dropped at
//!   their next `.await` and completed outcomes are kept.
//!
//! The scheduler holds no state between calls.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{BatchError, Fault};
use crate::types::{ErrorMode, StrategyConfig};

type Work<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// A labelled unit of work. The closure is re-invoked on every retry.
pub struct Task<T, E> {
    label: String,
    work: Work<T, E>,
}

impl<T, E> Task<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new<F, Fut>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let work: Work<T, E> = Arc::new(move || f().boxed());
        Self {
            label: label.into(),
            work,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Terminal result of one unit.
#[derive(Debug)]
pub struct Outcome<T, E> {
    pub label: String,
    /// Position in the submitted task list.
    pub index: usize,
    pub attempts: u32,
    pub result: Result<T, E>,
}

/// Everything a non-aborted batch produced.
#[derive(Debug)]
pub struct BatchResult<T, E> {
    /// Submission order when sequential; completion order when parallel.
    pub outcomes: Vec<Outcome<T, E>>,
    /// Labels of units cancelled by the batch timeout, in submission order.
    pub timed_out: Vec<String>,
    pub elapsed: Duration,
}

impl<T, E> BatchResult<T, E> {
    pub fn has_errors(&self) -> bool {
        !self.timed_out.is_empty() || self.outcomes.iter().any(|o| o.result.is_err())
    }

    /// Split outcomes into `(label, value)` successes and `(label, error)` failures.
    pub fn partition(self) -> (Vec<(String, T)>, Vec<(String, E)>) {
        let mut ok = Vec::new();
        let mut failed = Vec::new();
        for outcome in self.outcomes {
            match outcome.result {
                Ok(value) => ok.push((outcome.label, value)),
                Err(err) => failed.push((outcome.label, err)),
            }
        }
        (ok, failed)
    }
}

struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

/// Run `tasks` under `cfg`.
///
/// Returns `Err` only under [`ErrorMode::FailFast`], for the first terminal
/// failure or for a timeout.
pub async fn run<T, E>(
    tasks: Vec<Task<T, E>>,
    cfg: &StrategyConfig,
) -> Result<BatchResult<T, E>, BatchError<E>>
where
    T: Send + 'static,
    E: Fault,
{
    let started = Instant::now();
    let deadline = started + cfg.timeout;
    let total = tasks.len();

    let (mut outcomes, mut timed_out) = if cfg.parallel && total > 1 {
        run_parallel(tasks, cfg, deadline).await?
    } else {
        run_sequential(tasks, cfg, deadline).await?
    };

    let elapsed = started.elapsed();
    if !timed_out.is_empty() {
        tracing::warn!(
            unfinished = timed_out.len(),
            total,
            elapsed_ms = elapsed.as_millis() as u64,
            "batch timed out",
        );
        if cfg.error_mode == ErrorMode::FailFast {
            return Err(BatchError::TimedOut {
                elapsed,
                pending: timed_out,
            });
        }
    }

    if cfg.error_mode == ErrorMode::IgnoreErrors {
        let before = outcomes.len();
        outcomes.retain(|o| o.result.is_ok());
        if outcomes.len() < before || !timed_out.is_empty() {
            tracing::debug!(
                dropped = before - outcomes.len() + timed_out.len(),
                "ignoring failed units",
            );
        }
        timed_out.clear();
    }

    Ok(BatchResult {
        outcomes,
        timed_out,
        elapsed,
    })
}

type Collected<T, E> = (Vec<Outcome<T, E>>, Vec<String>);

async fn run_sequential<T, E>(
    tasks: Vec<Task<T, E>>,
    cfg: &StrategyConfig,
    deadline: Instant,
) -> Result<Collected<T, E>, BatchError<E>>
where
    T: Send + 'static,
    E: Fault,
{
    let policy = RetryPolicy {
        attempts: cfg.retry_attempts,
        delay: cfg.retry_delay,
    };
    let mut outcomes = Vec::with_capacity(tasks.len());
    let mut remaining = tasks.into_iter().enumerate();

    while let Some((index, task)) = remaining.next() {
        let attempt = execute(&task.work, &policy, &task.label);
        match tokio::time::timeout_at(deadline, attempt).await {
            Ok((Err(err), _)) if cfg.error_mode == ErrorMode::FailFast => {
                return Err(BatchError::Aborted {
                    label: task.label,
                    source: err,
                });
            }
            Ok((result, attempts)) => outcomes.push(Outcome {
                label: task.label,
                index,
                attempts,
                result,
            }),
            Err(_) => {
                let mut timed_out = vec![task.label];
                timed_out.extend(remaining.map(|(_, t)| t.label));
                return Ok((outcomes, timed_out));
            }
        }
    }

    Ok((outcomes, Vec::new()))
}

async fn run_parallel<T, E>(
    tasks: Vec<Task<T, E>>,
    cfg: &StrategyConfig,
    deadline: Instant,
) -> Result<Collected<T, E>, BatchError<E>>
where
    T: Send + 'static,
    E: Fault,
{
    let semaphore = Arc::new(Semaphore::new(cfg.max_concurrent.max(1)));
    let mut pending = BTreeMap::new();
    let mut set = JoinSet::new();

    for (index, task) in tasks.into_iter().enumerate() {
        pending.insert(index, task.label.clone());
        let semaphore = semaphore.clone();
        let policy = RetryPolicy {
            attempts: cfg.retry_attempts,
            delay: cfg.retry_delay,
        };
        set.spawn(async move {
            // The semaphore is never closed, so a permit is always granted.
            let _permit = semaphore.acquire_owned().await.ok();
            let (result, attempts) = execute(&task.work, &policy, &task.label).await;
            Outcome {
                label: task.label,
                index,
                attempts,
                result,
            }
        });
    }

    let mut outcomes = Vec::with_capacity(pending.len());
    loop {
        match tokio::time::timeout_at(deadline, set.join_next()).await {
            Ok(None) => break,
            Ok(Some(Ok(outcome))) => {
                pending.remove(&outcome.index);
                if cfg.error_mode == ErrorMode::FailFast {
                    if let Err(err) = outcome.result {
                        set.abort_all();
                        return Err(BatchError::Aborted {
                            label: outcome.label,
                            source: err,
                        });
                    }
                }
                outcomes.push(outcome);
            }
            Ok(Some(Err(join_err))) => {
                if join_err.is_panic() {
                    std::panic::resume_unwind(join_err.into_panic());
                }
            }
            Err(_) => {
                set.abort_all();
                return Ok((outcomes, pending.into_values().collect()));
            }
        }
    }

    Ok((outcomes, Vec::new()))
}

async fn execute<T, E: Fault>(
    work: &Work<T, E>,
    policy: &RetryPolicy,
    label: &str,
) -> (Result<T, E>, u32) {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match work().await {
            Ok(value) => return (Ok(value), attempts),
            Err(err) if err.is_transient() && attempts <= policy.attempts => {
                tracing::warn!(
                    unit = label,
                    attempt = attempts,
                    error = %err,
                    "transient failure, retrying",
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(err) => {
                tracing::debug!(unit = label, attempts, error = %err, "unit failed");
                return (Err(err), attempts);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FaultKind;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("unit failed (transient: {transient})")]
    struct UnitError {
        transient: bool,
    }

    impl Fault for UnitError {
        fn kind(&self) -> FaultKind {
            if self.transient {
                FaultKind::Transfer
            } else {
                FaultKind::Validation
            }
        }
    }

    fn sleeper(label: &str, millis: u64) -> Task<String, UnitError> {
        let owned = label.to_string();
        Task::new(label, move || {
            let owned = owned.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(owned)
            }
        })
    }

    fn failing(label: &str, transient: bool) -> Task<String, UnitError> {
        Task::new(label, move || async move { Err(UnitError { transient }) })
    }

    fn labels<T, E>(result: &BatchResult<T, E>) -> Vec<String> {
        result.outcomes.iter().map(|o| o.label.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_preserves_submission_order() {
        let tasks = vec![sleeper("a", 30), sleeper("b", 1), sleeper("c", 10)];
        let result = run(tasks, &StrategyConfig::sequential()).await.unwrap();
        assert_eq!(labels(&result), vec!["a", "b", "c"]);
        assert!(!result.has_errors());
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_never_exceeds_max_concurrent() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<Task<(), UnitError>> = (0..10)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                Task::new(format!("unit-{i}"), move || {
                    let running = running.clone();
                    let peak = peak.clone();
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
            })
            .collect();

        let cfg = StrategyConfig::default().with_parallelism(3);
        let result = run(tasks, &cfg).await.unwrap();
        assert_eq!(result.outcomes.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_fixed_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let task = Task::new("flaky", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(UnitError { transient: true })
                } else {
                    Ok("done")
                }
            }
        });
        let cfg = StrategyConfig::sequential().with_retries(3, Duration::from_millis(50));
        let started = Instant::now();
        let result = run(vec![task], &cfg).await.unwrap();
        assert_eq!(result.outcomes[0].attempts, 3);
        assert!(result.outcomes[0].result.is_ok());
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_not_retried() {
        let cfg = StrategyConfig::sequential().with_retries(5, Duration::from_millis(10));
        let result = run(vec![failing("bad", false)], &cfg).await.unwrap();
        assert_eq!(result.outcomes[0].attempts, 1);
        assert!(result.has_errors());
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_aborts_the_batch() {
        let cfg = StrategyConfig::default()
            .with_parallelism(2)
            .with_error_mode(ErrorMode::FailFast);
        let tasks = vec![sleeper("slow", 1_000), failing("bad", false)];
        let err = run(tasks, &cfg).await.unwrap_err();
        match err {
            BatchError::Aborted { label, .. } => assert_eq!(label, "bad"),
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn collect_errors_keeps_successes_and_failures() {
        let cfg = StrategyConfig::default().with_error_mode(ErrorMode::CollectErrors);
        let tasks = vec![sleeper("ok", 1), failing("bad", false)];
        let (ok, failed) = run(tasks, &cfg).await.unwrap().partition();
        assert_eq!(ok.len(), 1);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "bad");
    }

    #[tokio::test(start_paused = true)]
    async fn ignore_errors_drops_failures() {
        let cfg = StrategyConfig::default().with_error_mode(ErrorMode::IgnoreErrors);
        let tasks = vec![sleeper("ok", 1), failing("bad", true)];
        let result = run(tasks, &cfg).await.unwrap();
        assert_eq!(labels(&result), vec!["ok"]);
        assert!(!result.has_errors());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_keeps_completed_outcomes() {
        let cfg = StrategyConfig::default()
            .with_parallelism(4)
            .with_timeout(Duration::from_millis(100));
        let tasks = vec![sleeper("fast", 10), sleeper("slow", 500), sleeper("slower", 900)];
        let result = run(tasks, &cfg).await.unwrap();
        assert_eq!(labels(&result), vec!["fast"]);
        assert_eq!(result.timed_out, vec!["slow", "slower"]);
        assert!(result.has_errors());
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_timeout_lists_every_unstarted_unit() {
        let cfg = StrategyConfig::sequential().with_timeout(Duration::from_millis(50));
        let tasks = vec![sleeper("a", 10), sleeper("b", 100), sleeper("c", 1)];
        let result = run(tasks, &cfg).await.unwrap();
        assert_eq!(labels(&result), vec!["a"]);
        assert_eq!(result.timed_out, vec!["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_timeout_is_an_error() {
        let cfg = StrategyConfig::sequential()
            .with_timeout(Duration::from_millis(5))
            .with_error_mode(ErrorMode::FailFast);
        let err = run(vec![sleeper("slow", 50)], &cfg).await.unwrap_err();
        assert!(matches!(err, BatchError::TimedOut { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn single_permit_parallel_matches_sequential_content() {
        let make = || vec![sleeper("x", 3), sleeper("y", 2), sleeper("z", 1)];
        let sequential = run(make(), &StrategyConfig::sequential()).await.unwrap();
        let single = run(make(), &StrategyConfig::default().with_parallelism(1))
            .await
            .unwrap();

        let mut a = labels(&sequential);
        let mut b = labels(&single);
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }
}
