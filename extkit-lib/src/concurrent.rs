//! Bounded-concurrency execution of asynchronous tasks.
//!
//! A [`Throttle`] admits tasks in input order, never letting more than
//! `max_concurrent_tasks` of them run at once. Admission is gated by a
//! semaphore whose permits travel with the admitted task and are released
//! the moment that task settles, whatever the outcome.
//!
//! The throttle does not spawn. Admitted futures are driven on the caller's
//! task, and waiting for a free slot keeps polling the work already in
//! flight, so lazy futures make progress while admission is blocked.

use crate::error::{ExtensionsError, ThrottleError};
use futures_util::stream::{FuturesOrdered, StreamExt};
use std::convert::Infallible;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Concurrency limit used when none is configured.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 10;

/// Runs collections of tasks with a hard cap on concurrency.
///
/// # Example
///
/// ```rust
/// use extkit_lib::Throttle;
///
/// # tokio_test::block_on(async {
/// let throttle = Throttle::new(2)?;
/// let tasks = (0..5).map(|i| async move { Ok::<_, std::io::Error>(i * 10) });
/// let values = throttle.run(tasks).await?;
/// assert_eq!(values, vec![0, 10, 20, 30, 40]);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # }).unwrap();
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    max_concurrent_tasks: NonZeroUsize,
}

/// A run that stopped before every task settled.
struct Halted<R> {
    reason: R,
    admitted: usize,
    settled: usize,
}

impl Throttle {
    /// Create a throttle that allows at most `max_concurrent_tasks` in flight.
    ///
    /// # Errors
    ///
    /// Returns `ExtensionsError::InvalidArgument` if the limit is zero. Limits
    /// beyond what a semaphore can hold behave as unrestricted.
    pub fn new(max_concurrent_tasks: usize) -> Result<Self, ExtensionsError> {
        let max_concurrent_tasks = NonZeroUsize::new(max_concurrent_tasks).ok_or_else(|| {
            ExtensionsError::invalid_argument(
                "max_concurrent_tasks",
                "must be greater than zero",
            )
        })?;

        Ok(Self {
            max_concurrent_tasks,
        })
    }

    /// The concurrency cap of this throttle.
    pub fn max_concurrent_tasks(&self) -> usize {
        self.max_concurrent_tasks.get()
    }

    /// Run every task and collect their values in input order.
    ///
    /// All admitted tasks are driven to a terminal state even when one fails;
    /// the returned error is the first failure in input order.
    pub async fn run<I, F, T, E>(&self, tasks: I) -> Result<Vec<T>, E>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>>,
    {
        self.settle(tasks).await.into_iter().collect()
    }

    /// Run tasks that produce no value.
    pub async fn run_all<I, F, E>(&self, tasks: I) -> Result<(), E>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<(), E>>,
    {
        self.settle(tasks).await.into_iter().collect()
    }

    /// Run every task and return each outcome, successes and failures alike,
    /// in input order.
    pub async fn settle<I, F, T, E>(&self, tasks: I) -> Vec<Result<T, E>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>>,
    {
        let never = std::future::pending::<Infallible>();
        match self.drive(tasks, never).await {
            Ok(outcomes) => outcomes,
            Err(halted) => match halted.reason {},
        }
    }

    /// Like [`Throttle::run`], but stops when `token` is cancelled.
    ///
    /// On cancellation no further tasks are admitted and the tasks still in
    /// flight are dropped, which cancels them.
    pub async fn run_until_cancelled<I, F, T, E>(
        &self,
        tasks: I,
        token: &CancellationToken,
    ) -> Result<Vec<T>, ThrottleError<E>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>>,
    {
        match self.drive(tasks, token.cancelled()).await {
            Ok(outcomes) => outcomes
                .into_iter()
                .collect::<Result<Vec<T>, E>>()
                .map_err(ThrottleError::Task),
            Err(Halted {
                admitted, settled, ..
            }) => Err(ThrottleError::Cancelled { admitted, settled }),
        }
    }

    /// Admit and drive `tasks` until they all settle or `cancelled` resolves.
    async fn drive<I, F, T, E, C>(
        &self,
        tasks: I,
        cancelled: C,
    ) -> Result<Vec<Result<T, E>>, Halted<C::Output>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, E>>,
        C: Future,
    {
        let limit = self.max_concurrent_tasks.get();
        let slots = Semaphore::new(limit.min(Semaphore::MAX_PERMITS));
        let settled = AtomicUsize::new(0);
        let mut in_flight = FuturesOrdered::new();
        let mut outcomes = Vec::new();
        let mut admitted = 0usize;
        tokio::pin!(cancelled);

        debug!(max_concurrent_tasks = limit, "starting throttled run");

        // Exactly one permit per task, with no extra acquisition up front,
        // so a limit of 1 still admits work.
        for task in tasks {
            let permit = loop {
                tokio::select! {
                    biased;
                    reason = &mut cancelled => {
                        let settled = settled.load(Ordering::Acquire);
                        debug!(admitted, settled, "throttled run cancelled");
                        return Err(Halted { reason, admitted, settled });
                    }
                    // The pool is local and never closed, so acquire cannot fail.
                    Ok(permit) = slots.acquire() => break permit,
                    Some(outcome) = in_flight.next(), if !in_flight.is_empty() => {
                        outcomes.push(outcome);
                    }
                }
            };

            trace!(index = admitted, "task admitted");
            admitted += 1;
            let settled = &settled;
            in_flight.push_back(async move {
                let outcome = task.await;
                drop(permit);
                settled.fetch_add(1, Ordering::AcqRel);
                outcome
            });
        }

        loop {
            tokio::select! {
                biased;
                reason = &mut cancelled => {
                    let settled = settled.load(Ordering::Acquire);
                    debug!(admitted, settled, "throttled run cancelled");
                    return Err(Halted { reason, admitted, settled });
                }
                next = in_flight.next() => match next {
                    Some(outcome) => outcomes.push(outcome),
                    None => break,
                },
            }
        }

        debug!(tasks = admitted, "throttled run settled");
        Ok(outcomes)
    }
}

/// Validate `max_concurrent_tasks` now and return the throttled run to await.
///
/// ```rust
/// # tokio_test::block_on(async {
/// let tasks = (1..=2).map(|i| async move { Ok::<_, String>(i) });
/// let values = extkit_lib::throttle(tasks, 1).unwrap().await.unwrap();
/// assert_eq!(values, vec![1, 2]);
/// # });
/// ```
pub fn throttle<I, F, T, E>(
    tasks: I,
    max_concurrent_tasks: usize,
) -> Result<impl Future<Output = Result<Vec<T>, E>>, ExtensionsError>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    let throttle = Throttle::new(max_concurrent_tasks)?;
    Ok(async move { throttle.run(tasks).await })
}

/// Side-effect counterpart of [`throttle`].
pub fn throttle_all<I, F, E>(
    tasks: I,
    max_concurrent_tasks: usize,
) -> Result<impl Future<Output = Result<(), E>>, ExtensionsError>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<(), E>>,
{
    let throttle = Throttle::new(max_concurrent_tasks)?;
    Ok(async move { throttle.run_all(tasks).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::sleep;

    /// Tracks how many tasks are running and the highest count seen.
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.current.fetch_sub(1, Ordering::SeqCst);
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    fn timed_task(
        gauge: Arc<Gauge>,
        value: usize,
        millis: u64,
    ) -> impl Future<Output = Result<usize, String>> {
        async move {
            gauge.enter();
            sleep(Duration::from_millis(millis)).await;
            gauge.exit();
            Ok(value)
        }
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = Throttle::new(0).unwrap_err();
        assert!(matches!(err, ExtensionsError::InvalidArgument { .. }));
    }

    #[test]
    fn test_free_functions_validate_before_running() {
        let tasks: Vec<std::future::Ready<Result<u8, String>>> = Vec::new();
        assert!(throttle(tasks, 0).is_err());

        let tasks: Vec<std::future::Ready<Result<(), String>>> = Vec::new();
        assert!(throttle_all(tasks, 0).is_err());
    }

    #[tokio::test]
    async fn test_empty_sequence_returns_empty() {
        let throttle = Throttle::new(3).unwrap();
        let tasks: Vec<std::future::Ready<Result<u8, String>>> = Vec::new();
        assert_eq!(throttle.run(tasks).await, Ok(vec![]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ten_tasks_limit_three() {
        let gauge = Arc::new(Gauge::default());
        let throttle = Throttle::new(3).unwrap();

        // Later tasks finish sooner, so completion order differs from input order.
        let tasks = (0..10).map(|i| timed_task(gauge.clone(), i, 100 - i as u64 * 5));
        let values = throttle.run(tasks).await.unwrap();

        assert_eq!(values, (0..10).collect::<Vec<_>>());
        assert_eq!(gauge.peak(), 3);
        assert_eq!(gauge.current.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_at_least_task_count_runs_everything_at_once() {
        let gauge = Arc::new(Gauge::default());
        let throttle = Throttle::new(8).unwrap();

        let started = tokio::time::Instant::now();
        let tasks = (0..5).map(|i| timed_task(gauge.clone(), i, 50));
        throttle.run(tasks).await.unwrap();

        assert_eq!(gauge.peak(), 5);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_one_serializes_in_input_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let throttle = Throttle::new(1).unwrap();

        let tasks = (0..4).map(|i| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("start {}", i));
                sleep(Duration::from_millis(10 * (4 - i))).await;
                log.lock().unwrap().push(format!("end {}", i));
                Ok::<_, String>(i)
            }
        });
        throttle.run(tasks).await.unwrap();

        let log = log.lock().unwrap();
        let expected: Vec<String> = (0..4)
            .flat_map(|i| [format!("start {}", i), format!("end {}", i)])
            .collect();
        assert_eq!(*log, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_waits_for_every_task() {
        let finished = Arc::new(AtomicUsize::new(0));
        let throttle = Throttle::new(2).unwrap();

        let tasks = (0..5).map(|i| {
            let finished = finished.clone();
            async move {
                sleep(Duration::from_millis(20)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                if i == 1 {
                    Err(format!("task {} failed", i))
                } else {
                    Ok(i)
                }
            }
        });

        let err = throttle.run(tasks).await.unwrap_err();
        assert_eq!(err, "task 1 failed");
        assert_eq!(finished.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_first_failure_in_input_order_wins() {
        let throttle = Throttle::new(4).unwrap();
        type BoxedTask = std::pin::Pin<Box<dyn Future<Output = Result<u8, &'static str>>>>;
        let tasks: Vec<BoxedTask> = vec![
            Box::pin(async {
                sleep(Duration::from_millis(30)).await;
                Err("slow failure")
            }),
            Box::pin(async { Err("fast failure") }),
        ];

        assert_eq!(throttle.run(tasks).await, Err("slow failure"));
    }

    #[tokio::test]
    async fn test_settle_keeps_every_outcome() {
        let throttle = Throttle::new(2).unwrap();
        let tasks = (0..4).map(|i| async move {
            if i % 2 == 0 {
                Ok(i)
            } else {
                Err(i)
            }
        });

        let outcomes = throttle.settle(tasks).await;
        assert_eq!(outcomes, vec![Ok(0), Err(1), Ok(2), Err(3)]);
    }

    #[tokio::test]
    async fn test_run_all_side_effects() {
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks = (0..6).map(|_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            }
        });

        throttle_all(tasks, 2).unwrap().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_all_surfaces_failure_after_every_task() {
        let finished = Arc::new(AtomicUsize::new(0));
        let tasks = (0..6).map(|i| {
            let finished = finished.clone();
            async move {
                sleep(Duration::from_millis(10 * (6 - i))).await;
                finished.fetch_add(1, Ordering::SeqCst);
                if i == 2 {
                    Err(format!("write {} failed", i))
                } else {
                    Ok(())
                }
            }
        });

        let err = throttle_all(tasks, 2).unwrap().await.unwrap_err();
        assert_eq!(err, "write 2 failed");
        assert_eq!(finished.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_limit_is_unrestricted() {
        let gauge = Arc::new(Gauge::default());
        let throttle = Throttle::new(usize::MAX).unwrap();
        assert_eq!(throttle.max_concurrent_tasks(), usize::MAX);

        let tasks = (0..3).map(|i| timed_task(gauge.clone(), i, 20));
        let values = throttle.run(tasks).await.unwrap();

        assert_eq!(values, vec![0, 1, 2]);
        assert_eq!(gauge.peak(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_counts_tasks_finished_behind_slow_head() {
        let throttle = Throttle::new(3).unwrap();
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let tasks = (0..3u64).map(|i| async move {
            let millis = if i == 0 { 1000 } else { 10 };
            sleep(Duration::from_millis(millis)).await;
            Ok::<_, String>(i)
        });

        let err = throttle.run_until_cancelled(tasks, &token).await.unwrap_err();
        assert_eq!(
            err,
            ThrottleError::Cancelled {
                admitted: 3,
                settled: 2
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_admission() {
        let started = Arc::new(AtomicUsize::new(0));
        let throttle = Throttle::new(2).unwrap();
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            canceller.cancel();
        });

        let tasks = (0..10).map(|i| {
            let started = started.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(100)).await;
                Ok::<_, String>(i)
            }
        });

        let err = throttle.run_until_cancelled(tasks, &token).await.unwrap_err();
        match err {
            ThrottleError::Cancelled { admitted, settled } => {
                assert_eq!(admitted, 4);
                assert_eq!(settled, 2);
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert_eq!(started.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_uncancelled_run_reports_task_error() {
        let throttle = Throttle::new(2).unwrap();
        let token = CancellationToken::new();
        let tasks = (0..2).map(|i| async move { if i == 0 { Ok(i) } else { Err("bad") } });

        let err = throttle.run_until_cancelled(tasks, &token).await.unwrap_err();
        assert_eq!(err, ThrottleError::Task("bad"));
    }
}
