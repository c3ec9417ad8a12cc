//! Bounded worker pool with batch joins, timeouts and aborts.
//!
//! A batch submits one closure per task and then waits for all of them.
//! Failures are collected rather than short-circuited: the caller learns
//! about every failing task in one aggregate error. Tasks still running when
//! the batch timeout elapses are reported as timed out.

use crate::error::{ResolveError, TaskError, TaskFailure};
use log::{debug, info};
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use threadpool::ThreadPool;

/// Upper bound on worker threads.
pub const MAX_WORKERS: usize = 4;

/// Default time a batch may take before outstanding tasks are failed.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// How often a waiting batch re-checks its abort flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Name given to pool threads.
const THREAD_NAME: &str = "stowaway-resolver";

/// `min(4, available parallelism)`.
#[must_use]
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .min(MAX_WORKERS)
}

/// Cloneable handle that aborts an in-progress batch.
///
/// Aborting makes the waiting batch return [`ResolveError::Aborted`]. Tasks
/// already running are left to finish in the background.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    aborted: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Request an abort.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Whether an abort has been requested.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Clear a previous abort request so the next batch can run.
    pub(crate) fn reset(&self) {
        self.aborted.store(false, Ordering::SeqCst);
    }
}

/// Tracks whether a resolution performed any network or transform work.
///
/// The first [`WorkSignal::start`] logs a start notice; [`WorkSignal::finish`]
/// logs the matching completion notice only when work was started.
#[derive(Debug, Default)]
pub struct WorkSignal {
    started: AtomicBool,
}

impl WorkSignal {
    /// Create a signal in the idle state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that work is starting. Logs once per signal.
    pub fn start(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            info!("Resolving artifacts...");
        }
    }

    /// Whether [`WorkSignal::start`] has been called.
    #[must_use]
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Log the completion notice if work was started.
    pub fn finish(&self) {
        if self.started() {
            info!("Done resolving artifacts.");
        }
    }
}

/// A labelled unit of work for [`WorkerPool::run_batch`].
pub struct Task<T> {
    label: String,
    job: Box<dyn FnOnce() -> Result<T, TaskError> + Send + 'static>,
}

impl<T> Task<T> {
    /// Wrap `job` under `label`. The label names the task in failures.
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        job: impl FnOnce() -> Result<T, TaskError> + Send + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            job: Box::new(job),
        }
    }
}

/// A fixed-size pool of resolver threads.
pub struct WorkerPool {
    pool: ThreadPool,
    batch_timeout: Duration,
    abort: AbortHandle,
}

impl WorkerPool {
    /// Build a pool of `workers` threads (at least one).
    #[must_use]
    pub fn new(workers: usize, batch_timeout: Duration, abort: AbortHandle) -> Self {
        Self {
            pool: ThreadPool::with_name(THREAD_NAME.to_owned(), workers.max(1)),
            batch_timeout,
            abort,
        }
    }

    /// Run every task and wait for all of them.
    ///
    /// Results are returned in submission order.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Failed`] listing every task that failed, timed
    /// out or panicked, and [`ResolveError::Aborted`] when the abort handle
    /// fires while waiting.
    pub fn run_batch<T: Send + 'static>(&self, tasks: Vec<Task<T>>) -> Result<Vec<T>, ResolveError> {
        let (sender, receiver) = mpsc::channel();
        let mut labels = Vec::with_capacity(tasks.len());
        for (index, Task { label, job }) in tasks.into_iter().enumerate() {
            labels.push(label);
            let reply = sender.clone();
            self.pool.execute(move || {
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(job)).unwrap_or(Err(TaskError::Panicked));
                if reply.send((index, outcome)).is_err() {
                    debug!("batch receiver dropped before task {index} reported");
                }
            });
        }
        drop(sender);

        let mut outcomes: Vec<Option<Result<T, TaskError>>> =
            labels.iter().map(|_| None).collect();
        let timed_out = self.collect(&receiver, &mut outcomes)?;

        let mut values = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (label, outcome) in labels.into_iter().zip(outcomes) {
            match outcome {
                Some(Ok(value)) => values.push(value),
                Some(Err(error)) => failures.push(TaskFailure::new(label, error)),
                None if timed_out => failures.push(TaskFailure::new(
                    label,
                    TaskError::TimedOut {
                        timeout: self.batch_timeout,
                    },
                )),
                None => failures.push(TaskFailure::new(label, TaskError::Panicked)),
            }
        }
        if failures.is_empty() {
            Ok(values)
        } else {
            Err(ResolveError::Failed { failures })
        }
    }

    /// Receive outcomes until every slot is filled, the deadline passes or
    /// the senders disconnect. Returns whether the deadline passed.
    fn collect<T>(
        &self,
        receiver: &mpsc::Receiver<(usize, Result<T, TaskError>)>,
        outcomes: &mut [Option<Result<T, TaskError>>],
    ) -> Result<bool, ResolveError> {
        let deadline = Instant::now() + self.batch_timeout;
        let mut pending = outcomes.len();
        while pending > 0 {
            if self.abort.is_aborted() {
                return Err(ResolveError::Aborted);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(true);
            }
            match receiver.recv_timeout(remaining.min(POLL_INTERVAL)) {
                Ok((index, outcome)) => {
                    if let Some(slot) = outcomes.get_mut(index) {
                        *slot = Some(outcome);
                        pending -= 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(false),
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use rstest::rstest;
    use stowaway_common::ArtifactCoordinate;

    fn pool(timeout: Duration) -> WorkerPool {
        WorkerPool::new(2, timeout, AbortHandle::default())
    }

    #[test]
    fn default_workers_is_bounded() {
        let workers = default_workers();
        assert!((1..=MAX_WORKERS).contains(&workers));
    }

    #[test]
    fn batch_returns_values_in_submission_order() {
        let tasks = (0..8)
            .map(|n| Task::new(format!("task-{n}"), move || Ok(n * 10)))
            .collect();
        let values = pool(DEFAULT_BATCH_TIMEOUT)
            .run_batch(tasks)
            .expect("all tasks succeed");
        assert_eq!(values, vec![0, 10, 20, 30, 40, 50, 60, 70]);
    }

    #[test]
    fn failures_are_collected_not_short_circuited() {
        let coordinate =
            ArtifactCoordinate::parse("g:missing:1", &"0".repeat(64)).expect("coordinate");
        let tasks = vec![
            Task::new("first", move || {
                Err(TaskError::Fetch(FetchError::Unresolvable {
                    coordinate,
                    repositories: vec![],
                }))
            }),
            Task::new("second", || Ok(2)),
            Task::new("third", || Err(TaskError::Panicked)),
        ];
        let err = pool(DEFAULT_BATCH_TIMEOUT)
            .run_batch(tasks)
            .expect_err("two tasks fail");
        let labels: Vec<_> = err.failures().iter().map(TaskFailure::label).collect();
        assert_eq!(labels, ["first", "third"]);
    }

    #[test]
    fn panicking_task_is_reported() {
        let tasks: Vec<Task<()>> = vec![Task::new("boom", || panic!("boom"))];
        let err = pool(DEFAULT_BATCH_TIMEOUT)
            .run_batch(tasks)
            .expect_err("panic is a failure");
        assert!(matches!(
            err.failures().first().map(TaskFailure::error),
            Some(TaskError::Panicked)
        ));
    }

    #[test]
    fn slow_task_times_out() {
        let tasks = vec![
            Task::new("slow", || {
                thread::sleep(Duration::from_millis(500));
                Ok(())
            }),
            Task::new("fast", || Ok(())),
        ];
        let err = pool(Duration::from_millis(100))
            .run_batch(tasks)
            .expect_err("slow task exceeds timeout");
        let failures = err.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures.first().map(TaskFailure::label), Some("slow"));
        assert!(matches!(
            failures.first().map(TaskFailure::error),
            Some(TaskError::TimedOut { .. })
        ));
    }

    #[test]
    fn abort_fails_the_whole_batch() {
        let abort = AbortHandle::default();
        let pool = WorkerPool::new(1, DEFAULT_BATCH_TIMEOUT, abort.clone());
        let trigger = abort.clone();
        let tasks = vec![Task::new("waits", move || {
            trigger.abort();
            thread::sleep(Duration::from_millis(300));
            Ok(())
        })];
        let err = pool.run_batch(tasks).expect_err("aborted");
        assert!(matches!(err, ResolveError::Aborted));
        abort.reset();
        assert!(!abort.is_aborted());
    }

    #[rstest]
    #[case::idle(false)]
    #[case::started(true)]
    fn work_signal_tracks_start(#[case] start: bool) {
        let signal = WorkSignal::new();
        if start {
            signal.start();
            signal.start();
        }
        assert_eq!(signal.started(), start);
    }
}
