//! Error types shared by the resolver, its worker pool and its lifecycle.

use crate::fetch::FetchError;
use crate::pipeline::PipelineError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Misuse of a [`Resolver`](crate::Resolver) instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The resolver was used after `close()`.
    #[error("resolver is closed")]
    Closed,

    /// `close()` was called twice.
    #[error("resolver is already closed")]
    AlreadyClosed,

    /// `close()` was called while a `resolve` call was running.
    #[error("cannot close resolver while a resolution is in progress")]
    ResolveInProgress,
}

/// Failure of a single pool task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The artifact could not be fetched or verified.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A pipeline stage failed for the artifact.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The task did not finish within the batch timeout.
    #[error("task did not complete within {}s", timeout.as_secs())]
    TimedOut {
        /// The batch timeout that elapsed.
        timeout: Duration,
    },

    /// The task panicked before reporting a result.
    #[error("task panicked")]
    Panicked,
}

/// A failed task and the label (usually the coordinate) it ran for.
#[derive(Debug)]
pub struct TaskFailure {
    label: String,
    error: TaskError,
}

impl TaskFailure {
    /// Pair a task label with its failure.
    #[must_use]
    pub fn new(label: impl Into<String>, error: TaskError) -> Self {
        Self {
            label: label.into(),
            error,
        }
    }

    /// The label of the failed task.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The cause of the failure.
    #[must_use]
    pub const fn error(&self) -> &TaskError {
        &self.error
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.error)
    }
}

/// Errors returned by [`Resolver::resolve`](crate::Resolver::resolve).
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The resolver was misused.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// An extension context could not be built.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// One or more tasks in a batch failed.
    #[error("failed to resolve {} artifact(s): {}", failures.len(), join_failures(failures))]
    Failed {
        /// Every failed task, in submission order.
        failures: Vec<TaskFailure>,
    },

    /// The batch was aborted through an [`AbortHandle`](crate::AbortHandle).
    #[error("resolution aborted")]
    Aborted,
}

impl ResolveError {
    /// The individual task failures of an aggregate error.
    ///
    /// Empty for every other variant.
    #[must_use]
    pub fn failures(&self) -> &[TaskFailure] {
        match self {
            Self::Failed { failures } => failures,
            _ => &[],
        }
    }
}

fn join_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
