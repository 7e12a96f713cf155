//! Parallel batch processing.
//!
//! Files are queued as [`ProcessingTask`]s and drained by a bounded pool of
//! workers, each of which runs a caller-supplied processing function with a
//! per-attempt timeout, retries with exponential backoff, and cooperative
//! cancellation.
//!
//! # Pipeline
//!
//! 1. [`ParallelProcessor::add_task`] / [`ParallelProcessor::add_batch`] push
//!    tasks into the priority [`queue::TaskQueue`].
//! 2. [`ParallelProcessor::process_batch`] sizes a worker pool and blocks
//!    until the queue is empty or cancellation is requested.
//! 3. Every settled task is recorded by the [`stats::ProgressAggregator`] and
//!    reported to the optional [`crate::progress::ProgressCallback`].
//!
//! # Example
//!
//! ```no_run
//! use ocrbatch::fingerprint::ProcessingOptions;
//! use ocrbatch::processor::{ParallelProcessor, Processed, WorkerConfig};
//! use std::path::PathBuf;
//!
//! let processor = ParallelProcessor::new(WorkerConfig::default());
//! processor.add_batch(
//!     vec![PathBuf::from("a.pdf"), PathBuf::from("b.pdf")],
//!     &ProcessingOptions::new().with_language("en"),
//!     0,
//! );
//!
//! let results = processor
//!     .process_batch(|path, _options, _ctx| Ok(Processed::fresh(path.display().to_string())), 3)
//!     .unwrap();
//! assert_eq!(results.len(), 2);
//! ```

pub mod cached;
pub mod parallel;
pub mod queue;
pub mod stats;
pub mod worker;

use crate::cancel::CancellationToken;
use crate::fingerprint::ProcessingOptions;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use cached::with_cache;
pub use parallel::ParallelProcessor;
pub use queue::TaskQueue;
pub use stats::{ProcessingStats, ProgressAggregator, ProgressSnapshot};
pub use worker::WorkerConfig;

/// A queued unit of work. Immutable once created; retries reuse it.
#[derive(Debug, Clone)]
pub struct ProcessingTask {
    /// Unique id within the processor that created it.
    pub id: String,
    pub file: PathBuf,
    pub options: ProcessingOptions,
    /// Lower runs first.
    pub priority: i32,
    pub created_at: DateTime<Local>,
    /// Per-attempt timeout overriding the processor default.
    pub timeout: Option<Duration>,
}

impl ProcessingTask {
    /// Create a task.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        file: impl Into<PathBuf>,
        options: ProcessingOptions,
        priority: i32,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            id: id.into(),
            file: file.into(),
            options,
            priority,
            created_at: Local::now(),
            timeout,
        }
    }
}

/// Output of a successful processing call.
#[derive(Debug, Clone, PartialEq)]
pub struct Processed<T> {
    pub payload: T,
    /// Whether the payload was served from a cache rather than computed.
    pub from_cache: bool,
}

impl<T> Processed<T> {
    /// A freshly computed payload.
    #[must_use]
    pub fn fresh(payload: T) -> Self {
        Self {
            payload,
            from_cache: false,
        }
    }

    /// A payload served from cache.
    #[must_use]
    pub fn cached(payload: T) -> Self {
        Self {
            payload,
            from_cache: true,
        }
    }
}

/// Why a processing attempt (or a whole task) did not succeed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// A failure worth retrying.
    #[error("{0}")]
    Failed(String),

    /// A failure that retrying cannot fix.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The attempt exceeded its timeout.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// Cancellation was requested before the task could finish.
    #[error("cancelled")]
    Cancelled,

    /// The processing function panicked.
    #[error("panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Whether another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::TimedOut(_) | Self::Panicked(_))
    }
}

/// Errors returned by [`ParallelProcessor::process_batch`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// `process_batch` was called while a batch was already running.
    #[error("a batch is already being processed")]
    AlreadyRunning,
}

/// Per-attempt information handed to the processing function.
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: String,
    attempt: u32,
    cancel: CancellationToken,
    deadline: Instant,
}

impl TaskContext {
    pub(crate) fn new(
        task_id: impl Into<String>,
        attempt: u32,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            attempt,
            cancel,
            deadline: Instant::now() + timeout,
        }
    }

    /// Id of the task being processed.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// 0-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the batch was cancelled. Long-running functions should poll this.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The batch cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// When this attempt will be considered timed out.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Shared processing function.
pub type ProcessingFn<T> = Arc<
    dyn Fn(&Path, &ProcessingOptions, &TaskContext) -> Result<Processed<T>, TaskError>
        + Send
        + Sync,
>;

/// Final outcome of one task.
#[derive(Debug, Clone)]
pub struct ProcessingResult<T> {
    pub task_id: String,
    pub file: PathBuf,
    /// The payload, or the last error once retries were exhausted.
    pub outcome: Result<T, TaskError>,
    /// Dispatch to completion, including retries and backoff.
    pub processing_time: Duration,
    /// Name of the worker that ran the task.
    pub worker_id: String,
    pub from_cache: bool,
    /// Attempts actually started.
    pub attempts: u32,
    pub started_at: DateTime<Local>,
    pub completed_at: DateTime<Local>,
}

impl<T> ProcessingResult<T> {
    /// Whether the task succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The payload, if the task succeeded.
    #[must_use]
    pub fn payload(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    /// The error, if the task failed.
    #[must_use]
    pub fn error(&self) -> Option<&TaskError> {
        self.outcome.as_ref().err()
    }

    /// Whether the task ended because of cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, Err(TaskError::Cancelled))
    }
}
