//! Worker sizing and per-task execution.

use super::{ProcessingFn, ProcessingResult, ProcessingTask, Processed, TaskContext, TaskError};
use crate::cancel::CancellationToken;
use chrono::Local;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Default per-attempt timeout.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);

/// Default base of the exponential backoff.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default cap on timed-out attempts whose threads are still running.
pub const DEFAULT_MAX_STRANDED_ATTEMPTS: usize = 8;

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Lower bound on worker count.
    pub min_workers: usize,
    /// Preferred worker count.
    pub max_workers: usize,
    /// Hard upper bound on worker count.
    pub max_workers_limit: usize,
    /// Adapt the worker count to the queue length.
    pub auto_adjust: bool,
    /// Per-attempt timeout when the task has no override.
    pub task_timeout: Duration,
    /// Retry `n` (0-based) sleeps `backoff_base * 2^n` first.
    pub backoff_base: Duration,
    /// Timed-out attempts still running before new attempts fail as fatal.
    pub max_stranded_attempts: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 4,
            max_workers_limit: available_parallelism(),
            auto_adjust: true,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            backoff_base: DEFAULT_BACKOFF_BASE,
            max_stranded_attempts: DEFAULT_MAX_STRANDED_ATTEMPTS,
        }
    }
}

impl WorkerConfig {
    /// Set the preferred worker count.
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Set the worker count bounds.
    #[must_use]
    pub fn with_bounds(mut self, min_workers: usize, max_workers_limit: usize) -> Self {
        self.min_workers = min_workers.max(1);
        self.max_workers_limit = max_workers_limit.max(self.min_workers);
        self
    }

    /// Enable or disable queue-based worker adjustment.
    #[must_use]
    pub fn with_auto_adjust(mut self, enabled: bool) -> Self {
        self.auto_adjust = enabled;
        self
    }

    /// Set the default per-attempt timeout.
    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Set the backoff base.
    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Set how many timed-out attempts may keep running in the background.
    #[must_use]
    pub fn with_max_stranded_attempts(mut self, limit: usize) -> Self {
        self.max_stranded_attempts = limit;
        self
    }

    /// Number of workers to run for `queued` tasks.
    ///
    /// Starts from `max_workers`; with auto adjustment a short queue (< 3)
    /// caps it at 2 and a long one (> 10) adds 2. The result is clamped to
    /// `[min_workers, max_workers_limit]` and never exceeds `queued`.
    #[must_use]
    pub fn optimal_workers(&self, queued: usize) -> usize {
        if queued == 0 {
            return 0;
        }

        let mut workers = self.max_workers;
        if self.auto_adjust {
            if queued < 3 {
                workers = workers.min(2);
            } else if queued > 10 {
                workers = (workers + 2).min(self.max_workers_limit);
            }
        }

        let limit = self.max_workers_limit.max(1);
        workers
            .min(limit)
            .max(self.min_workers.min(limit))
            .min(queued)
            .max(1)
    }

    /// Sleep before retry `attempt` (0-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor)
    }
}

fn available_parallelism() -> usize {
    thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

/// Run one attempt on a helper thread and wait at most `timeout` for it.
///
/// A timed-out helper is left running and counted in `stranded` until it
/// returns; its eventual result is discarded. While `stranded` is at
/// `max_stranded`, no helper is started and the attempt fails as fatal.
fn run_attempt<T: Send + 'static>(
    func: &ProcessingFn<T>,
    task: &ProcessingTask,
    ctx: TaskContext,
    timeout: Duration,
    stranded: &Arc<AtomicUsize>,
    max_stranded: usize,
) -> Result<Processed<T>, TaskError> {
    let outstanding = stranded.load(Ordering::SeqCst);
    if outstanding >= max_stranded {
        return Err(TaskError::Fatal(format!(
            "{} timed-out attempts are still running",
            outstanding
        )));
    }

    let (tx, rx) = mpsc::channel();
    let func = Arc::clone(func);
    let file = task.file.clone();
    let options = task.options.clone();
    let settled = Arc::new(AtomicBool::new(false));
    let helper_settled = Arc::clone(&settled);
    let helper_stranded = Arc::clone(stranded);

    let spawned = thread::Builder::new()
        .name(format!("attempt-{}", task.id))
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| func(&file, &options, &ctx)));
            if helper_settled.swap(true, Ordering::SeqCst) {
                // the waiter gave up and counted this thread
                helper_stranded.fetch_sub(1, Ordering::SeqCst);
            }
            // receiver is gone after a timeout
            let _ = tx.send(outcome);
        });
    if let Err(e) = spawned {
        return Err(TaskError::Failed(format!("could not start attempt thread: {}", e)));
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
        Err(RecvTimeoutError::Timeout) => {
            stranded.fetch_add(1, Ordering::SeqCst);
            if settled.swap(true, Ordering::SeqCst) {
                // finished between the timeout and now
                stranded.fetch_sub(1, Ordering::SeqCst);
            }
            Err(TaskError::TimedOut(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => Err(TaskError::Panicked(
            "attempt thread exited without a result".to_string(),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run `task` to completion: attempts, timeouts, backoff and cancellation.
///
/// Makes at most `max_retries + 1` attempts. Fatal errors and cancellation end
/// the task immediately. `stranded` counts timed-out attempt threads that
/// are still running, shared by every worker of a processor.
pub(crate) fn execute_task<T: Send + 'static>(
    task: &ProcessingTask,
    func: &ProcessingFn<T>,
    config: &WorkerConfig,
    cancel: &CancellationToken,
    max_retries: u32,
    worker_id: &str,
    stranded: &Arc<AtomicUsize>,
) -> ProcessingResult<T> {
    let dispatched = Instant::now();
    let started_at = Local::now();
    let timeout = task.timeout.unwrap_or(config.task_timeout);

    let mut attempts = 0;
    let mut last_error = TaskError::Cancelled;
    let mut success = None;

    for attempt in 0..=max_retries {
        if cancel.is_cancelled() {
            last_error = TaskError::Cancelled;
            break;
        }

        attempts += 1;
        let ctx = TaskContext::new(task.id.clone(), attempt, cancel.clone(), timeout);
        match run_attempt(func, task, ctx, timeout, stranded, config.max_stranded_attempts) {
            Ok(processed) => {
                success = Some(processed);
                break;
            }
            Err(e) if !e.is_retryable() => {
                log::warn!("Task {} failed permanently: {}", task.id, e);
                last_error = e;
                break;
            }
            Err(e) => {
                log::warn!(
                    "Task {} attempt {}/{} failed: {}",
                    task.id,
                    attempt + 1,
                    max_retries + 1,
                    e
                );
                last_error = e;
                if attempt < max_retries && !cancel.sleep(config.backoff(attempt)) {
                    last_error = TaskError::Cancelled;
                    break;
                }
            }
        }
    }

    let (outcome, from_cache) = match success {
        Some(processed) => (Ok(processed.payload), processed.from_cache),
        None => (Err(last_error), false),
    };

    ProcessingResult {
        task_id: task.id.clone(),
        file: task.file.clone(),
        outcome,
        processing_time: dispatched.elapsed(),
        worker_id: worker_id.to_string(),
        from_cache,
        attempts,
        started_at,
        completed_at: Local::now(),
    }
}
