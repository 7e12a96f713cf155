//! The batch orchestrator.

use super::queue::TaskQueue;
use super::stats::{ProcessingStats, ProgressAggregator};
use super::worker::{execute_task, WorkerConfig};
use super::{
    ProcessingFn, ProcessingResult, ProcessingTask, Processed, ProcessorError, TaskContext,
    TaskError,
};
use crate::cancel::CancellationToken;
use crate::fingerprint::ProcessingOptions;
use crate::progress::ProgressCallback;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Runs queued tasks on a bounded worker pool.
///
/// The processor is `Sync`: one thread may block in
/// [`process_batch`](Self::process_batch) while others add tasks, read
/// statistics or call [`cancel_processing`](Self::cancel_processing).
pub struct ParallelProcessor {
    config: WorkerConfig,
    queue: TaskQueue,
    aggregator: ProgressAggregator,
    active: Mutex<HashSet<String>>,
    running: AtomicBool,
    cancel: CancellationToken,
    progress_callback: Option<Arc<dyn ProgressCallback>>,
    next_id: AtomicU64,
    stranded: Arc<AtomicUsize>,
}

impl std::fmt::Debug for ParallelProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelProcessor")
            .field("config", &self.config)
            .field("pending", &self.queue.len())
            .field("running", &self.is_running())
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl Default for ParallelProcessor {
    fn default() -> Self {
        Self::new(WorkerConfig::default())
    }
}

impl ParallelProcessor {
    /// Create a processor with the given worker configuration.
    #[must_use]
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            queue: TaskQueue::new(),
            aggregator: ProgressAggregator::new(),
            active: Mutex::new(HashSet::new()),
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            progress_callback: None,
            next_id: AtomicU64::new(1),
            stranded: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Report progress to `callback`.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Use an externally owned cancellation token, e.g. one linked to Ctrl+C.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Worker configuration.
    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// The token checked by workers.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn active(&self) -> MutexGuard<'_, HashSet<String>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `file` for processing and return the new task id.
    ///
    /// `timeout` overrides the default per-attempt timeout for this task.
    pub fn add_task(
        &self,
        file: impl Into<PathBuf>,
        options: &ProcessingOptions,
        priority: i32,
        timeout: Option<Duration>,
    ) -> String {
        let file = file.into();
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stem = file
            .file_stem()
            .map_or_else(|| "task".into(), |s| s.to_string_lossy());
        let id = format!("{}-{:06}", stem, seq);

        log::trace!("Queued {} as {} (priority {})", file.display(), id, priority);
        self.queue.push(ProcessingTask::new(
            id.clone(),
            file,
            options.clone(),
            priority,
            timeout,
        ));
        self.aggregator.add_total(1);
        id
    }

    /// Queue every file with the same options and priority, preserving order.
    pub fn add_batch<I, P>(&self, files: I, options: &ProcessingOptions, priority: i32) -> Vec<String>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let ids: Vec<String> = files
            .into_iter()
            .map(|file| self.add_task(file, options, priority, None))
            .collect();
        log::debug!("Queued batch of {} tasks", ids.len());
        ids
    }

    /// Process every queued task with `func`, blocking until the queue is
    /// drained or cancellation is requested.
    ///
    /// Each task gets up to `max_retries + 1` attempts. Results come back in
    /// completion order, exactly one per dispatched task. Tasks still queued
    /// when the batch is cancelled stay queued.
    ///
    /// # Errors
    ///
    /// [`ProcessorError::AlreadyRunning`] if another batch is in progress.
    pub fn process_batch<T, F>(
        &self,
        func: F,
        max_retries: u32,
    ) -> Result<Vec<ProcessingResult<T>>, ProcessorError>
    where
        T: Send + 'static,
        F: Fn(&Path, &ProcessingOptions, &TaskContext) -> Result<Processed<T>, TaskError>
            + Send
            + Sync
            + 'static,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ProcessorError::AlreadyRunning);
        }
        let _running = RunningGuard(self);
        self.cancel.reset();

        let func: ProcessingFn<T> = Arc::new(func);
        let queued = self.queue.len();
        let workers = self.config.optimal_workers(queued);
        self.aggregator.start(queued);

        log::info!(
            "Processing {} tasks with {} workers (max retries {})",
            queued,
            workers,
            max_retries
        );
        if let Some(ref callback) = self.progress_callback {
            callback.on_batch_start(queued, workers);
        }

        let results = Mutex::new(Vec::with_capacity(queued));
        if workers > 0 {
            let worker = |index: usize| self.worker_loop(index, &func, max_retries, &results);
            let worker = &worker;

            match rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("ocr-worker-{}", i))
                .build()
            {
                Ok(pool) => pool.scope(|s| {
                    for index in 0..workers {
                        s.spawn(move |_| worker(index));
                    }
                }),
                Err(e) => {
                    log::warn!("Failed to build worker pool ({}), using scoped threads", e);
                    std::thread::scope(|s| {
                        for index in 0..workers {
                            s.spawn(move || worker(index));
                        }
                    });
                }
            }
        }

        self.aggregator.finish();
        let stats = self.aggregator.snapshot();
        if let Some(ref callback) = self.progress_callback {
            callback.on_batch_end(&stats);
        }

        if self.cancel.is_cancelled() {
            log::warn!(
                "Batch cancelled: {}/{} tasks settled, {} left in queue",
                stats.completed_tasks,
                stats.total_tasks,
                self.queue.len()
            );
        } else {
            log::info!(
                "Batch finished: {} succeeded, {} failed, {} from cache in {:.2?}",
                stats.successful_tasks,
                stats.failed_tasks,
                stats.cache_hits,
                stats.elapsed()
            );
        }

        Ok(results.into_inner().unwrap_or_else(PoisonError::into_inner))
    }

    fn worker_loop<T: Send + 'static>(
        &self,
        index: usize,
        func: &ProcessingFn<T>,
        max_retries: u32,
        results: &Mutex<Vec<ProcessingResult<T>>>,
    ) {
        let worker_id = format!("worker-{}", index);
        log::debug!("{} started", worker_id);

        loop {
            if self.cancel.is_cancelled() {
                log::debug!("{}: cancellation requested, stopping", worker_id);
                break;
            }
            let Some(task) = self.queue.pop() else {
                break;
            };

            self.active().insert(task.id.clone());
            let result = execute_task(
                &task,
                func,
                &self.config,
                &self.cancel,
                max_retries,
                &worker_id,
                &self.stranded,
            );
            self.active().remove(&task.id);

            let snapshot = self.aggregator.record(&result);
            if let Some(ref callback) = self.progress_callback {
                callback.on_progress(&snapshot);
            }
            results
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(result);
        }

        log::debug!("{} finished", worker_id);
    }

    /// Request cancellation of the running batch.
    ///
    /// Returns `false` (and does nothing) when no batch is running.
    pub fn cancel_processing(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.cancel.cancel();
        log::info!("Cancellation requested");
        true
    }

    /// Snapshot of the current batch statistics.
    #[must_use]
    pub fn get_statistics(&self) -> ProcessingStats {
        self.aggregator.snapshot()
    }

    /// Completed share of the current batch, in percent.
    #[must_use]
    pub fn progress_percentage(&self) -> f64 {
        self.aggregator.snapshot().progress_percentage()
    }

    /// Drop every queued task and reset the statistics.
    ///
    /// Returns the number of tasks removed.
    pub fn clear_queue(&self) -> usize {
        let removed = self.queue.clear();
        self.aggregator.reset();
        log::info!("Cleared {} queued tasks", removed);
        removed
    }

    /// Number of tasks waiting in the queue.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.queue.len()
    }

    /// Ids of tasks currently being processed.
    #[must_use]
    pub fn active_tasks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether a batch is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Marks the processor idle when a batch ends, including by unwinding out of
/// a user callback or processing function.
struct RunningGuard<'a>(&'a ParallelProcessor);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.active().clear();
        self.0.running.store(false, Ordering::SeqCst);
    }
}
