//! Batch statistics.

use super::ProcessingResult;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Aggregate over one `process_batch` run.
///
/// `completed_tasks == successful_tasks + failed_tasks` holds at every
/// observation point.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingStats {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub successful_tasks: usize,
    pub failed_tasks: usize,
    pub cache_hits: usize,
    /// Sum of per-task processing times.
    pub total_processing_time: Duration,
    pub start_time: Option<DateTime<Local>>,
    pub end_time: Option<DateTime<Local>>,
    #[serde(skip)]
    started: Option<Instant>,
    #[serde(skip)]
    finished: Option<Instant>,
}

impl ProcessingStats {
    /// Mean processing time of completed tasks.
    #[must_use]
    pub fn average_processing_time(&self) -> Duration {
        match u32::try_from(self.completed_tasks) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_processing_time / n,
            Err(_) => Duration::from_secs_f64(
                self.total_processing_time.as_secs_f64() / self.completed_tasks as f64,
            ),
        }
    }

    /// Share of completed tasks that succeeded.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        ratio(self.successful_tasks, self.completed_tasks)
    }

    /// Share of completed tasks served from cache.
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        ratio(self.cache_hits, self.completed_tasks)
    }

    /// Wall time since the batch started, up to its end if it finished.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match (self.started, self.finished) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        }
    }

    /// Completed tasks per second of wall time.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.completed_tasks as f64 / secs
        } else {
            0.0
        }
    }

    /// Completed share of the total, in percent.
    #[must_use]
    pub fn progress_percentage(&self) -> f64 {
        ratio(self.completed_tasks, self.total_tasks) * 100.0
    }

    /// Whether the batch has an end time.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    fn record<T>(&mut self, result: &ProcessingResult<T>) {
        self.completed_tasks += 1;
        if result.is_success() {
            self.successful_tasks += 1;
        } else {
            self.failed_tasks += 1;
        }
        if result.from_cache {
            self.cache_hits += 1;
        }
        self.total_processing_time += result.processing_time;
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Progress report handed to callbacks after each settled task.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub cache_hit_rate: f64,
    pub average_time: Duration,
    /// Tasks per second.
    pub throughput: f64,
    pub elapsed: Duration,
    /// File of the task that just settled.
    pub last_file: Option<String>,
}

impl ProgressSnapshot {
    fn from_stats(stats: &ProcessingStats, last_file: Option<String>) -> Self {
        Self {
            completed: stats.completed_tasks,
            total: stats.total_tasks,
            successful: stats.successful_tasks,
            failed: stats.failed_tasks,
            success_rate: stats.success_rate(),
            cache_hit_rate: stats.cache_hit_rate(),
            average_time: stats.average_processing_time(),
            throughput: stats.throughput(),
            elapsed: stats.elapsed(),
            last_file,
        }
    }
}

/// Thread-safe accumulator of [`ProcessingStats`].
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    stats: Mutex<ProcessingStats>,
}

impl ProgressAggregator {
    /// Create an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProcessingStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a new batch of `total` tasks, discarding previous numbers.
    pub fn start(&self, total: usize) {
        *self.lock() = ProcessingStats {
            total_tasks: total,
            start_time: Some(Local::now()),
            started: Some(Instant::now()),
            ..ProcessingStats::default()
        };
    }

    /// Mark the batch as finished.
    pub fn finish(&self) {
        let mut stats = self.lock();
        stats.end_time = Some(Local::now());
        stats.finished = Some(Instant::now());
    }

    /// Count `n` newly queued tasks.
    pub fn add_total(&self, n: usize) {
        self.lock().total_tasks += n;
    }

    /// Record a settled task and return the resulting progress.
    pub fn record<T>(&self, result: &ProcessingResult<T>) -> ProgressSnapshot {
        let mut stats = self.lock();
        stats.record(result);
        ProgressSnapshot::from_stats(&stats, Some(result.file.display().to_string()))
    }

    /// Copy of the current statistics.
    #[must_use]
    pub fn snapshot(&self) -> ProcessingStats {
        self.lock().clone()
    }

    /// Current progress without a settled task.
    #[must_use]
    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot::from_stats(&self.lock(), None)
    }

    /// Forget everything.
    pub fn reset(&self) {
        *self.lock() = ProcessingStats::default();
    }
}
