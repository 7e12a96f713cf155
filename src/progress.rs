//! Progress reporting utilities using indicatif.
//!
//! This module provides the [`ProgressCallback`] trait the parallel processor
//! reports through, and [`Progress`], an implementation that draws a progress
//! bar in the terminal.
//!
//! # Accessible Mode
//!
//! When accessible mode is enabled, progress reporting uses simplified output:
//! - No spinners or animations
//! - ASCII bar characters only
//! - A slower redraw rate for screen reader compatibility

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::processor::{ProcessingStats, ProgressSnapshot};

/// Progress callback for batch processing.
///
/// Implement this trait to receive progress updates while a batch runs.
/// Callbacks are invoked from worker threads, so implementations must be
/// thread-safe and should return quickly.
///
/// Any `Fn(&ProgressSnapshot) + Send + Sync` closure is a callback that only
/// cares about per-task progress.
pub trait ProgressCallback: Send + Sync {
    /// Called once when a batch starts.
    ///
    /// # Arguments
    ///
    /// * `total` - Number of tasks queued for the batch
    /// * `workers` - Number of workers processing them
    fn on_batch_start(&self, _total: usize, _workers: usize) {}

    /// Called after each task settles.
    fn on_progress(&self, snapshot: &ProgressSnapshot);

    /// Called once when the batch ends, including after cancellation.
    fn on_batch_end(&self, _stats: &ProcessingStats) {}
}

impl<F> ProgressCallback for F
where
    F: Fn(&ProgressSnapshot) + Send + Sync,
{
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self(snapshot);
    }
}

/// Progress reporter using indicatif.
pub struct Progress {
    bar: Mutex<Option<ProgressBar>>,
    quiet: bool,
    accessible: bool,
}

impl Progress {
    /// Create a new progress reporter.
    ///
    /// # Arguments
    ///
    /// * `quiet` - If true, no progress bar will be displayed.
    ///
    /// # Examples
    ///
    /// ```
    /// use ocrbatch::progress::Progress;
    ///
    /// let progress = Progress::new(false);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self::with_accessible(quiet, false)
    }

    /// Create a new progress reporter with accessible mode.
    ///
    /// # Examples
    ///
    /// ```
    /// use ocrbatch::progress::Progress;
    ///
    /// let progress = Progress::with_accessible(false, true);
    /// assert!(progress.is_accessible());
    /// ```
    #[must_use]
    pub fn with_accessible(quiet: bool, accessible: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            quiet,
            accessible,
        }
    }

    /// Check if accessible mode is enabled.
    #[must_use]
    pub fn is_accessible(&self) -> bool {
        self.accessible
    }

    fn bar_style(&self) -> ProgressStyle {
        if self.accessible {
            ProgressStyle::with_template(
                "[{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-")
        } else {
            ProgressStyle::with_template(
                "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█>-")
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(ref pb) = *guard {
                f(pb);
            }
        }
    }
}

impl ProgressCallback for Progress {
    fn on_batch_start(&self, total: usize, workers: usize) {
        if self.quiet {
            return;
        }

        let pb = ProgressBar::new(total as u64);
        pb.set_style(self.bar_style());
        if self.accessible {
            pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(2));
        } else {
            pb.enable_steady_tick(Duration::from_millis(100));
        }
        pb.set_message(format!("{} workers", workers));

        if let Ok(mut guard) = self.bar.lock() {
            *guard = Some(pb);
        }
    }

    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        if self.quiet {
            return;
        }

        let message = match snapshot.last_file {
            Some(ref file) => format!(
                "{} ({:.0}% cached)",
                truncate_path(file, 30),
                snapshot.cache_hit_rate * 100.0
            ),
            None => String::new(),
        };
        self.with_bar(|pb| {
            pb.set_position(snapshot.completed as u64);
            pb.set_message(message);
        });
    }

    fn on_batch_end(&self, stats: &ProcessingStats) {
        if self.quiet {
            return;
        }

        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_with_message(format!(
                    "{} ok, {} failed, {} cached",
                    stats.successful_tasks, stats.failed_tasks, stats.cache_hits
                ));
            }
        }
    }
}

/// Truncate a path for display in the progress bar.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }

    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let name_len = file_name.chars().count();
    if name_len >= max_len {
        let tail: String = file_name.chars().skip(name_len + 3 - max_len).collect();
        return format!("...{}", tail);
    }

    format!(".../{}", file_name)
}
