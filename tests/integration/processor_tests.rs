use ocrbatch::cancel::CancellationToken;
use ocrbatch::fingerprint::ProcessingOptions;
use ocrbatch::processor::{
    ParallelProcessor, Processed, ProcessingStats, TaskContext, TaskError, WorkerConfig,
};
use ocrbatch::progress::ProgressCallback;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn config(workers: usize) -> WorkerConfig {
    WorkerConfig::default()
        .with_bounds(1, workers)
        .with_max_workers(workers)
        .with_auto_adjust(false)
        .with_backoff_base(Duration::from_millis(5))
}

fn echo(path: &Path, _: &ProcessingOptions, _: &TaskContext) -> Result<Processed<String>, TaskError> {
    Ok(Processed::fresh(path.display().to_string()))
}

#[test]
fn test_per_task_timeout_override() {
    let processor = ParallelProcessor::new(config(2).with_task_timeout(Duration::from_secs(30)));
    let options = ProcessingOptions::default();
    let slow = processor.add_task("slow.pdf", &options, 0, Some(Duration::from_millis(50)));
    processor.add_task("fast.pdf", &options, 0, None);

    let results = processor
        .process_batch(
            |path: &Path, _: &ProcessingOptions, _: &TaskContext| {
                if path.ends_with("slow.pdf") {
                    thread::sleep(Duration::from_millis(500));
                }
                Ok(Processed::fresh(()))
            },
            0,
        )
        .unwrap();

    assert_eq!(results.len(), 2);
    let timed_out = results.iter().find(|r| r.task_id == slow).unwrap();
    assert_eq!(
        timed_out.error(),
        Some(&TaskError::TimedOut(Duration::from_millis(50)))
    );
    assert_eq!(timed_out.attempts, 1);
    assert_eq!(processor.get_statistics().failed_tasks, 1);
}

#[test]
fn test_context_reports_attempts() {
    let processor = ParallelProcessor::new(config(1));
    processor.add_task("flaky.pdf", &ProcessingOptions::default(), 0, None);

    let results = processor
        .process_batch(
            |_: &Path, _: &ProcessingOptions, ctx: &TaskContext| {
                if ctx.attempt() < 2 {
                    Err(TaskError::Failed(format!("attempt {}", ctx.attempt())))
                } else {
                    Ok(Processed::fresh(ctx.attempt()))
                }
            },
            3,
        )
        .unwrap();

    assert_eq!(results[0].payload(), Some(&2));
    assert_eq!(results[0].attempts, 3);
}

#[test]
fn test_processor_is_reusable() {
    let processor = ParallelProcessor::new(config(2));
    let options = ProcessingOptions::default();

    processor.add_batch(["a.png", "b.png"], &options, 0);
    assert_eq!(processor.process_batch(echo, 0).unwrap().len(), 2);
    assert!(!processor.is_running());
    assert_eq!(processor.pending_tasks(), 0);

    processor.add_batch(["c.png", "d.png", "e.png"], &options, 0);
    let results = processor.process_batch(echo, 0).unwrap();
    assert_eq!(results.len(), 3);

    let stats = processor.get_statistics();
    assert_eq!(stats.total_tasks, 3);
    assert_eq!(stats.completed_tasks, 3);
    assert!((processor.progress_percentage() - 100.0).abs() < 1e-9);
}

#[test]
fn test_cancel_from_another_thread() {
    let processor = ParallelProcessor::new(config(1));
    let options = ProcessingOptions::default();
    let files: Vec<String> = (0..20).map(|i| format!("page-{i}.png")).collect();
    processor.add_batch(files, &options, 0);

    let results = thread::scope(|s| {
        s.spawn(|| {
            thread::sleep(Duration::from_millis(120));
            assert!(processor.cancel_processing());
        });
        processor
            .process_batch(
                |_: &Path, _: &ProcessingOptions, _: &TaskContext| {
                    thread::sleep(Duration::from_millis(40));
                    Ok(Processed::fresh(()))
                },
                0,
            )
            .unwrap()
    });

    assert!(results.len() < 20);
    assert_eq!(results.len() + processor.pending_tasks(), 20);
    assert!(processor.cancellation_token().is_cancelled());

    let stats = processor.get_statistics();
    assert_eq!(stats.completed_tasks, results.len());
    assert_eq!(
        stats.completed_tasks,
        stats.successful_tasks + stats.failed_tasks
    );
}

#[test]
fn test_external_token_cancels_batch() {
    let token = CancellationToken::new();
    let processor = ParallelProcessor::new(config(2)).with_cancellation_token(token.clone());
    processor.add_batch(
        (0..10).map(|i| format!("{i}.pdf")),
        &ProcessingOptions::default(),
        0,
    );

    let results = processor
        .process_batch(
            move |_: &Path, _: &ProcessingOptions, _: &TaskContext| {
                token.cancel();
                Err::<Processed<()>, _>(TaskError::Failed("retry me".into()))
            },
            5,
        )
        .unwrap();

    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.is_cancelled()));
    assert!(results.iter().all(|r| r.attempts <= 1));
}

#[test]
fn test_active_tasks_visible_while_running() {
    let processor = ParallelProcessor::new(config(2));
    processor.add_batch(["one.pdf", "two.pdf"], &ProcessingOptions::default(), 0);

    let seen = thread::scope(|s| {
        let watcher = s.spawn(|| {
            thread::sleep(Duration::from_millis(100));
            processor.active_tasks()
        });
        processor
            .process_batch(
                |_: &Path, _: &ProcessingOptions, _: &TaskContext| {
                    thread::sleep(Duration::from_millis(300));
                    Ok(Processed::fresh(()))
                },
                0,
            )
            .unwrap();
        watcher.join().unwrap()
    });

    assert_eq!(seen.len(), 2);
    assert!(processor.active_tasks().is_empty());
}

struct Recorder {
    started: Mutex<Option<(usize, usize)>>,
    progress: AtomicUsize,
    ended: Mutex<Option<ProcessingStats>>,
}

impl ProgressCallback for Recorder {
    fn on_batch_start(&self, total: usize, workers: usize) {
        *self.started.lock().unwrap() = Some((total, workers));
    }

    fn on_progress(&self, _snapshot: &ocrbatch::processor::ProgressSnapshot) {
        self.progress.fetch_add(1, Ordering::SeqCst);
    }

    fn on_batch_end(&self, stats: &ProcessingStats) {
        *self.ended.lock().unwrap() = Some(stats.clone());
    }
}

#[test]
fn test_callback_lifecycle() {
    let recorder = Arc::new(Recorder {
        started: Mutex::new(None),
        progress: AtomicUsize::new(0),
        ended: Mutex::new(None),
    });
    let processor = ParallelProcessor::new(config(3)).with_progress_callback(recorder.clone());
    processor.add_batch(
        (0..6).map(|i| format!("{i}.tif")),
        &ProcessingOptions::default(),
        0,
    );
    processor.process_batch(echo, 0).unwrap();

    assert_eq!(*recorder.started.lock().unwrap(), Some((6, 3)));
    assert_eq!(recorder.progress.load(Ordering::SeqCst), 6);
    let ended = recorder.ended.lock().unwrap().clone().unwrap();
    assert!(ended.is_finished());
    assert_eq!(ended.successful_tasks, 6);
}
