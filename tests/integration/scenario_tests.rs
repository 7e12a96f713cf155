//! End-to-end batches combining the cache and the processor.

use ocrbatch::cache::CacheManager;
use ocrbatch::document::{OcrDocument, OcrPage};
use ocrbatch::fingerprint::ProcessingOptions;
use ocrbatch::processor::{
    with_cache, ParallelProcessor, Processed, TaskContext, TaskError, WorkerConfig,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn three_page_document() -> OcrDocument {
    OcrDocument::from_pages(vec![
        OcrPage::new(1, "Invoice 2024-001", 94.0),
        OcrPage::new(2, "Line items and totals", 88.5),
        OcrPage::new(3, "Terms and conditions apply", 91.0),
    ])
    .with_processing_time(2.5)
    .with_method("mock")
}

#[test]
fn test_same_language_hits_other_language_misses() {
    let dir = tempdir().unwrap();
    let cache = CacheManager::open(&dir.path().join("cache"), 30).unwrap();
    let file = dir.path().join("invoice.pdf");
    fs::write(&file, b"%PDF-1.7 invoice").unwrap();

    let english = ProcessingOptions::new()
        .with_language("en")
        .with_confidence_threshold(0.7);
    let french = ProcessingOptions::new()
        .with_language("fr")
        .with_confidence_threshold(0.7);
    assert!(cache.save(&file, &three_page_document(), &english, "tesseract"));

    let hit: OcrDocument = cache.lookup(&file, &english).unwrap();
    assert_eq!(hit.pages.len(), 3);
    assert_eq!(hit.metadata.total_pages, 3);
    assert_eq!(hit, three_page_document());
    assert!(cache.lookup::<OcrDocument>(&file, &french).is_none());

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entry_count, 1);

    let entry = &cache.list_entries(1)[0];
    assert_eq!(entry.word_count, 10);
    assert_eq!(entry.processing_engine, "tesseract");
    assert!((entry.processing_time - 2.5).abs() < 1e-9);
}

#[test]
fn test_parallel_speedup() {
    let config = WorkerConfig::default()
        .with_bounds(1, 4)
        .with_max_workers(4)
        .with_auto_adjust(false);
    let processor = ParallelProcessor::new(config);
    processor.add_batch(
        (0..8).map(|i| format!("page-{i}.png")),
        &ProcessingOptions::default(),
        0,
    );

    let started = Instant::now();
    let results = processor
        .process_batch(
            |_: &Path, _: &ProcessingOptions, _: &TaskContext| {
                thread::sleep(Duration::from_millis(250));
                Ok(Processed::fresh(()))
            },
            0,
        )
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(results.len(), 8);
    assert!(results.iter().all(|r| r.is_success()));
    assert!(elapsed >= Duration::from_millis(450), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "{elapsed:?}");

    let mut workers: Vec<&str> = results.iter().map(|r| r.worker_id.as_str()).collect();
    workers.sort_unstable();
    workers.dedup();
    assert_eq!(workers.len(), 4);

    let stats = processor.get_statistics();
    assert!(stats.throughput() > 4.0);
}

#[test]
fn test_retries_with_partial_failure() {
    let config = WorkerConfig::default()
        .with_max_workers(2)
        .with_backoff_base(Duration::from_millis(10));
    let processor = ParallelProcessor::new(config);
    let ids = processor.add_batch(
        (0..5).map(|i| format!("doc-{i}.pdf")),
        &ProcessingOptions::default(),
        0,
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let results = processor
        .process_batch(
            move |path: &Path, _: &ProcessingOptions, _: &TaskContext| {
                counter.fetch_add(1, Ordering::SeqCst);
                let name = path.to_string_lossy();
                let index: usize = name["doc-".len()..name.len() - ".pdf".len()].parse().unwrap();
                if index % 2 == 0 {
                    Err(TaskError::Failed(format!("cannot read {name}")))
                } else {
                    Ok(Processed::fresh(index))
                }
            },
            1,
        )
        .unwrap();

    assert_eq!(results.len(), 5);
    for (i, id) in ids.iter().enumerate() {
        let result = results.iter().find(|r| &r.task_id == id).unwrap();
        if i % 2 == 0 {
            assert!(!result.is_success());
            assert_eq!(result.attempts, 2);
        } else {
            assert_eq!(result.payload(), Some(&i));
            assert_eq!(result.attempts, 1);
        }
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3 * 2 + 2);

    let stats = processor.get_statistics();
    assert_eq!(stats.successful_tasks, 2);
    assert_eq!(stats.failed_tasks, 3);
    assert!((stats.success_rate() - 0.4).abs() < 1e-9);
}

#[test]
fn test_cached_batch_skips_recognition() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(CacheManager::open(&dir.path().join("cache"), 30).unwrap());
    let files: Vec<_> = (0..4)
        .map(|i| {
            let path = dir.path().join(format!("scan-{i}.png"));
            fs::write(&path, format!("pixels {i}")).unwrap();
            path
        })
        .collect();
    let options = ProcessingOptions::new().with_language("en").with_dpi(300);

    let recognitions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&recognitions);
    let recognize = move |path: &Path, _: &ProcessingOptions, _: &TaskContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        let text = format!("text of {}", path.file_name().unwrap().to_string_lossy());
        Ok::<_, TaskError>(Processed::fresh(OcrDocument::from_pages(vec![OcrPage::new(
            1, text, 90.0,
        )])))
    };
    let process = Arc::new(with_cache(Arc::clone(&cache), "mock", recognize));

    let processor = ParallelProcessor::new(WorkerConfig::default().with_max_workers(2));
    processor.add_batch(files.iter().cloned(), &options, 0);
    let first = {
        let process = Arc::clone(&process);
        processor
            .process_batch(move |p: &Path, o: &ProcessingOptions, c: &TaskContext| process(p, o, c), 0)
            .unwrap()
    };
    assert!(first.iter().all(|r| r.is_success() && !r.from_cache));
    assert_eq!(processor.get_statistics().cache_hits, 0);

    processor.add_batch(files.iter().cloned(), &options, 0);
    let second = processor
        .process_batch(move |p: &Path, o: &ProcessingOptions, c: &TaskContext| process(p, o, c), 0)
        .unwrap();
    assert!(second.iter().all(|r| r.is_success() && r.from_cache));

    let stats = processor.get_statistics();
    assert_eq!(stats.cache_hits, 4);
    assert!((stats.cache_hit_rate() - 1.0).abs() < 1e-9);
    assert_eq!(recognitions.load(Ordering::SeqCst), 4);
    assert_eq!(cache.stats().hits, 4);
}

#[test]
fn test_missing_file_fails_without_retry() {
    let dir = tempdir().unwrap();
    let cache = Arc::new(CacheManager::open(&dir.path().join("cache"), 30).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let process = with_cache(cache, "mock", move |_: &Path, _: &ProcessingOptions, _: &TaskContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Processed::fresh(serde_json::json!({"pages": []})))
    });

    let processor = ParallelProcessor::new(WorkerConfig::default());
    processor.add_task(dir.path().join("gone.pdf"), &ProcessingOptions::default(), 0, None);
    let results = processor.process_batch(process, 3).unwrap();

    assert_eq!(results.len(), 1);
    assert!(matches!(results[0].error(), Some(TaskError::Fatal(_))));
    assert_eq!(results[0].attempts, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
