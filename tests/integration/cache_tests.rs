use filetime::{set_file_mtime, FileTime};
use ocrbatch::cache::{CacheManager, ResultStore, DEFAULT_MAX_AGE_DAYS};
use ocrbatch::document::{OcrDocument, OcrPage};
use ocrbatch::fingerprint::{fingerprint, ProcessingOptions};
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::{tempdir, TempDir};

fn setup(name: &str, content: &[u8]) -> (TempDir, CacheManager, PathBuf) {
    let dir = tempdir().unwrap();
    let cache = CacheManager::open(&dir.path().join("cache"), DEFAULT_MAX_AGE_DAYS).unwrap();
    let file = dir.path().join(name);
    fs::write(&file, content).unwrap();
    (dir, cache, file)
}

fn doc(text: &str) -> OcrDocument {
    OcrDocument::from_pages(vec![OcrPage::new(1, text, 90.0)]).with_processing_time(1.5)
}

fn age_all_entries(cache_root: &Path, seconds: f64) {
    let conn = Connection::open(cache_root.join("cache.db")).unwrap();
    conn.execute(
        "UPDATE cache_entries SET created_at = created_at - ?1",
        [seconds],
    )
    .unwrap();
}

#[test]
fn test_cache_survives_reopen() {
    let (dir, cache, file) = setup("scan.pdf", b"%PDF persisted");
    let options = ProcessingOptions::new().with_language("en");
    assert!(cache.save(&file, &doc("persisted text"), &options, "tesseract"));
    drop(cache);

    let reopened = CacheManager::open(&dir.path().join("cache"), DEFAULT_MAX_AGE_DAYS).unwrap();
    let cached: OcrDocument = reopened.lookup(&file, &options).unwrap();
    assert_eq!(cached.full_text(), "persisted text");
}

#[test]
fn test_modified_file_misses() {
    let (_dir, cache, file) = setup("scan.pdf", b"version one");
    let options = ProcessingOptions::default();
    cache.save(&file, &doc("one"), &options, "tesseract");

    fs::write(&file, b"version two!").unwrap();
    assert!(cache.lookup::<OcrDocument>(&file, &options).is_none());
}

#[test]
fn test_touched_mtime_changes_fingerprint() {
    let (_dir, cache, file) = setup("scan.pdf", b"same bytes");
    let options = ProcessingOptions::default();

    set_file_mtime(&file, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
    let before = fingerprint(&file, &options).unwrap();
    cache.save(&file, &doc("old"), &options, "tesseract");

    set_file_mtime(&file, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
    let after = fingerprint(&file, &options).unwrap();

    assert_ne!(before, after);
    assert!(cache.lookup::<OcrDocument>(&file, &options).is_none());
}

#[test]
fn test_unrelated_option_keys_share_entry() {
    let (_dir, cache, file) = setup("scan.pdf", b"shared");
    let base = ProcessingOptions::new().with_language("en");
    cache.save(&file, &doc("shared"), &base, "tesseract");

    let with_extra = base
        .clone()
        .with_extra("request_id", serde_json::json!("abc-123"));
    assert!(cache.lookup::<OcrDocument>(&file, &with_extra).is_some());
}

#[test]
fn test_separator_in_option_value_does_not_alias_entry() {
    let (_dir, cache, file) = setup("scan.pdf", b"aliasing");
    let split = ProcessingOptions::new()
        .with_language("en")
        .with_engine("cloud");
    let smuggled = ProcessingOptions::new().with_language("en;engine=cloud");
    assert!(cache.save(&file, &doc("cloud result"), &split, "cloud"));

    assert_ne!(
        fingerprint(&file, &split).unwrap(),
        fingerprint(&file, &smuggled).unwrap()
    );
    assert!(cache.lookup::<OcrDocument>(&file, &smuggled).is_none());

    let joined = ProcessingOptions::new().with_preprocessing("a,b");
    let separate = ProcessingOptions::new()
        .with_preprocessing("a")
        .with_preprocessing("b");
    assert!(cache.save(&file, &doc("two steps"), &separate, "tesseract"));
    assert!(cache.lookup::<OcrDocument>(&file, &joined).is_none());
}

#[test]
fn test_concurrent_save_and_lookup_see_whole_payloads() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 25;

    let (_dir, cache, file) = setup("scan.pdf", b"shared by every thread");
    let options = ProcessingOptions::new().with_language("en");
    let expected: Vec<OcrDocument> = (0..THREADS)
        .map(|i| doc(&format!("text from writer {i} ").repeat(200)))
        .collect();

    std::thread::scope(|s| {
        for (i, document) in expected.iter().enumerate() {
            let cache = &cache;
            let file = &file;
            let options = &options;
            let expected = &expected;
            s.spawn(move || {
                for round in 0..ROUNDS {
                    if (i + round) % 2 == 0 {
                        assert!(cache.save(file, document, options, "tesseract"));
                    }
                    if let Some(hit) = cache.lookup::<OcrDocument>(file, options) {
                        assert!(
                            expected.contains(&hit),
                            "lookup returned a payload no writer saved"
                        );
                    }
                }
            });
        }
    });

    let last: OcrDocument = cache.lookup(&file, &options).unwrap();
    assert!(expected.contains(&last));

    let leftovers: Vec<_> = fs::read_dir(cache.store().results_dir())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
        .collect();
    assert!(leftovers.is_empty(), "temp files left: {:?}", leftovers);
    assert_eq!(cache.store().len().unwrap(), 1);
}

#[test]
fn test_expired_entry_is_purged_on_lookup() {
    let (dir, cache, file) = setup("old.pdf", b"aged");
    let options = ProcessingOptions::default();
    cache.save(&file, &doc("aged"), &options, "tesseract");
    let payload = PathBuf::from(&cache.list_entries(1)[0].result_path);

    age_all_entries(&dir.path().join("cache"), 31.0 * 86_400.0);

    assert!(cache.lookup::<OcrDocument>(&file, &options).is_none());
    assert_eq!(cache.stats().entry_count, 0);
    assert!(!payload.exists());
}

#[test]
fn test_cleanup_removes_only_expired() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("cache");
    let cache = CacheManager::with_max_age(&root, Duration::from_secs(3600)).unwrap();
    let options = ProcessingOptions::default();

    let old = dir.path().join("old.png");
    fs::write(&old, b"old").unwrap();
    cache.save(&old, &doc("old"), &options, "tesseract");
    age_all_entries(&root, 7200.0);

    let fresh = dir.path().join("fresh.png");
    fs::write(&fresh, b"fresh").unwrap();
    cache.save(&fresh, &doc("fresh"), &options, "tesseract");

    assert_eq!(cache.cleanup_expired(), 1);
    let entries = cache.list_entries(10);
    assert_eq!(entries.len(), 1);
    assert!(entries[0].original_filename.ends_with("fresh.png"));
    assert_eq!(cache.cleanup_expired(), 0);
}

#[test]
fn test_list_orders_by_last_access() {
    let (dir, cache, first) = setup("first.pdf", b"1");
    let second = dir.path().join("second.pdf");
    fs::write(&second, b"2").unwrap();
    let options = ProcessingOptions::default();

    cache.save(&first, &doc("1"), &options, "tesseract");
    std::thread::sleep(Duration::from_millis(20));
    cache.save(&second, &doc("2"), &options, "tesseract");
    std::thread::sleep(Duration::from_millis(20));
    let _: Option<OcrDocument> = cache.lookup(&first, &options);

    let entries = cache.list_entries(10);
    assert!(entries[0].original_filename.ends_with("first.pdf"));
    assert!(entries[1].original_filename.ends_with("second.pdf"));
    assert_eq!(cache.list_entries(1).len(), 1);
}

#[test]
fn test_stats_track_sizes_and_averages() {
    let (dir, cache, a) = setup("a.pdf", b"aaaa");
    let b = dir.path().join("b.pdf");
    fs::write(&b, b"bbbbbb").unwrap();
    let options = ProcessingOptions::default();

    cache.save(&a, &OcrDocument::from_pages(vec![OcrPage::new(1, "x", 80.0)]), &options, "e");
    cache.save(&b, &OcrDocument::from_pages(vec![OcrPage::new(1, "y", 90.0)]), &options, "e");

    let stats = cache.stats();
    assert_eq!(stats.entry_count, 2);
    assert_eq!(stats.total_source_bytes, 10);
    assert!(stats.total_payload_bytes > 0);
    assert!((stats.avg_confidence - 85.0).abs() < 1e-9);
    assert!((stats.success_rate - 1.0).abs() < 1e-9);
    assert_eq!(stats.saves, 2);
}

#[test]
fn test_store_paths() {
    let dir = tempdir().unwrap();
    let store = ResultStore::open(dir.path()).unwrap();
    assert_eq!(store.db_path(), dir.path().join("cache.db"));
    assert!(store.results_dir().is_dir());
    assert!(store.is_empty().unwrap());
}
