use ocrbatch::cache::CacheManager;
use ocrbatch::document::{OcrDocument, OcrPage};
use ocrbatch::fingerprint::ProcessingOptions;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_open_corrupted_database() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("cache.db"), b"not a sqlite database").unwrap();

    assert!(CacheManager::open(dir.path(), 30).is_err());
}

#[test]
fn test_recreate_after_corruption() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("cache.db");
    fs::write(&db, b"corrupted garbage").unwrap();
    assert!(CacheManager::open(dir.path(), 30).is_err());

    fs::remove_file(&db).unwrap();
    let cache = CacheManager::open(dir.path(), 30).expect("fresh index after removal");
    assert_eq!(cache.stats().entry_count, 0);
}

#[test]
fn test_truncated_payload_is_a_miss() {
    let dir = tempdir().unwrap();
    let cache = CacheManager::open(&dir.path().join("cache"), 30).unwrap();
    let file = dir.path().join("scan.tiff");
    fs::write(&file, b"II*\0").unwrap();
    let options = ProcessingOptions::default();
    let doc = OcrDocument::from_pages(vec![OcrPage::new(1, "text", 75.0)]);
    cache.save(&file, &doc, &options, "tesseract");

    let entry = cache.list_entries(1).remove(0);
    fs::write(&entry.result_path, b"{\"pages\": [").unwrap();

    assert!(cache.lookup::<OcrDocument>(&file, &options).is_none());
    assert_eq!(cache.stats().entry_count, 0);
    assert!(cache.save(&file, &doc, &options, "tesseract"));
    assert_eq!(cache.lookup::<OcrDocument>(&file, &options), Some(doc));
}

#[test]
fn test_orphan_payload_files_are_cleared() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("cache");
    let cache = CacheManager::open(&root, 30).unwrap();
    let orphan = root.join("results").join(format!("{}.json", "f".repeat(64)));
    fs::write(&orphan, b"{}").unwrap();

    assert!(cache.stats().total_payload_bytes > 0);
    assert!(cache.clear());
    assert!(!orphan.exists());
    assert_eq!(cache.stats().total_payload_bytes, 0);
}

#[test]
fn test_deleted_results_dir_heals() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("cache");
    let cache = CacheManager::open(&root, 30).unwrap();
    let file = dir.path().join("a.pdf");
    fs::write(&file, b"a").unwrap();
    let options = ProcessingOptions::default();
    let doc = OcrDocument::from_pages(vec![OcrPage::new(1, "a", 60.0)]);
    cache.save(&file, &doc, &options, "tesseract");

    fs::remove_dir_all(root.join("results")).unwrap();

    assert!(cache.lookup::<OcrDocument>(&file, &options).is_none());
    assert_eq!(cache.stats().entry_count, 0);
    assert!(cache.save(&file, &doc, &options, "tesseract"));
    assert!(cache.lookup::<OcrDocument>(&file, &options).is_some());
}
