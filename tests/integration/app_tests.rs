use crate::{clear_env, ENV_MUTEX};
use clap::Parser;
use ocrbatch::cache::CacheManager;
use ocrbatch::cli::Cli;
use ocrbatch::document::{OcrDocument, OcrPage};
use ocrbatch::error::ExitCode;
use ocrbatch::fingerprint::ProcessingOptions;
use ocrbatch::run_app;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn run(dir: &Path, args: &[&str]) -> anyhow::Result<ExitCode> {
    let config = dir.join("config.toml");
    let cache = dir.join("cache");
    let mut argv = vec![
        "ocrbatch".to_string(),
        "-q".to_string(),
        "--config".to_string(),
        config.to_string_lossy().into_owned(),
        "--cache-dir".to_string(),
        cache.to_string_lossy().into_owned(),
    ];
    argv.extend(args.iter().map(|a| (*a).to_string()));
    run_app(Cli::try_parse_from(argv).unwrap())
}

#[test]
fn test_cache_commands_on_empty_cache() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();

    assert_eq!(run(dir.path(), &["cache", "stats"]).unwrap(), ExitCode::Success);
    assert_eq!(run(dir.path(), &["cache", "stats", "--json"]).unwrap(), ExitCode::Success);
    assert_eq!(run(dir.path(), &["cache", "list"]).unwrap(), ExitCode::Success);
    assert_eq!(run(dir.path(), &["cache", "cleanup"]).unwrap(), ExitCode::Success);
    assert_eq!(run(dir.path(), &["cache", "clear"]).unwrap(), ExitCode::Success);
    assert!(dir.path().join("cache").join("cache.db").exists());
}

#[test]
fn test_cache_clear_removes_entries() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    let file = dir.path().join("scan.pdf");
    fs::write(&file, b"scan").unwrap();
    {
        let cache = CacheManager::open(&dir.path().join("cache"), 30).unwrap();
        let doc = OcrDocument::from_pages(vec![OcrPage::new(1, "scan", 80.0)]);
        assert!(cache.save(&file, &doc, &ProcessingOptions::default(), "tesseract"));
    }

    assert_eq!(
        run(dir.path(), &["cache", "list", "--json"]).unwrap(),
        ExitCode::Success
    );
    assert_eq!(run(dir.path(), &["cache", "clear"]).unwrap(), ExitCode::Success);

    let cache = CacheManager::open(&dir.path().join("cache"), 30).unwrap();
    assert_eq!(cache.stats().entry_count, 0);
}

#[test]
fn test_fingerprint_exit_codes() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.png");
    let b = dir.path().join("b.png");
    fs::write(&a, b"a").unwrap();
    fs::write(&b, b"b").unwrap();
    let a = a.to_string_lossy().into_owned();
    let b = b.to_string_lossy().into_owned();
    let missing = dir.path().join("missing.png").to_string_lossy().into_owned();

    let ok = run(dir.path(), &["fingerprint", &a, &b, "--language", "en", "--json"]).unwrap();
    assert_eq!(ok, ExitCode::Success);

    let partial = run(dir.path(), &["fingerprint", &a, &missing, "--workers", "1"]).unwrap();
    assert_eq!(partial, ExitCode::PartialSuccess);
}

#[test]
fn test_invalid_config_is_an_error() {
    let _lock = ENV_MUTEX.lock().unwrap();
    clear_env();
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("config.toml"), "[workers]\nmin_workers = 0\n").unwrap();

    let err = run(dir.path(), &["cache", "stats"]).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to load configuration"));
}
