//! Command execution for the `ocrbatch` binary.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytesize::ByteSize;
use serde::Serialize;

use crate::cache::{CacheEntry, CacheManager, CacheStats};
use crate::cancel::install_ctrlc_handler;
use crate::cli::{CacheCommand, Cli, Commands, FingerprintArgs};
use crate::config::{Config, ConfigOverrides, WorkerOverrides};
use crate::error::ExitCode;
use crate::fingerprint::{fingerprint, FingerprintError, ProcessingOptions};
use crate::processor::{ParallelProcessor, Processed, ProcessingResult, TaskContext, TaskError};
use crate::progress::Progress;

/// Fingerprint of one file, as reported by `ocrbatch fingerprint`.
#[derive(Debug, Clone, Serialize)]
pub struct FileFingerprint {
    pub fingerprint: String,
    /// Whether a live cache entry exists for this fingerprint.
    pub cached: bool,
}

#[derive(Debug, Serialize)]
struct FingerprintLine<'a> {
    file: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<&'a str>,
    cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    attempts: u32,
}

/// Run the parsed command line.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the cache cannot be
/// opened, or output cannot be written.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    let workers = match cli.command {
        Commands::Fingerprint(ref args) => args.workers,
        Commands::Cache(_) => None,
    };
    let overrides = ConfigOverrides {
        cache_dir: cli.cache_dir.clone(),
        workers: workers.map(|n| WorkerOverrides {
            max_workers: Some(usize::try_from(n).unwrap_or(usize::MAX)),
        }),
        ..ConfigOverrides::default()
    };
    let config =
        Config::load(cli.config.as_deref(), &overrides).context("Failed to load configuration")?;

    let cache = CacheManager::open(&config.cache_dir, config.max_age_days).with_context(|| {
        format!("Failed to open cache at {}", config.cache_dir.display())
    })?;

    match cli.command {
        Commands::Cache(command) => run_cache(&cache, command),
        Commands::Fingerprint(ref args) => {
            run_fingerprint(Arc::new(cache), &config, args, cli.quiet, cli.accessible)
        }
    }
}

fn run_cache(cache: &CacheManager, command: CacheCommand) -> Result<ExitCode> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    match command {
        CacheCommand::Stats { json } => {
            let stats = cache.stats();
            if json {
                serde_json::to_writer_pretty(&mut out, &stats)?;
                writeln!(out)?;
            } else {
                write_stats(&mut out, cache.root(), &stats)?;
            }
        }
        CacheCommand::List { limit, json } => {
            let entries = cache.list_entries(limit);
            if json {
                serde_json::to_writer_pretty(&mut out, &entries)?;
                writeln!(out)?;
            } else {
                write_entries(&mut out, &entries)?;
            }
        }
        CacheCommand::Cleanup => {
            let removed = cache.cleanup_expired();
            writeln!(out, "Removed {} expired entries", removed)?;
        }
        CacheCommand::Clear => {
            if !cache.clear() {
                anyhow::bail!("Failed to clear cache at {}", cache.root().display());
            }
            writeln!(out, "Cache cleared")?;
        }
    }

    Ok(ExitCode::Success)
}

fn write_stats(out: &mut impl Write, root: &Path, stats: &CacheStats) -> io::Result<()> {
    writeln!(out, "Cache directory:     {}", root.display())?;
    writeln!(out, "Entries:             {}", stats.entry_count)?;
    writeln!(
        out,
        "Payload size:        {}",
        ByteSize::b(stats.total_payload_bytes)
    )?;
    writeln!(
        out,
        "Source size:         {}",
        ByteSize::b(stats.total_source_bytes)
    )?;
    writeln!(out, "Total accesses:      {}", stats.total_accesses)?;
    writeln!(out, "Avg confidence:      {:.1}", stats.avg_confidence)?;
    writeln!(out, "Avg processing time: {:.2}s", stats.avg_processing_time)?;
    writeln!(out, "Success rate:        {:.1}%", stats.success_rate * 100.0)
}

fn write_entries(out: &mut impl Write, entries: &[CacheEntry]) -> io::Result<()> {
    if entries.is_empty() {
        return writeln!(out, "Cache is empty");
    }
    for entry in entries {
        let accessed = entry
            .accessed()
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
        writeln!(
            out,
            "{}  {}  {:>4}x  {:<10}  {}",
            &entry.file_hash[..entry.file_hash.len().min(12)],
            accessed,
            entry.access_count,
            entry.processing_engine,
            entry.original_filename
        )?;
    }
    Ok(())
}

fn run_fingerprint(
    cache: Arc<CacheManager>,
    config: &Config,
    args: &FingerprintArgs,
    quiet: bool,
    accessible: bool,
) -> Result<ExitCode> {
    let token = install_ctrlc_handler().context("Failed to install Ctrl+C handler")?;
    let progress = Progress::with_accessible(quiet || args.json, accessible);
    let processor = ParallelProcessor::new(config.worker_config())
        .with_progress_callback(Arc::new(progress))
        .with_cancellation_token(token.clone());

    let options = args.options();
    let ids = processor.add_batch(args.files.iter().cloned(), &options, 0);
    let order: HashMap<String, usize> = ids
        .into_iter()
        .enumerate()
        .map(|(i, id)| (id, i))
        .collect();

    let mut results = processor
        .process_batch(
            move |path: &Path, options: &ProcessingOptions, _ctx: &TaskContext| {
                fingerprint_file(&cache, path, options)
            },
            config.max_retries,
        )
        .context("Failed to run fingerprint batch")?;
    results.sort_by_key(|r| order.get(&r.task_id).copied().unwrap_or(usize::MAX));

    write_fingerprints(&results, args.json)?;

    let interrupted = token.is_cancelled();
    if interrupted {
        log::warn!("{} files were not processed", processor.pending_tasks());
    }
    Ok(ExitCode::from_batch(&processor.get_statistics(), interrupted))
}

fn fingerprint_file(
    cache: &CacheManager,
    path: &Path,
    options: &ProcessingOptions,
) -> Result<Processed<FileFingerprint>, TaskError> {
    let fp = fingerprint(path, options).map_err(|e| match e {
        FingerprintError::Io { .. } => TaskError::Failed(e.to_string()),
        _ => TaskError::Fatal(e.to_string()),
    })?;
    let cached = match cache.peek(&fp) {
        Ok(entry) => entry.is_some(),
        Err(e) => {
            log::warn!("Cache index unavailable: {}", e);
            false
        }
    };
    Ok(Processed::fresh(FileFingerprint {
        fingerprint: fp.to_string(),
        cached,
    }))
}

fn write_fingerprints(results: &[ProcessingResult<FileFingerprint>], json: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if json {
        let lines: Vec<FingerprintLine<'_>> = results.iter().map(to_line).collect();
        serde_json::to_writer_pretty(&mut out, &lines)?;
        writeln!(out)?;
        return Ok(());
    }

    for result in results {
        match result.outcome {
            Ok(ref fp) => {
                let marker = if fp.cached { "  (cached)" } else { "" };
                writeln!(out, "{}  {}{}", fp.fingerprint, result.file.display(), marker)?;
            }
            Err(ref e) => eprintln!("{}: {}", result.file.display(), e),
        }
    }
    Ok(())
}

fn to_line(result: &ProcessingResult<FileFingerprint>) -> FingerprintLine<'_> {
    FingerprintLine {
        file: &result.file,
        fingerprint: result.payload().map(|fp| fp.fingerprint.as_str()),
        cached: result.payload().is_some_and(|fp| fp.cached),
        error: result.error().map(ToString::to_string),
        attempts: result.attempts,
    }
}

