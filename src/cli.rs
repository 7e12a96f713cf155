//! Command-line interface definitions for ocrbatch.
//!
//! Global options (verbosity, config, cache location) apply to every
//! subcommand.
//!
//! # Example
//!
//! ```bash
//! # Show cache statistics
//! ocrbatch cache stats
//!
//! # Fingerprint scans for French OCR at 600 DPI, as JSON
//! ocrbatch fingerprint scans/*.pdf --language fr --dpi 600 --json
//!
//! # Drop expired entries, with debug logging
//! ocrbatch -v cache cleanup
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::fingerprint::ProcessingOptions;

/// Batch OCR result cache and parallel processing toolkit.
///
/// ocrbatch fingerprints documents together with their OCR options (BLAKE3),
/// keeps recognized results in an on-disk cache, and runs batches across a
/// bounded worker pool with retries and timeouts.
#[derive(Debug, Parser)]
#[command(name = "ocrbatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Cache directory, overriding the configuration
    #[arg(long, value_name = "PATH", global = true, env = "OCRBATCH_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Plain ASCII progress output for screen readers
    #[arg(long, global = true)]
    pub accessible: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Inspect and maintain the result cache
    #[command(subcommand)]
    Cache(CacheCommand),
    /// Compute cache fingerprints for files
    Fingerprint(FingerprintArgs),
}

/// Cache maintenance operations.
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Show cache statistics
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the most recently accessed entries
    List {
        /// Maximum number of entries
        #[arg(short = 'n', long, value_name = "N", default_value = "10")]
        limit: usize,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove entries older than the configured maximum age
    Cleanup,
    /// Remove every entry and payload
    Clear,
}

/// Arguments for the fingerprint subcommand.
#[derive(Debug, Args)]
pub struct FingerprintArgs {
    /// Files to fingerprint
    #[arg(value_name = "FILES", required = true)]
    pub files: Vec<PathBuf>,

    /// OCR language
    #[arg(short, long, value_name = "LANG")]
    pub language: Option<String>,

    /// OCR engine name
    #[arg(short, long, value_name = "ENGINE")]
    pub engine: Option<String>,

    /// Rendering resolution
    #[arg(long, value_name = "N")]
    pub dpi: Option<u32>,

    /// Minimum word confidence (0.0 - 1.0)
    #[arg(long, value_name = "F", value_parser = parse_unit_interval)]
    pub confidence_threshold: Option<f64>,

    /// Preprocessing steps (can be specified multiple times)
    #[arg(short, long = "preprocess", value_name = "STEP")]
    pub preprocessing: Vec<String>,

    /// Maximum number of workers
    #[arg(short, long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub workers: Option<u64>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

impl FingerprintArgs {
    /// Processing options described by the flags.
    #[must_use]
    pub fn options(&self) -> ProcessingOptions {
        let mut options = ProcessingOptions::new();
        if let Some(ref language) = self.language {
            options = options.with_language(language.clone());
        }
        if let Some(ref engine) = self.engine {
            options = options.with_engine(engine.clone());
        }
        if let Some(dpi) = self.dpi {
            options = options.with_dpi(dpi);
        }
        if let Some(threshold) = self.confidence_threshold {
            options = options.with_confidence_threshold(threshold);
        }
        for step in &self.preprocessing {
            options = options.with_preprocessing(step.clone());
        }
        options
    }
}

/// Parse a float in `0.0..=1.0`.
///
/// # Examples
///
/// ```
/// use ocrbatch::cli::parse_unit_interval;
///
/// assert_eq!(parse_unit_interval("0.7").unwrap(), 0.7);
/// assert!(parse_unit_interval("1.5").is_err());
/// ```
///
/// # Errors
///
/// Returns an error if the string is not a number or is out of range.
pub fn parse_unit_interval(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: '{s}'"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("Value must be between 0.0 and 1.0, got {value}"));
    }
    Ok(value)
}
