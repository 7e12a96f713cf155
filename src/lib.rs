//! ocrbatch - OCR result caching and parallel batch processing.
//!
//! Recognized documents are cached on disk under a fingerprint of the source
//! file and the options that shape recognition output, and batches of files
//! are processed across a bounded worker pool with priorities, retries,
//! per-task timeouts and cooperative cancellation.
//!
//! * [`fingerprint`]: content + metadata + options fingerprints
//! * [`cache`]: the persistent result cache
//! * [`processor`]: the parallel batch processor
//! * [`document`]: the OCR document payload

pub mod app;
pub mod cache;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod processor;
pub mod progress;

pub use app::run_app;
