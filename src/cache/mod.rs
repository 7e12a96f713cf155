//! Result caching for ocrbatch.
//!
//! Recognition is expensive, so results are stored and reused whenever the same
//! file is processed again with options that would produce the same output.
//!
//! # Architecture
//!
//! * [`store`]: SQLite index plus JSON payload files, schema and CRUD.
//! * [`entry`]: index rows, payload summaries and statistics.
//! * [`manager`]: the [`CacheManager`] facade with expiry and counters.
//!
//! # Cache Invalidation
//!
//! Entries are keyed by [`crate::fingerprint::Fingerprint`], which covers:
//! * File content (BLAKE3)
//! * File size
//! * Modification time
//! * The fingerprint-relevant processing options
//!
//! If any of these change, the key changes and the old entry is simply never
//! looked up again; it ages out through [`CacheManager::cleanup_expired`].
//! Entries whose payload file disappeared are dropped the next time they are read.

pub mod entry;
pub mod manager;
pub mod store;

pub use entry::{CacheEntry, CacheStats, PayloadMetrics, PayloadSummary};
pub use manager::{CacheManager, DEFAULT_MAX_AGE_DAYS};
pub use store::{CacheError, CacheResult, ResultStore};
