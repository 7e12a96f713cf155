//! Cache facade with expiry policy and lifetime counters.

use super::entry::{CacheEntry, CacheStats, PayloadSummary};
use super::store::{now_secs, CacheError, CacheResult, ResultStore};
use crate::fingerprint::{fingerprint, Fingerprint, ProcessingOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, UNIX_EPOCH};

/// Default maximum entry age in days.
pub const DEFAULT_MAX_AGE_DAYS: u32 = 30;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    saves: AtomicU64,
    errors: AtomicU64,
    bytes_saved: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.saves,
            &self.errors,
            &self.bytes_saved,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Content-addressed cache of recognition results.
///
/// Results are keyed by [`Fingerprint`], so a file is only recognized again
/// when its bytes, size, modification time or relevant options change. Entries
/// older than the configured maximum age are treated as absent and purged.
///
/// The manager is `Send + Sync`; share it behind an `Arc`. `lookup` and `save`
/// never fail: problems are logged, counted, and reported as a miss or `false`.
///
/// # Example
///
/// ```no_run
/// use ocrbatch::cache::CacheManager;
/// use ocrbatch::document::{OcrDocument, OcrPage};
/// use ocrbatch::fingerprint::ProcessingOptions;
/// use std::path::Path;
///
/// let cache = CacheManager::open(Path::new("/tmp/ocr-cache"), 30).unwrap();
/// let file = Path::new("scan.pdf");
/// let options = ProcessingOptions::new().with_language("en");
///
/// if cache.lookup::<OcrDocument>(file, &options).is_none() {
///     let doc = OcrDocument::from_pages(vec![OcrPage::new(1, "hello", 93.0)]);
///     cache.save(file, &doc, &options, "tesseract");
/// }
/// ```
#[derive(Debug)]
pub struct CacheManager {
    store: ResultStore,
    max_age: Duration,
    counters: Counters,
}

impl CacheManager {
    /// Open a cache rooted at `root` whose entries expire after `max_age_days`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory or index cannot be created.
    pub fn open(root: &Path, max_age_days: u32) -> CacheResult<Self> {
        Self::with_max_age(
            root,
            Duration::from_secs(u64::from(max_age_days) * SECS_PER_DAY),
        )
    }

    /// Open a cache with an arbitrary maximum entry age.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory or index cannot be created.
    pub fn with_max_age(root: &Path, max_age: Duration) -> CacheResult<Self> {
        let store = ResultStore::open(root)?;
        log::info!(
            "Cache ready at {} (max age {}s)",
            root.display(),
            max_age.as_secs()
        );
        Ok(Self {
            store,
            max_age,
            counters: Counters::default(),
        })
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Maximum entry age.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Look up the cached result for `file` under `options`.
    ///
    /// Returns `None` when the file no longer exists, when nothing is cached,
    /// when the entry expired or lost its payload, and on any internal error.
    pub fn lookup<T: DeserializeOwned>(&self, file: &Path, options: &ProcessingOptions) -> Option<T> {
        if !file.exists() {
            return None;
        }
        match self.try_lookup(file, options) {
            Ok(found) => found,
            Err(e) => {
                log::error!("Cache lookup failed for {}: {}", file.display(), e);
                None
            }
        }
    }

    /// Like [`lookup`](Self::lookup), but surfaces errors.
    ///
    /// Errors are still counted as misses (and errors) in the statistics.
    ///
    /// # Errors
    ///
    /// [`CacheError::Fingerprint`] when the file cannot be read, or a database
    /// or I/O error from the store.
    pub fn try_lookup<T: DeserializeOwned>(
        &self,
        file: &Path,
        options: &ProcessingOptions,
    ) -> CacheResult<Option<T>> {
        let result = self.lookup_inner(file, options);
        if result.is_err() {
            Counters::bump(&self.counters.errors);
            Counters::bump(&self.counters.misses);
        }
        result
    }

    fn lookup_inner<T: DeserializeOwned>(
        &self,
        file: &Path,
        options: &ProcessingOptions,
    ) -> CacheResult<Option<T>> {
        let fp = fingerprint(file, options)?;
        let name = display_name(file);

        let Some(entry) = self.store.get(&fp)? else {
            log::debug!("Cache miss for {}", name);
            return Ok(self.miss());
        };

        let payload_path = Path::new(&entry.result_path);
        if !payload_path.exists() {
            log::warn!("Payload missing for {}, dropping entry", name);
            self.store.remove(&entry)?;
            return Ok(self.miss());
        }

        let now = now_secs();
        if entry.is_expired(now, self.max_age.as_secs_f64()) {
            log::info!(
                "Cache entry expired for {} (age {:.0}s)",
                name,
                entry.age_secs(now)
            );
            self.store.remove(&entry)?;
            return Ok(self.miss());
        }

        let bytes = self.store.read_payload(payload_path)?;
        let payload = match serde_json::from_slice::<T>(&bytes) {
            Ok(payload) => payload,
            Err(e) => {
                log::warn!("Unreadable payload for {} ({}), dropping entry", name, e);
                self.store.remove(&entry)?;
                return Ok(self.miss());
            }
        };

        self.store.touch(&fp, now)?;
        Counters::bump(&self.counters.hits);
        self.counters
            .bytes_saved
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        log::info!(
            "Cache hit for {} (engine: {}, confidence: {:.2})",
            name,
            entry.processing_engine,
            entry.confidence
        );
        Ok(Some(payload))
    }

    /// The live entry stored under `fp`, if any.
    ///
    /// Does not touch the entry, purge anything, or move the counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be queried.
    pub fn peek(&self, fp: &Fingerprint) -> CacheResult<Option<CacheEntry>> {
        let now = now_secs();
        let max_age = self.max_age.as_secs_f64();
        Ok(self.store.get(fp)?.filter(|entry| {
            !entry.is_expired(now, max_age) && Path::new(&entry.result_path).exists()
        }))
    }

    fn miss<T>(&self) -> Option<T> {
        Counters::bump(&self.counters.misses);
        None
    }

    /// Store `result` for `file` under `options`, produced by `engine`.
    ///
    /// Returns `false` (and logs) if the file is missing or anything fails.
    /// Saving the same fingerprint again replaces the earlier entry.
    pub fn save<T: Serialize + PayloadSummary>(
        &self,
        file: &Path,
        result: &T,
        options: &ProcessingOptions,
        engine: &str,
    ) -> bool {
        if !file.exists() {
            log::warn!("Not caching {}: file does not exist", file.display());
            return false;
        }
        match self.save_inner(file, result, options, engine) {
            Ok(fp) => {
                Counters::bump(&self.counters.saves);
                log::debug!("Cached result for {} as {}", display_name(file), fp);
                true
            }
            Err(e) => {
                Counters::bump(&self.counters.errors);
                log::error!("Failed to cache result for {}: {}", file.display(), e);
                false
            }
        }
    }

    fn save_inner<T: Serialize + PayloadSummary>(
        &self,
        file: &Path,
        result: &T,
        options: &ProcessingOptions,
        engine: &str,
    ) -> CacheResult<Fingerprint> {
        let fp = fingerprint(file, options)?;
        let bytes = serde_json::to_vec_pretty(result)?;
        let payload_path = self.store.write_payload(&fp, &bytes)?;

        let metadata = std::fs::metadata(file).map_err(|e| CacheError::Io {
            path: file.to_path_buf(),
            source: e,
        })?;
        let file_mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0.0, |d| d.as_secs_f64());

        let metrics = result.metrics();
        let now = now_secs();
        self.store.upsert(&CacheEntry {
            file_hash: fp.to_string(),
            original_filename: file.to_string_lossy().into_owned(),
            file_size: metadata.len(),
            file_mtime,
            processing_engine: engine.to_string(),
            processing_options: options.to_json(),
            result_path: payload_path.to_string_lossy().into_owned(),
            created_at: now,
            accessed_at: now,
            access_count: 0,
            confidence: metrics.confidence,
            processing_time: metrics.processing_time,
            word_count: metrics.word_count,
            character_count: metrics.character_count,
            success: metrics.success,
        })?;

        Ok(fp)
    }

    /// Remove every entry older than the maximum age, with its payload.
    ///
    /// Returns the number of entries removed; 0 on failure.
    pub fn cleanup_expired(&self) -> usize {
        match self.cleanup_inner() {
            Ok(removed) => {
                if removed > 0 {
                    log::info!("Cache cleanup removed {} expired entries", removed);
                }
                removed
            }
            Err(e) => {
                Counters::bump(&self.counters.errors);
                log::error!("Cache cleanup failed: {}", e);
                0
            }
        }
    }

    fn cleanup_inner(&self) -> CacheResult<usize> {
        let cutoff = now_secs() - self.max_age.as_secs_f64();
        let mut removed = 0;
        for entry in self.store.created_before(cutoff)? {
            if self.store.remove(&entry)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Snapshot of cache contents and lifetime counters.
    ///
    /// Index aggregates fall back to zero if the index cannot be read.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let totals = self.store.totals().unwrap_or_else(|e| {
            Counters::bump(&self.counters.errors);
            log::error!("Failed to read cache statistics: {}", e);
            Default::default()
        });

        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let ratio = |part: u64, whole: u64| {
            if whole == 0 {
                0.0
            } else {
                part as f64 / whole as f64
            }
        };

        CacheStats {
            entry_count: totals.entry_count,
            total_payload_bytes: self.store.payload_bytes(),
            total_source_bytes: totals.total_source_bytes,
            total_accesses: totals.total_accesses,
            hits,
            misses,
            saves: self.counters.saves.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            bytes_saved: self.counters.bytes_saved.load(Ordering::Relaxed),
            hit_rate: ratio(hits, lookups),
            miss_rate: ratio(misses, lookups),
            avg_confidence: totals.avg_confidence,
            avg_processing_time: totals.avg_processing_time,
            success_rate: ratio(totals.successful_entries, totals.entry_count),
        }
    }

    /// Delete every entry and payload and reset the counters.
    pub fn clear(&self) -> bool {
        match self.store.clear() {
            Ok(removed) => {
                self.counters.reset();
                log::info!("Cache cleared ({} entries)", removed);
                true
            }
            Err(e) => {
                Counters::bump(&self.counters.errors);
                log::error!("Failed to clear cache: {}", e);
                false
            }
        }
    }

    /// Up to `limit` entries, most recently accessed first.
    #[must_use]
    pub fn list_entries(&self, limit: usize) -> Vec<CacheEntry> {
        self.store.list(limit).unwrap_or_else(|e| {
            log::error!("Failed to list cache entries: {}", e);
            Vec::new()
        })
    }
}

fn display_name(file: &Path) -> String {
    file.file_name()
        .map_or_else(|| file.to_string_lossy(), |n| n.to_string_lossy())
        .into_owned()
}
