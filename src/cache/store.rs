//! SQLite-backed result store.
//!
//! The store owns the on-disk layout of a cache root:
//!
//! ```text
//! <root>/cache.db                 index, table `cache_entries`
//! <root>/results/<fp>.json        one payload per fingerprint
//! ```
//!
//! It knows nothing about expiry policy or counters; [`super::CacheManager`]
//! layers those on top.

use super::entry::CacheEntry;
use crate::fingerprint::{Fingerprint, FingerprintError};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// File name of the SQLite index inside the cache root.
pub const DB_FILE_NAME: &str = "cache.db";

/// Directory holding payload files inside the cache root.
pub const RESULTS_DIR_NAME: &str = "results";

const PAYLOAD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache_entries (
        file_hash TEXT PRIMARY KEY,
        original_filename TEXT NOT NULL,
        file_size INTEGER NOT NULL,
        file_mtime REAL NOT NULL,
        processing_engine TEXT NOT NULL,
        processing_options TEXT NOT NULL,
        result_path TEXT NOT NULL,
        created_at REAL NOT NULL,
        accessed_at REAL NOT NULL,
        access_count INTEGER DEFAULT 0,
        confidence REAL,
        processing_time REAL,
        word_count INTEGER,
        character_count INTEGER,
        success BOOLEAN NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_created_at ON cache_entries(created_at);
    CREATE INDEX IF NOT EXISTS idx_accessed_at ON cache_entries(accessed_at);
";

const SELECT_COLUMNS: &str = "file_hash, original_filename, file_size, file_mtime, \
    processing_engine, processing_options, result_path, created_at, accessed_at, \
    access_count, confidence, processing_time, word_count, character_count, success";

/// Errors raised by the cache layers.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// The SQLite index failed.
    #[error("Cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A payload or directory operation failed.
    #[error("Cache I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A payload could not be serialized or parsed.
    #[error("Cache payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// The source file could not be fingerprinted.
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Aggregates computed over the whole index.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IndexTotals {
    pub entry_count: u64,
    pub total_source_bytes: u64,
    pub total_accesses: u64,
    pub avg_confidence: f64,
    pub avg_processing_time: f64,
    pub successful_entries: u64,
}

/// Persistent fingerprint → payload store.
pub struct ResultStore {
    root: PathBuf,
    results_dir: PathBuf,
    conn: Mutex<Connection>,
    temp_seq: AtomicU64,
}

impl std::fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl ResultStore {
    /// Open (or create) a store rooted at `root`.
    ///
    /// Creates the directory layout and schema when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created or the index
    /// cannot be opened.
    pub fn open(root: &Path) -> CacheResult<Self> {
        let results_dir = root.join(RESULTS_DIR_NAME);
        fs::create_dir_all(&results_dir).map_err(|e| CacheError::io(&results_dir, e))?;

        let db_path = root.join(DB_FILE_NAME);
        let conn = Connection::open(&db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // journal_mode returns a row, so it cannot go through execute_batch
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;

        log::debug!("Opened result store at {}", root.display());

        Ok(Self {
            root: root.to_path_buf(),
            results_dir,
            conn: Mutex::new(conn),
            temp_seq: AtomicU64::new(0),
        })
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the SQLite index.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILE_NAME)
    }

    /// Directory holding payload files.
    #[must_use]
    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    /// Where the payload for `fp` lives.
    #[must_use]
    pub fn payload_path(&self, fp: &Fingerprint) -> PathBuf {
        self.results_dir
            .join(format!("{}.{}", fp.as_str(), PAYLOAD_EXTENSION))
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // a panic mid-statement leaves no partial transaction behind
        self.conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Fetch the row for `fp`.
    pub fn get(&self, fp: &Fingerprint) -> CacheResult<Option<CacheEntry>> {
        let sql = format!(
            "SELECT {} FROM cache_entries WHERE file_hash = ?1",
            SELECT_COLUMNS
        );
        let entry = self
            .conn()
            .query_row(&sql, params![fp.as_str()], row_to_entry)
            .optional()?;
        Ok(entry)
    }

    /// Insert or replace a row. The last writer wins.
    pub fn upsert(&self, entry: &CacheEntry) -> CacheResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO cache_entries (
                file_hash, original_filename, file_size, file_mtime,
                processing_engine, processing_options, result_path,
                created_at, accessed_at, access_count,
                confidence, processing_time, word_count, character_count, success
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                entry.file_hash,
                entry.original_filename,
                entry.file_size as i64,
                entry.file_mtime,
                entry.processing_engine,
                entry.processing_options,
                entry.result_path,
                entry.created_at,
                entry.accessed_at,
                entry.access_count as i64,
                entry.confidence,
                entry.processing_time,
                entry.word_count as i64,
                entry.character_count as i64,
                entry.success,
            ],
        )?;
        Ok(())
    }

    /// Record one access of `fp` at `now`.
    pub fn touch(&self, fp: &Fingerprint, now: f64) -> CacheResult<()> {
        self.conn().execute(
            "UPDATE cache_entries SET accessed_at = ?1, access_count = access_count + 1
             WHERE file_hash = ?2",
            params![now, fp.as_str()],
        )?;
        Ok(())
    }

    /// Delete `entry`'s row and its payload file, if any.
    ///
    /// Returns whether a row was removed.
    pub fn remove(&self, entry: &CacheEntry) -> CacheResult<bool> {
        remove_payload(Path::new(&entry.result_path))?;
        let removed = self.conn().execute(
            "DELETE FROM cache_entries WHERE file_hash = ?1",
            params![entry.file_hash],
        )?;
        Ok(removed > 0)
    }

    /// Write `bytes` as the payload of `fp`.
    ///
    /// The bytes go to a uniquely named temp file first and are renamed into
    /// place, so readers never observe a partial payload.
    pub fn write_payload(&self, fp: &Fingerprint, bytes: &[u8]) -> CacheResult<PathBuf> {
        let final_path = self.payload_path(fp);
        let temp_path = self.results_dir.join(format!(
            "{}.{}.{}.{}",
            fp.as_str(),
            std::process::id(),
            self.temp_seq.fetch_add(1, Ordering::Relaxed),
            TEMP_EXTENSION
        ));

        fs::create_dir_all(&self.results_dir).map_err(|e| CacheError::io(&self.results_dir, e))?;
        fs::write(&temp_path, bytes).map_err(|e| CacheError::io(&temp_path, e))?;
        fs::rename(&temp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            CacheError::io(&final_path, e)
        })?;

        Ok(final_path)
    }

    /// Read a payload file.
    pub fn read_payload(&self, path: &Path) -> CacheResult<Vec<u8>> {
        fs::read(path).map_err(|e| CacheError::io(path, e))
    }

    /// Every row created before `cutoff` (seconds since the epoch).
    pub fn created_before(&self, cutoff: f64) -> CacheResult<Vec<CacheEntry>> {
        let sql = format!(
            "SELECT {} FROM cache_entries WHERE created_at < ?1",
            SELECT_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![cutoff], row_to_entry)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Most recently accessed rows first, at most `limit` of them.
    pub fn list(&self, limit: usize) -> CacheResult<Vec<CacheEntry>> {
        let sql = format!(
            "SELECT {} FROM cache_entries ORDER BY accessed_at DESC LIMIT ?1",
            SELECT_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], row_to_entry)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Number of rows in the index.
    pub fn len(&self) -> CacheResult<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Whether the index has no rows.
    pub fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Aggregate columns across every row.
    pub fn totals(&self) -> CacheResult<IndexTotals> {
        let totals = self.conn().query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(file_size), 0),
                    COALESCE(SUM(access_count), 0),
                    COALESCE(AVG(confidence), 0.0),
                    COALESCE(AVG(processing_time), 0.0),
                    COUNT(CASE WHEN success = 1 THEN 1 END)
             FROM cache_entries",
            [],
            |row| {
                Ok(IndexTotals {
                    entry_count: row.get::<_, i64>(0)?.max(0) as u64,
                    total_source_bytes: row.get::<_, i64>(1)?.max(0) as u64,
                    total_accesses: row.get::<_, i64>(2)?.max(0) as u64,
                    avg_confidence: row.get(3)?,
                    avg_processing_time: row.get(4)?,
                    successful_entries: row.get::<_, i64>(5)?.max(0) as u64,
                })
            },
        )?;
        Ok(totals)
    }

    /// Bytes occupied by payload files.
    pub fn payload_bytes(&self) -> u64 {
        self.payload_files()
            .filter_map(|path| fs::metadata(path).ok())
            .filter(fs::Metadata::is_file)
            .map(|meta| meta.len())
            .sum()
    }

    /// Delete every payload file (including stray temp files) and every row.
    ///
    /// Returns the number of rows removed.
    pub fn clear(&self) -> CacheResult<usize> {
        let entries =
            fs::read_dir(&self.results_dir).map_err(|e| CacheError::io(&self.results_dir, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let ours = path
                .extension()
                .is_some_and(|ext| ext == PAYLOAD_EXTENSION || ext == TEMP_EXTENSION);
            if ours {
                remove_payload(&path)?;
            }
        }

        let removed = self.conn().execute("DELETE FROM cache_entries", [])?;
        Ok(removed)
    }

    fn payload_files(&self) -> impl Iterator<Item = PathBuf> {
        fs::read_dir(&self.results_dir)
            .into_iter()
            .flatten()
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == PAYLOAD_EXTENSION))
    }
}

fn remove_payload(path: &Path) -> CacheResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<CacheEntry> {
    Ok(CacheEntry {
        file_hash: row.get(0)?,
        original_filename: row.get(1)?,
        file_size: row.get::<_, i64>(2)?.max(0) as u64,
        file_mtime: row.get(3)?,
        processing_engine: row.get(4)?,
        processing_options: row.get(5)?,
        result_path: row.get(6)?,
        created_at: row.get(7)?,
        accessed_at: row.get(8)?,
        access_count: row.get::<_, Option<i64>>(9)?.unwrap_or(0).max(0) as u64,
        confidence: row.get::<_, Option<f64>>(10)?.unwrap_or(0.0),
        processing_time: row.get::<_, Option<f64>>(11)?.unwrap_or(0.0),
        word_count: row.get::<_, Option<i64>>(12)?.unwrap_or(0).max(0) as u64,
        character_count: row.get::<_, Option<i64>>(13)?.unwrap_or(0).max(0) as u64,
        success: row.get(14)?,
    })
}

/// Current time in seconds since the Unix epoch.
#[must_use]
pub fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
