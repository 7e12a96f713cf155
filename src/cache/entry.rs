//! Cache entry definitions.

use crate::document::OcrDocument;
use serde::{Deserialize, Serialize};

/// One row of the cache index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Fingerprint of the source file and options (primary key).
    pub file_hash: String,
    /// Path of the source file when the entry was saved.
    pub original_filename: String,
    /// Source file size in bytes.
    pub file_size: u64,
    /// Source modification time, seconds since the Unix epoch.
    pub file_mtime: f64,
    /// Engine that produced the payload.
    pub processing_engine: String,
    /// JSON of the options the payload was produced with.
    pub processing_options: String,
    /// Location of the JSON payload file.
    pub result_path: String,
    /// Seconds since the Unix epoch.
    pub created_at: f64,
    /// Seconds since the Unix epoch.
    pub accessed_at: f64,
    pub access_count: u64,
    pub confidence: f64,
    /// Seconds the original recognition took.
    pub processing_time: f64,
    pub word_count: u64,
    pub character_count: u64,
    pub success: bool,
}

impl CacheEntry {
    /// Age of the entry relative to `now` (seconds since the epoch).
    #[must_use]
    pub fn age_secs(&self, now: f64) -> f64 {
        now - self.created_at
    }

    /// Whether the entry is strictly older than `max_age_secs`.
    #[must_use]
    pub fn is_expired(&self, now: f64, max_age_secs: f64) -> bool {
        self.age_secs(now) > max_age_secs
    }

    /// Creation time as a local timestamp, for display.
    #[must_use]
    pub fn created(&self) -> Option<chrono::DateTime<chrono::Local>> {
        epoch_to_local(self.created_at)
    }

    /// Last access time as a local timestamp, for display.
    #[must_use]
    pub fn accessed(&self) -> Option<chrono::DateTime<chrono::Local>> {
        epoch_to_local(self.accessed_at)
    }
}

fn epoch_to_local(secs: f64) -> Option<chrono::DateTime<chrono::Local>> {
    let whole = secs.trunc() as i64;
    let nanos = (secs.fract().abs() * 1e9) as u32;
    chrono::DateTime::<chrono::Utc>::from_timestamp(whole, nanos)
        .map(|dt| dt.with_timezone(&chrono::Local))
}

/// Index metadata derived from a payload at save time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PayloadMetrics {
    pub confidence: f64,
    pub processing_time: f64,
    pub word_count: u64,
    pub character_count: u64,
    pub success: bool,
}

/// A payload the cache can store and summarize.
///
/// The cache writes the payload as JSON and records [`PayloadMetrics`] in the
/// index so statistics can be computed without reading payload files back.
pub trait PayloadSummary {
    /// Summary values recorded alongside the payload.
    fn metrics(&self) -> PayloadMetrics;
}

impl PayloadSummary for OcrDocument {
    fn metrics(&self) -> PayloadMetrics {
        PayloadMetrics {
            confidence: self.metadata.average_confidence,
            processing_time: self.metadata.processing_time,
            word_count: self.pages.iter().map(|p| p.word_count()).sum(),
            character_count: self.pages.iter().map(|p| p.character_count()).sum(),
            success: self.success,
        }
    }
}

/// Reads the same fields as [`OcrDocument`]; missing fields fall back to zero
/// and `success` to `true`.
impl PayloadSummary for serde_json::Value {
    fn metrics(&self) -> PayloadMetrics {
        let metadata = self.get("metadata");
        let float = |key: &str| {
            metadata
                .and_then(|m| m.get(key))
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0)
        };

        let mut word_count = 0u64;
        let mut character_count = 0u64;
        if let Some(pages) = self.get("pages").and_then(serde_json::Value::as_array) {
            for text in pages
                .iter()
                .filter_map(|p| p.get("text").and_then(serde_json::Value::as_str))
            {
                word_count += text.split_whitespace().count() as u64;
                character_count += text.chars().count() as u64;
            }
        }

        PayloadMetrics {
            confidence: float("average_confidence"),
            processing_time: float("processing_time"),
            word_count,
            character_count,
            success: self
                .get("success")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(true),
        }
    }
}

/// Snapshot of cache contents and lifetime counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Rows in the index.
    pub entry_count: u64,
    /// Bytes of payload files on disk.
    pub total_payload_bytes: u64,
    /// Sum of source file sizes of indexed entries.
    pub total_source_bytes: u64,
    /// Sum of access counts.
    pub total_accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub saves: u64,
    pub errors: u64,
    /// Payload bytes served from cache instead of recomputed.
    pub bytes_saved: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub avg_confidence: f64,
    pub avg_processing_time: f64,
    /// Share of indexed entries whose payload reported success.
    pub success_rate: f64,
}
