//! Typed processing options.
//!
//! Options travel with every task. Only a fixed, named subset of them can change
//! what an OCR engine produces; that subset is what [`ProcessingOptions::canonical`]
//! serializes for fingerprinting. Everything in [`ProcessingOptions::extra`] is
//! passed through to the processing function untouched and never affects cache keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version tag of the canonical option encoding.
///
/// Bump this whenever the set of fingerprinted fields or their encoding changes,
/// so that old cache entries stop matching instead of matching incorrectly.
pub const OPTIONS_VERSION: u32 = 2;

/// Processing options for one unit of OCR work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    /// Recognition language (e.g. "en", "por").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Minimum word confidence kept by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f64>,

    /// Engine identifier requested by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,

    /// Preprocessing steps applied before recognition. Order does not matter.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preprocessing: Vec<String>,

    /// Rasterization resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpi: Option<u32>,

    /// Minimum page quality score accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_threshold: Option<f64>,

    /// Free-form options that do not influence recognition output.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ProcessingOptions {
    /// Create empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recognition language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set the confidence threshold.
    #[must_use]
    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }

    /// Set the engine identifier.
    #[must_use]
    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    /// Add a preprocessing step.
    #[must_use]
    pub fn with_preprocessing(mut self, step: impl Into<String>) -> Self {
        self.preprocessing.push(step.into());
        self
    }

    /// Set the rasterization DPI.
    #[must_use]
    pub fn with_dpi(mut self, dpi: u32) -> Self {
        self.dpi = Some(dpi);
        self
    }

    /// Set the quality threshold.
    #[must_use]
    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = Some(threshold);
        self
    }

    /// Attach a pass-through option that is never fingerprinted.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Canonical, order-independent encoding of the fingerprint-relevant fields.
    ///
    /// The fields are written as a JSON object in a fixed order, absent fields
    /// are omitted, and the preprocessing list is a sorted, de-duplicated array.
    /// Values are quoted and escaped, so no field can spill into another. Two
    /// option sets that would make an engine produce the same output encode
    /// identically.
    ///
    /// # Example
    ///
    /// ```
    /// use ocrbatch::fingerprint::ProcessingOptions;
    ///
    /// let a = ProcessingOptions::new().with_preprocessing("deskew").with_preprocessing("denoise");
    /// let b = ProcessingOptions::new().with_preprocessing("denoise").with_preprocessing("deskew");
    /// assert_eq!(a.canonical(), b.canonical());
    /// ```
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut preprocessing: Vec<&str> = self.preprocessing.iter().map(|s| s.trim()).collect();
        preprocessing.sort_unstable();
        preprocessing.dedup();

        let key = CanonicalOptions {
            v: OPTIONS_VERSION,
            language: self.language.as_deref().map(str::trim),
            confidence_threshold: self.confidence_threshold.map(canonical_float),
            engine: self.engine.as_deref().map(str::trim),
            preprocessing,
            dpi: self.dpi,
            quality_threshold: self.quality_threshold.map(canonical_float),
        };

        // strings and integers only, so serialization cannot fail
        serde_json::to_string(&key).unwrap_or_default()
    }

    /// JSON form of the options as stored in the cache index.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Fingerprint-relevant fields in their fixed encoding order.
#[derive(Serialize)]
struct CanonicalOptions<'a> {
    v: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    confidence_threshold: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    engine: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    preprocessing: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dpi: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality_threshold: Option<String>,
}

/// Render a float so that `0.7`, `0.70` and `7e-1` all encode the same way.
fn canonical_float(value: f64) -> String {
    if value == 0.0 {
        // folds -0.0 into 0
        return "0".to_string();
    }
    format!("{}", value)
}
