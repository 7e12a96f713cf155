//! OCR document payload.
//!
//! [`OcrDocument`] is the result shape produced by recognition engines and the
//! payload the cache summarizes into index metadata.

use serde::{Deserialize, Serialize};

/// Recognized text of a single page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrPage {
    /// 1-based page number.
    pub page_number: u32,
    /// Recognized text.
    #[serde(default)]
    pub text: String,
    /// Mean word confidence for the page, 0-100.
    #[serde(default)]
    pub confidence: f64,
    /// Language the page was recognized in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl OcrPage {
    /// Create a page with the given number, text and confidence.
    #[must_use]
    pub fn new(page_number: u32, text: impl Into<String>, confidence: f64) -> Self {
        Self {
            page_number,
            text: text.into(),
            confidence,
            language: None,
        }
    }

    /// Number of whitespace-separated words on the page.
    #[must_use]
    pub fn word_count(&self) -> u64 {
        self.text.split_whitespace().count() as u64
    }

    /// Number of characters on the page.
    #[must_use]
    pub fn character_count(&self) -> u64 {
        self.text.chars().count() as u64
    }
}

/// Document-level recognition metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub total_pages: u32,
    /// Seconds spent recognizing the document.
    #[serde(default)]
    pub processing_time: f64,
    /// Engine or method that produced the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub average_confidence: f64,
}

/// Full recognition result for one source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrDocument {
    #[serde(default)]
    pub pages: Vec<OcrPage>,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

impl OcrDocument {
    /// Build a successful document from pages, deriving the page count and
    /// average confidence.
    #[must_use]
    pub fn from_pages(pages: Vec<OcrPage>) -> Self {
        let average_confidence = if pages.is_empty() {
            0.0
        } else {
            pages.iter().map(|p| p.confidence).sum::<f64>() / pages.len() as f64
        };
        Self {
            metadata: DocumentMetadata {
                total_pages: pages.len() as u32,
                average_confidence,
                ..DocumentMetadata::default()
            },
            pages,
            success: true,
        }
    }

    /// Set the recognition time in seconds.
    #[must_use]
    pub fn with_processing_time(mut self, seconds: f64) -> Self {
        self.metadata.processing_time = seconds;
        self
    }

    /// Set the method (engine) name.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.metadata.method = Some(method.into());
        self
    }

    /// Set the document language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.metadata.language = Some(language.into());
        self
    }

    /// Concatenated text of all pages, separated by blank lines.
    #[must_use]
    pub fn full_text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
