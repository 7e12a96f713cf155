//! Cache-aware processing functions.

use super::{Processed, TaskContext, TaskError};
use crate::cache::{CacheError, CacheManager, PayloadSummary};
use crate::fingerprint::ProcessingOptions;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Wrap `inner` so it consults `cache` first and populates it afterwards.
///
/// - A cache hit returns [`Processed::cached`] without calling `inner`.
/// - A file that cannot be fingerprinted fails the task with [`TaskError::Fatal`].
/// - Other cache errors are treated as a miss.
/// - On a miss `inner` runs; a fresh success is saved under `engine` before it
///   is returned. A payload `inner` itself reports as cached is not saved again.
///
/// # Example
///
/// ```no_run
/// use ocrbatch::cache::CacheManager;
/// use ocrbatch::document::{OcrDocument, OcrPage};
/// use ocrbatch::processor::{with_cache, ParallelProcessor, Processed};
/// use std::path::Path;
/// use std::sync::Arc;
///
/// let cache = Arc::new(CacheManager::open(Path::new("/tmp/ocr-cache"), 30).unwrap());
/// let process = with_cache(cache, "tesseract", |path, _options, _ctx| {
///     let text = format!("text of {}", path.display());
///     Ok(Processed::fresh(OcrDocument::from_pages(vec![OcrPage::new(1, text, 90.0)])))
/// });
///
/// let processor = ParallelProcessor::default();
/// let results = processor.process_batch(process, 3).unwrap();
/// ```
pub fn with_cache<T, F>(
    cache: Arc<CacheManager>,
    engine: impl Into<String>,
    inner: F,
) -> impl Fn(&Path, &ProcessingOptions, &TaskContext) -> Result<Processed<T>, TaskError>
       + Send
       + Sync
       + 'static
where
    T: Serialize + DeserializeOwned + PayloadSummary + Send + 'static,
    F: Fn(&Path, &ProcessingOptions, &TaskContext) -> Result<Processed<T>, TaskError>
        + Send
        + Sync
        + 'static,
{
    let engine = engine.into();
    move |path: &Path, options: &ProcessingOptions, ctx: &TaskContext| {
        match cache.try_lookup::<T>(path, options) {
            Ok(Some(payload)) => return Ok(Processed::cached(payload)),
            Ok(None) => {}
            Err(CacheError::Fingerprint(e)) => return Err(TaskError::Fatal(e.to_string())),
            Err(e) => log::warn!("Cache unavailable for {}: {}", path.display(), e),
        }

        let processed = inner(path, options, ctx)?;
        if !processed.from_cache {
            cache.save(path, &processed.payload, options, &engine);
        }
        Ok(processed)
    }
}
