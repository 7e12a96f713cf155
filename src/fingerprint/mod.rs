//! File fingerprinting for the result cache.
//!
//! A fingerprint identifies one unit of OCR work: the bytes of the source file,
//! its size and modification time, and the options that influence recognition.
//! It is the primary key of the cache index and the file name of the stored payload.
//!
//! # Algorithm
//!
//! 1. Stream the file through BLAKE3 in 64 KiB chunks (content digest).
//! 2. Feed a second BLAKE3 hasher with a version tag, the content digest, the file
//!    size, the modification time in nanoseconds and [`ProcessingOptions::canonical`].
//! 3. Render the second digest as 64 lowercase hex characters.
//!
//! # Example
//!
//! ```no_run
//! use ocrbatch::fingerprint::{fingerprint, ProcessingOptions};
//! use std::path::Path;
//!
//! let options = ProcessingOptions::new().with_language("en");
//! let fp = fingerprint(Path::new("scan.pdf"), &options).unwrap();
//! println!("{}", fp);
//! ```

pub mod options;

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

pub use options::{ProcessingOptions, OPTIONS_VERSION};

/// Read buffer size for content hashing.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Length of a rendered fingerprint.
pub const FINGERPRINT_LEN: usize = 64;

const DOMAIN_TAG: &[u8] = b"ocrbatch.fingerprint.v1";

/// Deterministic identity of a file plus its relevant processing options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an existing hex string, e.g. one read back from the cache index.
    ///
    /// Returns `None` unless the string is exactly 64 lowercase hex characters.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = hex.len() == FINGERPRINT_LEN
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(hex.to_string()))
    }

    /// The fingerprint as a hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur while fingerprinting a file.
#[derive(thiserror::Error, Debug)]
pub enum FingerprintError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl FingerprintError {
    fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }
}

/// Compute the fingerprint of `path` under `options`.
///
/// The file is opened and read exactly once. Nothing else is touched.
///
/// # Errors
///
/// Returns [`FingerprintError`] if the file cannot be opened, stat'ed or read.
pub fn fingerprint(path: &Path, options: &ProcessingOptions) -> Result<Fingerprint, FingerprintError> {
    let mut file = File::open(path).map_err(|e| FingerprintError::from_io(path, e))?;
    let metadata = file
        .metadata()
        .map_err(|e| FingerprintError::from_io(path, e))?;

    let content = content_digest(&mut file).map_err(|e| FingerprintError::from_io(path, e))?;

    let mtime_nanos = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0u128, |d| d.as_nanos());

    let mut hasher = blake3::Hasher::new();
    hasher.update(DOMAIN_TAG);
    hasher.update(content.as_bytes());
    hasher.update(&metadata.len().to_le_bytes());
    hasher.update(&mtime_nanos.to_le_bytes());
    hasher.update(options.canonical().as_bytes());

    let fp = Fingerprint(hasher.finalize().to_hex().to_string());
    log::trace!("Fingerprint {} for {}", fp, path.display());
    Ok(fp)
}

/// BLAKE3 digest of everything readable from `reader`, in [`CHUNK_SIZE`] chunks.
fn content_digest<R: Read>(reader: &mut R) -> io::Result<blake3::Hash> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(hasher.finalize())
}
