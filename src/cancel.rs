//! Cooperative cancellation.
//!
//! A [`CancellationToken`] wraps an `AtomicBool` shared by every clone. The
//! parallel processor checks it before each task, between retries and while
//! sleeping through a backoff; processing functions see it through their
//! `TaskContext` and may poll it as well.
//!
//! # Usage
//!
//! ```rust,no_run
//! use ocrbatch::cancel::install_ctrlc_handler;
//!
//! let token = install_ctrlc_handler().expect("Failed to install signal handler");
//!
//! // Pass `token.clone()` to the processor; Ctrl+C flips it.
//! if token.is_cancelled() {
//!     println!("Interrupted");
//! }
//! ```
//!
//! When Ctrl+C is pressed the token is cancelled, "Interrupted. Finishing
//! in-flight tasks..." is printed to stderr, and the CLI exits with code 130.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

/// Exit code for SIGINT (Ctrl+C) interruption.
/// This follows Unix convention: 128 + signal number (SIGINT = 2).
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Longest uninterrupted slice of a cancellable sleep.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Shared cancellation flag.
///
/// Cloning is cheap and every clone observes the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be used for another batch.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// The underlying flag, for code that only speaks `Arc<AtomicBool>`.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if the full duration elapsed and `false` if the sleep
    /// was cut short by cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Error type for signal handler installation.
#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    /// Failed to install the Ctrl+C handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_TOKEN: OnceLock<CancellationToken> = OnceLock::new();

/// Link Ctrl+C to a process-wide [`CancellationToken`].
///
/// The first call registers the signal hook. Later calls (or calls made after
/// another component already registered a hook) return the same token with its
/// flag reset, so tests that run the app repeatedly do not fail.
///
/// # Errors
///
/// Currently always succeeds; an already-registered hook falls back to an
/// unhooked token that can still be cancelled manually.
pub fn install_ctrlc_handler() -> Result<CancellationToken, CancelError> {
    if let Some(token) = GLOBAL_TOKEN.get() {
        token.reset();
        return Ok(token.clone());
    }

    let token = CancellationToken::new();
    let hooked = token.clone();

    match ctrlc::set_handler(move || {
        hooked.cancel();

        let _ = writeln!(
            std::io::stderr(),
            "\nInterrupted. Finishing in-flight tasks..."
        );
        let _ = std::io::stderr().flush();

        log::info!("Cancellation requested by signal");
    }) {
        Ok(()) => {
            let _ = GLOBAL_TOKEN.set(token.clone());
            Ok(token)
        }
        Err(err) => {
            if let Some(existing) = GLOBAL_TOKEN.get() {
                existing.reset();
                return Ok(existing.clone());
            }
            log::debug!("Ctrl+C handler already registered ({}), using unhooked token", err);
            let fallback = CancellationToken::new();
            let _ = GLOBAL_TOKEN.set(fallback.clone());
            Ok(fallback)
        }
    }
}
