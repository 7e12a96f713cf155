//! Structured error handling and exit codes.

use serde::Serialize;

use crate::processor::ProcessingStats;

/// Process exit codes.
///
/// - 0: Success
/// - 1: General error (unexpected failure)
/// - 3: Partial success (some tasks failed)
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Everything completed.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// The batch completed but some tasks failed.
    PartialSuccess = 3,
    /// The batch was interrupted by the user.
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "OB000",
            Self::GeneralError => "OB001",
            Self::PartialSuccess => "OB003",
            Self::Interrupted => "OB130",
        }
    }

    /// Exit code for a finished batch.
    #[must_use]
    pub fn from_batch(stats: &ProcessingStats, interrupted: bool) -> Self {
        if interrupted {
            Self::Interrupted
        } else if stats.failed_tasks > 0 {
            Self::PartialSuccess
        } else {
            Self::Success
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        // every variant fits in a u8
        std::process::ExitCode::from(code.as_i32() as u8)
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "OB001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message, including its causes
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{:#}", err),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
