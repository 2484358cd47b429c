//! Engine error taxonomy, caller advisories, and exit codes.
//!
//! [`EngineError`] covers every failure an engine operation can report.
//! `InvalidId` and `DeleteFailed` are per-item results inside batch removals
//! and never abort a batch. `ScanAlreadyRunning` is advisory: callers poll
//! and retry. `ScanAborted` ends only the current pass.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::actions::delete::DeleteError;
use crate::settings::SettingsError;

/// Errors reported by engine operations.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// Unknown or already-removed group/member reference.
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// A scan is already running and is not stale.
    #[error("a scan is already running")]
    ScanAlreadyRunning,

    /// The root directory vanished or became unreadable mid-pass.
    #[error("scan aborted: {0}")]
    ScanAborted(String),

    /// The root directory cannot be scanned at all.
    #[error("root directory is not accessible: {path}: {reason}")]
    RootInaccessible {
        /// Requested root
        path: PathBuf,
        /// Why it cannot be read
        reason: String,
    },

    /// Physical deletion failed; the index was left untouched.
    #[error("delete failed: {0}")]
    DeleteFailed(#[from] DeleteError),

    /// A destructive setting change was attempted without confirmation.
    #[error("changing '{key}' requires confirmation")]
    ConfirmationRequired {
        /// Setting key
        key: String,
    },

    /// The settings store failed.
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl EngineError {
    /// Machine-readable code for transports.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidId(_) => "SM001",
            Self::ScanAlreadyRunning => "SM002",
            Self::ScanAborted(_) => "SM003",
            Self::DeleteFailed(_) => "SM004",
            Self::ConfirmationRequired { .. } => "SM005",
            Self::RootInaccessible { .. } => "SM006",
            Self::Settings(_) => "SM007",
        }
    }

    /// Whether the caller is expected to retry later rather than give up.
    #[must_use]
    pub fn is_advisory(&self) -> bool {
        matches!(self, Self::ScanAlreadyRunning)
    }
}

/// Advisory message returned by `reset_scanner` and `spawn_scan`.
///
/// `None` from those operations means "nothing to report".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    /// A scan is running and its heartbeat is fresh.
    ScanAlreadyRunning,
    /// A running scan stopped sending heartbeats and was abandoned.
    StaleScanReset {
        /// Generation of the abandoned pass
        abandoned_generation: u64,
    },
    /// The requested root cannot be scanned.
    RootInaccessible {
        /// Requested root
        path: PathBuf,
        /// Why it cannot be read
        reason: String,
    },
    /// The scan could not be started at all.
    ScanNotStarted {
        /// Why it failed
        reason: String,
    },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScanAlreadyRunning => write!(f, "A scan is already running, try again later"),
            Self::StaleScanReset {
                abandoned_generation,
            } => write!(
                f,
                "Scan #{} stopped responding and was reset",
                abandoned_generation
            ),
            Self::RootInaccessible { path, reason } => {
                write!(f, "Cannot scan {}: {}", path.display(), reason)
            }
            Self::ScanNotStarted { reason } => write!(f, "Scan could not start: {}", reason),
        }
    }
}

/// Exit codes for the storamen binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: completed and duplicates were found (or nothing to report).
    Success = 0,
    /// General error: an unexpected error occurred.
    GeneralError = 1,
    /// No duplicates: the scan completed without finding duplicates.
    NoDuplicates = 2,
    /// Interrupted by Ctrl+C.
    Interrupted = crate::signal::EXIT_CODE_INTERRUPTED as isize,
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
            Self::Success => "SM000",
            Self::GeneralError => "SM100",
            Self::NoDuplicates => "SM102",
            Self::Interrupted => "SM130",
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "SM001")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Whether the caller should poll and retry
    pub advisory: bool,
}

impl From<&EngineError> for StructuredError {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            advisory: err.is_advisory(),
        }
    }
}

impl StructuredError {
    /// Build a structured error for a top-level binary failure.
    #[must_use]
    pub fn from_anyhow(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        match err.downcast_ref::<EngineError>() {
            Some(engine) => Self::from(engine),
            None => Self {
                code: exit_code.code_prefix().to_string(),
                message: err.to_string(),
                advisory: false,
            },
        }
    }
}
