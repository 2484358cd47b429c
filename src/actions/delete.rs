//! Physical deletion of resolved duplicate paths.
//!
//! # Overview
//!
//! The engine never deletes anything itself. Once a removal request has
//! been validated, the resolved absolute path is handed to a [`Deleter`],
//! and only after it reports success is the index updated.
//!
//! [`FsDeleter`] is the filesystem implementation:
//! - **Permanent** (default): a directory is removed recursively, a file
//!   with a single unlink
//! - **Trash**: moved to the system trash (recoverable)
//! - **Dry run**: nothing is touched, the request is only logged
//!
//! Failures (permission, file in use, already gone) come back as a
//! [`DeleteError`], never swallowed.
//!
//! # Example
//!
//! ```no_run
//! use storamen::actions::delete::{Deleter, DeleteMode, FsDeleter};
//! use std::path::Path;
//!
//! let deleter = FsDeleter::new(DeleteMode::Permanent);
//! match deleter.delete(Path::new("/data/copy.txt")) {
//!     Ok(result) => println!("Deleted: {}", result.path.display()),
//!     Err(e) => eprintln!("Failed: {}", e),
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for deletion operations.
#[derive(Debug, Error)]
pub enum DeleteError {
    /// The path was not found (may have been deleted or moved).
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// Permission denied when attempting to delete.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Trash operation failed.
    #[error("trash operation failed for {path}: {message}")]
    TrashFailed {
        /// Path that could not be trashed
        path: PathBuf,
        /// Message from the trash backend
        message: String,
    },

    /// General I/O error (including a file held open by another process).
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },
}

impl DeleteError {
    /// Get the path associated with this error.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::NotFound(p)
            | Self::PermissionDenied(p)
            | Self::TrashFailed { path: p, .. }
            | Self::Io { path: p, .. } => p,
        }
    }

    fn from_io(path: &Path, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: error,
            },
        }
    }
}

/// Result of a successful deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResult {
    /// Path that was deleted.
    pub path: PathBuf,
    /// Whether the path was a directory.
    pub was_directory: bool,
    /// How the path was deleted.
    pub mode: DeleteMode,
}

/// How resolved paths are physically deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Unlink files, remove directories recursively.
    #[default]
    Permanent,
    /// Move to the system trash.
    Trash,
    /// Log only, touch nothing.
    DryRun,
}

/// Filesystem layer that physically deletes a resolved path.
pub trait Deleter: Send + Sync {
    /// Delete `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DeleteError`] if the path is missing or cannot be removed.
    fn delete(&self, path: &Path) -> Result<DeleteResult, DeleteError>;
}

/// [`Deleter`] backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsDeleter {
    mode: DeleteMode,
}

impl FsDeleter {
    /// Create a deleter with the given mode.
    #[must_use]
    pub fn new(mode: DeleteMode) -> Self {
        Self { mode }
    }

    /// Configured mode.
    #[must_use]
    pub fn mode(&self) -> DeleteMode {
        self.mode
    }
}

impl Deleter for FsDeleter {
    fn delete(&self, path: &Path) -> Result<DeleteResult, DeleteError> {
        match self.mode {
            DeleteMode::Permanent => permanent_delete(path),
            DeleteMode::Trash => delete_to_trash(path),
            DeleteMode::DryRun => {
                let metadata =
                    fs::symlink_metadata(path).map_err(|e| DeleteError::from_io(path, e))?;
                log::info!("Dry run, not deleting: {}", path.display());
                Ok(DeleteResult {
                    path: path.to_path_buf(),
                    was_directory: metadata.is_dir(),
                    mode: DeleteMode::DryRun,
                })
            }
        }
    }
}

/// Permanently delete a path.
///
/// **WARNING**: This operation cannot be undone. Directories are removed
/// with all their content.
///
/// # Errors
///
/// - `NotFound` if the path doesn't exist
/// - `PermissionDenied` if deletion is not allowed
/// - `Io` for anything else (e.g. the file is in use)
pub fn permanent_delete(path: &Path) -> Result<DeleteResult, DeleteError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| DeleteError::from_io(path, e))?;
    let was_directory = metadata.is_dir();

    let removed = if was_directory {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(|e| {
        log::error!("Permanent delete failed for {}: {}", path.display(), e);
        DeleteError::from_io(path, e)
    })?;

    log::info!("Permanently deleted: {}", path.display());
    Ok(DeleteResult {
        path: path.to_path_buf(),
        was_directory,
        mode: DeleteMode::Permanent,
    })
}

/// Move a path to the system trash.
///
/// # Errors
///
/// - `NotFound` if the path doesn't exist
/// - `TrashFailed` if the trash backend refuses
pub fn delete_to_trash(path: &Path) -> Result<DeleteResult, DeleteError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| DeleteError::from_io(path, e))?;

    trash::delete(path).map_err(|e| {
        log::error!("Trash operation failed for {}: {}", path.display(), e);
        DeleteError::TrashFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })?;

    log::info!("Moved to trash: {}", path.display());
    Ok(DeleteResult {
        path: path.to_path_buf(),
        was_directory: metadata.is_dir(),
        mode: DeleteMode::Trash,
    })
}
