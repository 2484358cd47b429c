//! Directory walker implementation using jwalk for parallel traversal.
//!
//! # Overview
//!
//! This module provides the [`Walker`] struct for traversing a working
//! directory and producing [`FileRecord`]s for every regular file and
//! directory below it. Paths in the records are relative to the root.
//!
//! # Features
//!
//! - Parallel directory reading via jwalk, children sorted by name so the
//!   output order is deterministic
//! - Gitignore-style pattern matching via the `ignore` crate
//! - Hidden file filtering
//! - Unreadable entries are reported as errors and skipped, never fatal
//! - Graceful shutdown via atomic flag
//!
//! Directory sizes are recursive totals; they are filled in after the walk
//! by [`rollup_directory_sizes`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use jwalk::WalkDir;

use super::{FileRecord, ScanError, WalkerConfig};

/// Directory walker for parallel file discovery.
#[derive(Debug)]
pub struct Walker {
    /// Root path to walk
    root: PathBuf,
    /// Walker configuration
    config: WalkerConfig,
    /// Optional shutdown flag for graceful termination
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Walker {
    /// Create a new walker for the given path.
    ///
    /// # Arguments
    ///
    /// * `path` - Root directory to scan
    /// * `config` - Walker configuration options
    #[must_use]
    pub fn new(path: &Path, config: WalkerConfig) -> Self {
        Self {
            root: path.to_path_buf(),
            config,
            shutdown_flag: None,
        }
    }

    /// Set the shutdown flag for graceful termination.
    ///
    /// When the flag is set to `true`, the walker stops yielding entries.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Root directory being walked.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Build gitignore matcher from config patterns and .gitignore file.
    fn build_gitignore(&self) -> Option<Gitignore> {
        let mut builder = GitignoreBuilder::new(&self.root);

        let gitignore_path = self.root.join(".gitignore");
        if gitignore_path.exists() {
            if let Some(e) = builder.add(&gitignore_path) {
                log::warn!(
                    "Failed to load .gitignore from {}: {}",
                    gitignore_path.display(),
                    e
                );
            } else {
                log::debug!("Loaded .gitignore from {}", gitignore_path.display());
            }
        }

        for pattern in &self.config.ignore_patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                log::warn!("Invalid ignore pattern '{}': {}", pattern, e);
            }
        }

        match builder.build() {
            Ok(gitignore) if gitignore.is_empty() => None,
            Ok(gitignore) => Some(gitignore),
            Err(e) => {
                log::warn!("Failed to build ignore patterns: {}", e);
                None
            }
        }
    }

    /// Check if a relative path is ignored, including through an ignored parent.
    fn should_ignore(relative: &Path, is_dir: bool, gitignore: &Option<Gitignore>) -> bool {
        let Some(gi) = gitignore else {
            return false;
        };
        let path_str = relative.to_string_lossy();
        let normalized = if cfg!(windows) {
            path_str.replace('\\', "/")
        } else {
            path_str.into_owned()
        };
        gi.matched_path_or_any_parents(normalized, is_dir)
            .is_ignore()
    }

    /// Walk the directory tree, yielding file and directory records.
    ///
    /// Errors are yielded as [`ScanError`] values rather than stopping
    /// iteration. An error whose path is the root itself means the root
    /// could not be read at all.
    pub fn walk(&self) -> impl Iterator<Item = Result<FileRecord, ScanError>> + '_ {
        let gitignore = self.build_gitignore();

        let walk_dir = WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .skip_hidden(self.config.skip_hidden)
            .process_read_dir(move |_depth, _path, _read_dir_state, children| {
                // Sort children for deterministic output
                children.sort_by(|a, b| match (a, b) {
                    (Ok(a), Ok(b)) => a.file_name().cmp(b.file_name()),
                    (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                    (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                    (Err(_), Err(_)) => std::cmp::Ordering::Equal,
                });
            });

        walk_dir
            .into_iter()
            .take_while(move |_| {
                if self.is_shutdown_requested() {
                    log::debug!("Walker: Shutdown requested, stopping iteration");
                    return false;
                }
                true
            })
            .filter_map(move |entry_result| match entry_result {
                Ok(mut entry) => {
                    let path = entry.path();
                    // A directory whose listing failed is reported, not recorded
                    if let Some(e) = entry.read_children_error.take() {
                        return Some(Err(Self::handle_jwalk_error(path, e)));
                    }
                    if path == self.root {
                        return None;
                    }
                    let relative = path.strip_prefix(&self.root).ok()?.to_path_buf();

                    let file_type = entry.file_type();
                    if file_type.is_symlink() && !self.config.follow_symlinks {
                        log::trace!("Skipping symlink: {}", path.display());
                        return None;
                    }
                    if Self::should_ignore(&relative, file_type.is_dir(), &gitignore) {
                        log::trace!("Ignoring: {}", path.display());
                        return None;
                    }

                    let metadata = if self.config.follow_symlinks {
                        std::fs::metadata(&path)
                    } else {
                        std::fs::symlink_metadata(&path)
                    };
                    let metadata = match metadata {
                        Ok(m) => m,
                        Err(e) => return Some(Err(Self::handle_io_error(&path, e))),
                    };

                    let modified: DateTime<Utc> = metadata
                        .modified()
                        .unwrap_or(SystemTime::UNIX_EPOCH)
                        .into();

                    if metadata.is_dir() {
                        if !self.config.include_directories {
                            return None;
                        }
                        Some(Ok(FileRecord::directory(relative, modified)))
                    } else if metadata.is_file() {
                        Some(Ok(FileRecord::file(relative, metadata.len(), modified)))
                    } else {
                        None
                    }
                }
                Err(e) => {
                    let path = e
                        .path()
                        .map_or_else(|| self.root.clone(), std::borrow::ToOwned::to_owned);
                    Some(Err(Self::handle_jwalk_error(path, e)))
                }
            })
    }

    /// Handle I/O errors during file access.
    fn handle_io_error(path: &Path, error: std::io::Error) -> ScanError {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::PermissionDenied => {
                log::warn!("Permission denied: {}", path.display());
                ScanError::PermissionDenied(path.to_path_buf())
            }
            ErrorKind::NotFound => {
                log::debug!("File not found (may have been deleted): {}", path.display());
                ScanError::NotFound(path.to_path_buf())
            }
            _ => {
                log::warn!("I/O error for {}: {}", path.display(), error);
                ScanError::Io {
                    path: path.to_path_buf(),
                    source: error,
                }
            }
        }
    }

    /// Handle jwalk errors.
    fn handle_jwalk_error(path: PathBuf, error: jwalk::Error) -> ScanError {
        log::warn!("Walker error for {}: {}", path.display(), error);
        match error.io_error().map(std::io::Error::kind) {
            Some(std::io::ErrorKind::PermissionDenied) => ScanError::PermissionDenied(path),
            Some(std::io::ErrorKind::NotFound) => ScanError::NotFound(path),
            _ => ScanError::Io {
                path,
                source: std::io::Error::other(error.to_string()),
            },
        }
    }
}

/// Fill in recursive sizes for directory records.
///
/// Each file's size is added to every ancestor directory present in
/// `records`. Files whose parent directories were skipped still count
/// toward any ancestor that was kept.
pub fn rollup_directory_sizes(records: &mut [FileRecord]) {
    let dir_index: HashMap<PathBuf, usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_directory)
        .map(|(i, r)| (r.path.clone(), i))
        .collect();

    if dir_index.is_empty() {
        return;
    }

    let mut totals = vec![0u64; records.len()];
    for record in records.iter().filter(|r| !r.is_directory) {
        for ancestor in record.path.ancestors().skip(1) {
            if let Some(&idx) = dir_index.get(ancestor) {
                totals[idx] += record.size;
            }
        }
    }

    for &idx in dir_index.values() {
        records[idx].size = totals[idx];
    }
}
