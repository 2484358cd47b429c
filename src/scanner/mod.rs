//! Scanner module for directory traversal and file fingerprinting.
//!
//! This module provides functionality for:
//! - Parallel directory walking using jwalk
//! - Quick (sampled) and full content hashing with BLAKE3
//! - Path-derived search tags
//!
//! # Architecture
//!
//! The scanner is divided into submodules:
//! - [`walker`]: Directory traversal producing [`FileRecord`]s for files and directories
//! - [`hasher`]: BLAKE3 file hashing (streaming, mmap for large files)
//!
//! # Example
//!
//! ```no_run
//! use storamen::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let walker = Walker::new(Path::new("."), WalkerConfig::default());
//! for entry in walker.walk() {
//!     match entry {
//!         Ok(record) => println!("{}: {} bytes", record.path.display(), record.size),
//!         Err(e) => eprintln!("Warning: {}", e),
//!     }
//! }
//! ```

pub mod hasher;
pub mod walker;

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

pub use hasher::{hash_to_hex, hex_to_hash, Hash, Hasher, PREHASH_SIZE};
pub use walker::{rollup_directory_sizes, Walker};

/// One filesystem entry observed during a scan.
///
/// Records are built by the walker with no fingerprints, filled in by the
/// hashing stages, and then frozen behind an `Arc` once a scan publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the scan root
    pub path: PathBuf,
    /// Byte length (recursive total for directories)
    pub size: u64,
    /// Whether this record is a directory
    pub is_directory: bool,
    /// Fingerprint of a bounded content sample
    #[serde(with = "opt_hex")]
    pub quick_hash: Option<Hash>,
    /// Complete content digest, only computed for colliding candidates
    #[serde(with = "opt_hex")]
    pub full_hash: Option<Hash>,
    /// Last modification time (advisory only)
    pub modified_at: DateTime<Utc>,
    /// Path-derived search keywords
    pub tags: BTreeSet<String>,
}

impl FileRecord {
    /// Create a record for a regular file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path relative to the scan root
    /// * `size` - File size in bytes
    /// * `modified_at` - Last modification time
    #[must_use]
    pub fn file(path: PathBuf, size: u64, modified_at: DateTime<Utc>) -> Self {
        let tags = derive_tags(&path);
        Self {
            path,
            size,
            is_directory: false,
            quick_hash: None,
            full_hash: None,
            modified_at,
            tags,
        }
    }

    /// Create a record for a directory. Its size starts at zero and is
    /// filled in by [`rollup_directory_sizes`] once the walk completes.
    #[must_use]
    pub fn directory(path: PathBuf, modified_at: DateTime<Utc>) -> Self {
        let tags = derive_tags(&path);
        Self {
            path,
            size: 0,
            is_directory: true,
            quick_hash: None,
            full_hash: None,
            modified_at,
            tags,
        }
    }

    /// Whether this record is the same content as `other`.
    ///
    /// Only a full hash is proof; a quick hash match alone returns `false`.
    #[must_use]
    pub fn same_content(&self, other: &FileRecord) -> bool {
        self.size == other.size
            && self.is_directory == other.is_directory
            && self.full_hash.is_some()
            && self.full_hash == other.full_hash
    }
}

/// Normalize a tag or query term: trimmed, NFC, lower-cased.
#[must_use]
pub fn normalize_tag(raw: &str) -> String {
    raw.trim().nfc().collect::<String>().to_lowercase()
}

/// Derive search tags from a relative path.
///
/// Every path component is a tag, as are the words of each component
/// (split on spaces, `_`, `-` and `.`) and the file extension.
#[must_use]
pub fn derive_tags(path: &Path) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();

    for component in path.components() {
        let Component::Normal(part) = component else {
            continue;
        };
        let part = normalize_tag(&part.to_string_lossy());
        if part.is_empty() {
            continue;
        }
        for word in part.split([' ', '_', '-', '.']) {
            if !word.is_empty() {
                tags.insert(word.to_string());
            }
        }
        tags.insert(part);
    }

    if let Some(ext) = path.extension() {
        let ext = normalize_tag(&ext.to_string_lossy());
        if !ext.is_empty() {
            tags.insert(ext);
        }
    }

    tags
}

/// Configuration for directory walking.
///
/// Controls filtering, symlink handling, and other walk behavior.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Follow symbolic links during traversal.
    /// Warning: May cause infinite loops with symlink cycles.
    pub follow_symlinks: bool,

    /// Skip hidden files and directories (names starting with `.`).
    pub skip_hidden: bool,

    /// Emit records for directories as well as regular files.
    pub include_directories: bool,

    /// Glob patterns to ignore (gitignore-style).
    /// These are applied in addition to any .gitignore files.
    pub ignore_patterns: Vec<String>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            skip_hidden: false,
            include_directories: true,
            ignore_patterns: Vec::new(),
        }
    }
}

/// Errors that can occur during directory scanning.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// Permission was denied when accessing a file or directory.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// The specified path was not found.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// An I/O error occurred while accessing a file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl ScanError {
    /// Path the error refers to.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::PermissionDenied(p) | Self::NotFound(p) => p,
            Self::Io { path, .. } => path,
        }
    }
}

/// Errors that can occur during file hashing.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Hashing stopped because the scan was abandoned.
    #[error("Hashing interrupted: {0}")]
    Interrupted(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

mod opt_hex {
    use super::{hash_to_hex, hex_to_hash, Hash};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Option<Hash>, s: S) -> Result<S::Ok, S::Error> {
        match hash {
            Some(h) => s.serialize_some(&hash_to_hex(h)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Hash>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            Some(hex) => hex_to_hash(&hex)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom("invalid hash hex")),
            None => Ok(None),
        }
    }
}
