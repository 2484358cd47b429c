//! BLAKE3 file hasher with streaming support.
//!
//! # Overview
//!
//! This module provides the [`Hasher`] struct for computing BLAKE3 hashes
//! of file contents. Two fingerprints are produced:
//!
//! - **Quick hash** ([`Hasher::prehash`]): digest of the first
//!   `prehash_size` bytes. Cheap, only a collision hint.
//! - **Full hash** ([`Hasher::full_hash`]): digest of the complete content.
//!   Authoritative for equality.
//!
//! For a file no larger than the sample the two digests are identical,
//! because the sample *is* the whole content.
//!
//! File handles are opened per call and dropped on every return path.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::HashError;

/// A BLAKE3 digest.
pub type Hash = [u8; 32];

/// Default number of bytes sampled for the quick hash.
pub const PREHASH_SIZE: usize = 4096;

/// Read buffer for streaming hashes.
const BUFFER_SIZE: usize = 64 * 1024;

/// Files at least this large are hashed through a memory map with rayon.
const MMAP_THRESHOLD: u64 = 16 * 1024 * 1024;

/// BLAKE3 hasher for quick and full file fingerprints.
#[derive(Debug, Clone)]
pub struct Hasher {
    prehash_size: usize,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher {
    /// Create a hasher sampling [`PREHASH_SIZE`] bytes for quick hashes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            prehash_size: PREHASH_SIZE,
            shutdown_flag: None,
        }
    }

    /// Set the quick-hash sample size in bytes.
    #[must_use]
    pub fn with_prehash_size(mut self, size: usize) -> Self {
        self.prehash_size = size.max(1);
        self
    }

    /// Set the shutdown flag. Streaming hashes check it between buffers.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Quick-hash sample size in bytes.
    #[must_use]
    pub fn prehash_size(&self) -> usize {
        self.prehash_size
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Hash the first `prehash_size` bytes of a file.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the file cannot be opened or read.
    pub fn prehash(&self, path: &Path) -> Result<Hash, HashError> {
        let file = File::open(path).map_err(|e| map_io_error(path, e))?;
        let mut limited = file.take(self.prehash_size as u64);
        let mut buffer = Vec::with_capacity(self.prehash_size.min(BUFFER_SIZE));
        limited
            .read_to_end(&mut buffer)
            .map_err(|e| map_io_error(path, e))?;

        Ok(*blake3::hash(&buffer).as_bytes())
    }

    /// Hash the complete content of a file.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the file cannot be read, or
    /// [`HashError::Interrupted`] if the shutdown flag is raised mid-file.
    pub fn full_hash(&self, path: &Path) -> Result<Hash, HashError> {
        let len = std::fs::metadata(path)
            .map_err(|e| map_io_error(path, e))?
            .len();

        let mut hasher = blake3::Hasher::new();
        if len >= MMAP_THRESHOLD {
            hasher
                .update_mmap_rayon(path)
                .map_err(|e| map_io_error(path, e))?;
            return Ok(*hasher.finalize().as_bytes());
        }

        let mut file = File::open(path).map_err(|e| map_io_error(path, e))?;
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            if self.is_shutdown_requested() {
                return Err(HashError::Interrupted(path.to_path_buf()));
            }
            let n = match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_io_error(path, e)),
            };
            hasher.update(&buffer[..n]);
        }

        Ok(*hasher.finalize().as_bytes())
    }
}

fn map_io_error(path: &Path, error: io::Error) -> HashError {
    match error.kind() {
        io::ErrorKind::NotFound => HashError::NotFound(path.to_path_buf()),
        io::ErrorKind::PermissionDenied => HashError::PermissionDenied(path.to_path_buf()),
        _ => HashError::Io {
            path: path.to_path_buf(),
            source: error,
        },
    }
}

/// Encode a hash as lowercase hex.
#[must_use]
pub fn hash_to_hex(hash: &Hash) -> String {
    blake3::Hash::from(*hash).to_hex().to_string()
}

/// Decode a 64-character hex string into a hash.
#[must_use]
pub fn hex_to_hash(hex: &str) -> Option<Hash> {
    blake3::Hash::from_hex(hex).ok().map(|h| *h.as_bytes())
}
