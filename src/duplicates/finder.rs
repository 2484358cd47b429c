//! Staged duplicate detection pipeline.
//!
//! # Overview
//!
//! Given the records of one walk, the pipeline runs:
//! 1. **Eligibility**: records below `min_size` are never grouped
//! 2. **Quick hash**: sample the first bytes of every eligible file; for
//!    directories, fingerprint the shape of the subtree (names, kinds, sizes)
//! 3. **Quick buckets**: bucket by `(kind, size, quick hash)`, drop singletons
//! 4. **Full hash**: only for members of surviving buckets; a directory's full
//!    hash covers the names and full hashes of everything below it
//! 5. **Full buckets**: bucket by `(kind, size, full hash)`; every bucket with
//!    2+ members is a confirmed duplicate set
//!
//! Files no larger than the quick-hash sample get their full hash during
//! stage 2 for free, since the sample is the whole file.
//!
//! # Example
//!
//! ```no_run
//! use storamen::duplicates::{DuplicateFinder, FinderConfig};
//! use storamen::scanner::{Hasher, Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let root = Path::new(".");
//! let mut records: Vec<_> = Walker::new(root, WalkerConfig::default())
//!     .walk()
//!     .filter_map(Result::ok)
//!     .collect();
//!
//! let finder = DuplicateFinder::new(root, Hasher::new(), FinderConfig::default());
//! let output = finder.run(&mut records);
//! println!("{} duplicate sets", output.duplicate_sets.len());
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use super::groups::{bucket_records, FullKey, GroupingStats, QuickKey};
use crate::progress::ProgressCallback;
use crate::scanner::{FileRecord, Hash, HashError, Hasher};

/// Configuration for the detection pipeline.
#[derive(Clone)]
pub struct FinderConfig {
    /// Number of threads for hashing I/O (limits disk thrashing).
    pub io_threads: usize,
    /// Records smaller than this are never grouped.
    pub min_size: u64,
    /// Optional shutdown flag for abandoning the pipeline.
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Optional progress callback.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for FinderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinderConfig")
            .field("io_threads", &self.io_threads)
            .field("min_size", &self.min_size)
            .field("shutdown_flag", &self.shutdown_flag.is_some())
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            io_threads: 4,
            min_size: 1,
            shutdown_flag: None,
            progress_callback: None,
        }
    }
}

impl FinderConfig {
    /// Set the number of I/O threads.
    #[must_use]
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    /// Set the minimum size for grouping.
    #[must_use]
    pub fn with_min_size(mut self, min_size: u64) -> Self {
        self.min_size = min_size;
        self
    }

    /// Set the shutdown flag.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

/// Statistics about one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Records considered for grouping
    pub eligible: usize,
    /// Records skipped for being below `min_size`
    pub skipped_small: usize,
    /// Files whose quick hash was read from disk
    pub quick_hashed: usize,
    /// Files whose full content was read from disk
    pub full_hashed: usize,
    /// Quick bucketing statistics
    pub quick_buckets: GroupingStats,
    /// Full bucketing statistics
    pub full_buckets: GroupingStats,
    /// Whether the run stopped early on the shutdown flag
    pub interrupted: bool,
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    /// Confirmed duplicate sets as record indices, each in discovery order.
    /// Sets are ordered by their first member.
    pub duplicate_sets: Vec<Vec<usize>>,
    /// Records that could not be read; they must be excluded from results.
    pub failed: BTreeSet<usize>,
    /// Directories with a descendant that could not be listed or read.
    /// They stay searchable but are never grouped.
    pub incomplete: BTreeSet<usize>,
    /// Run statistics
    pub stats: PipelineStats,
}

fn mark_unreadable(records: &[FileRecord], unreadable: &[PathBuf], output: &mut PipelineOutput) {
    if unreadable.is_empty() {
        return;
    }
    let broken: HashSet<&Path> = unreadable.iter().map(PathBuf::as_path).collect();
    let partial: HashSet<&Path> = unreadable
        .iter()
        .flat_map(|p| p.ancestors().skip(1))
        .filter(|p| !p.as_os_str().is_empty())
        .collect();

    for (idx, record) in records.iter().enumerate() {
        if broken.contains(record.path.as_path()) {
            output.failed.insert(idx);
        } else if record.is_directory && partial.contains(record.path.as_path()) {
            output.incomplete.insert(idx);
        }
    }
    log::debug!(
        "{} unreadable paths leave {} directories incomplete",
        unreadable.len(),
        output.incomplete.len()
    );
}

/// Descendants of every directory record, in record order.
#[derive(Debug, Default)]
pub struct SubtreeIndex {
    descendants: HashMap<usize, Vec<usize>>,
}

impl SubtreeIndex {
    /// Build the index from walk records (paths relative to one root).
    #[must_use]
    pub fn build(records: &[FileRecord]) -> Self {
        let dirs: HashMap<&Path, usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_directory)
            .map(|(i, r)| (r.path.as_path(), i))
            .collect();

        let mut descendants: HashMap<usize, Vec<usize>> = HashMap::new();
        for (idx, record) in records.iter().enumerate() {
            for ancestor in record.path.ancestors().skip(1) {
                if let Some(&dir_idx) = dirs.get(ancestor) {
                    descendants.entry(dir_idx).or_default().push(idx);
                }
            }
        }

        Self { descendants }
    }

    /// Descendant record indices of a directory.
    #[must_use]
    pub fn descendants(&self, dir_idx: usize) -> &[usize] {
        self.descendants
            .get(&dir_idx)
            .map_or(&[][..], Vec::as_slice)
    }
}

/// Runs the staged pipeline over the records of one walk.
pub struct DuplicateFinder {
    root: PathBuf,
    hasher: Hasher,
    config: FinderConfig,
    pool: Option<rayon::ThreadPool>,
}

impl DuplicateFinder {
    /// Create a finder for records relative to `root`.
    #[must_use]
    pub fn new(root: &Path, hasher: Hasher, config: FinderConfig) -> Self {
        let mut hasher = hasher;
        if let Some(ref flag) = config.shutdown_flag {
            hasher = hasher.with_shutdown_flag(flag.clone());
        }
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(config.io_threads.max(1))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                log::warn!(
                    "Failed to create I/O thread pool ({}), using global pool with {} threads",
                    e,
                    rayon::current_num_threads()
                );
                None
            }
        };
        Self {
            root: root.to_path_buf(),
            hasher,
            config,
            pool,
        }
    }

    fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match self.pool {
            Some(ref pool) => pool.install(op),
            None => op(),
        }
    }

    /// Run every stage and return the confirmed duplicate sets.
    ///
    /// Hash results are written back into `records`.
    pub fn run(&self, records: &mut [FileRecord]) -> PipelineOutput {
        self.run_excluding(records, &[])
    }

    /// Like [`run`](Self::run), for a walk that could not read the
    /// root-relative paths in `unreadable`.
    ///
    /// Records at those paths are marked failed. Every directory above them
    /// is marked incomplete, since its subtree is only partly known.
    pub fn run_excluding(
        &self,
        records: &mut [FileRecord],
        unreadable: &[PathBuf],
    ) -> PipelineOutput {
        let mut output = PipelineOutput::default();
        mark_unreadable(records, unreadable, &mut output);
        let tree = SubtreeIndex::build(records);

        let eligible: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(i, _)| !output.failed.contains(i) && !output.incomplete.contains(i))
            .filter(|(_, r)| r.size >= self.config.min_size)
            .map(|(i, _)| i)
            .collect();
        output.stats.eligible = eligible.len();
        output.stats.skipped_small = records
            .iter()
            .filter(|r| r.size < self.config.min_size)
            .count();

        self.stage_quick_hash(records, &eligible, &tree, &mut output);
        if self.interrupted(&mut output) {
            return output;
        }

        let (quick_buckets, quick_stats) = bucket_records(
            eligible
                .iter()
                .filter(|idx| !output.failed.contains(idx))
                .filter_map(|&idx| {
                    let r = &records[idx];
                    r.quick_hash.map(|quick_hash| {
                        (
                            idx,
                            QuickKey {
                                is_directory: r.is_directory,
                                size: r.size,
                                quick_hash,
                            },
                        )
                    })
                }),
        );
        log::debug!(
            "Quick buckets: {} records -> {} candidates in {} buckets ({:.1}% eliminated)",
            quick_stats.total_records,
            quick_stats.potential_duplicates,
            quick_stats.duplicate_buckets,
            quick_stats.elimination_rate()
        );
        output.stats.quick_buckets = quick_stats;

        self.stage_full_hash(records, &quick_buckets, &tree, &mut output);
        if self.interrupted(&mut output) {
            return output;
        }

        let (full_buckets, full_stats) = bucket_records(
            quick_buckets
                .values()
                .flatten()
                .filter(|idx| !output.failed.contains(idx))
                .filter_map(|&idx| {
                    let r = &records[idx];
                    r.full_hash.map(|full_hash| {
                        (
                            idx,
                            FullKey {
                                is_directory: r.is_directory,
                                size: r.size,
                                full_hash,
                            },
                        )
                    })
                }),
        );
        log::debug!(
            "Full buckets: {} candidates -> {} duplicate sets",
            full_stats.total_records,
            full_stats.duplicate_buckets
        );
        output.stats.full_buckets = full_stats;

        let mut sets: Vec<Vec<usize>> = full_buckets
            .into_values()
            .map(|mut members| {
                members.sort_unstable();
                members
            })
            .collect();
        sets.sort_by_key(|members| members[0]);
        output.duplicate_sets = sets;

        log::info!(
            "Pipeline complete: {} eligible, {} quick-hashed, {} full-hashed, {} duplicate sets",
            output.stats.eligible,
            output.stats.quick_hashed,
            output.stats.full_hashed,
            output.duplicate_sets.len()
        );
        output
    }

    fn interrupted(&self, output: &mut PipelineOutput) -> bool {
        if self.config.is_shutdown_requested() {
            log::info!("Pipeline interrupted by shutdown signal");
            output.stats.interrupted = true;
            true
        } else {
            false
        }
    }

    /// Stage 2: quick hashes for eligible files and subtree shapes for
    /// eligible directories.
    fn stage_quick_hash(
        &self,
        records: &mut [FileRecord],
        eligible: &[usize],
        tree: &SubtreeIndex,
        output: &mut PipelineOutput,
    ) {
        let files: Vec<usize> = eligible
            .iter()
            .copied()
            .filter(|&i| !records[i].is_directory)
            .collect();

        let results = self.hash_files("quickhash", records, &files, |hasher, path| {
            hasher.prehash(path)
        });

        let sample = self.hasher.prehash_size() as u64;
        for (idx, result) in results {
            match result {
                Ok(hash) => {
                    output.stats.quick_hashed += 1;
                    let record = &mut records[idx];
                    record.quick_hash = Some(hash);
                    if record.size <= sample {
                        record.full_hash = Some(hash);
                    }
                }
                Err(e) => self.record_failure(idx, &e, output),
            }
        }

        let dirs: Vec<usize> = eligible
            .iter()
            .copied()
            .filter(|&i| records[i].is_directory)
            .collect();
        for idx in dirs {
            let shape = subtree_shape_hash(records, idx, tree.descendants(idx));
            records[idx].quick_hash = Some(shape);
        }
    }

    /// Stage 4: full hashes for every member of a surviving quick bucket.
    fn stage_full_hash(
        &self,
        records: &mut [FileRecord],
        candidates: &BTreeMap<QuickKey, Vec<usize>>,
        tree: &SubtreeIndex,
        output: &mut PipelineOutput,
    ) {
        let mut needed: BTreeSet<usize> = BTreeSet::new();
        for &idx in candidates.values().flatten() {
            if records[idx].is_directory {
                needed.extend(
                    tree.descendants(idx)
                        .iter()
                        .copied()
                        .filter(|&d| !records[d].is_directory),
                );
            } else {
                needed.insert(idx);
            }
        }
        let files: Vec<usize> = needed
            .into_iter()
            .filter(|&i| records[i].full_hash.is_none() && !output.failed.contains(&i))
            .collect();

        let results = self.hash_files("fullhash", records, &files, |hasher, path| {
            hasher.full_hash(path)
        });
        for (idx, result) in results {
            match result {
                Ok(hash) => {
                    output.stats.full_hashed += 1;
                    records[idx].full_hash = Some(hash);
                }
                Err(e) => self.record_failure(idx, &e, output),
            }
        }

        for &idx in candidates.values().flatten() {
            if !records[idx].is_directory {
                continue;
            }
            match subtree_content_hash(records, idx, tree.descendants(idx)) {
                Some(hash) => records[idx].full_hash = Some(hash),
                None => log::debug!(
                    "Directory {} has unreadable content, not grouped",
                    records[idx].path.display()
                ),
            }
        }
    }

    /// Hash files in parallel on the I/O pool, reporting progress per file.
    fn hash_files<F>(
        &self,
        phase: &str,
        records: &[FileRecord],
        indices: &[usize],
        op: F,
    ) -> Vec<(usize, Result<Hash, HashError>)>
    where
        F: Fn(&Hasher, &Path) -> Result<Hash, HashError> + Sync,
    {
        if indices.is_empty() {
            return Vec::new();
        }
        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_start(phase, indices.len());
        }
        log::info!("{}: hashing {} files", phase, indices.len());

        let done = AtomicUsize::new(0);
        let results = self.install(|| {
            indices
                .par_iter()
                .map(|&idx| {
                    let record = &records[idx];
                    let path = self.root.join(&record.path);
                    if self.config.is_shutdown_requested() {
                        return (idx, Err(HashError::Interrupted(path)));
                    }
                    let result = op(&self.hasher, &path);
                    let current = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(ref callback) = self.config.progress_callback {
                        callback.on_progress(current, &record.path.to_string_lossy());
                    }
                    (idx, result)
                })
                .collect()
        });

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_end(phase);
        }
        results
    }

    fn record_failure(&self, idx: usize, error: &HashError, output: &mut PipelineOutput) {
        if matches!(error, HashError::Interrupted(_)) {
            return;
        }
        log::warn!("Skipping unreadable entry: {}", error);
        output.failed.insert(idx);
    }
}

/// Path of `child` relative to `dir`, with `/` separators.
fn relative_key(dir: &Path, child: &Path) -> String {
    child
        .strip_prefix(dir)
        .unwrap_or(child)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Fingerprint of a directory's shape: relative names, kinds and sizes of
/// every descendant. Needs no file reads.
fn subtree_shape_hash(records: &[FileRecord], dir_idx: usize, descendants: &[usize]) -> Hash {
    let dir = &records[dir_idx].path;
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"shape");
    for &d in descendants {
        let child = &records[d];
        hasher.update(relative_key(dir, &child.path).as_bytes());
        hasher.update(&[0, u8::from(child.is_directory)]);
        hasher.update(&child.size.to_le_bytes());
    }
    *hasher.finalize().as_bytes()
}

/// Content digest of a directory: relative names and kinds of every
/// descendant plus the full hash of every descendant file. `None` if any
/// descendant file has no full hash.
fn subtree_content_hash(
    records: &[FileRecord],
    dir_idx: usize,
    descendants: &[usize],
) -> Option<Hash> {
    let dir = &records[dir_idx].path;
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"content");
    for &d in descendants {
        let child = &records[d];
        hasher.update(relative_key(dir, &child.path).as_bytes());
        hasher.update(&[0, u8::from(child.is_directory)]);
        if !child.is_directory {
            hasher.update(&child.full_hash?);
        }
    }
    Some(*hasher.finalize().as_bytes())
}
