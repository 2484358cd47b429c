//! The scan engine: orchestration, published results, and the operations
//! callers use.
//!
//! # Concurrency
//!
//! - One background thread runs a scan pass. Spawning while a fresh scan is
//!   running is rejected, never queued ([`JobSlot`]).
//! - Readers load the last published [`Snapshot`] (an `Arc` behind a
//!   short-lived read lock) and never wait for a scan.
//! - A finished pass publishes its snapshot with a single swap under the
//!   writer mutex, after the job slot confirmed its generation is still
//!   current.
//! - Removals are serialized by their own mutex. Deletion runs outside the
//!   writer; each removed member is re-validated against the current
//!   snapshot and published under the writer.
//!
//! Lock order is removal, then writer, then the job slot or the published
//! snapshot. The job slot lock is never held while taking another lock.
//!
//! # Example
//!
//! ```no_run
//! use storamen::config::Config;
//! use storamen::engine::Engine;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! let engine = Engine::in_memory(Config::default());
//! if let Some(advisory) = engine.spawn_scan(Path::new("/data")) {
//!     eprintln!("{}", advisory);
//! }
//! engine.wait_for_idle(Duration::from_secs(60));
//! for group in engine.list_duplicates(0) {
//!     println!("{} x{} ({} bytes)", group.id, group.len(), group.size);
//! }
//! ```

pub mod scheduler;
pub mod state;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::{Duration, Instant};

use bytesize::ByteSize;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use scheduler::Scheduler;
pub use state::{JobReporter, JobSlot, JobTicket, ScanJobState, ScanStatus};

use crate::actions::delete::{Deleter, FsDeleter};
use crate::actions::removal::{
    parse_ids, BatchRemoval, MemberRef, PendingRemoval, RemovalCoordinator, RemovalIndex,
};
use crate::config::Config;
use crate::duplicates::{
    DuplicateFinder, DuplicateIndex, DuplicateListing, FinderConfig, IdSequence, PipelineOutput,
    RemovedMember,
};
use crate::error::{Advisory, EngineError};
use crate::scanner::{rollup_directory_sizes, FileRecord, Hasher, Walker};
use crate::search::{parse_tags, SearchIndex};
use crate::settings::{SettingChange, SettingKey, Settings};

/// Immutable results of one completed scan.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Generation of the scan that produced it (0 before any scan)
    pub generation: u64,
    /// Scanned root
    pub root: Option<PathBuf>,
    /// When the scan finished
    pub finished_at: Option<DateTime<Utc>>,
    /// Duplicate groups
    pub duplicates: Arc<DuplicateIndex>,
    /// Searchable records
    pub search: Arc<SearchIndex>,
}

/// Overview of the published results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Scanned root
    pub root: PathBuf,
    /// Generation of the scan
    pub generation: u64,
    /// When the scan finished
    pub finished_at: Option<DateTime<Utc>>,
    /// Regular files known
    pub files: usize,
    /// Directories known
    pub directories: usize,
    /// Bytes across all files
    pub total_bytes: u64,
    /// Duplicate groups
    pub duplicate_groups: usize,
    /// Bytes freed by keeping one copy per group
    pub reclaimable_bytes: u64,
}

impl fmt::Display for ScanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} files, {} directories, {} total; {} duplicate groups, {} reclaimable",
            self.root.display(),
            self.files,
            self.directories,
            ByteSize(self.total_bytes),
            self.duplicate_groups,
            ByteSize(self.reclaimable_bytes)
        )
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

struct EngineInner {
    config: RwLock<Config>,
    job: Arc<JobSlot>,
    published: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    removal: Mutex<()>,
    ids: IdSequence,
    settings: Settings,
    deleter: Arc<dyn Deleter>,
}

/// Handle to the scan engine. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("job", &self.inner.job.snapshot())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine; persisted settings override `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store cannot be read.
    pub fn new(config: Config, settings: Settings) -> Result<Self, EngineError> {
        let deleter = Arc::new(FsDeleter::new(config.delete_mode));
        Self::with_deleter(config, settings, deleter)
    }

    /// Like [`Engine::new`], deleting through a custom filesystem layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings store cannot be read.
    pub fn with_deleter(
        mut config: Config,
        settings: Settings,
        deleter: Arc<dyn Deleter>,
    ) -> Result<Self, EngineError> {
        settings.apply_to(&mut config)?;
        Ok(Self::build(config, settings, deleter))
    }

    /// Engine with in-memory settings and the configured delete mode.
    #[must_use]
    pub fn in_memory(config: Config) -> Self {
        let deleter = Arc::new(FsDeleter::new(config.delete_mode));
        Self::build(config, Settings::in_memory(), deleter)
    }

    fn build(config: Config, settings: Settings, deleter: Arc<dyn Deleter>) -> Self {
        let job = Arc::new(JobSlot::new(Duration::from_secs(config.stale_after_secs)));
        Self {
            inner: Arc::new(EngineInner {
                config: RwLock::new(config),
                job,
                published: RwLock::new(Arc::new(Snapshot::default())),
                writer: Mutex::new(()),
                removal: Mutex::new(()),
                ids: IdSequence::new(),
                settings,
                deleter,
            }),
        }
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        read(&self.inner.config).clone()
    }

    /// Last published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&read(&self.inner.published))
    }

    /// Reset a stale scan.
    ///
    /// Returns a warning if a stale scan was abandoned, a notice if a healthy
    /// scan is running, and `None` otherwise.
    pub fn reset_scanner(&self) -> Option<Advisory> {
        self.inner.job.reset_if_stale()
    }

    /// Start a background scan of `work_dir`.
    ///
    /// Returns `None` when the scan started cleanly, otherwise an advisory
    /// (already running, inaccessible root, or a stale scan that was replaced).
    pub fn spawn_scan(&self, work_dir: &Path) -> Option<Advisory> {
        match self.try_spawn_scan(work_dir) {
            Ok(ticket) => ticket.superseded().map(|abandoned_generation| {
                Advisory::StaleScanReset {
                    abandoned_generation,
                }
            }),
            Err(EngineError::ScanAlreadyRunning) => Some(Advisory::ScanAlreadyRunning),
            Err(EngineError::RootInaccessible { path, reason }) => {
                Some(Advisory::RootInaccessible { path, reason })
            }
            Err(e) => Some(Advisory::ScanNotStarted {
                reason: e.to_string(),
            }),
        }
    }

    /// Start a background scan, returning the ticket of the new pass.
    ///
    /// # Errors
    ///
    /// `RootInaccessible` if `work_dir` cannot be listed,
    /// `ScanAlreadyRunning` if a fresh scan holds the slot, `ScanAborted`
    /// if the scan thread cannot be created.
    pub fn try_spawn_scan(&self, work_dir: &Path) -> Result<JobTicket, EngineError> {
        let root = work_dir.to_path_buf();
        if let Err(e) = std::fs::read_dir(&root) {
            return Err(EngineError::RootInaccessible {
                path: root,
                reason: e.to_string(),
            });
        }

        let ticket = self.inner.job.try_begin(&root)?;
        let engine = self.clone();
        let pass = ticket.clone();
        let spawned = thread::Builder::new()
            .name(format!("storamen-scan-{}", ticket.generation()))
            .spawn(move || engine.run_pass(&root, &pass));

        if let Err(e) = spawned {
            let reason = format!("cannot start scan thread: {}", e);
            self.inner.job.abort(&ticket, &reason);
            return Err(EngineError::ScanAborted(reason));
        }
        Ok(ticket)
    }

    /// Current scan progress.
    #[must_use]
    pub fn progress(&self) -> ScanJobState {
        self.inner.job.snapshot()
    }

    /// Poll until no scan is running or `timeout` elapses; returns the last
    /// observed state.
    pub fn wait_for_idle(&self, timeout: Duration) -> ScanJobState {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.progress();
            if state.status != ScanStatus::Running || Instant::now() >= deadline {
                return state;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// One scan pass. Runs on the scan thread.
    fn run_pass(&self, root: &Path, ticket: &JobTicket) {
        let config = self.config();
        let job = &self.inner.job;
        let batch = config.heartbeat_batch.max(1) as u64;
        let estimate = self.snapshot().search.len() as u64;

        let walker =
            Walker::new(root, config.walker_config()).with_shutdown_flag(ticket.cancel_flag());
        let mut records: Vec<FileRecord> = Vec::with_capacity(estimate as usize);
        let mut unreadable: Vec<PathBuf> = Vec::new();
        let mut visited: u64 = 0;
        for entry in walker.walk() {
            visited += 1;
            match entry {
                Ok(record) => records.push(record),
                Err(e) if e.path() == root => {
                    job.abort(ticket, &format!("root directory is no longer readable: {}", e));
                    return;
                }
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {}", e);
                    if let Ok(relative) = e.path().strip_prefix(root) {
                        unreadable.push(relative.to_path_buf());
                    }
                }
            }
            if visited % batch == 0 {
                let current = records.last().map(|r| r.path.as_path());
                if !job.heartbeat(ticket, visited, estimate.max(visited), current) {
                    log::debug!("Scan #{} superseded during walk", ticket.generation());
                    return;
                }
            }
        }
        if ticket.is_cancelled() || !self.root_still_present(root, ticket) {
            return;
        }
        job.heartbeat(ticket, visited, visited, None);
        log::info!("Walk complete: {} entries under {}", visited, root.display());

        rollup_directory_sizes(&mut records);
        let reporter = Arc::new(JobReporter::new(
            Arc::clone(job),
            ticket.clone(),
            config.heartbeat_batch,
            visited,
        ));
        let finder_config = FinderConfig::default()
            .with_io_threads(config.io_threads)
            .with_min_size(config.min_size)
            .with_shutdown_flag(ticket.cancel_flag())
            .with_progress_callback(reporter);
        let hasher = Hasher::new().with_prehash_size(config.quick_hash_size);
        let output = DuplicateFinder::new(root, hasher, finder_config)
            .run_excluding(&mut records, &unreadable);

        if output.stats.interrupted || ticket.is_cancelled() {
            log::info!("Scan #{} abandoned before publication", ticket.generation());
            return;
        }
        if !self.root_still_present(root, ticket) {
            return;
        }

        let snapshot = self.build_snapshot(root, ticket.generation(), records, &output);
        let groups = snapshot.duplicates.len();
        if self.publish(ticket, snapshot) {
            log::info!("Published {} duplicate groups", groups);
        }
    }

    /// Swap in the results of the pass holding `ticket`, then mark it
    /// finished. A superseded pass publishes nothing.
    fn publish(&self, ticket: &JobTicket, snapshot: Snapshot) -> bool {
        let _writer = lock(&self.inner.writer);
        if !self.inner.job.is_current(ticket) {
            log::info!(
                "Discarding results of superseded scan #{}",
                ticket.generation()
            );
            return false;
        }
        *write(&self.inner.published) = Arc::new(snapshot);
        self.inner.job.finish(ticket)
    }

    fn root_still_present(&self, root: &Path, ticket: &JobTicket) -> bool {
        if root.is_dir() {
            return true;
        }
        self.inner
            .job
            .abort(ticket, &format!("root directory disappeared: {}", root.display()));
        false
    }

    fn build_snapshot(
        &self,
        root: &Path,
        generation: u64,
        records: Vec<FileRecord>,
        output: &PipelineOutput,
    ) -> Snapshot {
        let records: Vec<Arc<FileRecord>> = records.into_iter().map(Arc::new).collect();
        let duplicates = DuplicateIndex::build(&records, &output.duplicate_sets, &self.inner.ids);
        let searchable = records
            .iter()
            .enumerate()
            .filter(|(idx, _)| !output.failed.contains(idx))
            .map(|(_, record)| Arc::clone(record))
            .collect();

        Snapshot {
            generation,
            root: Some(root.to_path_buf()),
            finished_at: Some(Utc::now()),
            duplicates: Arc::new(duplicates),
            search: Arc::new(SearchIndex::build(searchable)),
        }
    }

    /// Search the published records by tag (page is zero-indexed).
    #[must_use]
    pub fn search<S: AsRef<str>>(&self, tags: &[S], page: usize) -> Vec<Arc<FileRecord>> {
        let (page_size, mode) = {
            let config = read(&self.inner.config);
            (config.page_size, config.tag_match)
        };
        self.snapshot().search.search(tags, page, page_size, mode)
    }

    /// Search with a raw comma or whitespace separated query.
    #[must_use]
    pub fn search_query(&self, raw: &str, page: usize) -> Vec<Arc<FileRecord>> {
        self.search(&parse_tags(raw), page)
    }

    /// Duplicate groups with member size at least `min_size`, largest first.
    #[must_use]
    pub fn list_duplicates(&self, min_size: u64) -> DuplicateListing {
        self.snapshot().duplicates.list(min_size)
    }

    /// Overview of the published results; `None` before the first scan.
    #[must_use]
    pub fn summary(&self) -> Option<ScanSummary> {
        let snapshot = self.snapshot();
        let root = snapshot.root.clone()?;
        let records = snapshot.search.records();
        let (directories, files): (Vec<_>, Vec<_>) = records.iter().partition(|r| r.is_directory);

        Some(ScanSummary {
            root,
            generation: snapshot.generation,
            finished_at: snapshot.finished_at,
            files: files.len(),
            directories: directories.len(),
            total_bytes: files.iter().map(|r| r.size).sum(),
            duplicate_groups: snapshot.duplicates.len(),
            reclaimable_bytes: snapshot.duplicates.reclaimable(),
        })
    }

    fn begin_removal(&self) -> RemovalTxn<'_> {
        RemovalTxn {
            _serial: lock(&self.inner.removal),
            engine: &self.inner,
        }
    }

    /// Resolve a member to its filesystem path without changing anything.
    ///
    /// # Errors
    ///
    /// `InvalidId` for unknown or unlinked ids.
    pub fn resolve_removal(&self, target: MemberRef) -> Result<PendingRemoval, EngineError> {
        resolve_in(&self.snapshot(), target)
    }

    /// Drop a member whose path the caller has already deleted.
    ///
    /// # Errors
    ///
    /// `InvalidId` if the member is gone or now resolves elsewhere (a newer
    /// scan was published in between).
    pub fn confirm_removal(&self, pending: &PendingRemoval) -> Result<RemovedMember, EngineError> {
        self.begin_removal().confirm(pending)
    }

    /// Resolve, delete through the configured filesystem layer, then drop the
    /// member from the index. Returns the deleted path.
    ///
    /// # Errors
    ///
    /// `InvalidId` for unknown ids, `DeleteFailed` if deletion fails (the
    /// index is then unchanged).
    pub fn remove_duplicate_member(&self, target: MemberRef) -> Result<PathBuf, EngineError> {
        let mut txn = self.begin_removal();
        let pending = txn.resolve(target)?;
        RemovalCoordinator::new(self.inner.deleter.as_ref()).remove_one(&mut txn, target)?;
        Ok(pending.absolute_path)
    }

    /// Remove every id in `ids` independently.
    pub fn remove_batch<S: AsRef<str>>(&self, ids: &[S]) -> BatchRemoval {
        let mut txn = self.begin_removal();
        RemovalCoordinator::new(self.inner.deleter.as_ref()).remove_batch(&mut txn, ids)
    }

    /// Remove a comma or whitespace separated list of ids.
    pub fn remove_ids(&self, raw: &str) -> BatchRemoval {
        self.remove_batch(&parse_ids(raw))
    }

    /// Read a persisted setting.
    ///
    /// # Errors
    ///
    /// Unknown keys and store failures.
    pub fn get_setting(&self, key: &str) -> Result<Option<String>, EngineError> {
        self.inner.settings.get(key)
    }

    /// The persisted working directory.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn work_dir(&self) -> Result<Option<PathBuf>, EngineError> {
        self.inner.settings.work_dir()
    }

    /// Write a persisted setting.
    ///
    /// A confirmed change of `work_dir` discards the published results and
    /// cancels a running scan.
    ///
    /// # Errors
    ///
    /// `ConfirmationRequired` for an unconfirmed `work_dir` change, and
    /// `Settings` for unknown keys, invalid values and store failures.
    pub fn set_setting(
        &self,
        key: &str,
        value: &str,
        confirm: bool,
    ) -> Result<SettingChange, EngineError> {
        let change = self.inner.settings.set(key, value, confirm)?;
        if !change.changed() {
            return Ok(change);
        }

        match change.key {
            SettingKey::WorkDir if change.previous.is_some() => self.invalidate(),
            SettingKey::WorkDir => {}
            SettingKey::QuickHashSize => {
                if let Ok(size) = change.value.parse() {
                    write(&self.inner.config).quick_hash_size = size;
                }
            }
            SettingKey::ScanInterval => {
                if let Ok(secs) = change.value.parse() {
                    write(&self.inner.config).scan_interval_secs = secs;
                }
            }
        }
        Ok(change)
    }

    fn invalidate(&self) {
        self.inner.job.invalidate();
        let _writer = lock(&self.inner.writer);
        *write(&self.inner.published) = Arc::new(Snapshot::default());
        log::info!("Working directory changed, previous results discarded");
    }
}

fn resolve_in(snapshot: &Snapshot, target: MemberRef) -> Result<PendingRemoval, EngineError> {
    let root = snapshot
        .root
        .as_deref()
        .ok_or_else(|| EngineError::InvalidId(target.to_string()))?;
    let resolved = snapshot.duplicates.resolve(target.group(), target.member())?;
    Ok(PendingRemoval {
        group_id: resolved.group_id,
        member_id: resolved.member_id,
        absolute_path: root.join(&resolved.record.path),
        path: resolved.record.path.clone(),
        is_directory: resolved.record.is_directory,
    })
}

/// Serializes removals. The writer lock is only taken to publish each
/// confirmed member, never across a deletion.
struct RemovalTxn<'a> {
    _serial: MutexGuard<'a, ()>,
    engine: &'a EngineInner,
}

impl RemovalIndex for RemovalTxn<'_> {
    fn resolve(&self, target: MemberRef) -> Result<PendingRemoval, EngineError> {
        let snapshot = Arc::clone(&read(&self.engine.published));
        resolve_in(&snapshot, target)
    }

    fn confirm(&mut self, pending: &PendingRemoval) -> Result<RemovedMember, EngineError> {
        let _writer = lock(&self.engine.writer);
        let snapshot = Arc::clone(&read(&self.engine.published));

        // A scan published or results were discarded since resolving
        let current = resolve_in(
            &snapshot,
            MemberRef::Member {
                group: pending.group_id,
                member: pending.member_id,
            },
        )?;
        if current.absolute_path != pending.absolute_path {
            return Err(EngineError::InvalidId(format!(
                "{}/{}",
                pending.group_id, pending.member_id
            )));
        }

        let mut duplicates = (*snapshot.duplicates).clone();
        let removed = duplicates.remove_member(pending.group_id, pending.member_id)?;
        let search = snapshot
            .search
            .without_paths(std::slice::from_ref(&removed.record.path));

        *write(&self.engine.published) = Arc::new(Snapshot {
            duplicates: Arc::new(duplicates),
            search: Arc::new(search),
            ..(*snapshot).clone()
        });
        Ok(removed)
    }
}
