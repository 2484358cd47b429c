//! Scan job state and single-flight control.
//!
//! There is one [`JobSlot`] per engine. Every transition happens under its
//! mutex, so "check not running, then mark running" is a single step and two
//! concurrent spawns can never both succeed.
//!
//! Each accepted spawn gets a [`JobTicket`] carrying the slot generation at
//! the time it started. Declaring a scan stale, or starting a new scan over a
//! stale one, bumps the generation and raises the old ticket's cancel flag.
//! The abandoned pass may keep running for a while, but every heartbeat and
//! its final publication compare generations first, so its results are
//! discarded rather than overwriting a newer scan.
//!
//! The slot lock is a leaf: nothing else is locked while it is held.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{Advisory, EngineError};
use crate::progress::ProgressCallback;

/// Lifecycle of the scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    /// No scan has run, or the last one was aborted or reset.
    #[default]
    Idle,
    /// A scan is running and sending heartbeats.
    Running,
    /// The last scan completed and its results are published.
    Finished,
    /// A scan is marked running but its heartbeat is older than the
    /// staleness threshold. Only ever reported, never stored.
    Stale,
}

/// Observable progress of the scan job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanJobState {
    /// Current status
    pub status: ScanStatus,
    /// Entries visited so far
    pub processed: u64,
    /// Best-effort estimate of entries to visit; may grow
    pub total: u64,
    /// Last path processed
    pub current_path: Option<PathBuf>,
    /// When the current or last scan started
    pub started_at: Option<DateTime<Utc>>,
    /// Last sign of life from the running scan
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Generation of the current or last scan
    pub generation: u64,
    /// Why the last scan was aborted, if it was
    pub failure: Option<String>,
    /// Root of the current or last scan
    pub root: Option<PathBuf>,
}

/// Proof that a scan pass owns the slot.
#[derive(Debug, Clone)]
pub struct JobTicket {
    generation: u64,
    cancel: Arc<AtomicBool>,
    superseded: Option<u64>,
}

impl JobTicket {
    /// Generation this pass runs under.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Flag raised when the pass is abandoned.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Whether the pass has been abandoned.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Generation of a stale pass this one replaced, if any.
    #[must_use]
    pub fn superseded(&self) -> Option<u64> {
        self.superseded
    }
}

#[derive(Debug, Default)]
struct SlotInner {
    state: ScanJobState,
    cancel: Option<Arc<AtomicBool>>,
}

/// The process-wide scan job slot.
#[derive(Debug)]
pub struct JobSlot {
    inner: Mutex<SlotInner>,
    stale_after: Duration,
}

impl JobSlot {
    /// Create an idle slot; a running scan silent for longer than
    /// `stale_after` is considered abandoned.
    #[must_use]
    pub fn new(stale_after: std::time::Duration) -> Self {
        Self {
            inner: Mutex::new(SlotInner::default()),
            stale_after: Duration::from_std(stale_after)
                .unwrap_or_else(|_| Duration::weeks(52 * 100)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_stale(&self, state: &ScanJobState, now: DateTime<Utc>) -> bool {
        state.status == ScanStatus::Running
            && state
                .last_heartbeat
                .is_some_and(|beat| now.signed_duration_since(beat) > self.stale_after)
    }

    /// Cancel the running pass and advance the generation.
    fn abandon(inner: &mut SlotInner) -> u64 {
        if let Some(cancel) = inner.cancel.take() {
            cancel.store(true, Ordering::SeqCst);
        }
        let abandoned = inner.state.generation;
        inner.state.generation += 1;
        abandoned
    }

    /// Atomically claim the slot for a new scan of `root`.
    ///
    /// # Errors
    ///
    /// `ScanAlreadyRunning` if a scan is running and its heartbeat is fresh.
    pub fn try_begin_at(&self, root: &Path, now: DateTime<Utc>) -> Result<JobTicket, EngineError> {
        let mut inner = self.lock();
        let mut superseded = None;
        if inner.state.status == ScanStatus::Running {
            if !self.is_stale(&inner.state, now) {
                return Err(EngineError::ScanAlreadyRunning);
            }
            let abandoned = Self::abandon(&mut inner);
            log::warn!("Replacing stale scan #{}", abandoned);
            superseded = Some(abandoned);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let generation = inner.state.generation + 1;
        inner.state = ScanJobState {
            status: ScanStatus::Running,
            processed: 0,
            total: 0,
            current_path: None,
            started_at: Some(now),
            last_heartbeat: Some(now),
            generation,
            failure: None,
            root: Some(root.to_path_buf()),
        };
        inner.cancel = Some(Arc::clone(&cancel));
        log::info!("Scan #{} started: {}", generation, root.display());

        Ok(JobTicket {
            generation,
            cancel,
            superseded,
        })
    }

    /// [`try_begin_at`](Self::try_begin_at) at the current time.
    ///
    /// # Errors
    ///
    /// `ScanAlreadyRunning` if a scan is running and its heartbeat is fresh.
    pub fn try_begin(&self, root: &Path) -> Result<JobTicket, EngineError> {
        self.try_begin_at(root, Utc::now())
    }

    /// Free the slot if the running scan is stale.
    ///
    /// Returns a warning when a stale scan was reset, a notice when a healthy
    /// scan is running, and `None` otherwise.
    pub fn reset_if_stale_at(&self, now: DateTime<Utc>) -> Option<Advisory> {
        let mut inner = self.lock();
        if inner.state.status != ScanStatus::Running {
            return None;
        }
        if !self.is_stale(&inner.state, now) {
            return Some(Advisory::ScanAlreadyRunning);
        }

        let abandoned = Self::abandon(&mut inner);
        inner.state.status = ScanStatus::Idle;
        inner.state.current_path = None;
        log::warn!("Scan #{} stopped sending heartbeats, reset to idle", abandoned);
        Some(Advisory::StaleScanReset {
            abandoned_generation: abandoned,
        })
    }

    /// [`reset_if_stale_at`](Self::reset_if_stale_at) at the current time.
    pub fn reset_if_stale(&self) -> Option<Advisory> {
        self.reset_if_stale_at(Utc::now())
    }

    /// Copy of the state, reporting `Stale` instead of `Running` when the
    /// heartbeat is too old.
    #[must_use]
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> ScanJobState {
        let inner = self.lock();
        let mut state = inner.state.clone();
        if self.is_stale(&state, now) {
            state.status = ScanStatus::Stale;
        }
        state
    }

    /// [`snapshot_at`](Self::snapshot_at) at the current time.
    #[must_use]
    pub fn snapshot(&self) -> ScanJobState {
        self.snapshot_at(Utc::now())
    }

    /// Record progress for the pass holding `ticket`.
    ///
    /// Returns `false` if the pass has been superseded and should stop.
    pub fn heartbeat(
        &self,
        ticket: &JobTicket,
        processed: u64,
        total: u64,
        current_path: Option<&Path>,
    ) -> bool {
        let mut inner = self.lock();
        if !Self::owns(&inner, ticket) {
            return false;
        }
        let state = &mut inner.state;
        state.processed = processed;
        state.total = total.max(processed);
        if let Some(path) = current_path {
            state.current_path = Some(path.to_path_buf());
        }
        state.last_heartbeat = Some(Utc::now());
        log::trace!("Heartbeat #{}: {}/{}", ticket.generation, processed, state.total);
        true
    }

    fn owns(inner: &SlotInner, ticket: &JobTicket) -> bool {
        inner.state.status == ScanStatus::Running && inner.state.generation == ticket.generation
    }

    /// Whether `ticket` still owns a running pass.
    #[must_use]
    pub fn is_current(&self, ticket: &JobTicket) -> bool {
        Self::owns(&self.lock(), ticket)
    }

    /// Mark the pass holding `ticket` finished.
    ///
    /// Returns `false` if the pass was superseded. Callers publish results
    /// before finishing, under their own lock, after checking
    /// [`is_current`](Self::is_current).
    pub fn finish(&self, ticket: &JobTicket) -> bool {
        let mut inner = self.lock();
        if !Self::owns(&inner, ticket) {
            log::info!(
                "Discarding results of superseded scan #{}",
                ticket.generation
            );
            return false;
        }
        inner.cancel = None;
        let state = &mut inner.state;
        state.status = ScanStatus::Finished;
        state.processed = state.total;
        state.current_path = None;
        state.last_heartbeat = Some(Utc::now());
        log::info!("Scan #{} finished", ticket.generation);
        true
    }

    /// Abort the pass holding `ticket`, returning to `Idle` with a failure
    /// reason. Returns `false` if the pass was already superseded.
    pub fn abort(&self, ticket: &JobTicket, reason: &str) -> bool {
        let mut inner = self.lock();
        if !Self::owns(&inner, ticket) {
            return false;
        }
        inner.cancel = None;
        inner.state.status = ScanStatus::Idle;
        inner.state.current_path = None;
        inner.state.failure = Some(reason.to_string());
        log::error!("Scan #{} aborted: {}", ticket.generation, reason);
        true
    }

    /// Forget the last scan. A running scan is cancelled and can no longer
    /// finish.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        if inner.state.status == ScanStatus::Running {
            Self::abandon(&mut inner);
        }
        let generation = inner.state.generation;
        inner.state = ScanJobState {
            generation,
            ..ScanJobState::default()
        };
    }
}

/// Feeds hashing progress into the job slot, sending a heartbeat every
/// `batch` items.
pub struct JobReporter {
    slot: Arc<JobSlot>,
    ticket: JobTicket,
    batch: usize,
    /// Entries completed before the current phase
    base: AtomicU64,
    phase_total: AtomicU64,
    done: AtomicUsize,
}

impl JobReporter {
    /// Create a reporter for the pass holding `ticket`, whose walk visited
    /// `walked` entries.
    #[must_use]
    pub fn new(slot: Arc<JobSlot>, ticket: JobTicket, batch: usize, walked: u64) -> Self {
        Self {
            slot,
            ticket,
            batch: batch.max(1),
            base: AtomicU64::new(walked),
            phase_total: AtomicU64::new(0),
            done: AtomicUsize::new(0),
        }
    }

    fn beat(&self, processed: u64, path: Option<&Path>) {
        let total = self.base.load(Ordering::SeqCst) + self.phase_total.load(Ordering::SeqCst);
        if !self.slot.heartbeat(&self.ticket, processed, total, path) {
            self.ticket.cancel.store(true, Ordering::SeqCst);
        }
    }
}

impl ProgressCallback for JobReporter {
    fn on_phase_start(&self, phase: &str, total: usize) {
        log::debug!("Phase {} started with {} items", phase, total);
        self.phase_total.store(total as u64, Ordering::SeqCst);
        self.done.store(0, Ordering::SeqCst);
        self.beat(self.base.load(Ordering::SeqCst), None);
    }

    fn on_progress(&self, current: usize, path: &str) {
        let count = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.batch == 0 {
            let processed = self.base.load(Ordering::SeqCst) + current as u64;
            self.beat(processed, Some(Path::new(path)));
        }
    }

    fn on_phase_end(&self, phase: &str) {
        let finished = self.phase_total.swap(0, Ordering::SeqCst);
        let base = self.base.fetch_add(finished, Ordering::SeqCst) + finished;
        self.beat(base, None);
        log::debug!("Phase {} finished", phase);
    }
}
