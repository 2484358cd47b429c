//! Progress reporting.
//!
//! [`ProgressCallback`] is the seam between the hashing pipeline and whoever
//! tracks progress: the engine uses it to advance the job state and send
//! heartbeats. [`ScanProgress`] renders polled job state in the terminal with
//! indicatif.

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use crate::engine::{ScanJobState, ScanStatus};

/// Progress callback for duplicate finding phases.
///
/// Implement this trait to receive progress updates during
/// the duplicate detection pipeline. Calls may arrive from several
/// hashing threads at once.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts.
    ///
    /// # Arguments
    ///
    /// * `phase` - Name of the phase ("quickhash", "fullhash")
    /// * `total` - Total number of items to process
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Called for each item processed.
    ///
    /// # Arguments
    ///
    /// * `current` - Items completed so far in this phase (1-based)
    /// * `path` - Relative path just processed
    fn on_progress(&self, current: usize, path: &str);

    /// Called when a phase completes.
    fn on_phase_end(&self, phase: &str);
}

/// Terminal renderer for polled scan progress.
pub struct ScanProgress {
    bar: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl ScanProgress {
    /// Create a renderer; `quiet` disables all output.
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            quiet,
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    /// Render one polled state.
    pub fn update(&self, state: &ScanJobState) {
        if self.quiet {
            return;
        }
        let mut slot = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        let bar = slot.get_or_insert_with(|| {
            let bar = ProgressBar::new(state.total);
            bar.set_style(Self::style());
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        });

        bar.set_length(state.total.max(state.processed));
        bar.set_position(state.processed);
        let message = match (&state.status, &state.current_path) {
            (ScanStatus::Stale, _) => "scan stopped responding".to_string(),
            (_, Some(path)) => truncate_path(&path.to_string_lossy(), 40),
            (_, None) => String::new(),
        };
        bar.set_message(message);
    }

    /// Finish and clear the bar.
    pub fn finish(&self) {
        let bar = self.bar.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
    }
}

/// Truncate a path for display in the progress bar.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }

    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let name_len = file_name.chars().count();
    if name_len + 4 > max_len {
        let tail: String = file_name.chars().skip(name_len + 3 - max_len).collect();
        return format!("...{}", tail);
    }

    format!(".../{}", file_name)
}
