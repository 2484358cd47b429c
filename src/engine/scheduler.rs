//! Periodic rescans of the persisted working directory.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::Engine;

/// Background thread that resets stale scans and spawns a new one every
/// interval, until stopped or dropped.
#[derive(Debug)]
pub struct Scheduler {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Start ticking every `interval`. The first scan is spawned after one
    /// full interval.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be created.
    pub fn start(engine: Engine, interval: Duration) -> std::io::Result<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("storamen-scheduler".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(&engine),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        log::info!("Periodic scan every {}s", interval.as_secs());
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    /// Start from the engine's `scan_interval_secs`; `None` when it is 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be created.
    pub fn from_config(engine: &Engine) -> std::io::Result<Option<Self>> {
        match engine.config().scan_interval_secs {
            0 => Ok(None),
            secs => Self::start(engine.clone(), Duration::from_secs(secs)).map(Some),
        }
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Scheduler thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn tick(engine: &Engine) {
    let root = match engine.work_dir() {
        Ok(Some(root)) => root,
        Ok(None) => {
            log::debug!("No work_dir set, skipping periodic scan");
            return;
        }
        Err(e) => {
            log::warn!("Cannot read work_dir: {}", e);
            return;
        }
    };

    if let Some(advisory) = engine.reset_scanner() {
        log::info!("{}", advisory);
    }
    match engine.spawn_scan(&root) {
        Some(advisory) => log::info!("Periodic scan: {}", advisory),
        None => log::info!("Periodic scan started: {}", root.display()),
    }
}
