use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use storamen::actions::delete::{DeleteError, DeleteMode, DeleteResult, Deleter};
use storamen::config::Config;
use storamen::engine::{Engine, JobSlot, ScanStatus};
use storamen::error::{Advisory, EngineError};
use storamen::settings::Settings;
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(30);

#[test]
fn test_only_one_concurrent_begin_wins() {
    let slot = Arc::new(JobSlot::new(Duration::from_secs(300)));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let slot = Arc::clone(&slot);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                slot.try_begin(Path::new("/data")).is_ok()
            })
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|&won| won)
        .count();

    assert_eq!(winners, 1);
    assert_eq!(slot.snapshot().status, ScanStatus::Running);
}

#[test]
fn test_stale_scan_is_replaced_and_cannot_publish() {
    let slot = JobSlot::new(Duration::from_secs(60));
    let long_ago = Utc::now() - chrono::Duration::minutes(10);
    let old = slot.try_begin_at(Path::new("/data"), long_ago).unwrap();

    assert_eq!(slot.snapshot().status, ScanStatus::Stale);
    let fresh = slot.try_begin(Path::new("/data")).unwrap();
    assert_eq!(fresh.superseded(), Some(old.generation()));
    assert!(old.is_cancelled());

    assert!(!slot.heartbeat(&old, 10, 10, None));
    assert!(!slot.is_current(&old));
    assert!(!slot.finish(&old));

    assert!(slot.is_current(&fresh));
    assert!(slot.finish(&fresh));
    assert_eq!(slot.snapshot().status, ScanStatus::Finished);
    assert_eq!(slot.snapshot().generation, fresh.generation());
}

#[test]
fn test_fresh_scan_blocks_second_begin() {
    let slot = JobSlot::new(Duration::from_secs(60));
    let _ticket = slot.try_begin(Path::new("/a")).unwrap();

    assert!(matches!(
        slot.try_begin(Path::new("/b")),
        Err(EngineError::ScanAlreadyRunning)
    ));
    assert_eq!(slot.reset_if_stale(), Some(Advisory::ScanAlreadyRunning));
}

#[test]
fn test_readers_never_observe_partial_results() {
    let dir = tempdir().unwrap();
    for i in 0..40 {
        let sub = dir.path().join(format!("d{}", i % 5));
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join(format!("f{}", i)), format!("{}", i % 4)).unwrap();
    }
    let engine = Engine::in_memory(Config {
        heartbeat_batch: 1,
        ..Config::default()
    });
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    for group in engine.list_duplicates(0) {
                        assert!(group.len() >= 2);
                        assert!(group.members.iter().all(|m| m.record.size == group.size));
                    }
                }
            })
        })
        .collect();

    for _ in 0..3 {
        while engine.spawn_scan(dir.path()) == Some(Advisory::ScanAlreadyRunning) {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(engine.wait_for_idle(WAIT).status, ScanStatus::Finished);
    }
    stop.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(engine.snapshot().generation, engine.progress().generation);
    assert!(engine.list_duplicates(0).count() > 0);
}

#[test]
fn test_concurrent_removals_are_serialized() {
    let dir = tempdir().unwrap();
    for i in 0..10 {
        fs::write(dir.path().join(format!("copy{}", i)), b"identical").unwrap();
    }
    let engine = Engine::in_memory(Config::default());
    engine.spawn_scan(dir.path());
    engine.wait_for_idle(WAIT);
    let group = engine.list_duplicates(0).next().unwrap();
    assert_eq!(group.len(), 10);

    let handles: Vec<_> = group
        .members
        .iter()
        .map(|m| {
            let engine = engine.clone();
            let id = m.id.to_string();
            thread::spawn(move || engine.remove_ids(&id).succeeded.len())
        })
        .collect();
    let removed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    // The group dissolves when one member is left; that last id is invalid.
    assert_eq!(removed, 9);
    assert_eq!(engine.list_duplicates(0).count(), 0);
    let left = (0..10)
        .filter(|i| dir.path().join(format!("copy{}", i)).exists())
        .count();
    assert_eq!(left, 1);
}

/// Deleter that blocks inside `delete` until released, deleting nothing.
struct GatedDeleter {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl Deleter for GatedDeleter {
    fn delete(&self, path: &Path) -> Result<DeleteResult, DeleteError> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(10));
        Ok(DeleteResult {
            path: path.to_path_buf(),
            was_directory: false,
            mode: DeleteMode::DryRun,
        })
    }
}

#[test]
fn test_slow_deletion_does_not_block_scans_or_readers() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a"), b"same").unwrap();
    fs::write(dir.path().join("b"), b"same").unwrap();
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let deleter = Arc::new(GatedDeleter {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let engine =
        Engine::with_deleter(Config::default(), Settings::in_memory(), deleter).unwrap();
    assert_eq!(engine.spawn_scan(dir.path()), None);
    assert_eq!(engine.wait_for_idle(WAIT).status, ScanStatus::Finished);
    let first = engine.snapshot().generation;
    let id = engine.list_duplicates(0).next().unwrap().members[0].id.to_string();

    let remover = {
        let engine = engine.clone();
        thread::spawn(move || engine.remove_ids(&id))
    };
    entered_rx.recv_timeout(WAIT).unwrap();

    // The deletion is parked; everything else keeps working
    let started = Instant::now();
    assert_eq!(engine.progress().status, ScanStatus::Finished);
    assert_eq!(engine.reset_scanner(), None);
    assert_eq!(engine.spawn_scan(dir.path()), None);
    assert_eq!(engine.wait_for_idle(WAIT).status, ScanStatus::Finished);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(engine.snapshot().generation > first);
    assert_eq!(engine.list_duplicates(0).count(), 1);

    release_tx.send(()).unwrap();
    let batch = remover.join().unwrap();

    // The member belonged to the replaced results, so nothing is dropped
    assert!(batch.succeeded.is_empty());
    assert_eq!(batch.failed.len(), 1);
    assert_eq!(engine.list_duplicates(0).next().unwrap().len(), 2);
}
