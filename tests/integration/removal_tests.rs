use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use storamen::actions::{
    DeleteError, DeleteMode, DeleteResult, Deleter, MemberRef, RemovalState,
};
use storamen::config::Config;
use storamen::engine::{Engine, ScanStatus};
use storamen::error::EngineError;
use storamen::settings::Settings;
use tempfile::{tempdir, TempDir};

const WAIT: Duration = Duration::from_secs(30);

/// Deleter that refuses configured paths and records every call.
#[derive(Default)]
struct RecordingDeleter {
    refuse: Vec<PathBuf>,
    calls: Mutex<Vec<PathBuf>>,
}

impl Deleter for RecordingDeleter {
    fn delete(&self, path: &Path) -> Result<DeleteResult, DeleteError> {
        self.calls.lock().unwrap().push(path.to_path_buf());
        if self.refuse.iter().any(|p| p == path) {
            return Err(DeleteError::PermissionDenied(path.to_path_buf()));
        }
        Ok(DeleteResult {
            path: path.to_path_buf(),
            was_directory: path.is_dir(),
            mode: DeleteMode::DryRun,
        })
    }
}

fn duplicate_pair() -> TempDir {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("a.txt"), [b'z'; 500]).unwrap();
    fs::create_dir(dir.path().join("b")).unwrap();
    fs::write(dir.path().join("b").join("a.txt"), [b'z'; 500]).unwrap();
    dir
}

fn scanned(dir: &Path, deleter: Arc<dyn Deleter>) -> Engine {
    let engine = Engine::with_deleter(Config::default(), Settings::in_memory(), deleter).unwrap();
    assert_eq!(engine.spawn_scan(dir), None);
    assert_eq!(engine.wait_for_idle(WAIT).status, ScanStatus::Finished);
    engine
}

#[test]
fn test_remove_returns_absolute_path() {
    let dir = duplicate_pair();
    let engine = scanned(dir.path(), Arc::new(RecordingDeleter::default()));
    let group = engine.list_duplicates(0).next().unwrap();
    let member = &group.members[0];

    let path = engine
        .remove_duplicate_member(MemberRef::Member {
            group: group.id,
            member: member.id,
        })
        .unwrap();

    assert_eq!(path, dir.path().join(&member.record.path));
    assert_eq!(engine.list_duplicates(0).count(), 0);
}

#[test]
fn test_unknown_id_is_invalid_and_deletes_nothing() {
    let dir = duplicate_pair();
    let deleter = Arc::new(RecordingDeleter::default());
    let engine = scanned(dir.path(), deleter.clone());

    let result = engine.remove_duplicate_member(MemberRef::Legacy(999_999));

    assert!(matches!(result, Err(EngineError::InvalidId(_))));
    assert!(deleter.calls.lock().unwrap().is_empty());
    assert_eq!(engine.list_duplicates(0).count(), 1);
}

#[test]
fn test_member_of_wrong_group_is_invalid() {
    let dir = duplicate_pair();
    let engine = scanned(dir.path(), Arc::new(RecordingDeleter::default()));
    let group = engine.list_duplicates(0).next().unwrap();

    let result = engine.remove_duplicate_member(MemberRef::Member {
        group: group.id + 1_000,
        member: group.members[0].id,
    });

    assert!(matches!(result, Err(EngineError::InvalidId(_))));
}

#[test]
fn test_delete_failure_leaves_index_untouched() {
    let dir = duplicate_pair();
    let refused = dir.path().join("a.txt");
    let deleter = Arc::new(RecordingDeleter {
        refuse: vec![refused.clone()],
        ..RecordingDeleter::default()
    });
    let engine = scanned(dir.path(), deleter);
    let group = engine.list_duplicates(0).next().unwrap();
    let target = group
        .members
        .iter()
        .find(|m| m.record.path == Path::new("a.txt"))
        .unwrap();

    let result = engine.remove_duplicate_member(MemberRef::Legacy(target.id));

    assert!(matches!(result, Err(EngineError::DeleteFailed(_))));
    assert!(refused.exists());
    assert_eq!(engine.list_duplicates(0).next().unwrap().len(), 2);
}

#[test]
fn test_batch_reports_each_id_independently() {
    let dir = duplicate_pair();
    let engine = scanned(dir.path(), Arc::new(RecordingDeleter::default()));
    let group = engine.list_duplicates(0).next().unwrap();
    let good = group.members[1].id;

    let batch = engine.remove_ids(&format!("abc, 424242 {}", good));

    assert_eq!(batch.outcomes.len(), 3);
    assert_eq!(batch.failed, vec!["abc", "424242"]);
    assert_eq!(batch.succeeded, vec![good.to_string()]);
    assert_eq!(batch.outcomes[0].state, RemovalState::Invalid);
    assert_eq!(batch.outcomes[1].state, RemovalState::Invalid);
    assert_eq!(batch.outcomes[2].state, RemovalState::IndexUpdated);
    assert!(batch.outcomes[0].error.is_some());
}

#[test]
fn test_removing_same_member_twice_fails_second_time() {
    let dir = duplicate_pair();
    let engine = scanned(dir.path(), Arc::new(RecordingDeleter::default()));
    let group = engine.list_duplicates(0).next().unwrap();
    let id = group.members[0].id.to_string();

    let batch = engine.remove_batch(&[id.clone(), id]);

    assert_eq!(batch.succeeded.len(), 1);
    assert_eq!(batch.failed.len(), 1);
}

#[test]
fn test_group_survives_until_one_member_left() {
    let dir = tempdir().unwrap();
    for name in ["one", "two", "three"] {
        fs::write(dir.path().join(name), b"triplicate").unwrap();
    }
    let engine = scanned(dir.path(), Arc::new(RecordingDeleter::default()));
    let group = engine.list_duplicates(0).next().unwrap();
    assert_eq!(group.len(), 3);

    engine
        .remove_duplicate_member(MemberRef::Legacy(group.members[0].id))
        .unwrap();
    let remaining = engine.list_duplicates(0).next().unwrap();
    assert_eq!(remaining.id, group.id);
    assert_eq!(remaining.len(), 2);

    engine
        .remove_duplicate_member(MemberRef::Legacy(remaining.members[0].id))
        .unwrap();
    assert_eq!(engine.list_duplicates(0).count(), 0);
}

#[test]
fn test_removing_directory_prunes_members_inside_it() {
    let dir = tempdir().unwrap();
    for d in ["d1", "d2"] {
        fs::create_dir(dir.path().join(d)).unwrap();
        fs::write(dir.path().join(d).join("x.txt"), b"hello").unwrap();
        fs::write(dir.path().join(d).join("y.txt"), b"world").unwrap();
    }
    let engine = Engine::in_memory(Config::default());
    engine.spawn_scan(dir.path());
    engine.wait_for_idle(WAIT);
    assert_eq!(engine.list_duplicates(0).count(), 3);
    let dir_group = engine.list_duplicates(0).find(|g| g.is_directory).unwrap();
    let victim = dir_group
        .members
        .iter()
        .find(|m| m.record.path == Path::new("d2"))
        .unwrap();

    let path = engine
        .remove_duplicate_member(MemberRef::Legacy(victim.id))
        .unwrap();

    assert!(!path.exists());
    assert_eq!(engine.list_duplicates(0).count(), 0);
    assert!(dir.path().join("d1").join("x.txt").exists());
}

#[test]
fn test_removal_visible_to_search() {
    let dir = duplicate_pair();
    let engine = scanned(dir.path(), Arc::new(RecordingDeleter::default()));
    assert_eq!(engine.search(&["a.txt"], 0).len(), 2);
    let group = engine.list_duplicates(0).next().unwrap();

    engine
        .remove_duplicate_member(MemberRef::Legacy(group.members[0].id))
        .unwrap();

    assert_eq!(engine.search(&["a.txt"], 0).len(), 1);
    assert_eq!(engine.summary().unwrap().files, 1);
}
