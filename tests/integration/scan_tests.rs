use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use storamen::config::Config;
use storamen::engine::{Engine, ScanStatus};
use storamen::error::Advisory;
use tempfile::{tempdir, TempDir};

const WAIT: Duration = Duration::from_secs(30);

fn scan(dir: &Path, config: Config) -> Engine {
    let engine = Engine::in_memory(config);
    assert_eq!(engine.spawn_scan(dir), None);
    assert_eq!(engine.wait_for_idle(WAIT).status, ScanStatus::Finished);
    engine
}

fn write(dir: &TempDir, rel: &str, content: &[u8]) {
    let path = dir.path().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn test_scan_empty_directory() {
    let dir = tempdir().unwrap();
    let engine = scan(dir.path(), Config::default());

    assert_eq!(engine.list_duplicates(0).count(), 0);
    let summary = engine.summary().unwrap();
    assert_eq!(summary.files, 0);
    assert_eq!(summary.duplicate_groups, 0);
}

#[test]
fn test_scan_unique_files() {
    let dir = tempdir().unwrap();
    write(&dir, "a.txt", b"content a");
    write(&dir, "b.txt", b"content b");
    write(&dir, "c.txt", b"content c");

    let engine = scan(dir.path(), Config::default());

    assert_eq!(engine.list_duplicates(0).count(), 0);
    assert_eq!(engine.summary().unwrap().files, 3);
}

#[test]
fn test_end_to_end_scan_then_remove() {
    let dir = tempdir().unwrap();
    write(&dir, "a.txt", &[b'x'; 500]);
    write(&dir, "b/a.txt", &[b'x'; 500]);

    let engine = scan(dir.path(), Config::default());
    let groups: Vec<_> = engine.list_duplicates(0).collect();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].len(), 2);
    assert_eq!(groups[0].size, 500);

    let member = groups[0].members[1].id;
    let removed = engine.remove_ids(&member.to_string());
    assert_eq!(removed.succeeded.len(), 1);

    let path = removed.outcomes[0].path.clone().unwrap();
    assert!(!path.exists());
    assert_eq!(engine.list_duplicates(0).count(), 0);
}

#[test]
fn test_same_size_different_content_not_grouped() {
    let dir = tempdir().unwrap();
    write(&dir, "a.bin", b"aaaa");
    write(&dir, "b.bin", b"bbbb");

    let engine = scan(dir.path(), Config::default());

    assert_eq!(engine.list_duplicates(0).count(), 0);
}

#[test]
fn test_quick_hash_collision_resolved_by_full_hash() {
    let dir = tempdir().unwrap();
    let mut first = vec![0u8; 256];
    let mut second = vec![0u8; 256];
    first[200] = 1;
    second[200] = 2;
    write(&dir, "first.bin", &first);
    write(&dir, "second.bin", &second);
    write(&dir, "copy.bin", &first);

    let engine = scan(
        dir.path(),
        Config {
            quick_hash_size: 16,
            ..Config::default()
        },
    );

    let groups: Vec<_> = engine.list_duplicates(0).collect();
    assert_eq!(groups.len(), 1);
    let paths: HashSet<PathBuf> = groups[0]
        .members
        .iter()
        .map(|m| m.record.path.clone())
        .collect();
    assert!(paths.contains(Path::new("first.bin")));
    assert!(paths.contains(Path::new("copy.bin")));
}

#[test]
fn test_identical_directories_grouped_with_their_files() {
    let dir = tempdir().unwrap();
    write(&dir, "d1/x.txt", b"hello");
    write(&dir, "d1/y.txt", b"world");
    write(&dir, "d2/x.txt", b"hello");
    write(&dir, "d2/y.txt", b"world");

    let engine = scan(dir.path(), Config::default());
    let groups: Vec<_> = engine.list_duplicates(0).collect();

    assert_eq!(groups.len(), 3);
    assert!(groups[0].is_directory);
    assert_eq!(groups[0].size, 10);
    assert!(groups[1..].iter().all(|g| !g.is_directory && g.size == 5));
}

#[test]
fn test_directories_excluded_when_configured() {
    let dir = tempdir().unwrap();
    write(&dir, "d1/x.txt", b"hello");
    write(&dir, "d2/x.txt", b"hello");

    let engine = scan(
        dir.path(),
        Config {
            include_directories: false,
            ..Config::default()
        },
    );

    let groups: Vec<_> = engine.list_duplicates(0).collect();
    assert_eq!(groups.len(), 1);
    assert!(!groups[0].is_directory);
}

#[test]
fn test_listing_order_and_min_size() {
    let dir = tempdir().unwrap();
    write(&dir, "small1", &[1u8; 10]);
    write(&dir, "small2", &[1u8; 10]);
    write(&dir, "big1", &[2u8; 1000]);
    write(&dir, "big2", &[2u8; 1000]);
    write(&dir, "mid1", &[3u8; 100]);
    write(&dir, "mid2", &[3u8; 100]);

    let engine = scan(dir.path(), Config::default());

    let sizes: Vec<u64> = engine.list_duplicates(0).map(|g| g.size).collect();
    assert_eq!(sizes, vec![1000, 100, 10]);

    let filtered: Vec<u64> = engine.list_duplicates(100).map(|g| g.size).collect();
    assert_eq!(filtered, vec![1000, 100]);
}

#[test]
fn test_listing_is_repeatable() {
    let dir = tempdir().unwrap();
    write(&dir, "a", b"same");
    write(&dir, "b", b"same");
    write(&dir, "c", b"other");
    write(&dir, "d", b"other");

    let engine = scan(dir.path(), Config::default());

    let first: Vec<_> = engine.list_duplicates(0).collect();
    let second: Vec<_> = engine.list_duplicates(0).collect();
    assert_eq!(first, second);

    let mut listing = engine.list_duplicates(0);
    let drained: Vec<_> = listing.by_ref().collect();
    listing.rewind();
    assert_eq!(listing.collect::<Vec<_>>(), drained);
}

#[test]
fn test_every_path_in_at_most_one_group() {
    let dir = tempdir().unwrap();
    for i in 0..6 {
        write(&dir, &format!("set{}/copy_a", i % 3), format!("{}", i % 3).as_bytes());
        write(&dir, &format!("other{}/copy_b", i), format!("{}", i % 3).as_bytes());
    }

    let engine = scan(dir.path(), Config::default());

    let mut seen = HashSet::new();
    for group in engine.list_duplicates(0) {
        assert!(group.len() >= 2);
        for member in &group.members {
            assert_eq!(member.record.size, group.size);
            assert!(seen.insert(member.record.path.clone()), "path in two groups");
        }
    }
}

#[test]
fn test_progress_after_finish() {
    let dir = tempdir().unwrap();
    write(&dir, "a", b"1");
    write(&dir, "b", b"2");

    let engine = scan(dir.path(), Config::default());
    let state = engine.progress();

    assert_eq!(state.status, ScanStatus::Finished);
    assert_eq!(state.processed, state.total);
    assert_eq!(state.root.as_deref(), Some(dir.path()));
    assert!(state.failure.is_none());
}

#[test]
fn test_missing_root_is_reported_and_engine_stays_idle() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("gone");
    let engine = Engine::in_memory(Config::default());

    let advisory = engine.spawn_scan(&missing);

    assert!(matches!(advisory, Some(Advisory::RootInaccessible { .. })));
    assert_eq!(engine.progress().status, ScanStatus::Idle);
    assert_eq!(engine.spawn_scan(dir.path()), None);
}

#[test]
fn test_rescan_replaces_results() {
    let dir = tempdir().unwrap();
    write(&dir, "a", b"dup");
    write(&dir, "b", b"dup");

    let engine = scan(dir.path(), Config::default());
    let first = engine.snapshot().generation;
    assert_eq!(engine.list_duplicates(0).count(), 1);

    fs::remove_file(dir.path().join("b")).unwrap();
    assert_eq!(engine.spawn_scan(dir.path()), None);
    assert_eq!(engine.wait_for_idle(WAIT).status, ScanStatus::Finished);

    assert!(engine.snapshot().generation > first);
    assert_eq!(engine.list_duplicates(0).count(), 0);
}

#[cfg(unix)]
#[test]
fn test_directory_with_dangling_link_not_grouped() {
    let dir = tempdir().unwrap();
    write(&dir, "d1/x.txt", b"hello");
    write(&dir, "d2/x.txt", b"hello");
    std::os::unix::fs::symlink(dir.path().join("nowhere"), dir.path().join("d1/broken")).unwrap();

    let engine = scan(
        dir.path(),
        Config {
            follow_symlinks: true,
            ..Config::default()
        },
    );
    let groups: Vec<_> = engine.list_duplicates(0).collect();

    // d1 was only partly read, so it cannot match d2
    assert_eq!(groups.len(), 1);
    assert!(!groups[0].is_directory);
    assert_eq!(groups[0].len(), 2);
    assert!(engine.search(&["broken"], 0).is_empty());
    // Still searchable, just never grouped
    assert!(engine
        .search(&["d1"], 0)
        .iter()
        .any(|r| r.is_directory && r.path == Path::new("d1")));
}

#[cfg(unix)]
#[test]
fn test_unreadable_subdirectory_excluded_from_results() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    write(&dir, "d1/x.txt", b"hello");
    write(&dir, "d1/locked/secret.txt", b"only here");
    write(&dir, "d2/x.txt", b"hello");
    fs::create_dir(dir.path().join("d2/locked")).unwrap();
    let locked = dir.path().join("d1/locked");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read_dir(&locked).is_ok() {
        // Permissions are not enforced (running as root)
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let engine = Engine::in_memory(Config::default());
    assert_eq!(engine.spawn_scan(dir.path()), None);
    let state = engine.wait_for_idle(WAIT);
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(state.status, ScanStatus::Finished);
    let groups: Vec<_> = engine.list_duplicates(0).collect();
    assert_eq!(groups.len(), 1);
    assert!(!groups[0].is_directory);
    let unreadable = Path::new("d1/locked");
    assert!(engine
        .search(&["locked"], 0)
        .iter()
        .all(|r| r.path != unreadable));
    assert!(engine.search(&["secret"], 0).is_empty());
}
