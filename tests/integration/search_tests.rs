use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use filetime::FileTime;
use storamen::config::Config;
use storamen::engine::{Engine, ScanStatus};
use storamen::search::TagMatch;
use tempfile::{tempdir, TempDir};

const WAIT: Duration = Duration::from_secs(30);

fn music_library() -> TempDir {
    let dir = tempdir().unwrap();
    let files = [
        "Music/Live/song_one-live.mp3",
        "Music/Studio/song_two.mp3",
        "Music/Studio/cover.jpg",
        "Docs/report.pdf",
    ];
    for rel in files {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel.as_bytes()).unwrap();
    }
    dir
}

fn scan(dir: &Path, config: Config) -> Engine {
    let engine = Engine::in_memory(config);
    assert_eq!(engine.spawn_scan(dir), None);
    assert_eq!(engine.wait_for_idle(WAIT).status, ScanStatus::Finished);
    engine
}

fn paths(engine: &Engine, tags: &[&str], page: usize) -> Vec<PathBuf> {
    engine
        .search(tags, page)
        .iter()
        .map(|r| r.path.clone())
        .collect()
}

#[test]
fn test_search_by_extension() {
    let dir = music_library();
    let engine = scan(dir.path(), Config::default());

    let hits = paths(&engine, &["mp3"], 0);

    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|p| p.extension().unwrap() == "mp3"));
}

#[test]
fn test_search_is_case_insensitive() {
    let dir = music_library();
    let engine = scan(dir.path(), Config::default());

    assert_eq!(paths(&engine, &["LIVE"], 0), paths(&engine, &["live"], 0));
    assert!(!paths(&engine, &["live"], 0).is_empty());
}

#[test]
fn test_search_matches_directories() {
    let dir = music_library();
    let engine = scan(dir.path(), Config::default());

    let hits = engine.search(&["studio"], 0);

    assert!(hits.iter().any(|r| r.is_directory && r.path == Path::new("Music/Studio")));
}

#[test]
fn test_any_and_all_modes() {
    let dir = music_library();
    let any = scan(dir.path(), Config::default());
    let all = scan(
        dir.path(),
        Config {
            tag_match: TagMatch::All,
            ..Config::default()
        },
    );

    let any_hits = paths(&any, &["mp3", "pdf"], 0);
    assert_eq!(any_hits.len(), 3);

    let all_hits = paths(&all, &["mp3", "live"], 0);
    assert_eq!(all_hits, vec![PathBuf::from("Music/Live/song_one-live.mp3")]);
    assert!(paths(&all, &["mp3", "pdf"], 0).is_empty());
}

#[test]
fn test_pagination() {
    let dir = tempdir().unwrap();
    for i in 0..7 {
        fs::write(dir.path().join(format!("track_{}.ogg", i)), [i as u8]).unwrap();
    }
    let engine = scan(
        dir.path(),
        Config {
            page_size: 3,
            ..Config::default()
        },
    );

    let first = paths(&engine, &["ogg"], 0);
    let second = paths(&engine, &["ogg"], 1);
    let third = paths(&engine, &["ogg"], 2);

    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 3);
    assert_eq!(third.len(), 1);
    assert!(first.iter().all(|p| !second.contains(p)));
    assert!(paths(&engine, &["ogg"], 3).is_empty());
}

#[test]
fn test_empty_query_returns_nothing() {
    let dir = music_library();
    let engine = scan(dir.path(), Config::default());

    assert!(paths(&engine, &[], 0).is_empty());
    assert!(paths(&engine, &["  "], 0).is_empty());
    assert!(engine.search_query(" , ", 0).is_empty());
}

#[test]
fn test_raw_query_splits_terms() {
    let dir = music_library();
    let engine = scan(dir.path(), Config::default());

    let hits = engine.search_query("pdf, jpg", 0);

    assert_eq!(hits.len(), 2);
}

#[test]
fn test_only_first_eight_tags_are_used() {
    let dir = music_library();
    let engine = scan(dir.path(), Config::default());
    let mut tags = vec!["nothing"; 8];
    tags.push("pdf");

    assert!(paths(&engine, &tags, 0).is_empty());
}

#[test]
fn test_unicode_names_match_in_either_normal_form() {
    let dir = tempdir().unwrap();
    // "café" with a combining acute accent
    fs::write(dir.path().join("cafe\u{301}.txt"), b"menu").unwrap();
    let engine = scan(dir.path(), Config::default());

    assert_eq!(paths(&engine, &["caf\u{e9}"], 0).len(), 1);
    assert_eq!(paths(&engine, &["cafe\u{301}"], 0).len(), 1);
}

#[test]
fn test_records_carry_modification_time() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dated.txt");
    fs::write(&path, b"content").unwrap();
    filetime::set_file_mtime(&path, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

    let engine = scan(dir.path(), Config::default());
    let hits = engine.search(&["dated"], 0);

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].modified_at.timestamp(), 1_600_000_000);
    assert_eq!(hits[0].size, 7);
}

#[test]
fn test_search_before_any_scan_is_empty() {
    let engine = Engine::in_memory(Config::default());

    assert!(engine.search(&["anything"], 0).is_empty());
}
