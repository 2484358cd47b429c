//! Configuration layering: defaults, TOML file, environment variables.

use std::fs;
use std::sync::Mutex;

use clap::Parser;
use storamen::actions::DeleteMode;
use storamen::cli::{Cli, Commands};
use storamen::config::Config;
use storamen::search::TagMatch;
use tempfile::tempdir;

// Environment variables are process-wide.
static ENV_LOCK: Mutex<()> = Mutex::new(());

#[test]
fn test_file_values_override_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("storamen.toml");
    fs::write(
        &path,
        r#"
quick_hash_size = 1024
tag_match = "all"
delete_mode = "trash"
ignore_patterns = ["*.tmp", "node_modules/"]
"#,
    )
    .unwrap();

    let config = Config::load_from(Some(path.as_path())).unwrap();

    assert_eq!(config.quick_hash_size, 1024);
    assert_eq!(config.tag_match, TagMatch::All);
    assert_eq!(config.delete_mode, DeleteMode::Trash);
    assert_eq!(config.ignore_patterns, vec!["*.tmp", "node_modules/"]);
    assert_eq!(config.page_size, Config::default().page_size);
}

#[test]
fn test_environment_overrides_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("storamen.toml");
    fs::write(&path, "page_size = 10\nstale_after_secs = 60\n").unwrap();

    std::env::set_var("STORAMEN_PAGE_SIZE", "25");
    let config = Config::load_from(Some(path.as_path()));
    std::env::remove_var("STORAMEN_PAGE_SIZE");

    let config = config.unwrap();
    assert_eq!(config.page_size, 25);
    assert_eq!(config.stale_after_secs, 60);
}

#[test]
fn test_invalid_environment_value_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();

    std::env::set_var("STORAMEN_HEARTBEAT_BATCH", "0");
    let result = Config::load_from(None);
    std::env::remove_var("STORAMEN_HEARTBEAT_BATCH");

    assert!(result.is_err());
}

#[test]
fn test_malformed_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("storamen.toml");
    fs::write(&path, "page_size = \"many\"\n").unwrap();

    assert!(Config::load_from(Some(path.as_path())).is_err());
}

#[test]
fn test_walker_config_follows_config() {
    let config = Config {
        skip_hidden: true,
        include_directories: false,
        ignore_patterns: vec!["*.log".to_string()],
        ..Config::default()
    };

    let walker = config.walker_config();

    assert!(walker.skip_hidden);
    assert!(!walker.include_directories);
    assert!(!walker.follow_symlinks);
    assert_eq!(walker.ignore_patterns, vec!["*.log"]);
}

#[test]
fn test_cli_config_and_database_paths() {
    let cli = Cli::try_parse_from([
        "storamen",
        "--config",
        "/etc/storamen.toml",
        "--database",
        "/var/lib/storamen.db",
        "settings",
        "get",
        "work_dir",
    ])
    .unwrap();

    assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/etc/storamen.toml")));
    assert_eq!(
        cli.database.as_deref(),
        Some(std::path::Path::new("/var/lib/storamen.db"))
    );
    assert!(matches!(cli.command, Commands::Settings(_)));
}
