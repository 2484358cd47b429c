use std::path::PathBuf;

use storamen::config::Config;
use storamen::engine::Engine;
use storamen::error::EngineError;
use storamen::settings::{SettingKey, Settings, SettingsError, SqliteSettingsStore};
use tempfile::tempdir;

#[test]
fn test_settings_persist_across_reopen() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("nested").join("storamen.db");

    {
        let settings = Settings::new(SqliteSettingsStore::open(&db).unwrap());
        settings.set("work_dir", "/data/photos", true).unwrap();
        settings.set("scan_interval", "600", false).unwrap();
    }

    let settings = Settings::new(SqliteSettingsStore::open(&db).unwrap());
    assert_eq!(
        settings.work_dir().unwrap(),
        Some(PathBuf::from("/data/photos"))
    );
    assert_eq!(settings.get("scan_interval").unwrap().as_deref(), Some("600"));
    assert_eq!(settings.get("quick_hash_size").unwrap(), None);
}

#[test]
fn test_work_dir_change_requires_confirmation() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("settings.db");
    let settings = Settings::new(SqliteSettingsStore::open(&db).unwrap());

    // Nothing stored yet still counts as a change
    assert!(matches!(
        settings.set("work_dir", "/old", false),
        Err(EngineError::ConfirmationRequired { .. })
    ));
    assert_eq!(settings.work_dir().unwrap(), None);

    let first = settings.set("work_dir", "/old", true).unwrap();
    assert!(first.previous.is_none());

    let refused = settings.set("work_dir", "/new", false);
    assert!(matches!(
        refused,
        Err(EngineError::ConfirmationRequired { ref key }) if key == "work_dir"
    ));
    assert_eq!(settings.work_dir().unwrap(), Some(PathBuf::from("/old")));

    let same = settings.set("work_dir", "/old", false).unwrap();
    assert!(!same.changed());

    let change = settings.set("work_dir", "/new", true).unwrap();
    assert_eq!(change.key, SettingKey::WorkDir);
    assert_eq!(change.previous.as_deref(), Some("/old"));
    assert_eq!(settings.work_dir().unwrap(), Some(PathBuf::from("/new")));
}

#[test]
fn test_invalid_values_are_rejected() {
    let settings = Settings::in_memory();

    for (key, value) in [
        ("quick_hash_size", "0"),
        ("quick_hash_size", "lots"),
        ("scan_interval", "-5"),
        ("work_dir", "   "),
    ] {
        let result = settings.set(key, value, true);
        assert!(
            matches!(
                result,
                Err(EngineError::Settings(SettingsError::InvalidValue { .. }))
            ),
            "{} = {:?} should be rejected",
            key,
            value
        );
    }
}

#[test]
fn test_unknown_key() {
    let settings = Settings::in_memory();

    assert!(matches!(
        settings.get("color"),
        Err(EngineError::Settings(SettingsError::UnknownKey(_)))
    ));
    assert!(settings.set("color", "blue", true).is_err());
}

#[test]
fn test_persisted_tuning_overrides_config() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("settings.db");
    {
        let settings = Settings::new(SqliteSettingsStore::open(&db).unwrap());
        settings.set("quick_hash_size", "8192", false).unwrap();
        settings.set("scan_interval", "30", false).unwrap();
    }

    let settings = Settings::new(SqliteSettingsStore::open(&db).unwrap());
    let engine = Engine::new(Config::default(), settings).unwrap();

    assert_eq!(engine.config().quick_hash_size, 8192);
    assert_eq!(engine.config().scan_interval_secs, 30);
}

#[test]
fn test_unconfirmed_change_through_engine_keeps_results() {
    let engine = Engine::in_memory(Config::default());
    engine.set_setting("work_dir", "/a", true).unwrap();

    let err = engine.set_setting("work_dir", "/b", false).unwrap_err();

    assert_eq!(err.code(), "SM005");
    assert_eq!(engine.get_setting("work_dir").unwrap().as_deref(), Some("/a"));
}
