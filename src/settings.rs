//! Persisted system settings.
//!
//! Settings are the only durable state outside the filesystem. They live in
//! a small key/value table behind the [`SettingsStore`] trait, backed by
//! SQLite in the binary and by a map in tests.
//!
//! Changing `work_dir` to a different tree throws away every published
//! result, so [`Settings::set`] refuses it unless the caller confirms.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::error::EngineError;

/// Errors from the settings store.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The SQLite store failed.
    #[error("settings database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The database directory could not be created.
    #[error("cannot create settings directory {path}: {source}")]
    Io {
        /// Directory that could not be created
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// No platform data directory could be determined.
    #[error("cannot determine the data directory")]
    NoDataDir,

    /// The key is not a known setting.
    #[error("unknown setting: {0}")]
    UnknownKey(String),

    /// The value does not parse for this key.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        /// Setting key
        key: SettingKey,
        /// Rejected value
        value: String,
        /// What was wrong with it
        reason: &'static str,
    },
}

/// Known setting keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    /// Root directory scanned by default
    WorkDir,
    /// Bytes sampled for the quick hash
    QuickHashSize,
    /// Seconds between periodic scans (0 disables them)
    ScanInterval,
}

impl SettingKey {
    /// Every known key.
    pub const ALL: [SettingKey; 3] = [Self::WorkDir, Self::QuickHashSize, Self::ScanInterval];

    /// Name used in the store and on the command line.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkDir => "work_dir",
            Self::QuickHashSize => "quick_hash_size",
            Self::ScanInterval => "scan_interval",
        }
    }

    fn validate(self, value: &str) -> Result<(), SettingsError> {
        let invalid = |reason| SettingsError::InvalidValue {
            key: self,
            value: value.to_string(),
            reason,
        };
        match self {
            Self::WorkDir if value.trim().is_empty() => Err(invalid("must not be empty")),
            Self::WorkDir => Ok(()),
            Self::QuickHashSize => match value.parse::<usize>() {
                Ok(0) => Err(invalid("must be positive")),
                Ok(_) => Ok(()),
                Err(_) => Err(invalid("expected a byte count")),
            },
            Self::ScanInterval => value
                .parse::<u64>()
                .map(|_| ())
                .map_err(|_| invalid("expected a number of seconds")),
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s.trim())
            .ok_or_else(|| SettingsError::UnknownKey(s.to_string()))
    }
}

/// Key/value persistence for settings.
pub trait SettingsStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettingsStore {
    fn values(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// SQLite store using a `sysinfo(key, value)` table.
pub struct SqliteSettingsStore {
    conn: Mutex<Connection>,
}

impl SqliteSettingsStore {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or database cannot be created.
    pub fn open(path: &Path) -> Result<Self, SettingsError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        log::debug!("Opening settings database: {}", path.display());
        Self::init(Connection::open(path)?)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot create the database.
    pub fn open_in_memory() -> Result<Self, SettingsError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SettingsError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sysinfo (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Default database location in the platform data directory.
    ///
    /// # Errors
    ///
    /// `NoDataDir` if the platform has no home directory.
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        ProjectDirs::from("", "", "storamen")
            .map(|dirs| dirs.data_dir().join("storamen.db"))
            .ok_or(SettingsError::NoDataDir)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SettingsStore for SqliteSettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM sysinfo WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.conn().execute(
            "INSERT INTO sysinfo (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}

/// Outcome of a successful [`Settings::set`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingChange {
    /// Key written
    pub key: SettingKey,
    /// Value before the change
    pub previous: Option<String>,
    /// Value after the change
    pub value: String,
}

impl SettingChange {
    /// Whether the stored value actually changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.previous.as_deref() != Some(self.value.as_str())
    }
}

/// Validated access to the settings store.
pub struct Settings {
    store: Box<dyn SettingsStore>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings").finish_non_exhaustive()
    }
}

impl Settings {
    /// Wrap a store.
    #[must_use]
    pub fn new(store: impl SettingsStore + 'static) -> Self {
        Self {
            store: Box::new(store),
        }
    }

    /// Settings kept in memory only.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MemorySettingsStore::default())
    }

    /// Read a setting.
    ///
    /// # Errors
    ///
    /// Unknown keys and store failures.
    pub fn get(&self, key: &str) -> Result<Option<String>, EngineError> {
        let key: SettingKey = key.parse()?;
        Ok(self.store.get(key.as_str())?)
    }

    /// The persisted working directory, if any.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn work_dir(&self) -> Result<Option<PathBuf>, EngineError> {
        Ok(self
            .store
            .get(SettingKey::WorkDir.as_str())?
            .map(PathBuf::from))
    }

    /// Write a setting.
    ///
    /// Setting `work_dir` to anything other than the stored value requires
    /// `confirm`, including when nothing is stored yet; without it nothing is
    /// written.
    ///
    /// # Errors
    ///
    /// `ConfirmationRequired` for an unconfirmed `work_dir` change, and
    /// `Settings` for unknown keys, invalid values and store failures.
    pub fn set(&self, key: &str, value: &str, confirm: bool) -> Result<SettingChange, EngineError> {
        let key: SettingKey = key.parse()?;
        let value = value.trim();
        key.validate(value)?;

        let previous = self.store.get(key.as_str())?;
        let change = SettingChange {
            key,
            previous,
            value: value.to_string(),
        };

        if key == SettingKey::WorkDir && change.changed() && !confirm {
            log::info!("Refusing unconfirmed change of {} to {}", key, value);
            return Err(EngineError::ConfirmationRequired {
                key: key.as_str().to_string(),
            });
        }

        if change.changed() {
            self.store.set(key.as_str(), value)?;
            log::info!("Setting {} = {}", key, value);
        }
        Ok(change)
    }

    /// Let persisted values override the tuning configuration.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn apply_to(&self, config: &mut Config) -> Result<(), SettingsError> {
        if let Some(size) = self
            .store
            .get(SettingKey::QuickHashSize.as_str())?
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
        {
            config.quick_hash_size = size;
        }
        if let Some(interval) = self
            .store
            .get(SettingKey::ScanInterval.as_str())?
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.scan_interval_secs = interval;
        }
        Ok(())
    }
}
