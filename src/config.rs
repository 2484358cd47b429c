//! Engine tuning configuration.
//!
//! Values are layered with figment: built-in defaults, then
//! `storamen.toml` from the platform config directory (or an explicit
//! path), then `STORAMEN_*` environment variables.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::actions::delete::DeleteMode;
use crate::scanner::{WalkerConfig, PREHASH_SIZE};
use crate::search::TagMatch;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bytes sampled for the quick hash.
    pub quick_hash_size: usize,
    /// Records smaller than this are never grouped.
    pub min_size: u64,
    /// Entries between heartbeats.
    pub heartbeat_batch: usize,
    /// Seconds without a heartbeat before a running scan counts as stale.
    pub stale_after_secs: u64,
    /// Search results per page.
    pub page_size: usize,
    /// How multiple search tags combine.
    pub tag_match: TagMatch,
    /// Threads used for hashing I/O.
    pub io_threads: usize,
    /// Group whole directories as well as files.
    pub include_directories: bool,
    /// Skip entries whose name starts with `.`.
    pub skip_hidden: bool,
    /// Follow symbolic links while walking.
    pub follow_symlinks: bool,
    /// Gitignore-style patterns excluded from scans.
    pub ignore_patterns: Vec<String>,
    /// How removed duplicates are deleted.
    pub delete_mode: DeleteMode,
    /// Seconds between periodic scans; 0 disables them.
    pub scan_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            quick_hash_size: PREHASH_SIZE,
            min_size: 1,
            heartbeat_batch: 256,
            stale_after_secs: 300,
            page_size: 50,
            tag_match: TagMatch::Any,
            io_threads: 4,
            include_directories: true,
            skip_hidden: false,
            follow_symlinks: false,
            ignore_patterns: Vec::new(),
            delete_mode: DeleteMode::Permanent,
            scan_interval_secs: 0,
        }
    }
}

impl Config {
    /// Load from the default config file (if present) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a layer fails to parse or validation fails.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path().as_deref())
    }

    /// Load from an explicit file (skipped if `None` or missing) and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a layer fails to parse or validation fails.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            log::debug!("Loading configuration from {}", path.display());
            figment = figment.merge(Toml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed("STORAMEN_"))
            .extract()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would make the engine misbehave.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.quick_hash_size == 0 {
            bail!("quick_hash_size must be positive");
        }
        if self.page_size == 0 {
            bail!("page_size must be positive");
        }
        if self.heartbeat_batch == 0 {
            bail!("heartbeat_batch must be positive");
        }
        if self.io_threads == 0 {
            bail!("io_threads must be positive");
        }
        Ok(())
    }

    /// Write the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("cannot write {}", path.display()))?;
        Ok(())
    }

    /// Default platform-specific config file path.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "storamen").map(|dirs| dirs.config_dir().join("storamen.toml"))
    }

    /// Walker options derived from this configuration.
    #[must_use]
    pub fn walker_config(&self) -> WalkerConfig {
        WalkerConfig {
            follow_symlinks: self.follow_symlinks,
            skip_hidden: self.skip_hidden,
            include_directories: self.include_directories,
            ignore_patterns: self.ignore_patterns.clone(),
        }
    }
}
