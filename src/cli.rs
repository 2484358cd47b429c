//! Command-line interface definitions for storamen.
//!
//! # Example
//!
//! ```bash
//! # Scan the persisted work_dir and list duplicates largest first
//! storamen scan
//!
//! # Scan a directory, only list groups of 1 MB or more, as JSON
//! storamen scan ~/Downloads --min-size 1MB --json
//!
//! # Scan, then search by tag
//! storamen search ~/Music mp3 live --page 1
//!
//! # Rescan the work_dir every ten minutes
//! storamen watch --interval 600
//!
//! # Change the working directory (discards previous results)
//! storamen settings set work_dir /data --confirm
//! ```

use std::path::PathBuf;

use bytesize::ByteSize;
use clap::{Args, Parser, Subcommand};

use crate::search::parse_tags;

/// Background duplicate scanner with tag search.
#[derive(Debug, Parser)]
#[command(name = "storamen")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Report errors as JSON on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file (default: storamen.toml in the config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Settings database (default: storamen.db in the data directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan a directory and list duplicate groups
    Scan(ScanArgs),
    /// Scan a directory and search its entries by tag
    Search(SearchArgs),
    /// Rescan the persisted work_dir every scan_interval until interrupted
    Watch(WatchArgs),
    /// Read or change persisted settings
    Settings(SettingsArgs),
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directory to scan (default: the persisted work_dir)
    #[arg(value_name = "PATH")]
    pub path: Option<PathBuf>,

    /// Only list groups whose members are at least this large (e.g. 10KB, 1MiB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size, default_value = "0")]
    pub min_size: u64,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the search subcommand.
#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Directory to scan
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Tags to search for (only the first 8 are used)
    #[arg(value_name = "TAG", required = true)]
    pub tags: Vec<String>,

    /// Zero-indexed result page
    #[arg(long, default_value = "0")]
    pub page: usize,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchArgs {
    /// Query terms, with comma separated arguments split apart.
    #[must_use]
    pub fn query_tags(&self) -> Vec<String> {
        self.tags.iter().flat_map(|raw| parse_tags(raw)).collect()
    }
}

/// Arguments for the watch subcommand.
#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Seconds between scans (default: the scan_interval setting)
    #[arg(long, value_name = "SECS")]
    pub interval: Option<u64>,
}

/// Arguments for the settings subcommand.
#[derive(Debug, Args)]
pub struct SettingsArgs {
    /// Settings action
    #[command(subcommand)]
    pub action: SettingsAction,
}

/// Settings actions.
#[derive(Debug, Subcommand)]
pub enum SettingsAction {
    /// Print a setting
    Get {
        /// work_dir, quick_hash_size or scan_interval
        key: String,
    },
    /// Change a setting
    Set {
        /// work_dir, quick_hash_size or scan_interval
        key: String,
        /// New value
        value: String,
        /// Confirm a work_dir change (previous results are discarded)
        #[arg(long)]
        confirm: bool,
    },
}

/// Parse a human-readable size such as `500`, `10KB` or `1MiB`.
///
/// # Errors
///
/// Returns a message if the value is not a size.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }
    s.parse::<ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|e| format!("Invalid size '{}': {}", s, e))
}
