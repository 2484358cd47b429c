//! Storamen - background duplicate scanner with tag search
//!
//! Scans a directory tree on a background thread, groups identical files and
//! identical directory subtrees by BLAKE3 fingerprints, and indexes every
//! entry by path-derived tags. Callers poll progress, list duplicate groups,
//! search, and remove redundant copies through [`engine::Engine`].

pub mod actions;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod engine;
pub mod error;
pub mod logging;
pub mod progress;
pub mod scanner;
pub mod search;
pub mod settings;
pub mod signal;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytesize::ByteSize;
use serde::Serialize;
use yansi::Paint;

use crate::cli::{Cli, Commands, ScanArgs, SearchArgs, SettingsAction, WatchArgs};
use crate::config::Config;
use crate::duplicates::DuplicateGroup;
use crate::engine::{Engine, ScanStatus, ScanSummary, Scheduler};
use crate::error::{EngineError, ExitCode};
use crate::progress::ScanProgress;
use crate::scanner::FileRecord;
use crate::settings::{Settings, SqliteSettingsStore};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run the storamen CLI.
///
/// # Errors
///
/// Returns an error if configuration, the settings database, or the
/// requested operation fails.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);
    if cli.no_color {
        yansi::disable();
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(Some(path.as_path()))?,
        None => Config::load()?,
    };
    let db_path = match &cli.database {
        Some(path) => path.clone(),
        None => SqliteSettingsStore::default_path()?,
    };
    let store = SqliteSettingsStore::open(&db_path)
        .with_context(|| format!("cannot open settings database {}", db_path.display()))?;
    let engine = Engine::new(config, Settings::new(store))?;
    log::debug!("Settings database: {}", db_path.display());

    match cli.command {
        Commands::Scan(args) => run_scan(&engine, &args, cli.quiet),
        Commands::Search(args) => run_search(&engine, &args, cli.quiet),
        Commands::Watch(args) => run_watch(&engine, &args, cli.quiet),
        Commands::Settings(args) => run_settings(&engine, args.action),
    }
}

/// Start a scan of `root` and poll it to completion.
///
/// Returns `Some(ExitCode::Interrupted)` if Ctrl+C arrived first.
fn scan_to_completion(engine: &Engine, root: &Path, quiet: bool) -> Result<Option<ExitCode>> {
    let shutdown = signal::install_handler()?;

    if let Some(advisory) = engine.reset_scanner() {
        log::warn!("{}", advisory);
    }
    let ticket = engine.try_spawn_scan(root)?;
    log::info!("Scan #{} started: {}", ticket.generation(), root.display());

    let progress = ScanProgress::new(quiet);
    let state = loop {
        if shutdown.is_shutdown_requested() {
            progress.finish();
            log::warn!("Interrupted, abandoning scan #{}", ticket.generation());
            return Ok(Some(ExitCode::Interrupted));
        }
        let state = engine.progress();
        progress.update(&state);
        if state.generation != ticket.generation() || state.status != ScanStatus::Running {
            break state;
        }
        thread::sleep(POLL_INTERVAL);
    };
    progress.finish();

    match state.status {
        ScanStatus::Finished if state.generation == ticket.generation() => Ok(None),
        ScanStatus::Stale => {
            Err(EngineError::ScanAborted("scan stopped responding".to_string()).into())
        }
        _ => Err(EngineError::ScanAborted(
            state
                .failure
                .unwrap_or_else(|| "scan ended without results".to_string()),
        )
        .into()),
    }
}

fn resolve_root(engine: &Engine, path: Option<&PathBuf>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path.clone()),
        None => match engine.work_dir()? {
            Some(dir) => Ok(dir),
            None => bail!("no PATH given and work_dir is not set"),
        },
    }
}

#[derive(Serialize)]
struct ScanReport<'a> {
    summary: Option<&'a ScanSummary>,
    groups: &'a [DuplicateGroup],
}

fn run_scan(engine: &Engine, args: &ScanArgs, quiet: bool) -> Result<ExitCode> {
    let root = resolve_root(engine, args.path.as_ref())?;
    if let Some(code) = scan_to_completion(engine, &root, quiet || args.json)? {
        return Ok(code);
    }

    let listing = engine.list_duplicates(args.min_size);
    log::debug!(
        "{} duplicate groups of at least {}",
        listing.total(),
        ByteSize(args.min_size)
    );
    let groups: Vec<DuplicateGroup> = listing.collect();
    let summary = engine.summary();
    if args.json {
        let report = ScanReport {
            summary: summary.as_ref(),
            groups: &groups,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !quiet {
        print_groups(&groups);
        if let Some(summary) = &summary {
            println!("{}", summary.to_string().dim());
        }
    }

    if groups.is_empty() {
        Ok(ExitCode::NoDuplicates)
    } else {
        Ok(ExitCode::Success)
    }
}

fn print_groups(groups: &[DuplicateGroup]) {
    if groups.is_empty() {
        println!("{}", "No duplicates found.".green());
        return;
    }
    for group in groups {
        let kind = if group.is_directory { "dir" } else { "file" };
        let hash = group.hash_hex();
        println!(
            "{} {} x{} {} ({} reclaimable) {}",
            format!("#{}", group.id).bold(),
            kind,
            group.len(),
            ByteSize(group.size).to_string().cyan(),
            ByteSize(group.reclaimable()).to_string().yellow(),
            hash[..12].dim()
        );
        for member in &group.members {
            let id = format!("{}/{}", group.id, member.id);
            println!("  {:>8}  {}", id.dim(), member.record.path.display());
        }
    }
}

fn run_search(engine: &Engine, args: &SearchArgs, quiet: bool) -> Result<ExitCode> {
    if let Some(code) = scan_to_completion(engine, &args.path, quiet || args.json)? {
        return Ok(code);
    }

    let hits = engine.search(&args.query_tags(), args.page);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
    } else {
        print_hits(&hits, args.page);
    }
    Ok(ExitCode::Success)
}

fn print_hits(hits: &[Arc<FileRecord>], page: usize) {
    if hits.is_empty() {
        println!("No matches on page {}.", page);
        return;
    }
    for record in hits {
        let size = if record.is_directory {
            "dir".to_string()
        } else {
            ByteSize(record.size).to_string()
        };
        println!("{:>10}  {}", size.cyan(), record.path.display());
    }
}

fn run_watch(engine: &Engine, args: &WatchArgs, quiet: bool) -> Result<ExitCode> {
    let Some(root) = engine.work_dir()? else {
        bail!("work_dir is not set (storamen settings set work_dir PATH)");
    };
    let secs = args.interval.unwrap_or(engine.config().scan_interval_secs);
    if secs == 0 {
        bail!("scan interval is 0; pass --interval or set scan_interval");
    }

    if let Some(code) = scan_to_completion(engine, &root, quiet)? {
        return Ok(code);
    }
    report_summary(engine, quiet);

    let scheduler = Scheduler::start(engine.clone(), Duration::from_secs(secs))
        .context("cannot start scan scheduler")?;
    let shutdown = signal::install_handler()?;
    let mut seen = engine.snapshot().generation;
    while !shutdown.is_shutdown_requested() {
        thread::sleep(POLL_INTERVAL);
        let generation = engine.snapshot().generation;
        if generation != seen {
            seen = generation;
            report_summary(engine, quiet);
        }
    }
    scheduler.stop();
    Ok(ExitCode::Interrupted)
}

fn report_summary(engine: &Engine, quiet: bool) {
    if quiet {
        return;
    }
    match engine.summary() {
        Some(summary) => println!("{}", summary),
        None => println!("{}", "No results yet.".dim()),
    }
}

fn run_settings(engine: &Engine, action: SettingsAction) -> Result<ExitCode> {
    match action {
        SettingsAction::Get { key } => {
            match engine.get_setting(&key)? {
                Some(value) => println!("{}", value),
                None => println!("{}", "(unset)".dim()),
            }
            Ok(ExitCode::Success)
        }
        SettingsAction::Set {
            key,
            value,
            confirm,
        } => {
            let change = match engine.set_setting(&key, &value, confirm) {
                Err(EngineError::ConfirmationRequired { key }) => bail!(
                    "changing '{}' discards the current results; rerun with --confirm",
                    key
                ),
                other => other?,
            };
            if change.changed() {
                println!("{} = {}", change.key.bold(), change.value);
            } else {
                println!("{} unchanged", change.key);
            }
            Ok(ExitCode::Success)
        }
    }
}
