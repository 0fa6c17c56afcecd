//! dirmerge command-line tool.
//!
//! Merges two source directory trees into a fresh destination. Every path
//! from either source ends up in the destination; conflicting paths are
//! resolved interactively and every decision is recorded in the checkpoint
//! database, so an interrupted run can be resumed with the same command.

mod display;
mod prompt;
mod signals;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use dirmerge_core::db::Store;
use dirmerge_core::engine::MergeEngine;
use dirmerge_core::models::MergeReport;
use dirmerge_core::progress::{spawn_emitter, ProgressCounters};
use dirmerge_core::{ApplyMode, MergeConfig, RunMode};

use crate::prompt::InteractiveResolver;
use crate::signals::EXIT_ABORTED;

const EXIT_OK: u8 = 0;
const EXIT_PARTIAL: u8 = 1;
const EXIT_USAGE: u8 = 3;
const EXIT_FATAL: u8 = 4;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Merge two directory trees into a fresh destination, resumably.
#[derive(Parser, Debug)]
#[command(
    name = "dirmerge",
    version,
    about = "Merge two directory trees into a fresh destination, resumably"
)]
struct Cli {
    /// First source tree.
    source_a: PathBuf,

    /// Second source tree.
    source_b: PathBuf,

    /// Destination tree (created if absent).
    destination: PathBuf,

    /// Path to the checkpoint database.
    #[arg(long, default_value = "merge_checkpoint.db")]
    db: PathBuf,

    /// Discard any existing checkpoint and start fresh.
    #[arg(long)]
    reset: bool,

    /// TOML file with engine tuning overrides.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker count for both the hashing and apply pools.
    #[arg(long)]
    workers: Option<usize>,

    /// Start applying only after classification completes.
    #[arg(long)]
    deferred_apply: bool,

    /// Skip the non-empty destination confirmation.
    #[arg(short = 'y', long)]
    yes: bool,

    /// Log filter when RUST_LOG is not set.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_OK,
                _ => EXIT_USAGE,
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .with_target(false)
        .without_time()
        .init();

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", style::error(&format!("{e:#}")));
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    // Source validation is a usage error, not a fatal one.
    for (label, path) in [("source A", &cli.source_a), ("source B", &cli.source_b)] {
        if !path.is_dir() {
            eprintln!(
                "{}",
                style::error(&format!("{label} is not a directory: {}", path.display()))
            );
            return Ok(EXIT_USAGE);
        }
    }

    let a_root = std::fs::canonicalize(&cli.source_a).context("failed to resolve source A")?;
    let b_root = std::fs::canonicalize(&cli.source_b).context("failed to resolve source B")?;
    std::fs::create_dir_all(&cli.destination).context("failed to create destination root")?;
    let dest_root =
        std::fs::canonicalize(&cli.destination).context("failed to resolve destination")?;

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{e:#}")));
            return Ok(EXIT_USAGE);
        }
    };

    let store = Arc::new(Store::open_or_create(&cli.db).context("failed to open checkpoint")?);
    store.initialize().context("failed to initialize checkpoint")?;
    let (merge_run, mode) = store
        .begin_run(&a_root, &b_root, &dest_root, cli.reset)
        .context("failed to begin run")?;

    if mode == RunMode::Fresh && !cli.yes && !confirm_destination(&dest_root)? {
        println!("Aborted.");
        return Ok(EXIT_OK);
    }
    if mode == RunMode::Resumed {
        println!(
            "{}",
            style::dim(&format!("resuming previous run (phase: {})", merge_run.phase))
        );
    }

    let shutdown = signals::install()?;

    // Progress: engine counters -> sampler -> renderer.
    let counters = Arc::new(ProgressCounters::new());
    let sampler_done = Arc::new(AtomicBool::new(false));
    let (event_tx, event_rx) = crossbeam_channel::bounded(256);
    let sampler = spawn_emitter(
        counters.clone(),
        Duration::from_millis(config.progress_interval_ms),
        event_tx,
        sampler_done.clone(),
    );
    let (bar, renderer) = display::spawn_renderer(event_rx);

    let resolver = Arc::new(InteractiveResolver::new(Some(bar.clone())));
    let engine = MergeEngine::new(
        store.clone(),
        merge_run,
        mode,
        config,
        resolver,
        shutdown,
        counters,
    );
    let result = engine.run();

    sampler_done.store(true, Ordering::SeqCst);
    let _ = sampler.join();
    let _ = renderer.join();
    bar.finish_and_clear();

    let report = result.context("merge failed")?;
    print_summary(&store, &report)?;

    let code = if report.aborted {
        EXIT_ABORTED
    } else if report.failed.is_empty() {
        EXIT_OK
    } else {
        EXIT_PARTIAL
    };
    Ok(code)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_config(cli: &Cli) -> Result<MergeConfig> {
    let mut config = match &cli.config {
        Some(path) => MergeConfig::load_from_file(path).context("failed to load config file")?,
        None => MergeConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config.hash_workers = workers;
        config.apply_workers = workers;
    }
    if cli.deferred_apply {
        config.apply_mode = ApplyMode::Deferred;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Warn before merging into a destination that already has content (unless
/// we are resuming, where that is the whole point).
fn confirm_destination(dest: &Path) -> Result<bool> {
    let non_empty = dest.read_dir()?.next().is_some();
    if !non_empty {
        return Ok(true);
    }
    println!(
        "{}",
        style::warn(&format!(
            "destination is not empty: {}",
            dest.display()
        ))
    );
    print!("Continue anyway? [y/N]: ");
    use std::io::Write;
    let _ = std::io::stdout().flush();

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().eq_ignore_ascii_case("y"))
}

fn print_summary(store: &Store, report: &MergeReport) -> Result<()> {
    println!();
    if report.aborted {
        println!(
            "{}",
            style::warn("merge interrupted; progress saved, re-run the same command to resume")
        );
    } else if report.failed.is_empty() {
        println!("{}", style::success("merge complete"));
    } else {
        println!("{}", style::warn("merge completed with errors"));
    }

    println!("  total paths:        {}", report.total_paths);
    println!("  applied:            {}", report.applied);
    if report.skipped > 0 {
        println!("  already up to date: {}", report.skipped);
    }
    if report.conflicts_resolved > 0 {
        println!("  conflicts resolved: {}", report.conflicts_resolved);
    }
    if !report.failed.is_empty() {
        println!("  failed:             {}", report.failed.len());
    }

    let decisions = store.list_decisions(100)?;
    if !decisions.is_empty() {
        println!();
        println!("{}", style::header("Conflict decisions"));

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Path", "Choice", "Winner", "Decided"]);
        for d in &decisions {
            table.add_row(vec![
                Cell::new(&d.rel_path),
                Cell::new(&d.choice),
                Cell::new(d.winner.to_uppercase()),
                Cell::new(&d.decided_at[..19.min(d.decided_at.len())]),
            ]);
        }
        println!("{table}");
    }

    if !report.failed.is_empty() {
        eprintln!();
        eprintln!("{}", style::error("failed paths:"));
        for (rel_path, error) in &report.failed {
            eprintln!("  {rel_path}");
            eprintln!("    {}", style::dim(error));
        }
    }

    Ok(())
}
