//! Source-tree scanner.
//!
//! Walks one source root depth-first in pre-order (directories before their
//! contents), merging every discovered entry into the store in batches.
//! Symlinks are never followed; the link target string is recorded verbatim.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::db::Store;
use crate::errors::StoreError;
use crate::models::{EntryKind, ScannedEntry, Side};

/// Result of scanning one side.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Entries merged into the store.
    pub entries: u64,
    /// Entries that could not be read; their rows are marked failed.
    pub errors: u64,
    /// True when the walk was cut short by a shutdown request.
    pub interrupted: bool,
}

/// Convert a [`SystemTime`] to unix nanoseconds.
pub(crate) fn system_time_nanos(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(e) => -(e.duration().as_nanos() as i64),
    }
}

/// Walk `root` and merge everything reachable below it into the store as
/// side `side`. Individual unreadable entries become failed rows; the walk
/// itself continues. Safe to re-run: upserts are idempotent.
pub fn scan_side(
    store: &Store,
    root: &Path,
    side: Side,
    batch_size: usize,
    shutdown: &AtomicBool,
) -> Result<ScanOutcome, StoreError> {
    info!(root = %root.display(), side = %side, "scanning source tree");

    let mut outcome = ScanOutcome::default();
    let mut batch: Vec<ScannedEntry> = Vec::with_capacity(batch_size);
    let mut failures: Vec<(String, String)> = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        if shutdown.load(Ordering::SeqCst) {
            outcome.interrupted = true;
            break;
        }

        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let rel = e
                    .path()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(|p| p.to_string_lossy().into_owned());
                warn!(side = %side, error = %e, "walk error, skipping entry");
                if let Some(rel) = rel {
                    failures.push((rel, e.to_string()));
                }
                outcome.errors += 1;
                continue;
            }
        };

        let rel_path = match entry.path().strip_prefix(root) {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(_) => continue,
        };

        match stat_entry(&entry, rel_path.clone()) {
            Ok(scanned) => {
                batch.push(scanned);
                outcome.entries += 1;
            }
            Err(e) => {
                warn!(side = %side, rel_path = %rel_path, error = %e, "unreadable entry");
                failures.push((rel_path, e.to_string()));
                outcome.errors += 1;
            }
        }

        if batch.len() >= batch_size {
            store.upsert_side_batch(side, &batch)?;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        store.upsert_side_batch(side, &batch)?;
    }

    // Unreadable entries still get a row (I1 holds for them) so the summary
    // can name them; they go straight to failed.
    if !failures.is_empty() {
        let stubs: Vec<ScannedEntry> = failures
            .iter()
            .map(|(rel, _)| ScannedEntry {
                rel_path: rel.clone(),
                kind: EntryKind::File,
                size: None,
                mtime: None,
                link_target: None,
            })
            .collect();
        store.upsert_side_batch(side, &stubs)?;
        store.mark_failed_batch(&failures)?;
    }

    debug!(
        side = %side,
        entries = outcome.entries,
        errors = outcome.errors,
        interrupted = outcome.interrupted,
        "scan finished"
    );
    Ok(outcome)
}

fn stat_entry(entry: &walkdir::DirEntry, rel_path: String) -> std::io::Result<ScannedEntry> {
    let file_type = entry.file_type();
    // walkdir stats without following links, so symlinks report themselves.
    let metadata = entry.metadata().map_err(|e| {
        e.into_io_error()
            .unwrap_or_else(|| std::io::Error::other("metadata unavailable"))
    })?;
    let mtime = metadata.modified().ok().map(system_time_nanos);

    let scanned = if file_type.is_dir() {
        ScannedEntry {
            rel_path,
            kind: EntryKind::Dir,
            size: None,
            mtime,
            link_target: None,
        }
    } else if file_type.is_symlink() {
        let target = std::fs::read_link(entry.path())?;
        ScannedEntry {
            rel_path,
            kind: EntryKind::Symlink,
            size: None,
            mtime,
            link_target: Some(target.to_string_lossy().into_owned()),
        }
    } else {
        ScannedEntry {
            rel_path,
            kind: EntryKind::File,
            size: Some(metadata.len() as i64),
            mtime,
            link_target: None,
        }
    };
    Ok(scanned)
}
