//! Action execution against the destination tree.
//!
//! Copies go through a temporary sibling (`<name>.part.<run_id>`) followed
//! by an atomic rename, so a crash never leaves a half-written file at its
//! final path. Every operation is idempotent: re-running an already
//! materialized row is a skip, which is what makes resume safe.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use filetime::FileTime;
use tracing::{debug, trace, warn};

use crate::hasher::hash_file;
use crate::models::{Action, PathRecord, Side};

/// Immutable context shared by all apply workers.
#[derive(Debug, Clone)]
pub struct ApplyContext {
    pub a_root: PathBuf,
    pub b_root: PathBuf,
    pub dest_root: PathBuf,
    pub run_id: String,
    pub chunk_size: usize,
}

impl ApplyContext {
    pub fn source_root(&self, side: Side) -> &Path {
        match side {
            Side::A => &self.a_root,
            Side::B => &self.b_root,
        }
    }
}

/// How a row was materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The destination was written by this invocation.
    Applied,
    /// The destination already held the intended content.
    Skipped,
}

/// Internal apply failure modes; only the worker loop sees these.
#[derive(Debug)]
pub enum ApplyError {
    /// Shutdown requested mid-copy; the temp file is left for startup
    /// cleanup and the row stays ready.
    Interrupted,
    Io(std::io::Error),
}

impl From<std::io::Error> for ApplyError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// One unit of apply work: a ready row and its concrete action
/// (decided conflicts arrive with the winner already folded in).
#[derive(Debug, Clone)]
pub struct ApplyJob {
    pub record: PathRecord,
    pub action: Action,
}

/// What a worker reports back for one job.
#[derive(Debug)]
pub enum ApplyStatus {
    Done(Disposition),
    /// This row failed; the run continues.
    RowFailed(String),
    /// The destination filesystem is unusable (confirmed by a retry);
    /// the run must abort.
    Fatal(String),
}

#[derive(Debug)]
pub struct ApplyOutcome {
    pub rel_path: String,
    pub status: ApplyStatus,
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Execute one action. Callers pick the action (including folding a
/// conflict decision into a concrete one) before getting here.
pub fn execute(
    ctx: &ApplyContext,
    record: &PathRecord,
    action: Action,
    shutdown: &AtomicBool,
) -> Result<Disposition, ApplyError> {
    let dest = ctx.dest_root.join(&record.rel_path);
    match action {
        Action::Mkdir => {
            std::fs::create_dir_all(&dest)?;
            Ok(Disposition::Applied)
        }
        Action::CopyFrom(side) => copy_file(ctx, record, side, &dest, shutdown),
        Action::CreateSymlink(side) => create_symlink(record, side, &dest),
        // Undecided conflicts never reach the applier.
        Action::Conflict => Err(ApplyError::Io(std::io::Error::other(
            "conflict row dispatched without a decision",
        ))),
    }
}

fn copy_file(
    ctx: &ApplyContext,
    record: &PathRecord,
    side: Side,
    dest: &Path,
    shutdown: &AtomicBool,
) -> Result<Disposition, ApplyError> {
    let src = ctx.source_root(side).join(&record.rel_path);

    // Resume case: if the destination already carries the intended bytes,
    // leave it alone.
    if dest.is_file() {
        let expected = match record.hash(side) {
            Some(h) => Some(h),
            None => hash_file(&src, ctx.chunk_size, shutdown)?,
        };
        let Some(expected) = expected else {
            return Err(ApplyError::Interrupted);
        };
        match hash_file(dest, ctx.chunk_size, shutdown)? {
            Some(found) if found == expected => {
                trace!(rel_path = %record.rel_path, "destination already up to date");
                return Ok(Disposition::Skipped);
            }
            Some(_) => {
                debug!(rel_path = %record.rel_path, "destination diverged, overwriting");
            }
            None => return Err(ApplyError::Interrupted),
        }
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp = part_path(dest, &ctx.run_id);
    let mut reader = std::fs::File::open(&src)?;
    let mut writer = std::fs::File::create(&temp)?;
    let mut buf = vec![0u8; ctx.chunk_size];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        if shutdown.load(Ordering::SeqCst) {
            // Leave the temp for startup cleanup.
            return Err(ApplyError::Interrupted);
        }
    }
    writer.sync_all()?;
    drop(writer);

    if let Some(mtime) = record.mtime(side) {
        filetime::set_file_mtime(&temp, file_time_from_nanos(mtime))?;
    }
    std::fs::rename(&temp, dest)?;
    Ok(Disposition::Applied)
}

fn create_symlink(
    record: &PathRecord,
    side: Side,
    dest: &Path,
) -> Result<Disposition, ApplyError> {
    let target = record.link_target(side).ok_or_else(|| {
        ApplyError::Io(std::io::Error::other("symlink row without a recorded target"))
    })?;

    if let Ok(meta) = std::fs::symlink_metadata(dest) {
        if meta.file_type().is_symlink() {
            if let Ok(existing) = std::fs::read_link(dest) {
                if existing.as_os_str() == std::ffi::OsStr::new(target) {
                    return Ok(Disposition::Skipped);
                }
            }
        }
        std::fs::remove_file(dest)?;
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, dest)?;
        Ok(Disposition::Applied)
    }
    #[cfg(not(unix))]
    {
        Err(ApplyError::Io(std::io::Error::other(
            "symlink creation is not supported on this platform",
        )))
    }
}

/// Convert stored unix nanoseconds into a [`FileTime`].
pub fn file_time_from_nanos(nanos: i64) -> FileTime {
    let secs = nanos.div_euclid(1_000_000_000);
    let nsec = nanos.rem_euclid(1_000_000_000) as u32;
    FileTime::from_unix_time(secs, nsec)
}

/// The temporary sibling used for crash-safe copies.
pub fn part_path(dest: &Path, run_id: &str) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!("{name}.part.{run_id}"))
}

/// Remove `*.part.*` temp files under `dest_root` left by runs other than
/// `active_run_id`. Called once at startup.
pub fn clean_stale_temps(dest_root: &Path, active_run_id: &str) -> std::io::Result<u64> {
    let mut removed = 0;
    if !dest_root.exists() {
        return Ok(0);
    }
    for entry in walkdir::WalkDir::new(dest_root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "walk error during temp cleanup");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if let Some(pos) = name.find(".part.") {
            let run_id = &name[pos + ".part.".len()..];
            if run_id != active_run_id {
                debug!(path = %entry.path().display(), "removing stale temp file");
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

fn is_destination_unusable(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::StorageFull | std::io::ErrorKind::ReadOnlyFilesystem
    )
}

/// Spawn the apply pool. Workers drain `jobs` until the channel closes or
/// shutdown is requested. An out-of-space / read-only destination error is
/// retried once before escalating to a fatal outcome.
pub fn spawn_workers(
    count: usize,
    jobs: Receiver<ApplyJob>,
    outcomes: Sender<ApplyOutcome>,
    ctx: Arc<ApplyContext>,
    shutdown: Arc<AtomicBool>,
) -> Vec<JoinHandle<()>> {
    debug!(workers = count, "starting apply pool");
    (0..count)
        .map(|worker| {
            let jobs = jobs.clone();
            let outcomes = outcomes.clone();
            let ctx = ctx.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name(format!("apply-{worker}"))
                .spawn(move || {
                    for job in jobs.iter() {
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        let status = run_job(&ctx, &job, &shutdown);
                        let Some(status) = status else { break };
                        if outcomes
                            .send(ApplyOutcome {
                                rel_path: job.record.rel_path.clone(),
                                status,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                })
                .expect("failed to spawn apply worker")
        })
        .collect()
}

/// Run one job, including the single confirmation retry for unusable
/// destinations. `None` means interrupted: nothing is reported and the row
/// stays ready for the next run.
fn run_job(ctx: &ApplyContext, job: &ApplyJob, shutdown: &AtomicBool) -> Option<ApplyStatus> {
    match execute(ctx, &job.record, job.action, shutdown) {
        Ok(disposition) => Some(ApplyStatus::Done(disposition)),
        Err(ApplyError::Interrupted) => None,
        Err(ApplyError::Io(e)) if is_destination_unusable(&e) => {
            warn!(rel_path = %job.record.rel_path, error = %e, "destination error, retrying once");
            match execute(ctx, &job.record, job.action, shutdown) {
                Ok(disposition) => Some(ApplyStatus::Done(disposition)),
                Err(ApplyError::Interrupted) => None,
                Err(ApplyError::Io(e2)) if is_destination_unusable(&e2) => {
                    Some(ApplyStatus::Fatal(e2.to_string()))
                }
                Err(ApplyError::Io(e2)) => Some(ApplyStatus::RowFailed(e2.to_string())),
            }
        }
        Err(ApplyError::Io(e)) => Some(ApplyStatus::RowFailed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryKind, RowStatus};

    const CHUNK: usize = 64 * 1024;

    fn ctx(a: &Path, b: &Path, dest: &Path) -> ApplyContext {
        ApplyContext {
            a_root: a.to_path_buf(),
            b_root: b.to_path_buf(),
            dest_root: dest.to_path_buf(),
            run_id: "test-run".into(),
            chunk_size: CHUNK,
        }
    }

    fn file_record(rel_path: &str, side: Side, size: i64, mtime: i64) -> PathRecord {
        let mut rec = PathRecord {
            rel_path: rel_path.into(),
            in_a: false,
            in_b: false,
            kind_a: EntryKind::Absent,
            kind_b: EntryKind::Absent,
            size_a: None,
            size_b: None,
            mtime_a: None,
            mtime_b: None,
            link_target_a: None,
            link_target_b: None,
            hash_a: None,
            hash_b: None,
            action: None,
            status: RowStatus::Ready,
            queued_at: None,
            decision_choice: None,
            winner: None,
            error: None,
        };
        match side {
            Side::A => {
                rec.in_a = true;
                rec.kind_a = EntryKind::File;
                rec.size_a = Some(size);
                rec.mtime_a = Some(mtime);
            }
            Side::B => {
                rec.in_b = true;
                rec.kind_b = EntryKind::File;
                rec.size_b = Some(size);
                rec.mtime_b = Some(mtime);
            }
        }
        rec
    }

    #[test]
    fn test_mkdir_is_idempotent() {
        let dest = tempfile::tempdir().unwrap();
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let ctx = ctx(a.path(), b.path(), dest.path());
        let off = AtomicBool::new(false);

        let mut rec = file_record("nested/dir", Side::A, 0, 0);
        rec.kind_a = EntryKind::Dir;
        rec.size_a = None;

        execute(&ctx, &rec, Action::Mkdir, &off).unwrap();
        execute(&ctx, &rec, Action::Mkdir, &off).unwrap();
        assert!(dest.path().join("nested/dir").is_dir());
    }

    #[test]
    fn test_copy_writes_content_and_preserves_mtime() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let off = AtomicBool::new(false);

        std::fs::write(a.path().join("doc.txt"), b"payload").unwrap();
        let mtime_nanos = 1_600_000_000_000_000_000i64;
        filetime::set_file_mtime(
            a.path().join("doc.txt"),
            file_time_from_nanos(mtime_nanos),
        )
        .unwrap();

        let ctx = ctx(a.path(), b.path(), dest.path());
        let rec = file_record("doc.txt", Side::A, 7, mtime_nanos);

        let disposition = execute(&ctx, &rec, Action::CopyFrom(Side::A), &off).unwrap();
        assert_eq!(disposition, Disposition::Applied);
        assert_eq!(
            std::fs::read(dest.path().join("doc.txt")).unwrap(),
            b"payload"
        );

        let meta = std::fs::metadata(dest.path().join("doc.txt")).unwrap();
        let applied = FileTime::from_last_modification_time(&meta);
        assert_eq!(applied, file_time_from_nanos(mtime_nanos));

        // No temp left behind.
        assert!(!part_path(&dest.path().join("doc.txt"), "test-run").exists());
    }

    #[test]
    fn test_copy_skips_identical_destination() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let off = AtomicBool::new(false);

        std::fs::write(a.path().join("f"), b"same").unwrap();
        std::fs::write(dest.path().join("f"), b"same").unwrap();

        let ctx = ctx(a.path(), b.path(), dest.path());
        let mut rec = file_record("f", Side::A, 4, 1);
        rec.hash_a = Some(crate::hasher::hash_file(&a.path().join("f"), CHUNK, &off)
            .unwrap()
            .unwrap());

        let disposition = execute(&ctx, &rec, Action::CopyFrom(Side::A), &off).unwrap();
        assert_eq!(disposition, Disposition::Skipped);
    }

    #[test]
    fn test_copy_overwrites_diverged_destination() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let off = AtomicBool::new(false);

        std::fs::write(a.path().join("f"), b"wanted").unwrap();
        std::fs::write(dest.path().join("f"), b"stale!").unwrap();

        let ctx = ctx(a.path(), b.path(), dest.path());
        let rec = file_record("f", Side::A, 6, 1);

        let disposition = execute(&ctx, &rec, Action::CopyFrom(Side::A), &off).unwrap();
        assert_eq!(disposition, Disposition::Applied);
        assert_eq!(std::fs::read(dest.path().join("f")).unwrap(), b"wanted");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_create_and_skip() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();

        let mut rec = file_record("link", Side::A, 0, 1);
        rec.kind_a = EntryKind::Symlink;
        rec.size_a = None;
        rec.link_target_a = Some("target.txt".into());

        let ctx = ctx(a.path(), b.path(), dest.path());
        let first = create_symlink(&rec, Side::A, &dest.path().join("link")).unwrap();
        assert_eq!(first, Disposition::Applied);
        assert_eq!(
            std::fs::read_link(dest.path().join("link")).unwrap(),
            PathBuf::from("target.txt")
        );

        let second = create_symlink(&rec, Side::A, &dest.path().join("link")).unwrap();
        assert_eq!(second, Disposition::Skipped);
    }

    #[test]
    fn test_clean_stale_temps_keeps_active_run() {
        let dest = tempfile::tempdir().unwrap();
        std::fs::write(dest.path().join("f.part.old-run"), b"junk").unwrap();
        std::fs::write(dest.path().join("g.part.test-run"), b"mine").unwrap();
        std::fs::write(dest.path().join("normal.txt"), b"keep").unwrap();

        let removed = clean_stale_temps(dest.path(), "test-run").unwrap();
        assert_eq!(removed, 1);
        assert!(!dest.path().join("f.part.old-run").exists());
        assert!(dest.path().join("g.part.test-run").exists());
        assert!(dest.path().join("normal.txt").exists());
    }

    #[test]
    fn test_missing_source_is_row_failure() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let off = AtomicBool::new(false);

        let ctx = ctx(a.path(), b.path(), dest.path());
        let rec = file_record("ghost", Side::A, 1, 1);
        let err = execute(&ctx, &rec, Action::CopyFrom(Side::A), &off).unwrap_err();
        assert!(matches!(err, ApplyError::Io(_)));
    }
}
