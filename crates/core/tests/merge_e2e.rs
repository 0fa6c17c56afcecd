//! End-to-end merge scenarios on real temp directories.
//!
//! Each test builds two small source trees, runs the engine with a scripted
//! resolver, and checks the destination plus the checkpoint state. Resume
//! tests share one file-backed checkpoint across engine instances, exactly
//! like a killed-and-restarted process would.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use filetime::FileTime;
use tempfile::TempDir;

use dirmerge_core::config::{ApplyMode, MergeConfig};
use dirmerge_core::db::Store;
use dirmerge_core::engine::MergeEngine;
use dirmerge_core::models::{Choice, MergeReport, Phase};
use dirmerge_core::resolver::{Resolver, ScriptedResolver};

// ===========================================================================
// Helpers
// ===========================================================================

struct Fixture {
    _dir: TempDir,
    a: PathBuf,
    b: PathBuf,
    dest: PathBuf,
    db: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let dest = dir.path().join("out");
        let db = dir.path().join("checkpoint.db");
        std::fs::create_dir_all(&a).unwrap();
        std::fs::create_dir_all(&b).unwrap();
        Self {
            _dir: dir,
            a,
            b,
            dest,
            db,
        }
    }

    /// Run the engine to completion with the given resolver, reopening the
    /// checkpoint like a fresh process invocation would.
    fn run(&self, resolver: Arc<dyn Resolver>) -> (MergeReport, Arc<Store>) {
        self.run_with_config(resolver, test_config())
    }

    fn run_with_config(
        &self,
        resolver: Arc<dyn Resolver>,
        config: MergeConfig,
    ) -> (MergeReport, Arc<Store>) {
        let store = Arc::new(Store::open_or_create(&self.db).unwrap());
        store.initialize().unwrap();
        let (run, mode) = store.begin_run(&self.a, &self.b, &self.dest, false).unwrap();
        let engine = MergeEngine::new(
            store.clone(),
            run,
            mode,
            config,
            resolver,
            Arc::new(AtomicBool::new(false)),
            Arc::new(dirmerge_core::progress::ProgressCounters::new()),
        );
        let report = engine.run().unwrap();
        (report, store)
    }
}

fn test_config() -> MergeConfig {
    MergeConfig {
        hash_workers: 2,
        apply_workers: 2,
        ..Default::default()
    }
}

/// Write a file and pin its mtime to `mtime_secs` after the epoch.
fn write_file(root: &Path, rel: &str, content: &[u8], mtime_secs: i64) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    filetime::set_file_mtime(&path, FileTime::from_unix_time(mtime_secs, 0)).unwrap();
}

fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}

// ===========================================================================
// Spec scenarios
// ===========================================================================

#[test]
fn disjoint_and_equal_paths_merge_without_conflicts() {
    let fx = Fixture::new();
    write_file(&fx.a, "foo.txt", b"x", 100);
    std::fs::create_dir_all(fx.a.join("bar")).unwrap();
    write_file(&fx.b, "foo.txt", b"x", 200);
    write_file(&fx.b, "baz.txt", b"y", 100);

    let (report, store) = fx.run(Arc::new(ScriptedResolver::new([])));

    assert!(report.fully_applied());
    assert_eq!(report.conflicts_resolved, 0);
    assert_eq!(store.conflict_log_len().unwrap(), 0);
    assert_eq!(read(&fx.dest.join("foo.txt")), b"x");
    assert_eq!(read(&fx.dest.join("baz.txt")), b"y");
    assert!(fx.dest.join("bar").is_dir());
    assert_eq!(store.get_run().unwrap().unwrap().phase, Phase::Done);
}

#[test]
fn conflict_prefer_newer_picks_b() {
    let fx = Fixture::new();
    write_file(&fx.a, "note.txt", b"hello\n", 10);
    write_file(&fx.b, "note.txt", b"HELLO\n", 20);

    let (report, store) = fx.run(Arc::new(ScriptedResolver::new([Choice::PreferNewer])));

    assert!(report.fully_applied());
    assert_eq!(report.conflicts_resolved, 1);
    assert_eq!(read(&fx.dest.join("note.txt")), b"HELLO\n");

    let decisions = store.list_decisions(10).unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].winner, "b");
    assert_eq!(decisions[0].choice, "prefer_newer");

    // The winner's mtime is preserved byte-for-byte alongside its content.
    let meta = std::fs::metadata(fx.dest.join("note.txt")).unwrap();
    assert_eq!(
        FileTime::from_last_modification_time(&meta),
        FileTime::from_unix_time(20, 0)
    );
}

#[test]
fn conflict_prefer_older_picks_a() {
    let fx = Fixture::new();
    write_file(&fx.a, "note.txt", b"hello\n", 10);
    write_file(&fx.b, "note.txt", b"HELLO\n", 20);

    let (report, store) = fx.run(Arc::new(ScriptedResolver::new([Choice::PreferOlder])));

    assert!(report.fully_applied());
    assert_eq!(read(&fx.dest.join("note.txt")), b"hello\n");
    let decisions = store.list_decisions(10).unwrap();
    assert_eq!(decisions[0].winner, "a");
}

#[test]
fn equal_size_files_conflict_on_content() {
    let fx = Fixture::new();
    // Same size, differing only in the last byte: the size check cannot
    // short-circuit, so the conflict comes from the fingerprints.
    let mut zeros = vec![0u8; 256 * 1024];
    write_file(&fx.a, "big.bin", &zeros, 10);
    *zeros.last_mut().unwrap() = 1;
    write_file(&fx.b, "big.bin", &zeros, 20);

    let (report, store) = fx.run(Arc::new(ScriptedResolver::new([Choice::PreferNewer])));

    assert!(report.fully_applied());
    assert_eq!(report.conflicts_resolved, 1);
    assert_eq!(store.conflict_log_len().unwrap(), 1);
    let merged = read(&fx.dest.join("big.bin"));
    assert_eq!(*merged.last().unwrap(), 1);
}

/// Blocks the prompt until an unrelated file shows up at the destination,
/// then walks away. Proves that hashing and applying keep flowing while a
/// conflict sits unanswered.
struct WaitThenAbort {
    wait_for: PathBuf,
}

impl Resolver for WaitThenAbort {
    fn resolve(
        &self,
        _candidate: &dirmerge_core::models::ConflictCandidate,
    ) -> Result<Choice, dirmerge_core::errors::ResolverError> {
        for _ in 0..500 {
            if self.wait_for.exists() {
                return Err(dirmerge_core::errors::ResolverError::Aborted);
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        Err(dirmerge_core::errors::ResolverError::Failed(
            "apply never progressed while the prompt was open".into(),
        ))
    }
}

#[test]
fn aborted_resolution_resumes_to_same_outcome() {
    let fx = Fixture::new();
    write_file(&fx.a, "note.txt", b"hello\n", 10);
    write_file(&fx.b, "note.txt", b"HELLO\n", 20);
    write_file(&fx.a, "calm.txt", b"no conflict here", 10);

    // First invocation: the operator walks away before answering, but only
    // after the non-conflicting file has landed.
    let (report, store) = fx.run(Arc::new(WaitThenAbort {
        wait_for: fx.dest.join("calm.txt"),
    }));
    assert!(report.aborted);
    assert_eq!(store.conflict_log_len().unwrap(), 0);
    // The unconflicted file was still merged; hashing never waited on the
    // prompt.
    assert_eq!(read(&fx.dest.join("calm.txt")), b"no conflict here");
    assert!(!fx.dest.join("note.txt").exists());
    drop(store);

    // Second invocation with an answer converges to the uninterrupted
    // outcome.
    let (report, store) = fx.run(Arc::new(ScriptedResolver::new([Choice::PreferNewer])));
    assert!(report.fully_applied());
    assert_eq!(read(&fx.dest.join("note.txt")), b"HELLO\n");
    assert_eq!(store.conflict_log_len().unwrap(), 1);
}

#[test]
fn directory_chains_exist_before_their_files() {
    let fx = Fixture::new();
    write_file(&fx.a, "a/b/c.txt", b"1", 10);
    write_file(&fx.b, "a/b/d.txt", b"2", 10);

    let (report, _) = fx.run(Arc::new(ScriptedResolver::new([])));

    assert!(report.fully_applied());
    assert!(fx.dest.join("a/b").is_dir());
    assert_eq!(read(&fx.dest.join("a/b/c.txt")), b"1");
    assert_eq!(read(&fx.dest.join("a/b/d.txt")), b"2");
}

// ===========================================================================
// Idempotence and resume
// ===========================================================================

#[test]
fn second_run_is_a_noop() {
    let fx = Fixture::new();
    write_file(&fx.a, "one.txt", b"1", 10);
    write_file(&fx.b, "two.txt", b"2", 20);
    write_file(&fx.a, "both.txt", b"same", 10);
    write_file(&fx.b, "both.txt", b"same", 30);

    let (first, _) = fx.run(Arc::new(ScriptedResolver::new([])));
    assert!(first.fully_applied());
    let before = read(&fx.dest.join("both.txt"));

    let (second, _) = fx.run(Arc::new(ScriptedResolver::new([])));
    assert!(second.fully_applied());
    assert_eq!(second.applied, first.applied);
    // Nothing was re-executed: every row was already terminal.
    assert_eq!(second.skipped, 0);
    assert_eq!(read(&fx.dest.join("both.txt")), before);
}

#[test]
fn diverged_destination_is_reapplied_on_resume() {
    let fx = Fixture::new();
    write_file(&fx.a, "doc.txt", b"original", 10);

    let (first, _) = fx.run(Arc::new(ScriptedResolver::new([])));
    assert!(first.fully_applied());

    // Tamper with the applied file (same length, different bytes).
    write_file(&fx.dest, "doc.txt", b"tampered", 99);

    let (second, _) = fx.run(Arc::new(ScriptedResolver::new([])));
    assert!(second.fully_applied());
    assert_eq!(read(&fx.dest.join("doc.txt")), b"original");
}

#[test]
fn replayed_decision_is_not_asked_again() {
    let fx = Fixture::new();
    write_file(&fx.a, "note.txt", b"hello\n", 10);
    write_file(&fx.b, "note.txt", b"HELLO\n", 20);

    let (first, _) = fx.run(Arc::new(ScriptedResolver::new([Choice::PreferNewer])));
    assert!(first.fully_applied());

    // Remove the merged file; the decision survives in the checkpoint, so
    // the re-run re-applies it without prompting (the script is empty and
    // would abort if consulted).
    std::fs::remove_file(fx.dest.join("note.txt")).unwrap();
    let (second, store) = fx.run(Arc::new(ScriptedResolver::new([])));
    assert!(second.fully_applied());
    assert_eq!(read(&fx.dest.join("note.txt")), b"HELLO\n");
    // The log still has exactly one entry; decisions are never re-recorded.
    assert_eq!(store.conflict_log_len().unwrap(), 1);
}

// ===========================================================================
// Boundary behaviors
// ===========================================================================

#[test]
fn zero_length_files_are_equal_without_io() {
    let fx = Fixture::new();
    write_file(&fx.a, "empty", b"", 10);
    write_file(&fx.b, "empty", b"", 20);

    let (report, store) = fx.run(Arc::new(ScriptedResolver::new([])));

    assert!(report.fully_applied());
    assert_eq!(store.conflict_log_len().unwrap(), 0);
    assert_eq!(read(&fx.dest.join("empty")), b"");
}

#[test]
fn file_vs_directory_honors_the_decision() {
    let fx = Fixture::new();
    write_file(&fx.a, "thing", b"file content", 10);
    std::fs::create_dir_all(fx.b.join("thing")).unwrap();
    filetime::set_file_mtime(fx.b.join("thing"), FileTime::from_unix_time(20, 0)).unwrap();

    // Newer side is B, the directory.
    let (report, store) = fx.run(Arc::new(ScriptedResolver::new([Choice::PreferNewer])));

    assert!(report.fully_applied());
    assert_eq!(report.conflicts_resolved, 1);
    assert!(fx.dest.join("thing").is_dir());
    assert_eq!(store.list_decisions(10).unwrap()[0].winner, "b");
}

#[test]
fn file_vs_directory_file_side_can_win() {
    let fx = Fixture::new();
    write_file(&fx.a, "thing", b"file content", 30);
    std::fs::create_dir_all(fx.b.join("thing")).unwrap();
    filetime::set_file_mtime(fx.b.join("thing"), FileTime::from_unix_time(20, 0)).unwrap();

    let (report, _) = fx.run(Arc::new(ScriptedResolver::new([Choice::PreferNewer])));

    assert!(report.fully_applied());
    assert!(fx.dest.join("thing").is_file());
    assert_eq!(read(&fx.dest.join("thing")), b"file content");
}

#[cfg(unix)]
#[test]
fn matching_symlinks_are_not_a_conflict() {
    let fx = Fixture::new();
    write_file(&fx.a, "target.txt", b"t", 10);
    std::os::unix::fs::symlink("target.txt", fx.a.join("link")).unwrap();
    std::os::unix::fs::symlink("target.txt", fx.b.join("link")).unwrap();

    let (report, store) = fx.run(Arc::new(ScriptedResolver::new([])));

    assert!(report.fully_applied());
    assert_eq!(store.conflict_log_len().unwrap(), 0);
    assert_eq!(
        std::fs::read_link(fx.dest.join("link")).unwrap(),
        PathBuf::from("target.txt")
    );
}

#[cfg(unix)]
#[test]
fn differing_symlink_targets_conflict() {
    let fx = Fixture::new();
    std::os::unix::fs::symlink("old.txt", fx.a.join("link")).unwrap();
    std::os::unix::fs::symlink("new.txt", fx.b.join("link")).unwrap();

    let (report, _) = fx.run(Arc::new(ScriptedResolver::new([Choice::PreferNewer])));

    assert!(report.fully_applied());
    assert_eq!(report.conflicts_resolved, 1);
    let target = std::fs::read_link(fx.dest.join("link")).unwrap();
    assert!(target == PathBuf::from("old.txt") || target == PathBuf::from("new.txt"));
}

// ===========================================================================
// Apply modes
// ===========================================================================

#[test]
fn deferred_apply_reaches_the_same_destination() {
    let fx = Fixture::new();
    write_file(&fx.a, "one.txt", b"1", 10);
    write_file(&fx.a, "clash.txt", b"aa", 10);
    write_file(&fx.b, "clash.txt", b"bb", 20);
    write_file(&fx.b, "nested/two.txt", b"2", 20);

    let config = MergeConfig {
        apply_mode: ApplyMode::Deferred,
        ..test_config()
    };
    let (report, store) =
        fx.run_with_config(Arc::new(ScriptedResolver::new([Choice::PreferNewer])), config);

    assert!(report.fully_applied());
    assert_eq!(read(&fx.dest.join("one.txt")), b"1");
    assert_eq!(read(&fx.dest.join("clash.txt")), b"bb");
    assert_eq!(read(&fx.dest.join("nested/two.txt")), b"2");
    assert_eq!(store.conflict_log_len().unwrap(), 1);
}

// ===========================================================================
// Error rows
// ===========================================================================

#[test]
fn conflict_count_matches_log_length() {
    let fx = Fixture::new();
    for i in 0..5 {
        write_file(&fx.a, &format!("f{i}.txt"), b"aaa", 10);
        write_file(&fx.b, &format!("f{i}.txt"), b"bbb", 20);
    }
    write_file(&fx.a, "clean.txt", b"same", 10);
    write_file(&fx.b, "clean.txt", b"same", 20);

    let resolver = ScriptedResolver::new(std::iter::repeat(Choice::PreferNewer).take(5));
    let (report, store) = fx.run(Arc::new(resolver));

    assert!(report.fully_applied());
    assert_eq!(report.conflicts_resolved, 5);
    assert_eq!(store.conflict_log_len().unwrap(), 5);
}
