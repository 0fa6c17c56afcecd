//! Typed query helpers for the run, path, and conflict-log tables.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Row};
use tracing::{debug, info};
use uuid::Uuid;

use super::Store;
use crate::errors::StoreError;
use crate::models::{
    Action, Choice, ConflictDecision, EntryKind, PathRecord, Phase, Run, RunMode, RowStatus,
    ScannedEntry, Side, SideSnapshot,
};

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `conflict_log` table.
#[derive(Debug, Clone)]
pub struct ConflictLogEntry {
    pub id: i64,
    pub rel_path: String,
    pub choice: String,
    pub winner: String,
    pub a_snapshot_json: String,
    pub b_snapshot_json: String,
    pub decided_at: String,
}

/// Row counts by status, used for progress and the end-of-run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub awaiting_decision: u64,
    pub ready: u64,
    pub applied: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.awaiting_decision + self.ready + self.applied + self.failed
    }
}

const PATH_COLS: &str = "rel_path, in_a, in_b, kind_a, kind_b, size_a, size_b, \
     mtime_a, mtime_b, link_target_a, link_target_b, hash_a, hash_b, \
     action, status, queued_at, decision_choice, winner, error";

fn map_path_row(row: &Row<'_>) -> rusqlite::Result<PathRecord> {
    Ok(PathRecord {
        rel_path: row.get(0)?,
        in_a: row.get::<_, i64>(1)? != 0,
        in_b: row.get::<_, i64>(2)? != 0,
        kind_a: EntryKind::from_str_val(&row.get::<_, String>(3)?),
        kind_b: EntryKind::from_str_val(&row.get::<_, String>(4)?),
        size_a: row.get(5)?,
        size_b: row.get(6)?,
        mtime_a: row.get(7)?,
        mtime_b: row.get(8)?,
        link_target_a: row.get(9)?,
        link_target_b: row.get(10)?,
        hash_a: row.get::<_, Option<i64>>(11)?.map(|v| v as u64),
        hash_b: row.get::<_, Option<i64>>(12)?.map(|v| v as u64),
        action: row
            .get::<_, Option<String>>(13)?
            .as_deref()
            .and_then(Action::from_str_val),
        status: RowStatus::from_str_val(&row.get::<_, String>(14)?),
        queued_at: row.get(15)?,
        decision_choice: row
            .get::<_, Option<String>>(16)?
            .as_deref()
            .and_then(Choice::from_str_val),
        winner: row
            .get::<_, Option<String>>(17)?
            .as_deref()
            .and_then(Side::from_str_val),
        error: row.get(18)?,
    })
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Store {
    // -- run ----------------------------------------------------------------

    /// Open the active run, resuming prior progress when the recorded roots
    /// match, or starting fresh. `reset` discards any existing run first.
    ///
    /// A recorded run whose roots differ from the requested ones is a fatal
    /// [`StoreError::RootMismatch`] unless `reset` is set.
    pub fn begin_run(
        &self,
        a_root: &Path,
        b_root: &Path,
        dest_root: &Path,
        reset: bool,
    ) -> Result<(Run, RunMode), StoreError> {
        if reset {
            self.truncate_all()?;
        }

        if let Some(run) = self.get_run()? {
            let same_roots = run.a_root == a_root && run.b_root == b_root
                && run.dest_root == dest_root;
            if !same_roots {
                return Err(StoreError::RootMismatch {
                    recorded_a: run.a_root.display().to_string(),
                    recorded_b: run.b_root.display().to_string(),
                    recorded_dest: run.dest_root.display().to_string(),
                });
            }
            info!(run_id = %run.id, phase = %run.phase, "resuming existing run");
            return Ok((run, RunMode::Resumed));
        }

        let run = Run {
            id: Uuid::new_v4().to_string(),
            a_root: a_root.to_path_buf(),
            b_root: b_root.to_path_buf(),
            dest_root: dest_root.to_path_buf(),
            phase: Phase::Scanning,
            created_at: Utc::now().to_rfc3339(),
        };
        self.conn().execute(
            "INSERT INTO run (id, a_root, b_root, dest_root, phase, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.id,
                run.a_root.display().to_string(),
                run.b_root.display().to_string(),
                run.dest_root.display().to_string(),
                run.phase.to_string(),
                run.created_at,
            ],
        )?;
        info!(run_id = %run.id, "started fresh run");
        Ok((run, RunMode::Fresh))
    }

    /// Fetch the active run, if any.
    pub fn get_run(&self) -> Result<Option<Run>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, a_root, b_root, dest_root, phase, created_at FROM run LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], |row| {
            Ok(Run {
                id: row.get(0)?,
                a_root: std::path::PathBuf::from(row.get::<_, String>(1)?),
                b_root: std::path::PathBuf::from(row.get::<_, String>(2)?),
                dest_root: std::path::PathBuf::from(row.get::<_, String>(3)?),
                phase: Phase::from_str_val(&row.get::<_, String>(4)?),
                created_at: row.get(5)?,
            })
        })?;
        match rows.next() {
            Some(Ok(run)) => Ok(Some(run)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Advance the run's phase.
    pub fn mark_phase(&self, phase: Phase) -> Result<(), StoreError> {
        self.conn()
            .execute("UPDATE run SET phase = ?1", params![phase.to_string()])?;
        debug!(phase = %phase, "run phase advanced");
        Ok(())
    }

    /// Drop every row from every table (the `--reset` path).
    fn truncate_all(&self) -> Result<(), StoreError> {
        self.transaction(|conn| {
            conn.execute("DELETE FROM conflict_log", [])?;
            conn.execute("DELETE FROM path", [])?;
            conn.execute("DELETE FROM run", [])?;
            Ok(())
        })?;
        info!("checkpoint reset: all tables truncated");
        Ok(())
    }

    // -- path: scanning -----------------------------------------------------

    /// Merge a batch of scanned entries for one side into the path table in
    /// a single transaction, never clobbering the other side's columns.
    pub fn upsert_side_batch(
        &self,
        side: Side,
        entries: &[ScannedEntry],
    ) -> Result<(), StoreError> {
        let sql = match side {
            Side::A => {
                "INSERT INTO path (rel_path, in_a, kind_a, size_a, mtime_a, link_target_a)
                 VALUES (?1, 1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(rel_path) DO UPDATE SET
                     in_a = 1,
                     kind_a = excluded.kind_a,
                     size_a = excluded.size_a,
                     mtime_a = excluded.mtime_a,
                     link_target_a = excluded.link_target_a"
            }
            Side::B => {
                "INSERT INTO path (rel_path, in_b, kind_b, size_b, mtime_b, link_target_b)
                 VALUES (?1, 1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(rel_path) DO UPDATE SET
                     in_b = 1,
                     kind_b = excluded.kind_b,
                     size_b = excluded.size_b,
                     mtime_b = excluded.mtime_b,
                     link_target_b = excluded.link_target_b"
            }
        };

        self.transaction(|conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            for entry in entries {
                stmt.execute(params![
                    entry.rel_path,
                    entry.kind.to_string(),
                    entry.size,
                    entry.mtime,
                    entry.link_target,
                ])?;
            }
            Ok(())
        })
    }

    // -- path: hashing and classification -----------------------------------

    /// Write a batch of computed fingerprints. Each hash is set at most
    /// once; retries after an uncommitted write are idempotent.
    pub fn set_hashes_batch(&self, hashes: &[(String, Side, u64)]) -> Result<(), StoreError> {
        self.transaction(|conn| {
            let mut set_a = conn.prepare_cached(
                "UPDATE path SET hash_a = ?2 WHERE rel_path = ?1 AND hash_a IS NULL",
            )?;
            let mut set_b = conn.prepare_cached(
                "UPDATE path SET hash_b = ?2 WHERE rel_path = ?1 AND hash_b IS NULL",
            )?;
            for (rel_path, side, hash) in hashes {
                let stmt = match side {
                    Side::A => &mut set_a,
                    Side::B => &mut set_b,
                };
                stmt.execute(params![rel_path, *hash as i64])?;
            }
            Ok(())
        })
    }

    /// Persist a batch of classifications. Conflicts move to
    /// `awaiting_decision` and get a queue timestamp (kept stable across
    /// retries); everything else moves to `ready`. Only `pending` rows are
    /// touched, so the status machine stays monotonic on resume.
    pub fn classify_batch(&self, items: &[(String, Action)]) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.transaction(|conn| {
            let mut to_conflict = conn.prepare_cached(
                "UPDATE path SET action = ?2, status = 'awaiting_decision',
                     queued_at = COALESCE(queued_at, ?3)
                 WHERE rel_path = ?1 AND status = 'pending'",
            )?;
            let mut to_ready = conn.prepare_cached(
                "UPDATE path SET action = ?2, status = 'ready'
                 WHERE rel_path = ?1 AND status = 'pending'",
            )?;
            for (rel_path, action) in items {
                if *action == Action::Conflict {
                    to_conflict.execute(params![rel_path, action.as_str(), now])?;
                } else {
                    to_ready.execute(params![rel_path, action.as_str()])?;
                }
            }
            Ok(())
        })
    }

    /// Mark a batch of rows failed with their error text.
    pub fn mark_failed_batch(&self, failures: &[(String, String)]) -> Result<(), StoreError> {
        self.transaction(|conn| {
            let mut stmt = conn.prepare_cached(
                "UPDATE path SET status = 'failed', error = ?2 WHERE rel_path = ?1",
            )?;
            for (rel_path, error) in failures {
                stmt.execute(params![rel_path, error])?;
            }
            Ok(())
        })
    }

    // -- path: decisions -----------------------------------------------------

    /// Record a conflict decision: flips the row to `ready`, stores the
    /// decision columns, and appends the audit snapshot to the conflict log,
    /// all in one transaction. Partial failure rolls back all three.
    pub fn record_decision(
        &self,
        decision: &ConflictDecision,
        a_snapshot: &SideSnapshot,
        b_snapshot: &SideSnapshot,
    ) -> Result<(), StoreError> {
        let a_json = serde_json::to_string(a_snapshot)?;
        let b_json = serde_json::to_string(b_snapshot)?;

        self.transaction(|conn| {
            let changed = conn.execute(
                "UPDATE path SET status = 'ready', decision_choice = ?2, winner = ?3
                 WHERE rel_path = ?1 AND status = 'awaiting_decision'",
                params![
                    decision.rel_path,
                    decision.choice.to_string(),
                    decision.winner.to_string(),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound {
                    entity: "awaiting conflict".into(),
                    id: decision.rel_path.clone(),
                });
            }
            conn.execute(
                "INSERT INTO conflict_log
                     (rel_path, choice, winner, a_snapshot_json, b_snapshot_json, decided_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    decision.rel_path,
                    decision.choice.to_string(),
                    decision.winner.to_string(),
                    a_json,
                    b_json,
                    decision.decided_at,
                ],
            )?;
            Ok(())
        })?;
        debug!(rel_path = %decision.rel_path, winner = %decision.winner, "decision recorded");
        Ok(())
    }

    // -- path: applying -------------------------------------------------------

    /// Commit a batch of apply outcomes (`applied` or `failed` with error).
    pub fn apply_outcomes_batch(
        &self,
        outcomes: &[(String, RowStatus, Option<String>)],
    ) -> Result<(), StoreError> {
        self.transaction(|conn| {
            let mut stmt = conn.prepare_cached(
                "UPDATE path SET status = ?2, error = ?3 WHERE rel_path = ?1",
            )?;
            for (rel_path, status, error) in outcomes {
                stmt.execute(params![rel_path, status.to_string(), error])?;
            }
            Ok(())
        })
    }

    /// Demote a previously `applied` row back to `ready` so it is
    /// re-executed (destination diverged since the last run).
    pub fn demote_to_ready(&self, rel_path: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "UPDATE path SET status = 'ready', error = NULL
             WHERE rel_path = ?1 AND status = 'applied'",
            params![rel_path],
        )?;
        Ok(())
    }

    // -- path: reads ----------------------------------------------------------

    /// Every non-terminal row, ordered by path. On resume these are exactly
    /// the rows re-offered to the pipeline.
    pub fn live_rows(&self) -> Result<Vec<PathRecord>, StoreError> {
        self.select_paths(
            "WHERE status IN ('pending', 'awaiting_decision', 'ready') ORDER BY rel_path",
        )
    }

    /// Rows claiming `applied`, for resume verification.
    pub fn applied_rows(&self) -> Result<Vec<PathRecord>, StoreError> {
        self.select_paths("WHERE status = 'applied' ORDER BY rel_path")
    }

    /// Rows that ended `failed`, for the end-of-run summary.
    pub fn failed_rows(&self) -> Result<Vec<PathRecord>, StoreError> {
        self.select_paths("WHERE status = 'failed' ORDER BY rel_path")
    }

    /// Fetch a single row.
    pub fn get_path(&self, rel_path: &str) -> Result<Option<PathRecord>, StoreError> {
        let conn = self.conn();
        let sql = format!("SELECT {PATH_COLS} FROM path WHERE rel_path = ?1");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![rel_path], map_path_row)?;
        match rows.next() {
            Some(Ok(rec)) => Ok(Some(rec)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    fn select_paths(&self, tail: &str) -> Result<Vec<PathRecord>, StoreError> {
        let conn = self.conn();
        let sql = format!("SELECT {PATH_COLS} FROM path {tail}");
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([], map_path_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Row counts grouped by status.
    pub fn status_counts(&self) -> Result<StatusCounts, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM path GROUP BY status")?;
        let mut counts = StatusCounts::default();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        for row in rows {
            let (status, count) = row?;
            match RowStatus::from_str_val(&status) {
                RowStatus::Pending => counts.pending = count,
                RowStatus::AwaitingDecision => counts.awaiting_decision = count,
                RowStatus::Ready => counts.ready = count,
                RowStatus::Applied => counts.applied = count,
                RowStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    // -- conflict_log ---------------------------------------------------------

    /// Number of entries in the conflict log.
    pub fn conflict_log_len(&self) -> Result<u64, StoreError> {
        let count: i64 =
            self.conn()
                .query_row("SELECT COUNT(*) FROM conflict_log", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Recent decisions, oldest first.
    pub fn list_decisions(&self, limit: u32) -> Result<Vec<ConflictLogEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, rel_path, choice, winner, a_snapshot_json, b_snapshot_json, decided_at
             FROM conflict_log ORDER BY id ASC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(ConflictLogEntry {
                    id: row.get(0)?,
                    rel_path: row.get(1)?,
                    choice: row.get(2)?,
                    winner: row.get(3)?,
                    a_snapshot_json: row.get(4)?,
                    b_snapshot_json: row.get(5)?,
                    decided_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
