//! Store schema definitions and migration runner.
//!
//! Migrations are SQL strings applied in order; the SQLite `user_version`
//! pragma tracks which have already run. A database whose version is ahead
//! of [`SUPPORTED_VERSION`] is refused rather than guessed at.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::StoreError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[(
    1,
    "initial schema",
    r#"
    CREATE TABLE IF NOT EXISTS run (
        id          TEXT PRIMARY KEY,
        a_root      TEXT NOT NULL,
        b_root      TEXT NOT NULL,
        dest_root   TEXT NOT NULL,
        phase       TEXT NOT NULL DEFAULT 'scanning',
        created_at  TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS path (
        rel_path        TEXT PRIMARY KEY,
        in_a            INTEGER NOT NULL DEFAULT 0,
        in_b            INTEGER NOT NULL DEFAULT 0,
        kind_a          TEXT NOT NULL DEFAULT 'absent',
        kind_b          TEXT NOT NULL DEFAULT 'absent',
        size_a          INTEGER,
        size_b          INTEGER,
        mtime_a         INTEGER,
        mtime_b         INTEGER,
        link_target_a   TEXT,
        link_target_b   TEXT,
        hash_a          INTEGER,
        hash_b          INTEGER,
        action          TEXT,
        status          TEXT NOT NULL DEFAULT 'pending',
        queued_at       TEXT,
        decision_choice TEXT,
        winner          TEXT,
        error           TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_path_status ON path (status);
    CREATE INDEX IF NOT EXISTS idx_path_action ON path (action);

    CREATE TABLE IF NOT EXISTS conflict_log (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        rel_path        TEXT NOT NULL,
        choice          TEXT NOT NULL,
        winner          TEXT NOT NULL,
        a_snapshot_json TEXT NOT NULL,
        b_snapshot_json TEXT NOT NULL,
        decided_at      TEXT NOT NULL
    );
    "#,
)];

/// The newest schema version this binary understands.
pub const SUPPORTED_VERSION: u32 = 1;

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SUPPORTED_VERSION {
        return Err(StoreError::SchemaVersionMismatch {
            found: current_version,
            supported: SUPPORTED_VERSION,
        });
    }

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying store migration");
            conn.execute_batch(sql)
                .map_err(|e| StoreError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, StoreError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), StoreError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SUPPORTED_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };

        assert!(tables.contains(&"run".to_string()));
        assert!(tables.contains(&"path".to_string()));
        assert!(tables.contains(&"conflict_log".to_string()));
    }

    #[test]
    fn test_newer_schema_refused() {
        let conn = Connection::open_in_memory().unwrap();
        set_schema_version(&conn, SUPPORTED_VERSION + 1).unwrap();
        let err = run_migrations(&conn).unwrap_err();
        assert!(matches!(err, StoreError::SchemaVersionMismatch { .. }));
    }
}
