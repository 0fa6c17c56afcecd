//! SQLite persistence layer: the checkpoint store.
//!
//! Provides a [`Store`] handle with WAL-mode journaling, schema migrations,
//! and typed query helpers for the run, path, and conflict-log tables. The
//! store is the single source of truth for a merge run; the in-memory
//! channels between pipeline stages are best-effort accelerators.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::StoreError;

/// Checkpoint store wrapping a SQLite connection.
///
/// The connection is opened in WAL mode and wrapped in a `Mutex` so that
/// `Store` is `Send + Sync`. All writers serialize through the lock; batched
/// transactions keep per-row fsync cost amortized.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the checkpoint database at `path`.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening checkpoint store");

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        debug!("store opened with WAL journaling");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run schema migrations to bring the store up to date.
    ///
    /// Fails with [`StoreError::SchemaVersionMismatch`] when the database was
    /// written by a newer schema than this binary supports.
    pub fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("store schema is up to date");
        Ok(())
    }

    /// Obtain a lock on the underlying connection.
    ///
    /// If the mutex is poisoned (a previous holder panicked), the lock is
    /// recovered rather than propagating the panic.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("store mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Execute a closure inside a SQLite transaction. If the closure returns
    /// `Ok`, the transaction is committed; otherwise it is rolled back.
    pub fn transaction<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store() {
        let store = Store::in_memory().expect("failed to create in-memory store");
        store.initialize().expect("failed to initialize schema");
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.db");
        let store = Store::open_or_create(&path).expect("failed to create store");
        store.initialize().expect("failed to initialize schema");
        assert!(path.exists());
    }

    #[test]
    fn test_transaction_rollback() {
        let store = Store::in_memory().unwrap();
        store.initialize().unwrap();

        let result: Result<(), StoreError> = store.transaction(|conn| {
            conn.execute(
                "INSERT INTO path (rel_path) VALUES ('rollback.txt')",
                [],
            )?;
            Err(StoreError::NotFound {
                entity: "test".into(),
                id: "forced".into(),
            })
        });
        assert!(result.is_err());

        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM path", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
