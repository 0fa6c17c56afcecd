//! Error types for the merge engine.
//!
//! Each subsystem has its own error type derived with `thiserror`, and the
//! top-level [`EngineError`] enum unifies the fatal kinds. Per-row failures
//! (unreadable source file, failed copy) are never surfaced through these
//! types; they are captured into the row's `error` column and reported in
//! the end-of-run summary.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Fatal errors that tear down a run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The destination filesystem is unusable (out of space or read-only),
    /// confirmed by a retry.
    #[error("destination filesystem error at '{path}': {detail}")]
    DestinationUnusable { path: String, detail: String },

    /// The resolver was aborted mid-prompt; treated as a graceful shutdown.
    #[error("conflict resolution aborted by the operator")]
    ResolverAborted,

    /// I/O failure outside any single row (e.g. creating the destination
    /// root or cleaning stale temp files).
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer. All of these are fatal for the
/// run; the store is the single source of truth.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying rusqlite error.
    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("store migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// The database was written by a newer schema than this binary knows.
    #[error(
        "store schema version {found} is newer than supported version {supported}; \
         re-run with --reset to discard the old checkpoint"
    )]
    SchemaVersionMismatch { found: u32, supported: u32 },

    /// An existing run in the store was recorded for different roots.
    #[error(
        "checkpoint belongs to a different merge \
         (recorded {recorded_a} + {recorded_b} -> {recorded_dest}); \
         pass --reset to discard it"
    )]
    RootMismatch {
        recorded_a: String,
        recorded_b: String,
        recorded_dest: String,
    },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// An audit snapshot could not be serialized.
    #[error("snapshot serialization failed: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// Generic I/O error (e.g. database file permissions).
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Resolver errors
// ---------------------------------------------------------------------------

/// Errors from a [`crate::resolver::Resolver`] implementation.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// The operator aborted the prompt (EOF, signal). The engine shuts down
    /// gracefully and the conflict stays queued for the next invocation.
    #[error("resolver aborted")]
    Aborted,

    /// The resolver itself failed (broken terminal, scripted resolver ran
    /// out of answers).
    #[error("resolver failed: {0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("configuration parse error: {0}")]
    ParseError(String),

    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    #[error("configuration I/O error: {0}")]
    Io(#[from] std::io::Error),
}
