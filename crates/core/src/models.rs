//! Domain model types shared by the merge engine, store, and CLI.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Sides and entry kinds
// ---------------------------------------------------------------------------

/// Which source tree a value belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    A,
    B,
}

impl Side {
    /// The opposite side.
    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "a" => Some(Self::A),
            "b" => Some(Self::B),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "a"),
            Self::B => write!(f, "b"),
        }
    }
}

/// What kind of filesystem entry a path is on one side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    /// The path does not exist on this side.
    Absent,
}

impl EntryKind {
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "file" => Self::File,
            "dir" => Self::Dir,
            "symlink" => Self::Symlink,
            _ => Self::Absent,
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Dir => write!(f, "dir"),
            Self::Symlink => write!(f, "symlink"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

// ---------------------------------------------------------------------------
// Run lifecycle
// ---------------------------------------------------------------------------

/// Phase of a merge run, persisted on the `run` row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Scanning,
    Hashing,
    Applying,
    Done,
    Aborted,
}

impl Phase {
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "hashing" => Self::Hashing,
            "applying" => Self::Applying,
            "done" => Self::Done,
            "aborted" => Self::Aborted,
            _ => Self::Scanning,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scanning => write!(f, "scanning"),
            Self::Hashing => write!(f, "hashing"),
            Self::Applying => write!(f, "applying"),
            Self::Done => write!(f, "done"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// A single merge execution, persisted as the sole row of the `run` table.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: String,
    pub a_root: std::path::PathBuf,
    pub b_root: std::path::PathBuf,
    pub dest_root: std::path::PathBuf,
    pub phase: Phase,
    pub created_at: String,
}

/// Whether `begin_run` started fresh or picked up prior progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Fresh,
    Resumed,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::Resumed => write!(f, "resumed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-path records
// ---------------------------------------------------------------------------

/// Row lifecycle status. Advances monotonically:
/// `pending → (awaiting_decision →) ready → applied | failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Pending,
    AwaitingDecision,
    Ready,
    Applied,
    Failed,
}

impl RowStatus {
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "awaiting_decision" => Self::AwaitingDecision,
            "ready" => Self::Ready,
            "applied" => Self::Applied,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Terminal rows are never re-offered to the pipeline.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Failed)
    }
}

impl std::fmt::Display for RowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::AwaitingDecision => write!(f, "awaiting_decision"),
            Self::Ready => write!(f, "ready"),
            Self::Applied => write!(f, "applied"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What the applier must do for a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Materialize the file from one side (sole owner, or equal content).
    CopyFrom(Side),
    /// Create the directory.
    Mkdir,
    /// Recreate the symlink recorded on the given side, target verbatim.
    CreateSymlink(Side),
    /// Both sides disagree; a human decision is required.
    Conflict,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CopyFrom(Side::A) => "copy_a",
            Self::CopyFrom(Side::B) => "copy_b",
            Self::Mkdir => "mkdir",
            Self::CreateSymlink(Side::A) => "symlink_a",
            Self::CreateSymlink(Side::B) => "symlink_b",
            Self::Conflict => "conflict",
        }
    }

    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "copy_a" => Some(Self::CopyFrom(Side::A)),
            "copy_b" => Some(Self::CopyFrom(Side::B)),
            "mkdir" => Some(Self::Mkdir),
            "symlink_a" => Some(Self::CreateSymlink(Side::A)),
            "symlink_b" => Some(Self::CreateSymlink(Side::B)),
            "conflict" => Some(Self::Conflict),
            _ => None,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry discovered by the scanner under a source root.
#[derive(Debug, Clone)]
pub struct ScannedEntry {
    /// Path relative to the source root; the join key across sources.
    pub rel_path: String,
    pub kind: EntryKind,
    /// Byte size for files; None for directories and symlinks.
    pub size: Option<i64>,
    /// Modification time in unix nanoseconds.
    pub mtime: Option<i64>,
    /// Symlink target, recorded verbatim.
    pub link_target: Option<String>,
}

/// The merged per-path record, one row per relative path.
#[derive(Debug, Clone)]
pub struct PathRecord {
    pub rel_path: String,
    pub in_a: bool,
    pub in_b: bool,
    pub kind_a: EntryKind,
    pub kind_b: EntryKind,
    pub size_a: Option<i64>,
    pub size_b: Option<i64>,
    pub mtime_a: Option<i64>,
    pub mtime_b: Option<i64>,
    pub link_target_a: Option<String>,
    pub link_target_b: Option<String>,
    pub hash_a: Option<u64>,
    pub hash_b: Option<u64>,
    pub action: Option<Action>,
    pub status: RowStatus,
    pub queued_at: Option<String>,
    pub decision_choice: Option<Choice>,
    pub winner: Option<Side>,
    pub error: Option<String>,
}

impl PathRecord {
    pub fn kind(&self, side: Side) -> EntryKind {
        match side {
            Side::A => self.kind_a,
            Side::B => self.kind_b,
        }
    }

    pub fn size(&self, side: Side) -> Option<i64> {
        match side {
            Side::A => self.size_a,
            Side::B => self.size_b,
        }
    }

    pub fn mtime(&self, side: Side) -> Option<i64> {
        match side {
            Side::A => self.mtime_a,
            Side::B => self.mtime_b,
        }
    }

    pub fn hash(&self, side: Side) -> Option<u64> {
        match side {
            Side::A => self.hash_a,
            Side::B => self.hash_b,
        }
    }

    pub fn link_target(&self, side: Side) -> Option<&str> {
        match side {
            Side::A => self.link_target_a.as_deref(),
            Side::B => self.link_target_b.as_deref(),
        }
    }

    pub fn set_hash(&mut self, side: Side, hash: u64) {
        match side {
            Side::A => self.hash_a = Some(hash),
            Side::B => self.hash_b = Some(hash),
        }
    }

    /// Snapshot of one side, as shown to the resolver and logged for audit.
    pub fn snapshot(&self, side: Side) -> SideSnapshot {
        SideSnapshot {
            kind: self.kind(side),
            size: self.size(side),
            mtime: self.mtime(side),
            hash: self.hash(side),
            link_target: self.link_target(side).map(|t| t.to_string()),
        }
    }

    /// A side needs a content hash iff both sides are regular files of equal
    /// size and that side's hash is still unknown. Size mismatch
    /// short-circuits to conflict without any hashing.
    pub fn needs_hash(&self, side: Side) -> bool {
        self.kind_a == EntryKind::File
            && self.kind_b == EntryKind::File
            && self.size_a == self.size_b
            && self.hash(side).is_none()
    }
}

// ---------------------------------------------------------------------------
// Conflict decisions
// ---------------------------------------------------------------------------

/// What the operator chose for a conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Choice {
    PreferNewer,
    PreferOlder,
    /// Operator inspected both files first, then preferred the newer one.
    InspectThenNewer,
    InspectThenOlder,
}

impl Choice {
    pub fn from_str_val(s: &str) -> Option<Self> {
        match s {
            "prefer_newer" => Some(Self::PreferNewer),
            "prefer_older" => Some(Self::PreferOlder),
            "inspect_then_newer" => Some(Self::InspectThenNewer),
            "inspect_then_older" => Some(Self::InspectThenOlder),
            _ => None,
        }
    }

    /// The `inspect_then_*` variants pick winners exactly like their
    /// `prefer_*` counterparts; only the audit log keeps the distinction.
    pub fn prefers_newer(self) -> bool {
        matches!(self, Self::PreferNewer | Self::InspectThenNewer)
    }

    /// Derive the winning side from the two candidates' mtimes.
    /// Newer means strictly larger mtime; ties break to A.
    pub fn pick_winner(self, mtime_a: Option<i64>, mtime_b: Option<i64>) -> Side {
        let a = mtime_a.unwrap_or(0);
        let b = mtime_b.unwrap_or(0);
        if self.prefers_newer() {
            if b > a {
                Side::B
            } else {
                Side::A
            }
        } else if b < a {
            Side::B
        } else {
            Side::A
        }
    }
}

impl std::fmt::Display for Choice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreferNewer => write!(f, "prefer_newer"),
            Self::PreferOlder => write!(f, "prefer_older"),
            Self::InspectThenNewer => write!(f, "inspect_then_newer"),
            Self::InspectThenOlder => write!(f, "inspect_then_older"),
        }
    }
}

/// A recorded conflict decision.
#[derive(Debug, Clone)]
pub struct ConflictDecision {
    pub rel_path: String,
    pub choice: Choice,
    pub winner: Side,
    pub decided_at: String,
}

/// Everything the resolver needs to present one conflict.
#[derive(Debug, Clone)]
pub struct ConflictCandidate {
    pub rel_path: String,
    pub a: SideSnapshot,
    pub b: SideSnapshot,
    /// Absolute paths for external inspection.
    pub abs_a: std::path::PathBuf,
    pub abs_b: std::path::PathBuf,
}

/// Audit snapshot of one side of a conflict, serialized to JSON in the
/// conflict log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideSnapshot {
    pub kind: EntryKind,
    pub size: Option<i64>,
    pub mtime: Option<i64>,
    pub hash: Option<u64>,
    pub link_target: Option<String>,
}

// ---------------------------------------------------------------------------
// Run outcome
// ---------------------------------------------------------------------------

/// End-of-run summary returned by the engine.
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub mode: RunMode,
    pub total_paths: u64,
    pub applied: u64,
    /// Rows that were already applied before this invocation.
    pub skipped: u64,
    pub conflicts_resolved: u64,
    pub failed: Vec<(String, String)>,
    /// True when the run stopped early on a shutdown signal or resolver
    /// abort; the store is left resumable.
    pub aborted: bool,
}

impl MergeReport {
    pub fn fully_applied(&self) -> bool {
        !self.aborted && self.failed.is_empty()
    }
}
