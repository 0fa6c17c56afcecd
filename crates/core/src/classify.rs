//! Path classification.
//!
//! Pure functions from a merged [`PathRecord`] to the [`Action`] the applier
//! must take. No I/O happens here; hashing is requested by returning `None`
//! until both fingerprints are known.

use crate::models::{Action, EntryKind, PathRecord, Side};

/// Classify a row, or `None` when the row still needs content hashes
/// (both sides are equal-sized regular files with an unknown fingerprint).
pub fn classify(rec: &PathRecord) -> Option<Action> {
    match (rec.in_a, rec.in_b) {
        (true, false) => single_side_action(rec, Side::A),
        (false, true) => single_side_action(rec, Side::B),
        (true, true) => both_sides_action(rec),
        // Scanner never inserts such a row.
        (false, false) => None,
    }
}

fn single_side_action(rec: &PathRecord, side: Side) -> Option<Action> {
    match rec.kind(side) {
        EntryKind::File => Some(Action::CopyFrom(side)),
        EntryKind::Dir => Some(Action::Mkdir),
        EntryKind::Symlink => Some(Action::CreateSymlink(side)),
        EntryKind::Absent => None,
    }
}

fn both_sides_action(rec: &PathRecord) -> Option<Action> {
    match (rec.kind_a, rec.kind_b) {
        (EntryKind::Dir, EntryKind::Dir) => Some(Action::Mkdir),

        (EntryKind::Symlink, EntryKind::Symlink) => {
            if rec.link_target_a == rec.link_target_b {
                Some(Action::CreateSymlink(Side::A))
            } else {
                Some(Action::Conflict)
            }
        }

        (EntryKind::File, EntryKind::File) => {
            // Size mismatch short-circuits the hash.
            if rec.size_a != rec.size_b {
                return Some(Action::Conflict);
            }
            match (rec.hash_a, rec.hash_b) {
                (Some(a), Some(b)) if a == b => Some(Action::CopyFrom(Side::A)),
                (Some(_), Some(_)) => Some(Action::Conflict),
                _ => None,
            }
        }

        // file vs dir, file vs symlink, dir vs symlink: the operator picks
        // a side and the winner's kind determines what gets applied.
        _ => Some(Action::Conflict),
    }
}

/// The action to execute for a decided conflict: the winning side's kind
/// determines it.
pub fn decided_action(rec: &PathRecord, winner: Side) -> Option<Action> {
    match rec.kind(winner) {
        EntryKind::File => Some(Action::CopyFrom(winner)),
        EntryKind::Dir => Some(Action::Mkdir),
        EntryKind::Symlink => Some(Action::CreateSymlink(winner)),
        EntryKind::Absent => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RowStatus;

    fn record() -> PathRecord {
        PathRecord {
            rel_path: "p".into(),
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
            status: RowStatus::Pending,
            queued_at: None,
            decision_choice: None,
            winner: None,
            error: None,
        }
    }

    fn file_on(side: Side, size: i64, hash: Option<u64>) -> PathRecord {
        let mut rec = record();
        match side {
            Side::A => {
                rec.in_a = true;
                rec.kind_a = EntryKind::File;
                rec.size_a = Some(size);
                rec.hash_a = hash;
            }
            Side::B => {
                rec.in_b = true;
                rec.kind_b = EntryKind::File;
                rec.size_b = Some(size);
                rec.hash_b = hash;
            }
        }
        rec
    }

    fn file_pair(size_a: i64, size_b: i64, hash_a: Option<u64>, hash_b: Option<u64>) -> PathRecord {
        let mut rec = file_on(Side::A, size_a, hash_a);
        rec.in_b = true;
        rec.kind_b = EntryKind::File;
        rec.size_b = Some(size_b);
        rec.hash_b = hash_b;
        rec
    }

    #[test]
    fn test_single_side_rows() {
        assert_eq!(
            classify(&file_on(Side::A, 3, None)),
            Some(Action::CopyFrom(Side::A))
        );
        assert_eq!(
            classify(&file_on(Side::B, 3, None)),
            Some(Action::CopyFrom(Side::B))
        );

        let mut dir = record();
        dir.in_b = true;
        dir.kind_b = EntryKind::Dir;
        assert_eq!(classify(&dir), Some(Action::Mkdir));

        let mut link = record();
        link.in_a = true;
        link.kind_a = EntryKind::Symlink;
        link.link_target_a = Some("t".into());
        assert_eq!(classify(&link), Some(Action::CreateSymlink(Side::A)));
    }

    #[test]
    fn test_both_dirs_is_mkdir() {
        let mut rec = record();
        rec.in_a = true;
        rec.in_b = true;
        rec.kind_a = EntryKind::Dir;
        rec.kind_b = EntryKind::Dir;
        assert_eq!(classify(&rec), Some(Action::Mkdir));
    }

    #[test]
    fn test_symlink_targets() {
        let mut rec = record();
        rec.in_a = true;
        rec.in_b = true;
        rec.kind_a = EntryKind::Symlink;
        rec.kind_b = EntryKind::Symlink;
        rec.link_target_a = Some("same".into());
        rec.link_target_b = Some("same".into());
        // Matching targets are not a conflict.
        assert_eq!(classify(&rec), Some(Action::CreateSymlink(Side::A)));

        rec.link_target_b = Some("other".into());
        assert_eq!(classify(&rec), Some(Action::Conflict));
    }

    #[test]
    fn test_file_pair_size_mismatch_skips_hashing() {
        let rec = file_pair(3, 4, None, None);
        assert_eq!(classify(&rec), Some(Action::Conflict));
    }

    #[test]
    fn test_file_pair_waits_for_hashes() {
        assert_eq!(classify(&file_pair(4, 4, None, None)), None);
        assert_eq!(classify(&file_pair(4, 4, Some(1), None)), None);
    }

    #[test]
    fn test_file_pair_hash_outcomes() {
        assert_eq!(
            classify(&file_pair(4, 4, Some(9), Some(9))),
            Some(Action::CopyFrom(Side::A))
        );
        assert_eq!(
            classify(&file_pair(4, 4, Some(9), Some(8))),
            Some(Action::Conflict)
        );
    }

    #[test]
    fn test_zero_length_pair_is_equal() {
        let empty = crate::hasher::empty_hash();
        assert_eq!(
            classify(&file_pair(0, 0, Some(empty), Some(empty))),
            Some(Action::CopyFrom(Side::A))
        );
    }

    #[test]
    fn test_kind_mismatch_is_conflict() {
        let mut rec = file_on(Side::A, 3, None);
        rec.in_b = true;
        rec.kind_b = EntryKind::Dir;
        assert_eq!(classify(&rec), Some(Action::Conflict));
    }

    #[test]
    fn test_decided_action_follows_winner_kind() {
        let mut rec = file_on(Side::A, 3, None);
        rec.in_b = true;
        rec.kind_b = EntryKind::Dir;

        assert_eq!(
            decided_action(&rec, Side::A),
            Some(Action::CopyFrom(Side::A))
        );
        assert_eq!(decided_action(&rec, Side::B), Some(Action::Mkdir));
    }
}
