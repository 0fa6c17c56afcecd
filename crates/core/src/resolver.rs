//! Conflict resolver interface.
//!
//! The engine asks "resolve this conflict" through this trait and nothing
//! else; the interactive TTY prompt lives in the CLI crate. Implementations
//! here cover the non-interactive cases: a fixed policy and a scripted
//! sequence for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::errors::ResolverError;
use crate::models::{Choice, ConflictCandidate};

/// Turns a presented conflict into a [`Choice`].
///
/// Called from a dedicated task; implementations may block indefinitely
/// (a human is on the other end). Returning [`ResolverError::Aborted`]
/// shuts the run down gracefully with the conflict still queued.
pub trait Resolver: Send + Sync {
    fn resolve(&self, candidate: &ConflictCandidate) -> Result<Choice, ResolverError>;
}

/// Always prefers the newer side. Useful for unattended merges.
pub struct PreferNewest;

impl Resolver for PreferNewest {
    fn resolve(&self, _candidate: &ConflictCandidate) -> Result<Choice, ResolverError> {
        Ok(Choice::PreferNewer)
    }
}

/// Replays a fixed sequence of choices, then aborts, which is exactly what
/// an operator walking away mid-run looks like to the engine. The test
/// suite leans on this to exercise interrupted-and-resumed runs.
pub struct ScriptedResolver {
    script: Mutex<VecDeque<Choice>>,
}

impl ScriptedResolver {
    pub fn new<I: IntoIterator<Item = Choice>>(choices: I) -> Self {
        Self {
            script: Mutex::new(choices.into_iter().collect()),
        }
    }

    /// Choices not yet consumed.
    pub fn remaining(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Choice>> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Resolver for ScriptedResolver {
    fn resolve(&self, _candidate: &ConflictCandidate) -> Result<Choice, ResolverError> {
        self.lock().pop_front().ok_or(ResolverError::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryKind, SideSnapshot};

    fn candidate() -> ConflictCandidate {
        let snap = SideSnapshot {
            kind: EntryKind::File,
            size: Some(1),
            mtime: Some(1),
            hash: Some(1),
            link_target: None,
        };
        ConflictCandidate {
            rel_path: "x".into(),
            a: snap.clone(),
            b: snap,
            abs_a: "/a/x".into(),
            abs_b: "/b/x".into(),
        }
    }

    #[test]
    fn test_prefer_newest() {
        let choice = PreferNewest.resolve(&candidate()).unwrap();
        assert_eq!(choice, Choice::PreferNewer);
    }

    #[test]
    fn test_scripted_replays_then_aborts() {
        let resolver = ScriptedResolver::new([Choice::PreferOlder, Choice::PreferNewer]);
        assert_eq!(resolver.resolve(&candidate()).unwrap(), Choice::PreferOlder);
        assert_eq!(resolver.resolve(&candidate()).unwrap(), Choice::PreferNewer);
        assert_eq!(resolver.remaining(), 0);
        assert!(matches!(
            resolver.resolve(&candidate()),
            Err(ResolverError::Aborted)
        ));
    }
}
