//! Progress event stream.
//!
//! The engine bumps a set of monotonic atomic counters as rows move through
//! the pipeline; a sampler thread turns them into [`ProgressEvent`]
//! snapshots on a channel at a bounded rate. Rendering is the consumer's
//! business entirely.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use serde::Serialize;

use crate::db::queries::StatusCounts;

/// One snapshot of pipeline progress. Every field is non-decreasing over
/// the lifetime of a run; `awaiting_decision` counts conflicts discovered,
/// not conflicts currently queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub total_paths: u64,
    pub classified: u64,
    pub awaiting_decision: u64,
    pub applied: u64,
    pub failed: u64,
}

/// Shared monotonic counters.
#[derive(Debug, Default)]
pub struct ProgressCounters {
    total_paths: AtomicU64,
    classified: AtomicU64,
    awaiting_decision: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the counters from persisted state: once after scanning for a
    /// fresh run, or at startup when resuming. The total is only ever set
    /// here, so it can never run backwards mid-run.
    pub fn seed(&self, counts: &StatusCounts) {
        self.total_paths.store(counts.total(), Ordering::SeqCst);
        self.classified.store(
            counts.awaiting_decision + counts.ready + counts.applied + counts.failed,
            Ordering::SeqCst,
        );
        self.awaiting_decision
            .store(counts.awaiting_decision, Ordering::SeqCst);
        self.applied.store(counts.applied, Ordering::SeqCst);
        self.failed.store(counts.failed, Ordering::SeqCst);
    }

    pub fn incr_classified(&self) {
        self.classified.fetch_add(1, Ordering::SeqCst);
    }

    pub fn incr_awaiting_decision(&self) {
        self.awaiting_decision.fetch_add(1, Ordering::SeqCst);
    }

    pub fn incr_applied(&self) {
        self.applied.fetch_add(1, Ordering::SeqCst);
    }

    pub fn incr_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ProgressEvent {
        ProgressEvent {
            total_paths: self.total_paths.load(Ordering::SeqCst),
            classified: self.classified.load(Ordering::SeqCst),
            awaiting_decision: self.awaiting_decision.load(Ordering::SeqCst),
            applied: self.applied.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

/// Spawn the sampler. Emits a snapshot whenever the counters changed since
/// the last tick, plus one final snapshot when `done` flips. Send failures
/// (a vanished consumer) silently stop the stream; progress is advisory.
pub fn spawn_emitter(
    counters: Arc<ProgressCounters>,
    interval: Duration,
    events: Sender<ProgressEvent>,
    done: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("progress".into())
        .spawn(move || {
            let mut last = None;
            loop {
                let finished = done.load(Ordering::SeqCst);
                let snap = counters.snapshot();
                if last != Some(snap) {
                    last = Some(snap);
                    if events.send(snap).is_err() {
                        return;
                    }
                }
                if finished {
                    return;
                }
                std::thread::sleep(interval);
            }
        })
        .expect("failed to spawn progress sampler")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_counters_snapshot() {
        let counters = ProgressCounters::new();
        counters.seed(&StatusCounts {
            pending: 3,
            ..Default::default()
        });
        counters.incr_classified();
        counters.incr_awaiting_decision();
        counters.incr_applied();

        let snap = counters.snapshot();
        assert_eq!(snap.total_paths, 3);
        assert_eq!(snap.classified, 1);
        assert_eq!(snap.awaiting_decision, 1);
        assert_eq!(snap.applied, 1);
        assert_eq!(snap.failed, 0);
    }

    #[test]
    fn test_seed_from_status_counts() {
        let counters = ProgressCounters::new();
        counters.seed(&StatusCounts {
            pending: 2,
            awaiting_decision: 1,
            ready: 3,
            applied: 4,
            failed: 1,
        });

        let snap = counters.snapshot();
        assert_eq!(snap.total_paths, 11);
        assert_eq!(snap.classified, 9);
        assert_eq!(snap.applied, 4);
    }

    #[test]
    fn test_emitter_sends_changes_and_final_snapshot() {
        let counters = Arc::new(ProgressCounters::new());
        let done = Arc::new(AtomicBool::new(false));
        let (tx, rx) = unbounded();

        let handle = spawn_emitter(
            counters.clone(),
            Duration::from_millis(5),
            tx,
            done.clone(),
        );

        counters.seed(&StatusCounts {
            pending: 1,
            ..Default::default()
        });
        std::thread::sleep(Duration::from_millis(30));
        counters.incr_applied();
        done.store(true, Ordering::SeqCst);
        handle.join().unwrap();

        let events: Vec<ProgressEvent> = rx.iter().collect();
        assert!(!events.is_empty());
        let last = events.last().unwrap();
        assert_eq!(last.total_paths, 1);
        assert_eq!(last.applied, 1);

        // Counters only ever grow.
        for pair in events.windows(2) {
            assert!(pair[1].total_paths >= pair[0].total_paths);
            assert!(pair[1].applied >= pair[0].applied);
        }
    }
}
