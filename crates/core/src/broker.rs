//! Conflict broker.
//!
//! A single logical FIFO of rows awaiting a human decision. Producers (the
//! classification stage, or resume) push conflicts as they are discovered;
//! the one consumer (the resolver task) blocks on [`ConflictBroker::next_conflict`].
//! Hashing and classification of unrelated paths never wait on this queue,
//! so the operator can watch it grow while the pipeline keeps running.

use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex};

use tracing::debug;

use crate::models::PathRecord;

struct BrokerState {
    queue: VecDeque<PathRecord>,
    seen: HashSet<String>,
    closed: bool,
}

/// Thread-safe conflict queue, FIFO by arrival.
pub struct ConflictBroker {
    state: Mutex<BrokerState>,
    available: Condvar,
}

impl ConflictBroker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BrokerState {
                queue: VecDeque::new(),
                seen: HashSet::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Queue a conflict for resolution. A rel_path is only ever offered
    /// once per run; duplicate pushes are ignored.
    pub fn push(&self, record: PathRecord) {
        let mut state = self.lock();
        if state.closed || !state.seen.insert(record.rel_path.clone()) {
            return;
        }
        debug!(rel_path = %record.rel_path, depth = state.queue.len() + 1, "conflict queued");
        state.queue.push_back(record);
        self.available.notify_one();
    }

    /// Block until a conflict is available or the broker is closed.
    /// Returns `None` once closed and drained.
    pub fn next_conflict(&self) -> Option<PathRecord> {
        let mut state = self.lock();
        loop {
            if let Some(record) = state.queue.pop_front() {
                return Some(record);
            }
            if state.closed {
                return None;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Close the queue: pending items can still be drained, new pushes are
    /// dropped, and blocked consumers wake up.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.available.notify_all();
    }

    /// Number of conflicts currently waiting.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ConflictBroker {
    fn default() -> Self {
        Self::new()
    }
}
