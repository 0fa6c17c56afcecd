//! Merge coordinator.
//!
//! Owns the run lifecycle: scans both sources, drives the fingerprint pool,
//! classifies rows, routes conflicts through the broker to the resolver,
//! dispatches ready rows to the apply pool, and commits every state change
//! to the store in bounded batches. All stages share the store as the single
//! source of truth; the channels wired here are best-effort accelerators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use crossbeam_channel::{bounded, unbounded, Sender};
use tracing::{debug, error, info, warn};

use crate::apply::{self, ApplyContext, ApplyJob, ApplyOutcome, ApplyStatus, Disposition};
use crate::broker::ConflictBroker;
use crate::classify::{classify, decided_action};
use crate::config::{ApplyMode, MergeConfig};
use crate::db::Store;
use crate::errors::{EngineError, ResolverError};
use crate::hasher::{self, empty_hash, HashJob};
use crate::models::{
    Action, ConflictCandidate, ConflictDecision, EntryKind, MergeReport, PathRecord, Phase, Run,
    RunMode, RowStatus, Side,
};
use crate::progress::ProgressCounters;
use crate::resolver::Resolver;
use crate::scanner;

/// Shared shutdown flag; flipped by the signal handler, checked by every
/// worker between units of work.
pub type ShutdownFlag = Arc<AtomicBool>;

/// The coordinator for one merge run.
pub struct MergeEngine {
    store: Arc<Store>,
    run: Run,
    mode: RunMode,
    config: MergeConfig,
    resolver: Arc<dyn Resolver>,
    shutdown: ShutdownFlag,
    counters: Arc<ProgressCounters>,
}

/// Pending store writes, flushed in bounded transactions.
#[derive(Default)]
struct WriteBatch {
    hashes: Vec<(String, Side, u64)>,
    classifications: Vec<(String, Action)>,
    failures: Vec<(String, String)>,
    outcomes: Vec<(String, RowStatus, Option<String>)>,
}

impl WriteBatch {
    fn len(&self) -> usize {
        self.hashes.len() + self.classifications.len() + self.failures.len() + self.outcomes.len()
    }
}

impl MergeEngine {
    pub fn new(
        store: Arc<Store>,
        run: Run,
        mode: RunMode,
        config: MergeConfig,
        resolver: Arc<dyn Resolver>,
        shutdown: ShutdownFlag,
        counters: Arc<ProgressCounters>,
    ) -> Self {
        Self {
            store,
            run,
            mode,
            config,
            resolver,
            shutdown,
            counters,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run.id
    }

    /// Drive the run to completion (or a clean, resumable stop).
    pub fn run(&self) -> Result<MergeReport, EngineError> {
        info!(
            run_id = %self.run.id,
            mode = %self.mode,
            apply_mode = %self.config.apply_mode,
            a = %self.run.a_root.display(),
            b = %self.run.b_root.display(),
            dest = %self.run.dest_root.display(),
            "starting merge"
        );

        std::fs::create_dir_all(&self.run.dest_root)?;
        let removed = apply::clean_stale_temps(&self.run.dest_root, &self.run.id)?;
        if removed > 0 {
            info!(removed, "cleaned stale temp files");
        }

        if self.mode == RunMode::Resumed {
            self.verify_applied_rows()?;
        }

        if self.run.phase == Phase::Scanning {
            let complete = self.scan_phase()?;
            if !complete {
                return self.build_report(0, 0, true);
            }
            self.store.mark_phase(Phase::Hashing)?;
        }

        let counts = self.store.status_counts()?;
        self.counters.seed(&counts);

        let (resolved, skipped, fatal) = self.pipeline()?;
        if let Some(detail) = fatal {
            self.store.mark_phase(Phase::Aborted)?;
            return Err(EngineError::DestinationUnusable {
                path: self.run.dest_root.display().to_string(),
                detail,
            });
        }

        let aborted = self.shutdown.load(Ordering::SeqCst);
        if !aborted {
            let remaining = self.store.status_counts()?;
            if remaining.pending == 0 && remaining.awaiting_decision == 0 && remaining.ready == 0 {
                self.store.mark_phase(Phase::Done)?;
            }
        }
        self.build_report(resolved, skipped, aborted)
    }

    // -- phases ---------------------------------------------------------------

    /// Walk both source trees in parallel. Returns false when interrupted.
    fn scan_phase(&self) -> Result<bool, EngineError> {
        let batch = self.config.commit_batch_size;
        let (outcome_a, outcome_b) = std::thread::scope(|s| {
            let a = s.spawn(|| {
                scanner::scan_side(&self.store, &self.run.a_root, Side::A, batch, &self.shutdown)
            });
            let b = s.spawn(|| {
                scanner::scan_side(&self.store, &self.run.b_root, Side::B, batch, &self.shutdown)
            });
            (a.join().expect("scanner panicked"), b.join().expect("scanner panicked"))
        });
        let outcome_a = outcome_a?;
        let outcome_b = outcome_b?;

        if outcome_a.interrupted || outcome_b.interrupted {
            info!("scan interrupted, leaving run in scanning phase");
            return Ok(false);
        }
        info!(
            entries_a = outcome_a.entries,
            entries_b = outcome_b.entries,
            "scan complete"
        );
        Ok(true)
    }

    /// Resume safety net: a row claiming `applied` whose destination has
    /// diverged (missing, wrong size, or wrong content) is demoted to
    /// `ready` and re-applied.
    fn verify_applied_rows(&self) -> Result<(), EngineError> {
        let rows = self.store.applied_rows()?;
        let mut demoted = 0u64;
        for rec in &rows {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            if !self.applied_row_intact(rec)? {
                warn!(rel_path = %rec.rel_path, "destination diverged since last run, re-applying");
                self.store.demote_to_ready(&rec.rel_path)?;
                demoted += 1;
            }
        }
        if demoted > 0 {
            info!(demoted, "demoted diverged rows for re-apply");
        }
        Ok(())
    }

    fn applied_row_intact(&self, rec: &PathRecord) -> Result<bool, EngineError> {
        let Some(action) = final_action(rec) else {
            return Ok(false);
        };
        let dest = self.run.dest_root.join(&rec.rel_path);
        let intact = match action {
            Action::Mkdir => dest.is_dir(),
            Action::CreateSymlink(side) => match std::fs::read_link(&dest) {
                Ok(target) => {
                    rec.link_target(side).map(std::ffi::OsStr::new) == Some(target.as_os_str())
                }
                Err(_) => false,
            },
            Action::CopyFrom(side) => self.copied_file_intact(rec, side, &dest)?,
            Action::Conflict => false,
        };
        Ok(intact)
    }

    /// Cheap checks first (size, then mtime); only hash the destination when
    /// the mtime no longer matches what we recorded from the source.
    fn copied_file_intact(
        &self,
        rec: &PathRecord,
        side: Side,
        dest: &std::path::Path,
    ) -> Result<bool, EngineError> {
        let Ok(meta) = std::fs::metadata(dest) else {
            return Ok(false);
        };
        if !meta.is_file() {
            return Ok(false);
        }
        if let Some(size) = rec.size(side) {
            if meta.len() as i64 != size {
                return Ok(false);
            }
        }
        let dest_mtime = meta.modified().ok().map(crate::scanner::system_time_nanos);
        if dest_mtime.is_some() && dest_mtime == rec.mtime(side) {
            return Ok(true);
        }
        let Some(expected) = rec.hash(side) else {
            // No recorded fingerprint to compare against; hash the source.
            let src = source_root(&self.run, side).join(&rec.rel_path);
            let src_hash = hasher::hash_file(&src, self.config.chunk_size, &self.shutdown)?;
            let dest_hash = hasher::hash_file(dest, self.config.chunk_size, &self.shutdown)?;
            return Ok(src_hash.is_some() && src_hash == dest_hash);
        };
        match hasher::hash_file(dest, self.config.chunk_size, &self.shutdown)? {
            Some(found) => Ok(found == expected),
            None => Ok(true), // interrupted; leave the row alone
        }
    }

    // -- the pipeline ----------------------------------------------------------

    /// Hash, classify, resolve, and apply every live row. Returns
    /// `(conflicts_resolved, skipped, fatal_error)`.
    fn pipeline(&self) -> Result<(u64, u64, Option<String>), EngineError> {
        let rows = self.store.live_rows()?;
        debug!(live = rows.len(), "loading live rows");

        let mut pending: HashMap<String, PathRecord> = HashMap::new();
        let mut ready_now: Vec<PathRecord> = Vec::new();
        let mut awaiting: Vec<PathRecord> = Vec::new();
        for rec in rows {
            match rec.status {
                RowStatus::Pending => {
                    pending.insert(rec.rel_path.clone(), rec);
                }
                RowStatus::Ready => ready_now.push(rec),
                RowStatus::AwaitingDecision => awaiting.push(rec),
                _ => {}
            }
        }
        // Resumed conflicts are re-offered in their original arrival order.
        awaiting.sort_by(|x, y| {
            (x.queued_at.as_deref(), x.rel_path.as_str())
                .cmp(&(y.queued_at.as_deref(), y.rel_path.as_str()))
        });

        let mut batch = WriteBatch::default();

        // Classify what can be classified without hashing; plan jobs for the
        // rest. Zero-length pairs get the empty-string digest with no I/O.
        let mut hash_jobs: Vec<HashJob> = Vec::new();
        let mut classified: Vec<PathRecord> = Vec::new();
        for rec in pending.values_mut() {
            if let Some(action) = classify(rec) {
                rec.action = Some(action);
                batch.classifications.push((rec.rel_path.clone(), action));
                classified.push(rec.clone());
                continue;
            }
            for side in [Side::A, Side::B] {
                if rec.needs_hash(side) {
                    if rec.size(side) == Some(0) {
                        let hash = empty_hash();
                        rec.set_hash(side, hash);
                        batch.hashes.push((rec.rel_path.clone(), side, hash));
                    } else {
                        hash_jobs.push(HashJob {
                            rel_path: rec.rel_path.clone(),
                            side,
                            abs_path: source_root(&self.run, side).join(&rec.rel_path),
                        });
                    }
                }
            }
            if let Some(action) = classify(rec) {
                rec.action = Some(action);
                batch.classifications.push((rec.rel_path.clone(), action));
                classified.push(rec.clone());
            }
        }
        for rec in &classified {
            pending.remove(&rec.rel_path);
        }

        let ctx = Arc::new(ApplyContext {
            a_root: self.run.a_root.clone(),
            b_root: self.run.b_root.clone(),
            dest_root: self.run.dest_root.clone(),
            run_id: self.run.id.clone(),
            chunk_size: self.config.chunk_size,
        });
        let broker = Arc::new(ConflictBroker::new());
        let conflicts_resolved = Arc::new(AtomicU64::new(0));
        let mut skipped = 0u64;
        let mut fatal: Option<String> = None;
        let deferred_apply = self.config.apply_mode == ApplyMode::Deferred;

        std::thread::scope(|s| {
            let result = self.pipeline_in_scope(
                s,
                &mut pending,
                awaiting,
                ready_now,
                classified,
                hash_jobs,
                &mut batch,
                &ctx,
                &broker,
                &conflicts_resolved,
                &mut skipped,
                &mut fatal,
                deferred_apply,
            );
            if result.is_err() {
                // A store failure mid-pipeline is fatal; wake everything up
                // so the scope can join instead of hanging on the broker.
                self.shutdown.store(true, Ordering::SeqCst);
                broker.close();
            }
            result
        })?;

        Ok((conflicts_resolved.load(Ordering::SeqCst), skipped, fatal))
    }

    #[allow(clippy::too_many_arguments)]
    fn pipeline_in_scope<'scope, 'env>(
        &'env self,
        s: &'scope std::thread::Scope<'scope, 'env>,
        pending: &mut HashMap<String, PathRecord>,
        awaiting: Vec<PathRecord>,
        ready_now: Vec<PathRecord>,
        classified: Vec<PathRecord>,
        hash_jobs: Vec<HashJob>,
        mut batch: &mut WriteBatch,
        ctx: &Arc<ApplyContext>,
        broker: &Arc<ConflictBroker>,
        conflicts_resolved: &Arc<AtomicU64>,
        mut skipped: &mut u64,
        mut fatal: &mut Option<String>,
        deferred_apply: bool,
    ) -> Result<(), EngineError> {
        let depth = self.config.queue_depth();
        let (hash_job_tx, hash_job_rx) = bounded::<HashJob>(depth);
        let (hash_res_tx, hash_res_rx) = unbounded();
        let hash_handles = hasher::spawn_workers(
            self.config.hash_workers,
            hash_job_rx,
            hash_res_tx,
            self.config.chunk_size,
            self.shutdown.clone(),
        );

        let (apply_job_tx, apply_job_rx) = bounded::<ApplyJob>(depth);
        let (apply_out_tx, apply_out_rx) = unbounded::<ApplyOutcome>();
        let apply_handles = apply::spawn_workers(
            self.config.apply_workers,
            apply_job_rx,
            apply_out_tx,
            ctx.clone(),
            self.shutdown.clone(),
        );

        // Feeder: pushes hash jobs into the bounded channel so the
        // coordinator is free to drain results. Back-pressure lives here.
        let shutdown_feeder = self.shutdown.clone();
        s.spawn(move || {
            for job in hash_jobs {
                if shutdown_feeder.load(Ordering::SeqCst) {
                    break;
                }
                if hash_job_tx.send(job).is_err() {
                    break;
                }
            }
        });

        let resolver_handle = if deferred_apply {
            None
        } else {
            Some(self.spawn_resolver(s, &broker, &apply_job_tx, &conflicts_resolved))
        };

        let mut deferred_jobs: Vec<ApplyJob> = Vec::new();

        // Seed the broker and dispatcher with resumed state, then with
        // everything classified without hashing.
        for rec in awaiting {
            broker.push(rec);
        }
        for rec in ready_now {
            self.route_ready(&rec, &ctx, &apply_job_tx, &mut deferred_jobs, &mut batch)?;
        }
        self.flush(&mut batch)?;
        for rec in classified {
            self.route_classified(rec, &broker, &ctx, &apply_job_tx, &mut deferred_jobs, &mut batch)?;
        }

        // Drain fingerprints as they land; classify each row the moment
        // both sides are known. Rows become visible to the broker and
        // applier only after their classification batch is committed.
        let mut route_queue: Vec<PathRecord> = Vec::new();
        for result in hash_res_rx.iter() {
            match result.outcome {
                Ok(hash) => {
                    let now_classified = match pending.get_mut(&result.rel_path) {
                        Some(rec) => {
                            rec.set_hash(result.side, hash);
                            batch
                                .hashes
                                .push((result.rel_path.clone(), result.side, hash));
                            match classify(rec) {
                                Some(action) => {
                                    rec.action = Some(action);
                                    batch.classifications.push((rec.rel_path.clone(), action));
                                    true
                                }
                                None => false,
                            }
                        }
                        None => false,
                    };
                    if now_classified {
                        let rec = pending.remove(&result.rel_path).expect("row vanished");
                        route_queue.push(rec);
                    }
                }
                Err(e) => {
                    warn!(rel_path = %result.rel_path, error = %e, "source unreadable, skipping row");
                    pending.remove(&result.rel_path);
                    batch.failures.push((result.rel_path, e));
                    self.counters.incr_failed();
                }
            }
            if batch.len() >= self.config.commit_batch_size {
                self.flush(&mut batch)?;
                for rec in route_queue.drain(..) {
                    self.route_classified(
                        rec,
                        &broker,
                        &ctx,
                        &apply_job_tx,
                        &mut deferred_jobs,
                        &mut batch,
                    )?;
                }
            }
            // Keep the outcome queue from ballooning while hashing.
            for outcome in apply_out_rx.try_iter() {
                self.absorb_outcome(outcome, &mut skipped, &mut fatal, &mut batch);
            }
        }
        self.flush(&mut batch)?;
        for rec in route_queue.drain(..) {
            self.route_classified(
                rec,
                &broker,
                &ctx,
                &apply_job_tx,
                &mut deferred_jobs,
                &mut batch,
            )?;
        }
        self.flush(&mut batch)?;

        if !self.shutdown.load(Ordering::SeqCst) {
            self.store.mark_phase(Phase::Applying)?;
        }

        // Classification is complete: no new conflicts can arrive.
        broker.close();
        let resolver_handle = match resolver_handle {
            Some(handle) => handle,
            None => {
                // Deferred apply begins here: directories first, then files
                // and symlinks fan out to the pool.
                deferred_jobs.sort_by_key(|job| job.action != Action::Mkdir);
                for job in deferred_jobs.drain(..) {
                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    if job.action == Action::Mkdir {
                        self.apply_mkdir_inline(&job, ctx, batch);
                    } else if apply_job_tx.send(job).is_err() {
                        break;
                    }
                }
                self.spawn_resolver(s, &broker, &apply_job_tx, &conflicts_resolved)
            }
        };
        resolver_handle.join().expect("resolver task panicked");
        drop(apply_job_tx);

        for outcome in apply_out_rx.iter() {
            self.absorb_outcome(outcome, &mut skipped, &mut fatal, &mut batch);
            if batch.outcomes.len() >= self.config.commit_batch_size {
                self.flush(&mut batch)?;
            }
        }
        self.flush(&mut batch)?;

        for h in hash_handles {
            h.join().expect("hash worker panicked");
        }
        for h in apply_handles {
            h.join().expect("apply worker panicked");
        }
        Ok(())
    }

    /// The resolver task: drains the broker, records each decision
    /// transactionally, and forwards the decided row to the apply pool.
    fn spawn_resolver<'scope, 'env>(
        &'env self,
        scope: &'scope std::thread::Scope<'scope, 'env>,
        broker: &Arc<ConflictBroker>,
        apply_tx: &Sender<ApplyJob>,
        resolved: &Arc<AtomicU64>,
    ) -> std::thread::ScopedJoinHandle<'scope, ()> {
        let broker = broker.clone();
        let apply_tx = apply_tx.clone();
        let resolved = resolved.clone();
        scope.spawn(move || {
            while let Some(rec) = broker.next_conflict() {
                if self.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let candidate = ConflictCandidate {
                    rel_path: rec.rel_path.clone(),
                    a: rec.snapshot(Side::A),
                    b: rec.snapshot(Side::B),
                    abs_a: self.run.a_root.join(&rec.rel_path),
                    abs_b: self.run.b_root.join(&rec.rel_path),
                };
                let choice = match self.resolver.resolve(&candidate) {
                    Ok(choice) => choice,
                    Err(ResolverError::Aborted) => {
                        info!("resolver aborted, shutting down gracefully");
                        self.shutdown.store(true, Ordering::SeqCst);
                        break;
                    }
                    Err(ResolverError::Failed(msg)) => {
                        error!(error = %msg, "resolver failed, shutting down");
                        self.shutdown.store(true, Ordering::SeqCst);
                        break;
                    }
                };

                let winner = choice.pick_winner(rec.mtime_a, rec.mtime_b);
                let decision = ConflictDecision {
                    rel_path: rec.rel_path.clone(),
                    choice,
                    winner,
                    decided_at: Utc::now().to_rfc3339(),
                };
                if let Err(e) = self.store.record_decision(
                    &decision,
                    &candidate.a,
                    &candidate.b,
                ) {
                    error!(rel_path = %rec.rel_path, error = %e, "failed to record decision");
                    self.shutdown.store(true, Ordering::SeqCst);
                    break;
                }
                resolved.fetch_add(1, Ordering::SeqCst);
                info!(rel_path = %rec.rel_path, choice = %choice, winner = %winner, "conflict resolved");

                match decided_action(&rec, winner) {
                    Some(action) => {
                        if apply_tx.send(ApplyJob { record: rec, action }).is_err() {
                            break;
                        }
                    }
                    None => {
                        warn!(rel_path = %rec.rel_path, "decided winner has no applicable kind");
                    }
                }
            }
        })
    }

    /// Route a freshly classified row: conflicts to the broker, directories
    /// applied inline (so they exist before any contained file), files and
    /// symlinks to the apply pool (or the deferred list).
    fn route_classified(
        &self,
        rec: PathRecord,
        broker: &Arc<ConflictBroker>,
        ctx: &Arc<ApplyContext>,
        apply_tx: &Sender<ApplyJob>,
        deferred: &mut Vec<ApplyJob>,
        batch: &mut WriteBatch,
    ) -> Result<(), EngineError> {
        self.counters.incr_classified();
        match rec.action {
            Some(Action::Conflict) => {
                self.counters.incr_awaiting_decision();
                broker.push(rec);
            }
            Some(action) => self.dispatch(rec, action, ctx, apply_tx, deferred, batch)?,
            None => {}
        }
        Ok(())
    }

    /// Route a row that resumed in `ready` state.
    fn route_ready(
        &self,
        rec: &PathRecord,
        ctx: &Arc<ApplyContext>,
        apply_tx: &Sender<ApplyJob>,
        deferred: &mut Vec<ApplyJob>,
        batch: &mut WriteBatch,
    ) -> Result<(), EngineError> {
        match final_action(rec) {
            Some(action) => self.dispatch(rec.clone(), action, ctx, apply_tx, deferred, batch)?,
            None => {
                batch.failures.push((
                    rec.rel_path.clone(),
                    "ready row has no applicable action".to_string(),
                ));
                self.counters.incr_failed();
            }
        }
        Ok(())
    }

    fn dispatch(
        &self,
        rec: PathRecord,
        action: Action,
        ctx: &Arc<ApplyContext>,
        apply_tx: &Sender<ApplyJob>,
        deferred: &mut Vec<ApplyJob>,
        batch: &mut WriteBatch,
    ) -> Result<(), EngineError> {
        let job = ApplyJob { record: rec, action };
        if self.config.apply_mode == ApplyMode::Deferred {
            deferred.push(job);
        } else if action == Action::Mkdir {
            // Directories are cheap and must precede their contents; the
            // coordinator applies them inline.
            self.apply_mkdir_inline(&job, ctx, batch);
        } else if !self.shutdown.load(Ordering::SeqCst) {
            let _ = apply_tx.send(job);
        }
        Ok(())
    }

    fn apply_mkdir_inline(&self, job: &ApplyJob, ctx: &Arc<ApplyContext>, batch: &mut WriteBatch) {
        match apply::execute(ctx, &job.record, job.action, &self.shutdown) {
            Ok(_) => {
                batch
                    .outcomes
                    .push((job.record.rel_path.clone(), RowStatus::Applied, None));
                self.counters.incr_applied();
            }
            Err(apply::ApplyError::Interrupted) => {}
            Err(apply::ApplyError::Io(e)) => {
                batch.outcomes.push((
                    job.record.rel_path.clone(),
                    RowStatus::Failed,
                    Some(e.to_string()),
                ));
                self.counters.incr_failed();
            }
        }
    }

    fn absorb_outcome(
        &self,
        outcome: ApplyOutcome,
        skipped: &mut u64,
        fatal: &mut Option<String>,
        batch: &mut WriteBatch,
    ) {
        match outcome.status {
            ApplyStatus::Done(disposition) => {
                if disposition == Disposition::Skipped {
                    *skipped += 1;
                }
                batch
                    .outcomes
                    .push((outcome.rel_path, RowStatus::Applied, None));
                self.counters.incr_applied();
            }
            ApplyStatus::RowFailed(msg) => {
                batch
                    .outcomes
                    .push((outcome.rel_path, RowStatus::Failed, Some(msg)));
                self.counters.incr_failed();
            }
            ApplyStatus::Fatal(msg) => {
                error!(rel_path = %outcome.rel_path, error = %msg, "destination unusable");
                if fatal.is_none() {
                    *fatal = Some(msg);
                }
                self.shutdown.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Flush every pending write in order: fingerprints, classifications,
    /// per-row failures, then apply outcomes.
    fn flush(&self, batch: &mut WriteBatch) -> Result<(), EngineError> {
        if !batch.hashes.is_empty() {
            self.store.set_hashes_batch(&batch.hashes)?;
            batch.hashes.clear();
        }
        if !batch.classifications.is_empty() {
            self.store.classify_batch(&batch.classifications)?;
            batch.classifications.clear();
        }
        if !batch.failures.is_empty() {
            self.store.mark_failed_batch(&batch.failures)?;
            batch.failures.clear();
        }
        if !batch.outcomes.is_empty() {
            self.store.apply_outcomes_batch(&batch.outcomes)?;
            batch.outcomes.clear();
        }
        Ok(())
    }

    fn build_report(
        &self,
        conflicts_resolved: u64,
        skipped: u64,
        aborted: bool,
    ) -> Result<MergeReport, EngineError> {
        let counts = self.store.status_counts()?;
        let failed = self
            .store
            .failed_rows()?
            .into_iter()
            .map(|rec| {
                let error = rec.error.unwrap_or_else(|| "unknown error".to_string());
                (rec.rel_path, error)
            })
            .collect();
        Ok(MergeReport {
            mode: self.mode,
            total_paths: counts.total(),
            applied: counts.applied,
            skipped,
            conflicts_resolved,
            failed,
            aborted,
        })
    }
}

fn source_root(run: &Run, side: Side) -> &std::path::Path {
    match side {
        Side::A => &run.a_root,
        Side::B => &run.b_root,
    }
}

/// The concrete action for a row, folding a recorded conflict decision into
/// the winner's action.
fn final_action(rec: &PathRecord) -> Option<Action> {
    match rec.action {
        Some(Action::Conflict) => rec.winner.and_then(|winner| decided_action(rec, winner)),
        Some(action) => Some(action),
        None => {
            // Ready rows always carry an action; tolerate a missing one for
            // single-sided records by reclassifying.
            if rec.kind_a != EntryKind::Absent || rec.kind_b != EntryKind::Absent {
                classify(rec).filter(|a| *a != Action::Conflict)
            } else {
                None
            }
        }
    }
}
