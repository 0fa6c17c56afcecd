//! Content fingerprinting.
//!
//! A fixed-size pool of blocking workers computes a 64-bit xxh3 digest over
//! files that need one, streaming in bounded chunks so large files never
//! live in memory. Back-pressure comes from the bounded job channel; the
//! feeder blocks when the pool falls behind.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, trace};
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

use crate::models::Side;

/// One file (one side of a row) to fingerprint.
#[derive(Debug, Clone)]
pub struct HashJob {
    pub rel_path: String,
    pub side: Side,
    pub abs_path: PathBuf,
}

/// Outcome of one fingerprint job. Errors travel as values; workers never
/// panic across the channel boundary.
#[derive(Debug, Clone)]
pub struct HashResult {
    pub rel_path: String,
    pub side: Side,
    pub outcome: Result<u64, String>,
}

/// Digest of the empty byte string; zero-length files get this without any
/// file I/O.
pub fn empty_hash() -> u64 {
    xxh3_64(&[])
}

/// Stream a file through xxh3 in `chunk_size` reads.
///
/// Returns `Ok(None)` when a shutdown request arrived between chunks; the
/// partial digest is discarded and the row stays pending for the next run.
pub fn hash_file(
    path: &Path,
    chunk_size: usize,
    shutdown: &AtomicBool,
) -> std::io::Result<Option<u64>> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; chunk_size];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        if shutdown.load(Ordering::SeqCst) {
            return Ok(None);
        }
    }
    Ok(Some(hasher.digest()))
}

/// Spawn the fingerprint pool. Workers drain `jobs` until the channel closes
/// or shutdown is requested, sending one [`HashResult`] per completed job.
pub fn spawn_workers(
    count: usize,
    jobs: Receiver<HashJob>,
    results: Sender<HashResult>,
    chunk_size: usize,
    shutdown: Arc<AtomicBool>,
) -> Vec<JoinHandle<()>> {
    debug!(workers = count, chunk_size, "starting fingerprint pool");
    (0..count)
        .map(|worker| {
            let jobs = jobs.clone();
            let results = results.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name(format!("hash-{worker}"))
                .spawn(move || {
                    for job in jobs.iter() {
                        if shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        let outcome = match hash_file(&job.abs_path, chunk_size, &shutdown) {
                            Ok(Some(hash)) => Ok(hash),
                            // Interrupted mid-file: drop the partial digest.
                            Ok(None) => break,
                            Err(e) => Err(e.to_string()),
                        };
                        trace!(rel_path = %job.rel_path, side = %job.side, "hashed");
                        if results
                            .send(HashResult {
                                rel_path: job.rel_path,
                                side: job.side,
                                outcome,
                            })
                            .is_err()
                        {
                            break;
                        }
                    }
                })
                .expect("failed to spawn hash worker")
        })
        .collect()
}
