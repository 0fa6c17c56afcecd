//! Graceful shutdown signal handling.
//!
//! The first SIGINT/SIGTERM flips the shared shutdown flag; workers finish
//! their in-flight unit of work and the store is closed cleanly. A second
//! signal within two seconds terminates immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use dirmerge_core::ShutdownFlag;
use tracing::info;

const ESCALATION_WINDOW: Duration = Duration::from_secs(2);

/// Exit code for a user abort (state preserved).
pub const EXIT_ABORTED: u8 = 2;

/// Create the shared shutdown flag and register the signal handler.
pub fn install() -> Result<ShutdownFlag> {
    let flag = Arc::new(AtomicBool::new(false));
    let flag_clone = flag.clone();
    let last_signal: Mutex<Option<Instant>> = Mutex::new(None);

    ctrlc::set_handler(move || {
        let now = Instant::now();
        let mut last = last_signal.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(prev) = *last {
            if now.duration_since(prev) <= ESCALATION_WINDOW {
                eprintln!("\nsecond interrupt, terminating immediately");
                std::process::exit(EXIT_ABORTED as i32);
            }
        }
        *last = Some(now);
        flag_clone.store(true, Ordering::SeqCst);
        info!("interrupt received, finishing in-flight work (press again to force quit)");
        eprintln!("\ninterrupted: finishing in-flight work, progress is saved");
    })?;

    Ok(flag)
}
