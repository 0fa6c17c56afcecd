//! Interactive conflict prompt.
//!
//! The TTY implementation of the engine's resolver interface: shows both
//! candidates, marks the newer one, and loops until the operator picks a
//! side or opens both files for inspection first.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::DateTime;
use indicatif::ProgressBar;

use dirmerge_core::errors::ResolverError;
use dirmerge_core::models::{Choice, ConflictCandidate, SideSnapshot};
use dirmerge_core::Resolver;

use crate::style;

/// Prompts the operator on stdin/stdout for every conflict.
pub struct InteractiveResolver {
    /// Suspended while a prompt is on screen so the two don't fight over
    /// the terminal.
    bar: Option<ProgressBar>,
    answered: AtomicU64,
}

impl InteractiveResolver {
    pub fn new(bar: Option<ProgressBar>) -> Self {
        Self {
            bar,
            answered: AtomicU64::new(0),
        }
    }

    fn prompt(&self, candidate: &ConflictCandidate) -> Result<Choice, ResolverError> {
        let n = self.answered.fetch_add(1, Ordering::SeqCst) + 1;

        println!();
        println!(
            "{}",
            style::header(&format!("Conflict {}: {}", n, candidate.rel_path))
        );
        print_side(&style::side_a("Source A"), &candidate.a, &candidate.abs_a);
        print_side(&style::side_b("Source B"), &candidate.b, &candidate.abs_b);

        let newer = match (candidate.a.mtime, candidate.b.mtime) {
            (Some(a), Some(b)) if b > a => "Source B",
            (Some(a), Some(b)) if a > b => "Source A",
            _ => "same time",
        };
        println!("\n  More recent: {}", style::header(newer));

        let stdin = std::io::stdin();
        let mut inspected = false;
        loop {
            println!("\n  1: keep the newer version");
            println!("  2: keep the older version");
            println!("  3: open both files to inspect");
            print!("\nChoice [1-3]: ");
            let _ = std::io::stdout().flush();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                // EOF: the operator is gone; leave the conflict queued.
                Ok(0) => return Err(ResolverError::Aborted),
                Ok(_) => {}
                Err(e) => return Err(ResolverError::Failed(e.to_string())),
            }

            match line.trim() {
                "1" => {
                    return Ok(if inspected {
                        Choice::InspectThenNewer
                    } else {
                        Choice::PreferNewer
                    });
                }
                "2" => {
                    return Ok(if inspected {
                        Choice::InspectThenOlder
                    } else {
                        Choice::PreferOlder
                    });
                }
                "3" => {
                    inspected = true;
                    open_in_viewer(&candidate.abs_a);
                    open_in_viewer(&candidate.abs_b);
                    println!("{}", style::dim("Files opened; inspect them, then choose."));
                }
                other => {
                    println!("{}", style::warn(&format!("invalid choice '{other}'")));
                }
            }
        }
    }
}

impl Resolver for InteractiveResolver {
    fn resolve(&self, candidate: &ConflictCandidate) -> Result<Choice, ResolverError> {
        match &self.bar {
            Some(bar) => bar.suspend(|| self.prompt(candidate)),
            None => self.prompt(candidate),
        }
    }
}

fn print_side(label: &str, snap: &SideSnapshot, abs: &Path) {
    println!("\n{label}");
    println!("  Path:     {}", abs.display());
    println!("  Kind:     {}", snap.kind);
    if let Some(size) = snap.size {
        println!("  Size:     {}", format_size(size));
    }
    if let Some(mtime) = snap.mtime {
        println!("  Modified: {}", format_mtime(mtime));
    }
    if let Some(hash) = snap.hash {
        println!("  Hash:     {hash:016x}");
    }
    if let Some(target) = &snap.link_target {
        println!("  Target:   {target}");
    }
}

/// Open a file with the system default application, best effort.
fn open_in_viewer(path: &Path) {
    #[cfg(target_os = "macos")]
    let mut cmd = std::process::Command::new("open");
    #[cfg(target_os = "windows")]
    let mut cmd = {
        let mut c = std::process::Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    };
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let mut cmd = std::process::Command::new("xdg-open");

    if let Err(e) = cmd.arg(path).spawn() {
        println!(
            "{}",
            style::warn(&format!(
                "could not open viewer: {e}; open manually: {}",
                path.display()
            ))
        );
    }
}

/// Human-readable byte size.
pub fn format_size(size: i64) -> String {
    let mut value = size as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.1} TB")
}

/// Unix-nanosecond mtime rendered as a local-ish timestamp.
pub fn format_mtime(nanos: i64) -> String {
    let secs = nanos.div_euclid(1_000_000_000);
    let nsec = nanos.rem_euclid(1_000_000_000) as u32;
    match DateTime::from_timestamp(secs, nsec) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("@{secs}"),
    }
}
