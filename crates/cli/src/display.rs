//! Progress rendering.
//!
//! Consumes the engine's progress event stream and paints a single
//! spinner-style bar. The engine knows nothing about terminals; everything
//! visual lives here.

use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use indicatif::{ProgressBar, ProgressStyle};

use dirmerge_core::progress::ProgressEvent;

/// Create the progress bar and the thread that keeps it up to date.
pub fn spawn_renderer(events: Receiver<ProgressEvent>) -> (ProgressBar, JoinHandle<()>) {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .expect("invalid progress template"),
    );
    bar.enable_steady_tick(std::time::Duration::from_millis(120));

    let handle = {
        let bar = bar.clone();
        std::thread::Builder::new()
            .name("render".into())
            .spawn(move || {
                for event in events.iter() {
                    bar.set_message(render(&event));
                }
            })
            .expect("failed to spawn progress renderer")
    };

    (bar, handle)
}

fn render(event: &ProgressEvent) -> String {
    let mut msg = format!(
        "{} paths · {} classified · {} applied",
        event.total_paths, event.classified, event.applied
    );
    if event.awaiting_decision > 0 {
        msg.push_str(&format!(" · {} conflicts", event.awaiting_decision));
    }
    if event.failed > 0 {
        msg.push_str(&format!(" · {} failed", event.failed));
    }
    msg
}
