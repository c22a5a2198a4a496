//! Terminal concerns of the binary: tracing setup and the progress bar.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;

use manuscript_core::progress::ProgressSnapshot;

pub(crate) fn is_dumb_terminal() -> bool {
    std::env::var("TERM")
        .map(|value| value.eq_ignore_ascii_case("dumb"))
        .unwrap_or(false)
}

pub(crate) fn should_use_progress_bar(
    stderr_is_terminal: bool,
    quiet: bool,
    dumb_terminal: bool,
) -> bool {
    stderr_is_terminal && !quiet && !dumb_terminal
}

/// Installs the stderr subscriber. `RUST_LOG` wins over `default_level`.
pub(crate) fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

fn bar_message(snapshot: &ProgressSnapshot) -> String {
    let part = if snapshot.total_parts > 1 {
        format!("part {}/{} ", snapshot.part_index, snapshot.total_parts)
    } else {
        String::new()
    };
    let failed = if snapshot.pages_failed > 0 {
        format!(", {} failed", snapshot.pages_failed)
    } else {
        String::new()
    };
    let eta = snapshot
        .eta_seconds
        .map(|secs| format!(", ETA {}", indicatif::HumanDuration(Duration::from_secs(secs))))
        .unwrap_or_default();
    format!("{part}{}{failed}{eta}", snapshot.status)
}

/// Drives a progress bar from the tracker's snapshot channel until the job
/// reaches a terminal status or the channel closes.
pub(crate) fn spawn_progress_bar(
    mut snapshots: watch::Receiver<ProgressSnapshot>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let total = u64::from(snapshots.borrow().total_pages);
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} pages {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.enable_steady_tick(Duration::from_millis(200));

        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            bar.set_position(u64::from(snapshot.pages_completed + snapshot.pages_failed));
            bar.set_message(bar_message(&snapshot));
            if snapshot.status.is_terminal() || snapshots.changed().await.is_err() {
                break;
            }
        }
        bar.finish_and_clear();
    })
}
