//! Renders the engine's `ProgressEvent`s as an indicatif progress bar
//! while running, and a comfy-table summary once the operation finishes.
//!
//! 📊 A spinner, not a bar — we never know the total doc count up front,
//! so any percentage we drew would be a guess wearing a nice font.

use std::time::{Duration, Instant};

use comfy_table::{presets::NOTHING, Cell, CellAlignment, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};

use couchbackup::ProgressEvent;

fn format_number(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}m{:02}s", secs / 60, secs % 60)
}

/// Drains `rx` until the channel closes or a `Finished` event arrives,
/// driving a spinner-style progress bar (the engine doesn't know the
/// total doc count up front, so this can't be a determinate bar) and
/// printing a comfy-table summary at the end.
pub async fn render(rx: async_channel::Receiver<ProgressEvent>, quiet: bool) -> u64 {
    let started = Instant::now();
    let bar = if quiet {
        None
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        Some(bar)
    };

    let mut docs = 0u64;
    let mut batches = 0u64;
    let mut total = 0u64;

    while let Ok(event) = rx.recv().await {
        match event {
            ProgressEvent::Spooled { docs: n, .. } => {
                if let Some(bar) = &bar {
                    bar.set_message(format!("spooled {} docs", format_number(n as u64)));
                    bar.tick();
                }
            }
            ProgressEvent::Written { docs: n, .. } | ProgressEvent::Restored { docs: n, .. } => {
                docs += n as u64;
                batches += 1;
                if let Some(bar) = &bar {
                    bar.set_message(format!(
                        "{} docs across {} batches",
                        format_number(docs),
                        batches
                    ));
                    bar.tick();
                }
            }
            ProgressEvent::ShallowPageWritten { docs: n } => {
                docs += n as u64;
                if let Some(bar) = &bar {
                    bar.set_message(format!("{} docs", format_number(docs)));
                    bar.tick();
                }
            }
            ProgressEvent::Finished { total: t } => {
                total = t;
                break;
            }
        }
    }

    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }
    if !quiet {
        print_summary(total, batches, started.elapsed());
    }
    total
}

fn print_summary(docs: u64, batches: u64, elapsed: Duration) {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["docs", "batches", "elapsed"]);
    table.add_row(vec![
        Cell::new(format_number(docs)).set_alignment(CellAlignment::Right),
        Cell::new(batches.to_string()).set_alignment(CellAlignment::Right),
        Cell::new(format_duration(elapsed)).set_alignment(CellAlignment::Right),
    ]);
    println!("{table}");
}
