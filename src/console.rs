use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

use shoebox::engine::ScanSummary;
use shoebox::ProgressReporter;

enum Stage {
    Idle,
    Indexing(ProgressBar),
    Working(ProgressBar),
}

/// CLI progress reporter using indicatif.
///
/// - Indexing: spinner ticking through album names
/// - Work: progress bar once items start completing
pub struct CliReporter {
    stage: Mutex<Stage>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            stage: Mutex::new(Stage::Idle),
        }
    }
}

impl Default for CliReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self) {
        let mut guard = self.stage.lock().unwrap();
        *guard = Stage::Indexing(spinner("Indexing albums..."));
    }

    fn on_album_indexed(&self, album: &str, media_files: usize, sidecars: usize) {
        let guard = self.stage.lock().unwrap();
        if let Stage::Indexing(pb) = &*guard {
            pb.set_message(format!(
                "Indexing '{}' ({} media, {} sidecars)",
                album, media_files, sidecars
            ));
        }
    }

    fn on_work_progress(&self, completed: usize, scheduled: usize) {
        let mut guard = self.stage.lock().unwrap();
        if matches!(&*guard, Stage::Indexing(_)) {
            if let Stage::Indexing(pb) = std::mem::replace(&mut *guard, Stage::Idle) {
                pb.finish_and_clear();
            }
            let bar = ProgressBar::new(scheduled as u64);
            bar.set_style(
                ProgressStyle::with_template(
                    "  {spinner:.cyan} Cataloging [{bar:30.cyan/dim}] {pos}/{len} items ({eta} remaining)",
                )
                .unwrap()
                .progress_chars("━╸─")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
            );
            bar.enable_steady_tick(std::time::Duration::from_millis(80));
            *guard = Stage::Working(bar);
        }
        if let Stage::Working(pb) = &*guard {
            // the producer keeps scheduling while workers complete
            if pb.length() != Some(scheduled as u64) {
                pb.set_length(scheduled as u64);
            }
            pb.set_position(completed as u64);
        }
    }

    fn on_scan_complete(&self, summary: &ScanSummary) {
        let mut guard = self.stage.lock().unwrap();
        match &*guard {
            Stage::Indexing(pb) => pb.finish_and_clear(),
            Stage::Working(pb) => pb.finish_and_clear(),
            Stage::Idle => {}
        }
        *guard = Stage::Idle;
        eprintln!(
            "  \x1b[32m✓\x1b[0m Scan complete: {} items in {:.2}s",
            summary.processed + summary.skipped,
            summary.duration.as_secs_f64()
        );
    }
}
