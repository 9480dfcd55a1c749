use indicatif::{ProgressBar, ProgressStyle};
use snapvault_core::ProgressReporter;
use std::sync::Mutex;
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Index, extraction, snapshot and master passes: spinner with a running count
/// - Dedup pass: progress bar (group count known upfront)
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }

    fn spinner(&self, message: String) {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars(TICKS);
        pb.set_style(style);
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }
}

fn done(message: String) {
    eprintln!("  \x1b[32m✓\x1b[0m {}", message);
}

impl ProgressReporter for CliReporter {
    fn on_index_start(&self, dir: &str) {
        self.spinner(format!("Indexing {}...", dir));
    }

    fn on_index_progress(&self, files_seen: usize) {
        self.with_bar(|pb| pb.set_message(format!("Indexing... {} files seen", files_seen)));
    }

    fn on_index_complete(&self, files: usize, hashed: usize, duration_secs: f64) {
        self.finish_bar();
        done(format!(
            "Index complete: {} files, {} hashed in {:.2}s",
            files, hashed, duration_secs
        ));
    }

    fn on_extract_start(&self, archive: &str) {
        self.spinner(format!("Extracting {}...", archive));
    }

    fn on_extract_progress(&self, entries: usize) {
        self.with_bar(|pb| pb.set_message(format!("Extracting... {} files", entries)));
    }

    fn on_extract_complete(&self, entries: usize) {
        self.finish_bar();
        done(format!("Extracted {} files", entries));
    }

    fn on_dedup_start(&self, groups: usize) {
        let pb = ProgressBar::new(groups as u64);
        let style = ProgressStyle::with_template(
            "  {spinner:.cyan} Linking [{bar:30.cyan/dim}] {pos}/{len} groups ({eta} remaining)",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars(TICKS);
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_dedup_progress(&self, groups_done: usize, total: usize) {
        self.with_bar(|pb| {
            if pb.length() != Some(total as u64) {
                pb.set_length(total as u64);
            }
            pb.set_position(groups_done as u64);
        });
    }

    fn on_dedup_complete(&self, linked: usize, duration_secs: f64) {
        self.finish_bar();
        done(format!("Dedup complete: {} files linked in {:.2}s", linked, duration_secs));
    }

    fn on_snapshot_start(&self, export_id: &str) {
        self.spinner(format!("Placing export {}...", export_id));
    }

    fn on_snapshot_progress(&self, files_placed: usize) {
        self.with_bar(|pb| pb.set_message(format!("Placing... {} files", files_placed)));
    }

    fn on_snapshot_complete(&self, files_placed: usize, duration_secs: f64) {
        self.finish_bar();
        done(format!(
            "Snapshot complete: {} files placed in {:.2}s",
            files_placed, duration_secs
        ));
    }

    fn on_master_start(&self, snapshot: &str, entries: usize) {
        self.spinner(format!("Merging {} ({} files) into master...", snapshot, entries));
    }

    fn on_master_progress(&self, entries_done: usize) {
        self.with_bar(|pb| pb.set_message(format!("Merging... {} files", entries_done)));
    }

    fn on_master_complete(&self, linked: usize, duration_secs: f64) {
        self.finish_bar();
        done(format!(
            "Master updated: {} new files in {:.2}s",
            linked, duration_secs
        ));
    }
}
