/// Trait for reporting progress of long-running passes.
///
/// CLI implements with indicatif. All methods have default no-op implementations.
pub trait ProgressReporter {
    fn on_index_start(&self, _dir: &str) {}
    fn on_index_progress(&self, _files_seen: usize) {}
    fn on_index_complete(&self, _files: usize, _hashed: usize, _duration_secs: f64) {}
    fn on_extract_start(&self, _archive: &str) {}
    fn on_extract_progress(&self, _entries: usize) {}
    fn on_extract_complete(&self, _entries: usize) {}
    fn on_dedup_start(&self, _groups: usize) {}
    fn on_dedup_progress(&self, _groups_done: usize, _total: usize) {}
    fn on_dedup_complete(&self, _linked: usize, _duration_secs: f64) {}
    fn on_snapshot_start(&self, _export_id: &str) {}
    fn on_snapshot_progress(&self, _files_placed: usize) {}
    fn on_snapshot_complete(&self, _files_placed: usize, _duration_secs: f64) {}
    fn on_master_start(&self, _snapshot: &str, _entries: usize) {}
    fn on_master_progress(&self, _entries_done: usize) {}
    fn on_master_complete(&self, _linked: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
