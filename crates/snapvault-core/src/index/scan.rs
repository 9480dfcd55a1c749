use super::{Index, IndexEntry, INDEX_FILE_NAME};
use crate::error::Error;
use crate::export::{PROCESSING_RECORD_FILE_NAME, STATE_FILE_NAME};
use crate::fsutil::{self, TEMP_SUFFIX};
use crate::hasher;
use crate::platform;
use crate::progress::{ProgressReporter, SilentReporter};
use glob::Pattern;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};
use walkdir::WalkDir;

const PROGRESS_EVERY: usize = 500;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub files_seen: usize,
    /// Files whose content was read and hashed during this scan.
    pub files_hashed: usize,
    /// Files whose cached hash was reused (inode, size and mtime unchanged).
    pub files_reused: usize,
    pub files_failed: usize,
    /// Entries of the previous index whose file is gone.
    pub entries_dropped: usize,
}

#[derive(Debug)]
pub struct IndexOutcome {
    pub index: Index,
    pub stats: ScanStats,
}

/// Walks a directory and maintains its persisted content [`Index`].
#[derive(Debug, Default, Clone)]
pub struct IndexScanner {
    ignore_patterns: Vec<Pattern>,
}

impl IndexScanner {
    pub fn new(ignore_globs: &[String]) -> Self {
        let ignore_patterns = ignore_globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();
        Self { ignore_patterns }
    }

    /// Load `dir/index.json`, rescan `dir` reusing fresh entries, and persist the result.
    pub fn ensure_index(
        &self,
        dir: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<IndexOutcome, Error> {
        let previous = Index::load_lenient(dir)?;
        let outcome = self.scan(dir, &previous, reporter)?;
        outcome.index.save_in(dir)?;
        Ok(outcome)
    }

    /// Build a fresh index of `dir` without persisting it.
    pub fn scan(
        &self,
        dir: &Path,
        previous: &Index,
        reporter: &dyn ProgressReporter,
    ) -> Result<IndexOutcome, Error> {
        let start = Instant::now();
        reporter.on_index_start(&dir.to_string_lossy());

        let mut index = Index::new();
        let mut stats = ScanStats::default();

        for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => return Err(err.into()),
                Err(err) => {
                    warn!("Skipping unreadable entry under {}: {}", dir.display(), err);
                    stats.files_failed += 1;
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_symlink() || !file_type.is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if is_sidecar(&name) || platform::is_os_junk(&name) {
                continue;
            }

            let path = entry.path();
            if self.is_ignored(path) {
                trace!("Ignoring {}", path.display());
                continue;
            }

            let Some(rel_path) = fsutil::rel_path_string(dir, path) else {
                continue;
            };

            stats.files_seen += 1;
            if stats.files_seen % PROGRESS_EVERY == 0 {
                reporter.on_index_progress(stats.files_seen);
            }

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    error!("Error reading metadata for {}: {}", path.display(), e);
                    stats.files_failed += 1;
                    continue;
                }
            };

            if let Some(cached) = previous.get(&rel_path) {
                if cached.is_fresh(&metadata) {
                    index.add_or_update(cached.clone());
                    stats.files_reused += 1;
                    continue;
                }
            }

            match hasher::hash_file(path) {
                Ok(hash) => {
                    index.add_or_update(IndexEntry::from_metadata(rel_path, hash, &metadata));
                    stats.files_hashed += 1;
                }
                Err(e) => {
                    error!("Error hashing {}: {}", path.display(), e);
                    stats.files_failed += 1;
                }
            }
        }

        stats.entries_dropped = previous
            .files
            .keys()
            .filter(|rel| !index.files.contains_key(*rel))
            .count();

        let duration = start.elapsed().as_secs_f64();
        reporter.on_index_complete(index.len(), stats.files_hashed, duration);
        if stats.files_failed > 0 {
            info!(
                "Indexed {}: {} files, {} hashed, {} reused, {} failed",
                dir.display(),
                index.len(),
                stats.files_hashed,
                stats.files_reused,
                stats.files_failed
            );
        } else {
            debug!(
                "Indexed {} in {:.2}s: {} files, {} hashed, {} reused, {} dropped",
                dir.display(),
                duration,
                index.len(),
                stats.files_hashed,
                stats.files_reused,
                stats.entries_dropped
            );
        }

        Ok(IndexOutcome { index, stats })
    }

    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }
}

/// `ensure_index` with no ignore patterns and no progress output.
pub fn ensure_index(dir: &Path) -> Result<Index, Error> {
    IndexScanner::default()
        .ensure_index(dir, &SilentReporter)
        .map(|outcome| outcome.index)
}

/// Bookkeeping files written by this crate next to indexed data.
pub fn is_sidecar(file_name: &str) -> bool {
    file_name == INDEX_FILE_NAME
        || file_name == PROCESSING_RECORD_FILE_NAME
        || file_name == STATE_FILE_NAME
        || file_name.ends_with(TEMP_SUFFIX)
}
