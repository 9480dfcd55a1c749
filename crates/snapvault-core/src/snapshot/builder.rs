use super::place;
use crate::error::Error;
use crate::export::{self, ExportDir, ProcessingRecord, Readiness};
use crate::fsutil;
use crate::hasher;
use crate::index::scan::is_sidecar;
use crate::index::Index;
use crate::platform::{self, FileId};
use crate::progress::ProgressReporter;
use std::collections::HashMap;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Default, Clone)]
pub struct BuildReport {
    pub exports_processed: Vec<String>,
    pub exports_skipped: Vec<(String, String)>,
    /// Files whose bytes were moved or copied into the snapshot.
    pub added: usize,
    /// Files hardlinked to the previous snapshot.
    pub linked: usize,
    /// Files hardlinked to a file placed earlier in this run.
    pub internal_links: usize,
    pub failed: usize,
    pub total_new_bytes: u64,
    /// Snapshot-relative paths of added files.
    pub added_files: Vec<String>,
}

impl BuildReport {
    pub fn files_placed(&self) -> usize {
        self.added + self.linked + self.internal_links
    }
}

/// How one source file ends up in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Placement {
    Internal(PathBuf),
    Previous(PathBuf),
    Move,
}

/// Assembles one snapshot generation from completed exports.
pub struct SnapshotBuilder {
    downloads_root: PathBuf,
    content_root_name: String,
    dry_run: bool,
}

/// State shared by every export of one run.
struct Run<'a> {
    snapshot_dir: &'a Path,
    previous: Option<(PathBuf, Index)>,
    /// Source file identity → where it was placed in this run.
    placed: HashMap<FileId, Placed>,
    report: BuildReport,
}

/// A snapshot path written in this run and the identity it had right after.
struct Placed {
    path: PathBuf,
    /// `None` in dry-run, where nothing is written.
    id: Option<FileId>,
}

impl Placed {
    /// Whether `path` still holds the bytes placed there.
    fn is_intact(&self) -> bool {
        match self.id {
            Some(expected) => {
                matches!(FileId::of(&self.path), Ok(Some(current)) if current == expected)
            }
            None => true,
        }
    }
}

impl SnapshotBuilder {
    pub fn new(downloads_root: &Path, content_root_name: &str) -> Self {
        Self {
            downloads_root: downloads_root.to_path_buf(),
            content_root_name: content_root_name.to_string(),
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Place every eligible export into `snapshot_dir`, linking against `previous`.
    ///
    /// Incomplete exports are skipped and left for a later run. A successfully
    /// placed export has its `raw/` content removed; its records stay.
    pub fn build(
        &self,
        snapshot_dir: &Path,
        previous: Option<&Path>,
        exports: &[ExportDir],
        reporter: &dyn ProgressReporter,
    ) -> Result<BuildReport, Error> {
        let start = Instant::now();
        let mut global = ProcessingRecord::load_in(&self.downloads_root)?;

        let previous = match previous {
            Some(dir) => {
                info!("Linking against previous snapshot {}", dir.display());
                Some((dir.to_path_buf(), Index::load_lenient(dir)?))
            }
            None => None,
        };
        let mut run = Run {
            snapshot_dir,
            previous,
            placed: HashMap::new(),
            report: BuildReport::default(),
        };

        for export in exports {
            if !export.has_raw() {
                debug!("Export {} has no extracted content", export.id);
                continue;
            }

            match export::readiness(export, &global)? {
                Readiness::Complete => {}
                Readiness::ImplicitlyComplete => {
                    info!(
                        "Export {} has every archive processed; marking it complete",
                        export.id
                    );
                    if !self.dry_run {
                        global.mark_export_processed(&export.id);
                        global.save_in(&self.downloads_root)?;
                    }
                }
                Readiness::Incomplete(reason) => {
                    info!("Skipping incomplete export {}: {}", export.id, reason);
                    run.report.exports_skipped.push((export.id.clone(), reason));
                    continue;
                }
            }

            reporter.on_snapshot_start(&export.id);
            let failed_before = run.report.failed;
            if let Err(e) = self.place_export(export, &mut run, reporter) {
                error!("Failed to back up export {}: {}", export.id, e);
                run.report
                    .exports_skipped
                    .push((export.id.clone(), e.to_string()));
                continue;
            }
            if run.report.failed > failed_before {
                warn!(
                    "Export {} had {} files that could not be placed; keeping its content",
                    export.id,
                    run.report.failed - failed_before
                );
                run.report.exports_skipped.push((
                    export.id.clone(),
                    "some files could not be placed".to_string(),
                ));
                continue;
            }

            if self.dry_run {
                info!("Would delete {}", export.raw_dir().display());
            } else {
                info!("Deleting extracted content of {}", export.id);
                if let Err(e) = fs::remove_dir_all(export.raw_dir()) {
                    error!("Failed to delete {}: {}", export.raw_dir().display(), e);
                }
            }
            run.report.exports_processed.push(export.id.clone());
        }

        let report = run.report;
        reporter.on_snapshot_complete(report.files_placed(), start.elapsed().as_secs_f64());
        info!(
            "Snapshot {}: {} added ({} bytes), {} linked to previous, {} internal links",
            snapshot_dir.display(),
            report.added,
            report.total_new_bytes,
            report.linked,
            report.internal_links
        );
        Ok(report)
    }

    fn place_export(
        &self,
        export: &ExportDir,
        run: &mut Run<'_>,
        reporter: &dyn ProgressReporter,
    ) -> Result<(), Error> {
        let Some(content_root) = export.content_root(&self.content_root_name) else {
            return Err(Error::validation(&export.id, "no extracted content root"));
        };
        if content_root == export.raw_dir() {
            warn!(
                "No '{}' folder in {}, using raw/ as the content root",
                self.content_root_name,
                export.path.display()
            );
        }
        let record = export.load_record()?;
        let dest_root = run.snapshot_dir.join(&self.content_root_name);

        for entry in WalkDir::new(&content_root)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(e) => e,
                Err(err) if err.depth() == 0 => return Err(err.into()),
                Err(err) => {
                    warn!("Skipping unreadable entry: {}", err);
                    run.report.failed += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if is_sidecar(&name) || platform::is_os_junk(&name) || export::is_archive_name(&name)
            {
                continue;
            }

            let src = entry.path();
            let Some(rel) = fsutil::rel_path_string(&content_root, src) else {
                continue;
            };
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!("Error reading metadata for {}: {}", src.display(), e);
                    run.report.failed += 1;
                    continue;
                }
            };

            let dest = dest_root.join(&rel);
            let snapshot_rel = format!("{}/{}", self.content_root_name, rel);
            if let Err(e) = self.place_file(src, &metadata, &dest, &snapshot_rel, &record, run) {
                error!("Failed to place {}: {}", snapshot_rel, e);
                run.report.failed += 1;
            }
            reporter.on_snapshot_progress(run.report.files_placed());
        }
        Ok(())
    }

    fn place_file(
        &self,
        src: &Path,
        metadata: &Metadata,
        dest: &Path,
        snapshot_rel: &str,
        record: &ProcessingRecord,
        run: &mut Run<'_>,
    ) -> Result<(), Error> {
        let id = FileId::from_metadata(metadata);
        let placement = self.classify(src, metadata, id, snapshot_rel, record, run);

        if matches!(&placement, Placement::Internal(existing) if existing.as_path() == dest) {
            self.count(&placement, metadata.len(), snapshot_rel, run);
            return Ok(());
        }

        // A path placed by an earlier export no longer holds that export's bytes.
        run.placed.retain(|_, placed| placed.path.as_path() != dest);

        if self.dry_run {
            self.count(&placement, metadata.len(), snapshot_rel, run);
            if let Some(id) = id {
                run.placed.insert(
                    id,
                    Placed {
                        path: dest.to_path_buf(),
                        id: None,
                    },
                );
            }
            return Ok(());
        }

        if dest.exists() {
            debug!("Replacing {} placed by an earlier export", snapshot_rel);
            fs::remove_file(dest)?;
        }

        let placed = match &placement {
            Placement::Internal(existing) | Placement::Previous(existing) => {
                match place::link_into(existing, dest) {
                    Ok(()) => placement.clone(),
                    Err(e) => {
                        warn!(
                            "Failed to link {} to {}: {}; moving instead",
                            snapshot_rel,
                            existing.display(),
                            e
                        );
                        place::move_file(src, dest)?;
                        Placement::Move
                    }
                }
            }
            Placement::Move => {
                place::move_file(src, dest)?;
                Placement::Move
            }
        };

        self.count(&placed, metadata.len(), snapshot_rel, run);
        if let (Some(id), Ok(dest_id)) = (id, FileId::of(dest)) {
            run.placed.insert(
                id,
                Placed {
                    path: dest.to_path_buf(),
                    id: dest_id,
                },
            );
        }
        Ok(())
    }

    fn classify(
        &self,
        src: &Path,
        metadata: &Metadata,
        id: Option<FileId>,
        snapshot_rel: &str,
        record: &ProcessingRecord,
        run: &Run<'_>,
    ) -> Placement {
        if let Some(earlier) = id.and_then(|id| run.placed.get(&id)) {
            if earlier.is_intact() {
                return Placement::Internal(earlier.path.clone());
            }
            debug!("{} changed since it was placed", earlier.path.display());
        }

        let Some((prev_dir, prev_index)) = &run.previous else {
            return Placement::Move;
        };
        let prev_file = prev_dir.join(snapshot_rel);
        let prev_meta = match fs::metadata(&prev_file) {
            Ok(m) => m,
            Err(_) => return Placement::Move,
        };
        if prev_meta.len() != metadata.len() {
            return Placement::Move;
        }

        let prev_hash = match prev_index.get(snapshot_rel) {
            Some(entry) if entry.is_fresh(&prev_meta) => Some(entry.hash.clone()),
            _ => hasher::hash_file(&prev_file).ok(),
        };
        let src_hash = match record.get_file(src) {
            Some(rec) if !rec.hash.is_empty() && rec.size == metadata.len() => {
                Some(rec.hash.clone())
            }
            _ => hasher::hash_file(src).ok(),
        };

        match (prev_hash, src_hash) {
            (Some(a), Some(b)) if a == b => Placement::Previous(prev_file),
            _ => Placement::Move,
        }
    }

    fn count(&self, placement: &Placement, size: u64, snapshot_rel: &str, run: &mut Run<'_>) {
        match placement {
            Placement::Internal(_) => run.report.internal_links += 1,
            Placement::Previous(_) => {
                debug!("Linked to previous: {}", snapshot_rel);
                run.report.linked += 1;
            }
            Placement::Move => {
                debug!("Added: {}", snapshot_rel);
                run.report.added += 1;
                run.report.total_new_bytes += size;
                run.report.added_files.push(snapshot_rel.to_string());
            }
        }
    }
}
