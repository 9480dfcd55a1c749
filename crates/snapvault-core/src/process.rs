use crate::config::AppConfig;
use crate::dedup::{Deduplicator, DedupReport, Observations, PathScorer, StreamingDeduper};
use crate::error::Error;
use crate::export::{self, ExportDir, FileRecord, History, ProcessingRecord};
use crate::extract;
use crate::hasher;
use crate::index::scan::is_sidecar;
use crate::index::HashIndex;
use crate::metadata::{self, AmbiguousMatch, ConfirmPrompt, MetadataMatcher, MetadataReport};
use crate::platform;
use crate::progress::ProgressReporter;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Only process this export id.
    pub target_export: Option<String>,
    pub force_extraction: bool,
    pub force_metadata: bool,
    pub force_dedup: bool,
}

#[derive(Debug, Default)]
pub struct ProcessReport {
    pub exports_processed: Vec<String>,
    pub exports_skipped: Vec<(String, String)>,
    pub files_extracted: usize,
    pub bytes_extracted: u64,
    pub linked_to_backup: usize,
    pub linked_in_batch: usize,
    pub metadata_updated: usize,
    pub metadata_unmatched: usize,
    pub metadata_ambiguous_found: usize,
    pub metadata_ambiguous_applied: usize,
    pub dedup: Option<DedupReport>,
}

/// Per-export outcome before it is folded into the run report.
#[derive(Debug, Default)]
struct ExportOutcome {
    files_extracted: usize,
    bytes_extracted: u64,
    metadata: Option<MetadataReport>,
    /// Ambiguous sidecar matches, settled once after every export is matched.
    ambiguous: Vec<AmbiguousMatch>,
}

/// Unpacks downloaded exports, deduplicates while unpacking and corrects capture times.
pub struct ExportProcessor<'a> {
    config: &'a AppConfig,
    options: ProcessOptions,
    matcher: MetadataMatcher,
}

impl<'a> ExportProcessor<'a> {
    pub fn new(config: &'a AppConfig, options: ProcessOptions) -> Self {
        let matcher =
            MetadataMatcher::new(config.fix_ambiguous_metadata, config.min_secure_prefix);
        Self {
            config,
            options,
            matcher,
        }
    }

    pub fn run(
        &self,
        prompt: &dyn ConfirmPrompt,
        reporter: &dyn ProgressReporter,
    ) -> Result<ProcessReport, Error> {
        let start = Instant::now();
        let downloads = self.config.downloads_root();
        if !downloads.is_dir() {
            return Err(Error::Other(format!(
                "downloads directory {} does not exist",
                downloads.display()
            )));
        }

        let mut global = ProcessingRecord::load_in(&downloads)?;
        let history = History::load(&self.config.history_path())?;
        let exports: Vec<ExportDir> = export::list_exports(&downloads, &history)?
            .into_iter()
            .filter(|e| {
                self.options
                    .target_export
                    .as_ref()
                    .map_or(true, |target| target == &e.id)
            })
            .collect();

        let mut report = ProcessReport::default();
        let mut deduper: Option<StreamingDeduper> = None;
        let mut work_performed = false;
        let mut ambiguous = Vec::new();

        for export in &exports {
            let is_done = global.is_export_processed(&export.id);
            let should_extract = self.options.force_extraction || !is_done;
            let should_metadata = self.options.force_metadata || should_extract;
            let should_dedup = self.options.force_dedup;
            if !should_extract && !should_metadata && !should_dedup {
                debug!("Export {} already processed", export.id);
                continue;
            }

            work_performed = true;
            info!(
                "Processing export: {} (status: {})",
                export.id,
                history.status_of(&export.id).unwrap_or("unknown")
            );

            if deduper.is_none() && should_extract {
                let known = HashIndex::load_backup_root(&self.config.backup_root())?;
                info!("Loaded {} known hashes from the backup", known.len());
                deduper = Some(StreamingDeduper::new(known));
            }
            let stream = deduper.get_or_insert_with(StreamingDeduper::default);

            match self.process_export(
                export,
                should_extract,
                should_metadata,
                should_dedup,
                stream,
                reporter,
            ) {
                Ok(outcome) => {
                    report.files_extracted += outcome.files_extracted;
                    report.bytes_extracted += outcome.bytes_extracted;
                    if let Some(meta) = outcome.metadata {
                        report.metadata_updated += meta.updated;
                        report.metadata_unmatched += meta.unmatched.len();
                    }
                    ambiguous.extend(outcome.ambiguous);
                    if should_extract && should_metadata {
                        global.mark_export_processed(&export.id);
                        global.save_in(&downloads)?;
                    }
                    report.exports_processed.push(export.id.clone());
                }
                Err(Error::Validation { reason, .. }) => {
                    warn!("Skipping export {}: {}", export.id, reason);
                    report.exports_skipped.push((export.id.clone(), reason));
                }
                Err(e) => {
                    error!("Error processing {}: {}", export.id, e);
                    report.exports_skipped.push((export.id.clone(), e.to_string()));
                }
            }
        }

        if !ambiguous.is_empty() {
            let mut settled = MetadataReport::default();
            self.matcher.settle_ambiguous(&ambiguous, prompt, &mut settled);
            report.metadata_updated += settled.updated;
            report.metadata_unmatched += settled.unmatched.len();
            report.metadata_ambiguous_found = settled.ambiguous_found;
            report.metadata_ambiguous_applied = settled.ambiguous_applied;
        }

        if let Some(deduper) = &deduper {
            let stats = deduper.stats();
            report.linked_to_backup = stats.linked_global;
            report.linked_in_batch = stats.linked_local;
        }

        if work_performed || self.options.force_dedup {
            report.dedup = Some(self.deduplicate_processed(&downloads, &global, reporter)?);
        } else {
            info!("Skipping deduplication (no changes detected and dedup not forced)");
        }

        info!(
            "Processing finished in {:.1}s: {} exports processed, {} skipped",
            start.elapsed().as_secs_f64(),
            report.exports_processed.len(),
            report.exports_skipped.len()
        );
        Ok(report)
    }

    fn process_export(
        &self,
        export: &ExportDir,
        should_extract: bool,
        should_metadata: bool,
        should_dedup: bool,
        deduper: &mut StreamingDeduper,
        reporter: &dyn ProgressReporter,
    ) -> Result<ExportOutcome, Error> {
        let mut record = export.load_record()?;
        record.prune_missing();
        if self.options.force_extraction {
            record.processed_archives.clear();
        }
        if should_dedup {
            record.file_index.clear();
        }

        let raw = export.raw_dir();
        fs::create_dir_all(&raw)?;

        let need_hash = (should_extract || should_dedup) && !self.options.force_extraction;
        scan_raw(&raw, &mut record, need_hash)?;
        for file in record.hashed_media() {
            deduper.remember(&file.hash, PathBuf::from(&file.path));
        }

        let mut outcome = ExportOutcome::default();
        if should_extract {
            self.extract_parts(export, &raw, &mut record, deduper, &mut outcome, reporter)?;
        }

        if should_metadata {
            info!("Correcting metadata for export {}...", export.id);
            let files = record.file_index.keys().map(PathBuf::from);
            let pass = self.matcher.match_files(files);
            outcome.metadata = Some(pass.report);
            outcome.ambiguous = pass.ambiguous;
        }

        record.save_in(&export.path)?;
        Ok(outcome)
    }

    fn extract_parts(
        &self,
        export: &ExportDir,
        raw: &Path,
        record: &mut ProcessingRecord,
        deduper: &mut StreamingDeduper,
        outcome: &mut ExportOutcome,
        reporter: &dyn ProgressReporter,
    ) -> Result<(), Error> {
        let state = export.load_state()?;
        state.validate(&export.path, &export.id, record)?;

        for part in state.archives() {
            if record.is_archive_processed(&export.id, &part.filename) {
                continue;
            }
            let archive = export.path.join(&part.filename);
            info!("Processing archive: {}", part.filename);
            reporter.on_extract_start(&part.filename);

            let mut entries = 0usize;
            let stats = extract::extract_archive(&archive, raw, &mut |file| {
                if !metadata::is_json_path(&file.path) {
                    deduper.observe(&file.hash, &file.path);
                }
                record.record_file(FileRecord::new(&file.path, file.hash, file.size));
                entries += 1;
                reporter.on_extract_progress(entries);
            })?;
            reporter.on_extract_complete(stats.files);
            outcome.files_extracted += stats.files;
            outcome.bytes_extracted += stats.bytes;

            record.mark_archive_processed(&export.id, &part.filename);
            record.save_in(&export.path)?;

            if self.config.delete_archives {
                match fs::remove_file(&archive) {
                    Ok(()) => info!("Deleted original archive: {}", part.filename),
                    Err(e) => warn!("Failed to delete {}: {}", archive.display(), e),
                }
            }
        }
        Ok(())
    }

    /// In-place deduplication across the recorded files of every processed export.
    fn deduplicate_processed(
        &self,
        downloads: &Path,
        global: &ProcessingRecord,
        reporter: &dyn ProgressReporter,
    ) -> Result<DedupReport, Error> {
        info!("Starting global deduplication...");
        let mut observations = Observations::new();
        for (id, done) in &global.processed_exports {
            if !done {
                continue;
            }
            let export = ExportDir::new(downloads, id);
            if !export.exists() {
                continue;
            }
            let record = match export.load_record() {
                Ok(r) => r,
                Err(e) => {
                    warn!("Could not read record for {}: {}", id, e);
                    continue;
                }
            };
            for file in record.hashed_media() {
                observations.add(&file.hash, PathBuf::from(&file.path));
            }
        }
        info!(
            "Analyzed {} files, {} unique hashes",
            observations.total_locations(),
            observations.unique_hashes()
        );

        let deduplicator = Deduplicator::new(PathScorer::new(self.config.score_rules.clone()));
        Ok(deduplicator.deduplicate(&observations, reporter))
    }
}

/// Record files already under `raw` that the record does not know about.
fn scan_raw(raw: &Path, record: &mut ProcessingRecord, compute_hash: bool) -> Result<(), Error> {
    debug!("Scanning existing files in {}", raw.display());
    for entry in WalkDir::new(raw).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(err) if err.depth() == 0 => return Err(err.into()),
            Err(err) => {
                warn!("Skipping unreadable entry under {}: {}", raw.display(), err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if is_sidecar(&name) || platform::is_os_junk(&name) {
            continue;
        }

        let path = entry.path();
        if record.get_file(path).is_some() {
            continue;
        }
        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                warn!("Error reading metadata for {}: {}", path.display(), e);
                continue;
            }
        };
        let hash = if compute_hash {
            match hasher::hash_file(path) {
                Ok(h) => h,
                Err(e) => {
                    warn!("Error hashing {}: {}", path.display(), e);
                    continue;
                }
            }
        } else {
            String::new()
        };
        record.record_file(FileRecord::new(path, hash, size));
    }
    Ok(())
}
