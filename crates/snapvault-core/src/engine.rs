use crate::config::AppConfig;
use crate::dedup::{DedupReport, Deduplicator, Observations, PathScorer};
use crate::error::Error;
use crate::export::{self, History};
use crate::index::{IndexScanner, ScanStats};
use crate::master::{MasterConsolidator, MergeReport};
use crate::metadata::{AmbiguousPolicy, ConfirmPrompt, MetadataMatcher, MetadataReport};
use crate::process::{ExportProcessor, ProcessOptions, ProcessReport};
use crate::progress::ProgressReporter;
use crate::snapshot::{self, BuildReport, RunLog, RunRecord, SnapshotBuilder};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Downloads directory to read exports from; defaults to `<working_path>/downloads`.
    pub source: Option<PathBuf>,
    pub dry_run: bool,
}

#[derive(Debug)]
pub struct UpdateReport {
    /// `None` when no export was eligible and nothing was created.
    pub snapshot: Option<PathBuf>,
    pub build: BuildReport,
    pub master: Option<MergeReport>,
}

/// Entry point for every command that touches the backup root.
pub struct BackupEngine {
    config: AppConfig,
}

impl BackupEngine {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn scanner(&self) -> IndexScanner {
        IndexScanner::new(&self.config.ignore_patterns)
    }

    fn scorer(&self) -> PathScorer {
        PathScorer::new(self.config.score_rules.clone())
    }

    /// Extract, deduplicate and correct every pending export.
    pub fn process(
        &self,
        options: ProcessOptions,
        prompt: &dyn ConfirmPrompt,
        reporter: &dyn ProgressReporter,
    ) -> Result<ProcessReport, Error> {
        ExportProcessor::new(&self.config, options).run(prompt, reporter)
    }

    /// Build a new snapshot from completed exports, index it, merge it into
    /// the master and append a run-log record.
    pub fn update_backup(
        &self,
        options: UpdateOptions,
        reporter: &dyn ProgressReporter,
    ) -> Result<UpdateReport, Error> {
        let backup_root = self.config.backup_root();
        let source = options
            .source
            .clone()
            .unwrap_or_else(|| self.config.downloads_root());
        if !source.is_dir() {
            return Err(Error::Other(format!(
                "source directory {} does not exist",
                source.display()
            )));
        }
        info!("Backing up exports from {}", source.display());

        let previous = snapshot::latest_snapshot(&backup_root)?;
        let name = snapshot::next_snapshot_name(&backup_root, Local::now());
        let snapshot_dir = backup_root.join(&name);
        info!("New snapshot: {}", snapshot_dir.display());
        if options.dry_run {
            info!("Dry run: nothing will be written");
        } else {
            fs::create_dir_all(&snapshot_dir)?;
        }

        let history = History::load(&self.config.history_path())?;
        let exports = export::list_exports(&source, &history)?;
        debug!("{} export directories found", exports.len());

        let builder = SnapshotBuilder::new(&source, &self.config.content_root_name)
            .dry_run(options.dry_run);
        let build = match builder.build(&snapshot_dir, previous.as_deref(), &exports, reporter) {
            Ok(report) => report,
            Err(e) => {
                if !options.dry_run {
                    remove_if_empty(&snapshot_dir);
                }
                return Err(e);
            }
        };

        if build.exports_processed.is_empty() {
            info!("No completed exports to back up");
            if !options.dry_run && build.files_placed() == 0 {
                remove_if_empty(&snapshot_dir);
            }
            return Ok(UpdateReport {
                snapshot: None,
                build,
                master: None,
            });
        }

        if options.dry_run {
            return Ok(UpdateReport {
                snapshot: Some(snapshot_dir),
                build,
                master: None,
            });
        }

        let outcome = self.scanner().ensure_index(&snapshot_dir, reporter)?;

        let mut master = None;
        if self.config.master_enabled {
            let consolidator = MasterConsolidator::new(&self.config.master_root());
            let mut master_index = consolidator.load_index()?;
            match consolidator.link_snapshot(&snapshot_dir, &outcome.index, &mut master_index, reporter) {
                Ok(report) => master = Some(report),
                Err(e) => error!("Failed to update master: {}", e),
            }
        }

        let log = RunLog::in_backup_root(&backup_root);
        let record = RunRecord {
            timestamp: name,
            source: source.to_string_lossy().into_owned(),
            snapshot_path: snapshot_dir.to_string_lossy().into_owned(),
            added_count: build.added,
            linked_count: build.linked,
            internal_links: build.internal_links,
            total_new_bytes: build.total_new_bytes,
            added_files: build.added_files.clone(),
        };
        match log.append(&record) {
            Ok(()) => info!("Run log updated: {}", log.path().display()),
            Err(e) => error!("Failed to write run log: {}", e),
        }

        Ok(UpdateReport {
            snapshot: Some(snapshot_dir),
            build,
            master,
        })
    }

    /// Retroactive deduplication across all snapshots, from their persisted indices.
    pub fn fix_hardlinks(
        &self,
        dry_run: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<DedupReport, Error> {
        let snapshots = snapshot::list_snapshots(&self.config.backup_root())?;
        if snapshots.len() < 2 {
            info!("Fewer than two snapshots; nothing to link");
            return Ok(DedupReport::default());
        }

        let scanner = self.scanner();
        let mut observations = Observations::new();
        for snap in &snapshots {
            info!("Analyzing {}", snap.display());
            let outcome = scanner.ensure_index(snap, reporter)?;
            observations.add_index(&outcome.index, snap);
        }
        info!(
            "{} files, {} unique hashes",
            observations.total_locations(),
            observations.unique_hashes()
        );

        Ok(Deduplicator::new(self.scorer())
            .dry_run(dry_run)
            .deduplicate(&observations, reporter))
    }

    /// Refresh the persisted index of every snapshot, oldest first.
    pub fn rebuild_index(
        &self,
        reporter: &dyn ProgressReporter,
    ) -> Result<Vec<(PathBuf, ScanStats)>, Error> {
        let scanner = self.scanner();
        let mut results = Vec::new();
        for snap in snapshot::list_snapshots(&self.config.backup_root())? {
            match scanner.ensure_index(&snap, reporter) {
                Ok(outcome) => results.push((snap, outcome.stats)),
                Err(e) if e.is_not_found() => warn!("{} disappeared", snap.display()),
                Err(e) => return Err(e),
            }
        }
        Ok(results)
    }

    /// Merge every snapshot into the master, oldest first.
    pub fn rebuild_master(&self, reporter: &dyn ProgressReporter) -> Result<MergeReport, Error> {
        let consolidator = MasterConsolidator::new(&self.config.master_root());
        fs::create_dir_all(consolidator.root())?;

        // Rescan so entries for files removed from the master are dropped.
        let mut master_index = self.scanner().ensure_index(consolidator.root(), reporter)?.index;

        let scanner = self.scanner();
        let mut total = MergeReport::default();
        for snap in snapshot::list_snapshots(&self.config.backup_root())? {
            let outcome = scanner.ensure_index(&snap, reporter)?;
            let report = consolidator.link_snapshot(&snap, &outcome.index, &mut master_index, reporter)?;
            total.absorb(report);
        }
        Ok(total)
    }

    /// Run the metadata matcher over an arbitrary directory.
    pub fn correct_metadata(
        &self,
        dir: &Path,
        policy: Option<AmbiguousPolicy>,
        prompt: &dyn ConfirmPrompt,
    ) -> Result<MetadataReport, Error> {
        let matcher = MetadataMatcher::new(
            policy.unwrap_or(self.config.fix_ambiguous_metadata),
            self.config.min_secure_prefix,
        );
        matcher.correct_dir(dir, prompt)
    }
}

fn remove_if_empty(dir: &Path) {
    // Fails harmlessly when the directory has content.
    if fs::remove_dir(dir).is_ok() {
        debug!("Removed empty snapshot {}", dir.display());
    }
}
