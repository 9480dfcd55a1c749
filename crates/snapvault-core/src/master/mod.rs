//! The deduplicated `<year>/<month>/<file>` view across every snapshot.

use crate::error::Error;
use crate::index::{HashIndex, Index, IndexEntry};
use crate::platform;
use crate::progress::ProgressReporter;
use chrono::{Datelike, Local};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub linked: usize,
    /// Entries whose content the master already holds.
    pub known: usize,
    /// Entries stored under a numbered name because the plain name was taken.
    pub renamed: usize,
    pub failed: usize,
}

impl MergeReport {
    pub fn absorb(&mut self, other: MergeReport) {
        self.linked += other.linked;
        self.known += other.known;
        self.renamed += other.renamed;
        self.failed += other.failed;
    }
}

pub struct MasterConsolidator {
    root: PathBuf,
}

impl MasterConsolidator {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn load_index(&self) -> Result<Index, Error> {
        Index::load_lenient(&self.root)
    }

    /// Hardlink every entry of `snapshot_index` whose content the master lacks,
    /// then persist the master index.
    pub fn link_snapshot(
        &self,
        snapshot_dir: &Path,
        snapshot_index: &Index,
        master_index: &mut Index,
        reporter: &dyn ProgressReporter,
    ) -> Result<MergeReport, Error> {
        let start = Instant::now();
        let snapshot_name = snapshot_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        reporter.on_master_start(&snapshot_name, snapshot_index.len());

        let mut known = master_index.hash_index(&self.root);
        let mut report = MergeReport::default();

        for (done, entry) in snapshot_index.iter().enumerate() {
            if known.contains(&entry.hash) {
                report.known += 1;
            } else {
                let src = snapshot_dir.join(&entry.rel_path);
                match self.link_entry(&src, entry, master_index, &mut known) {
                    Ok(renamed) => {
                        report.linked += 1;
                        if renamed {
                            report.renamed += 1;
                        }
                    }
                    Err(e) => {
                        error!("Failed to link {} into master: {}", src.display(), e);
                        report.failed += 1;
                    }
                }
            }
            if (done + 1) % 500 == 0 {
                reporter.on_master_progress(done + 1);
            }
        }

        master_index.save_in(&self.root)?;
        reporter.on_master_complete(report.linked, start.elapsed().as_secs_f64());
        info!(
            "Master updated from {}: {} linked, {} already present, {} renamed",
            snapshot_name, report.linked, report.known, report.renamed
        );
        Ok(report)
    }

    /// Returns whether the file had to take a numbered name.
    fn link_entry(
        &self,
        src: &Path,
        entry: &IndexEntry,
        master_index: &mut Index,
        known: &mut HashIndex,
    ) -> Result<bool, Error> {
        let bucket = bucket_for(entry);
        let file_name = Path::new(&entry.rel_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Other(format!("no file name in {}", entry.rel_path)))?;

        let dir = self.root.join(&bucket);
        fs::create_dir_all(&dir)?;

        let mut attempt = 0usize;
        let (name, dest) = loop {
            let name = numbered_name(&file_name, attempt);
            let dest = dir.join(&name);
            if !dest.exists() {
                fs::hard_link(src, &dest)?;
                break (name, dest);
            }
            if platform::same_file(src, &dest) {
                debug!("{} is already linked in master", dest.display());
                break (name, dest);
            }
            attempt += 1;
        };

        let metadata = fs::metadata(&dest)?;
        master_index.add_or_update(IndexEntry {
            rel_path: format!("{}/{}", bucket, name),
            hash: entry.hash.clone(),
            size: entry.size,
            mod_time: entry.mod_time,
            inode: platform::inode_of(&metadata),
        });
        known.insert(&entry.hash, dest);
        Ok(attempt > 0)
    }
}

/// `YYYY/MM` of the entry's modification time, in local time.
pub fn bucket_for(entry: &IndexEntry) -> String {
    let local = entry.mod_time.with_timezone(&Local);
    format!("{:04}/{:02}", local.year(), local.month())
}

/// `name.ext`, then `name_1.ext`, `name_2.ext`, ...
pub fn numbered_name(file_name: &str, n: usize) -> String {
    if n == 0 {
        return file_name.to_string();
    }
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, n, ext.to_string_lossy()),
        None => format!("{}_{}", stem, n),
    }
}
