pub mod link;
pub mod score;
pub mod stream;

pub use link::{replace_with_hardlink, LinkOutcome};
pub use score::{PathScorer, ScoreRule};
pub use stream::{StreamOutcome, StreamingDeduper};

use crate::error::Error;
use crate::index::Index;
use crate::platform::FileId;
use crate::progress::ProgressReporter;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Content hash → every location known to hold that content.
#[derive(Debug, Default, Clone)]
pub struct Observations {
    groups: BTreeMap<String, Vec<PathBuf>>,
}

impl Observations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hash: &str, path: PathBuf) {
        let paths = self.groups.entry(hash.to_string()).or_default();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    /// Add every entry of a persisted index rooted at `base_dir`.
    pub fn add_index(&mut self, index: &Index, base_dir: &Path) {
        for entry in index.iter() {
            self.add(&entry.hash, base_dir.join(&entry.rel_path));
        }
    }

    /// Hashes seen at more than one location.
    pub fn duplicate_groups(&self) -> impl Iterator<Item = (&String, &Vec<PathBuf>)> {
        self.groups.iter().filter(|(_, paths)| paths.len() > 1)
    }

    pub fn unique_hashes(&self) -> usize {
        self.groups.len()
    }

    pub fn total_locations(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}

/// A location resolved against the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: PathBuf,
    pub id: Option<FileId>,
    pub size: u64,
}

impl Location {
    pub fn stat(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            id: FileId::from_metadata(&metadata),
            size: metadata.len(),
        })
    }
}

/// What to do with one same-device subset of a hash group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPlan {
    pub primary: Location,
    /// Locations to be replaced by a link to `primary`.
    pub relink: Vec<Location>,
    /// Locations already sharing the primary's inode.
    pub already_linked: usize,
}

/// Split hash-equal locations by device and pick a primary per device.
///
/// Locations on different devices never end up in the same plan.
pub fn plan_group(locations: Vec<Location>, scorer: &PathScorer) -> Vec<GroupPlan> {
    let mut by_device: BTreeMap<Option<u64>, Vec<Location>> = BTreeMap::new();
    for loc in locations {
        by_device
            .entry(loc.id.map(|id| id.device))
            .or_default()
            .push(loc);
    }

    let mut plans = Vec::new();
    for (_, members) in by_device {
        if members.len() < 2 {
            continue;
        }
        let paths: Vec<&Path> = members.iter().map(|l| l.path.as_path()).collect();
        let Some(primary_path) = scorer.choose_primary(&paths).map(|p| p.to_path_buf()) else {
            continue;
        };
        let Some(primary) = members.iter().find(|l| l.path == primary_path).cloned() else {
            continue;
        };

        let mut relink = Vec::new();
        let mut already_linked = 0;
        for loc in members {
            if loc.path == primary.path {
                continue;
            }
            match (loc.id, primary.id) {
                (Some(a), Some(b)) if a == b => already_linked += 1,
                _ => relink.push(loc),
            }
        }
        plans.push(GroupPlan {
            primary,
            relink,
            already_linked,
        });
    }
    plans
}

/// Number of distinct devices holding `located`.
pub fn device_count(located: &[Location]) -> usize {
    located
        .iter()
        .map(|l| l.id.map(|id| id.device))
        .collect::<BTreeSet<_>>()
        .len()
}

#[derive(Debug, Default, Clone)]
pub struct DedupReport {
    pub groups: usize,
    pub linked: usize,
    pub already_linked: usize,
    /// Groups whose copies sit on more than one device and were planned per device.
    pub cross_device: usize,
    pub failed: usize,
    pub bytes_reclaimed: u64,
    /// Paths left with no content after a failed link. These need manual attention.
    pub stranded: Vec<PathBuf>,
}

/// Turns duplicate locations into hardlinks to one primary per device.
pub struct Deduplicator {
    scorer: PathScorer,
    dry_run: bool,
}

impl Deduplicator {
    pub fn new(scorer: PathScorer) -> Self {
        Self {
            scorer,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn deduplicate(
        &self,
        observations: &Observations,
        reporter: &dyn ProgressReporter,
    ) -> DedupReport {
        let start = Instant::now();
        let groups: Vec<_> = observations.duplicate_groups().collect();
        reporter.on_dedup_start(groups.len());

        let mut report = DedupReport {
            groups: groups.len(),
            ..Default::default()
        };

        for (done, (hash, paths)) in groups.iter().enumerate() {
            let located = self.locate(paths, &mut report);
            let devices = device_count(&located);
            if devices > 1 {
                report.cross_device += 1;
                debug!("Hash {} spans {} devices", hash, devices);
            }

            for plan in plan_group(located, &self.scorer) {
                report.already_linked += plan.already_linked;
                for dup in &plan.relink {
                    self.relink(&plan.primary, dup, &mut report);
                }
            }
            reporter.on_dedup_progress(done + 1, groups.len());
        }

        let duration = start.elapsed().as_secs_f64();
        reporter.on_dedup_complete(report.linked, duration);
        info!(
            "Deduplication {}: {} groups, {} linked, {} already linked, {} bytes reclaimed",
            if self.dry_run { "simulated" } else { "complete" },
            report.groups,
            report.linked,
            report.already_linked,
            report.bytes_reclaimed
        );
        if !report.stranded.is_empty() {
            error!(
                "{} paths were left without content and need manual attention",
                report.stranded.len()
            );
        }
        report
    }

    fn locate(&self, paths: &[PathBuf], report: &mut DedupReport) -> Vec<Location> {
        let mut located = Vec::with_capacity(paths.len());
        for path in paths {
            match Location::stat(path) {
                Ok(loc) => located.push(loc),
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }
        }
        located
    }

    fn relink(&self, primary: &Location, dup: &Location, report: &mut DedupReport) {
        if self.dry_run {
            info!(
                "Would link: {} -> {}",
                dup.path.display(),
                primary.path.display()
            );
            report.linked += 1;
            report.bytes_reclaimed += dup.size;
            return;
        }

        match replace_with_hardlink(&primary.path, &dup.path) {
            Ok(LinkOutcome::Linked) => {
                debug!(
                    "Linked {} -> {}",
                    dup.path.display(),
                    primary.path.display()
                );
                report.linked += 1;
                report.bytes_reclaimed += dup.size;
            }
            Ok(LinkOutcome::AlreadyLinked) => report.already_linked += 1,
            Ok(LinkOutcome::CrossDevice) => {
                warn!(
                    "Refused to link across devices: {} -> {}",
                    dup.path.display(),
                    primary.path.display()
                );
                report.failed += 1;
            }
            Err(Error::Stranded(path)) => {
                report.failed += 1;
                report.stranded.push(path);
            }
            Err(e) => {
                error!(
                    "Failed to link {} -> {}: {}",
                    dup.path.display(),
                    primary.path.display(),
                    e
                );
                report.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(path: &str, device: u64, inode: u64) -> Location {
        Location {
            path: PathBuf::from(path),
            id: Some(FileId { device, inode }),
            size: 10,
        }
    }

    #[test]
    fn test_plan_never_crosses_devices() {
        let plans = plan_group(
            vec![loc("/a/x.jpg", 1, 10), loc("/b/x.jpg", 2, 20)],
            &PathScorer::default(),
        );
        assert!(plans.is_empty());
    }

    #[test]
    fn test_device_count() {
        let located = vec![
            loc("/a/1.jpg", 1, 10),
            loc("/a/2.jpg", 1, 11),
            loc("/b/1.jpg", 2, 20),
            loc("/c/1.jpg", 3, 30),
        ];
        assert_eq!(device_count(&located), 3);
        assert_eq!(device_count(&located[..2]), 1);
        assert_eq!(device_count(&[]), 0);
    }

    #[test]
    fn test_plan_per_device() {
        let plans = plan_group(
            vec![
                loc("/a/1.jpg", 1, 10),
                loc("/a/2.jpg", 1, 11),
                loc("/b/1.jpg", 2, 20),
                loc("/b/2.jpg", 2, 21),
            ],
            &PathScorer::default(),
        );
        assert_eq!(plans.len(), 2);
        for plan in &plans {
            let device = plan.primary.id.unwrap().device;
            assert_eq!(plan.relink.len(), 1);
            assert_eq!(plan.relink[0].id.unwrap().device, device);
        }
    }

    #[test]
    fn test_plan_counts_existing_links() {
        let plans = plan_group(
            vec![
                loc("/s/Album/x.jpg", 1, 10),
                loc("/s/Photos from 2020/x.jpg", 1, 10),
                loc("/s/Trash/x.jpg", 1, 12),
            ],
            &PathScorer::default(),
        );
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].primary.path, PathBuf::from("/s/Album/x.jpg"));
        assert_eq!(plans[0].already_linked, 1);
        assert_eq!(plans[0].relink.len(), 1);
        assert_eq!(plans[0].relink[0].path, PathBuf::from("/s/Trash/x.jpg"));
    }

    #[test]
    fn test_observations_ignore_repeated_paths() {
        let mut obs = Observations::new();
        obs.add("h1", PathBuf::from("/a"));
        obs.add("h1", PathBuf::from("/a"));
        obs.add("h2", PathBuf::from("/b"));
        obs.add("h2", PathBuf::from("/c"));
        assert_eq!(obs.unique_hashes(), 2);
        assert_eq!(obs.total_locations(), 3);
        assert_eq!(obs.duplicate_groups().count(), 1);
    }
}
