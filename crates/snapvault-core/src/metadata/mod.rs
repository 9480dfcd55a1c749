//! Recovers true capture timestamps from JSON sidecars and stamps them onto media files.
//!
//! Matching runs an ordered list of [`MatchStrategy`] values. Secure matches are applied
//! as they are found; ambiguous ones are collected for the whole run and resolved once
//! according to [`AmbiguousPolicy`].

pub mod sidecar;
pub mod strategy;

pub use sidecar::SidecarMetadata;
pub use strategy::{Candidate, Confidence, MatchStrategy, MatchTier, MediaName, SidecarCatalog};

use crate::error::Error;
use filetime::FileTime;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const DEFAULT_MIN_SECURE_PREFIX: usize = 15;

const SUMMARY_EXAMPLES: usize = 15;

const MEDIA_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "heic", "webp", "gif", "mp4", "mov", "avi", "3gp", "mkv", "m4v", "wmv",
    // raw formats
    "nef", "cr2", "orf", "arw", "dng", "raf", "rw2", "srw", "pef",
];

pub fn is_media_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy();
            MEDIA_EXTENSIONS.iter().any(|m| ext.eq_ignore_ascii_case(m))
        })
        .unwrap_or(false)
}

pub fn is_json_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// What to do with below-threshold matches collected during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmbiguousPolicy {
    /// Apply all silently.
    Yes,
    /// Report and skip all.
    #[default]
    No,
    /// Report, then apply all or none on a single answer.
    Interactive,
}

impl std::str::FromStr for AmbiguousPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "y" => Ok(AmbiguousPolicy::Yes),
            "no" | "n" => Ok(AmbiguousPolicy::No),
            "interactive" | "ask" => Ok(AmbiguousPolicy::Interactive),
            other => Err(Error::Other(format!(
                "unknown ambiguous-metadata policy '{}' (expected yes, no or interactive)",
                other
            ))),
        }
    }
}

/// Answers the single yes/no question asked under [`AmbiguousPolicy::Interactive`].
pub trait ConfirmPrompt {
    fn confirm(&self, summary: &AmbiguousSummary) -> bool;
}

/// Declines every question; used when nobody is at the terminal.
pub struct DeclineAll;

impl ConfirmPrompt for DeclineAll {
    fn confirm(&self, _summary: &AmbiguousSummary) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousMatch {
    pub media: PathBuf,
    pub sidecar: PathBuf,
    pub shared_prefix: usize,
}

#[derive(Debug, Clone)]
pub struct AmbiguousSummary {
    pub total: usize,
    pub distinct_sidecars: usize,
    pub examples: Vec<AmbiguousMatch>,
}

impl AmbiguousSummary {
    pub fn from_matches(matches: &[AmbiguousMatch]) -> Self {
        let mut sidecars: Vec<&Path> = matches.iter().map(|m| m.sidecar.as_path()).collect();
        sidecars.sort();
        sidecars.dedup();
        Self {
            total: matches.len(),
            distinct_sidecars: sidecars.len(),
            examples: matches.iter().take(SUMMARY_EXAMPLES).cloned().collect(),
        }
    }
}

impl fmt::Display for AmbiguousSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} ambiguous metadata matches against {} sidecars",
            self.total, self.distinct_sidecars
        )?;
        for m in &self.examples {
            writeln!(
                f,
                "  {} <- {} (shared prefix {})",
                file_name(&m.media),
                file_name(&m.sidecar),
                m.shared_prefix
            )?;
        }
        if self.total > self.examples.len() {
            writeln!(f, "  ... and {} more", self.total - self.examples.len())?;
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Default, Clone)]
pub struct MetadataReport {
    pub media_files: usize,
    pub sidecars: usize,
    pub matched_exact: usize,
    pub matched_cleaned: usize,
    pub matched_truncated: usize,
    pub ambiguous_found: usize,
    pub ambiguous_applied: usize,
    pub updated: usize,
    pub failed: usize,
    pub unmatched: Vec<PathBuf>,
}

/// Result of matching one set of files before ambiguous matches are settled.
#[derive(Debug, Default)]
pub struct MatchPass {
    pub report: MetadataReport,
    pub ambiguous: Vec<AmbiguousMatch>,
}

pub struct MetadataMatcher {
    strategies: Vec<MatchStrategy>,
    policy: AmbiguousPolicy,
}

impl MetadataMatcher {
    pub fn new(policy: AmbiguousPolicy, min_secure_prefix: usize) -> Self {
        Self::with_strategies(MatchStrategy::pipeline(min_secure_prefix), policy)
    }

    pub fn with_strategies(strategies: Vec<MatchStrategy>, policy: AmbiguousPolicy) -> Self {
        Self {
            strategies,
            policy,
        }
    }

    /// First strategy with a candidate wins.
    pub fn find_sidecar(&self, media: &Path, catalog: &SidecarCatalog) -> Option<Candidate> {
        self.strategies.iter().find_map(|s| s.find(media, catalog))
    }

    /// Correct every media file under `dir`.
    pub fn correct_dir(
        &self,
        dir: &Path,
        prompt: &dyn ConfirmPrompt,
    ) -> Result<MetadataReport, Error> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(err) if err.depth() == 0 => return Err(err.into()),
                Err(err) => {
                    warn!("Skipping unreadable entry under {}: {}", dir.display(), err);
                    continue;
                }
            };
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(self.correct_files(files, prompt))
    }

    /// Correct the media among `files`, using the JSON files among them as sidecars.
    pub fn correct_files<I>(&self, files: I, prompt: &dyn ConfirmPrompt) -> MetadataReport
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let MatchPass {
            mut report,
            ambiguous,
        } = self.match_files(files);
        self.settle_ambiguous(&ambiguous, prompt, &mut report);
        log_report(&report);
        report
    }

    /// Apply every secure match among `files` and hand back the ambiguous ones.
    ///
    /// Callers that cover several directories in one run gather the pending
    /// matches and pass them to [`MetadataMatcher::settle_ambiguous`] once.
    pub fn match_files<I>(&self, files: I) -> MatchPass
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut catalog = SidecarCatalog::new();
        let mut media = Vec::new();
        for path in files {
            if is_json_path(&path) {
                catalog.insert(path);
            } else if is_media_path(&path) {
                media.push(path);
            }
        }
        media.sort();

        let mut report = MetadataReport {
            media_files: media.len(),
            sidecars: catalog.len(),
            ..Default::default()
        };
        info!(
            "Matching {} media files against {} JSON sidecars",
            report.media_files, report.sidecars
        );

        let mut ambiguous = Vec::new();
        for path in media {
            let Some(candidate) = self.find_sidecar(&path, &catalog) else {
                info!("No JSON found for: {}", file_name(&path));
                report.unmatched.push(path);
                continue;
            };

            if let Confidence::Ambiguous { shared_prefix } = candidate.confidence {
                ambiguous.push(AmbiguousMatch {
                    media: path,
                    sidecar: candidate.sidecar,
                    shared_prefix,
                });
                continue;
            }

            match candidate.tier {
                MatchTier::Exact => report.matched_exact += 1,
                MatchTier::Cleaned => report.matched_cleaned += 1,
                MatchTier::Truncated => report.matched_truncated += 1,
            }
            self.apply(&path, &candidate.sidecar, &mut report);
        }

        MatchPass { report, ambiguous }
    }

    /// Decide once for all of `ambiguous` and apply them if accepted.
    pub fn settle_ambiguous(
        &self,
        ambiguous: &[AmbiguousMatch],
        prompt: &dyn ConfirmPrompt,
        report: &mut MetadataReport,
    ) {
        report.ambiguous_found += ambiguous.len();
        if ambiguous.is_empty() || !self.resolve(ambiguous, prompt) {
            return;
        }
        for m in ambiguous {
            let before = report.updated;
            self.apply(&m.media, &m.sidecar, report);
            if report.updated > before {
                report.ambiguous_applied += 1;
            }
        }
    }

    /// One decision for the whole run.
    fn resolve(&self, ambiguous: &[AmbiguousMatch], prompt: &dyn ConfirmPrompt) -> bool {
        let summary = AmbiguousSummary::from_matches(ambiguous);
        match self.policy {
            AmbiguousPolicy::Yes => {
                debug!("Applying {} ambiguous matches", summary.total);
                true
            }
            AmbiguousPolicy::No => {
                for line in summary.to_string().lines() {
                    warn!("{}", line);
                }
                warn!("Ambiguous matches skipped (policy: no)");
                false
            }
            AmbiguousPolicy::Interactive => {
                let accepted = prompt.confirm(&summary);
                info!(
                    "Ambiguous matches {}",
                    if accepted { "accepted" } else { "declined" }
                );
                accepted
            }
        }
    }

    fn apply(&self, media: &Path, sidecar: &Path, report: &mut MetadataReport) {
        let capture = match SidecarMetadata::read(sidecar) {
            Ok(meta) => meta.capture_time(),
            Err(e) => {
                debug!("Failed to read sidecar {}: {}", sidecar.display(), e);
                report.failed += 1;
                return;
            }
        };

        let Some(timestamp) = capture else {
            info!(
                "No usable timestamp in {} for {}",
                file_name(sidecar),
                file_name(media)
            );
            report.unmatched.push(media.to_path_buf());
            return;
        };

        match apply_capture_time(media, timestamp) {
            Ok(()) => report.updated += 1,
            Err(e) => {
                debug!("Failed to apply date to {}: {}", file_name(media), e);
                report.failed += 1;
            }
        }
    }
}

fn log_report(report: &MetadataReport) {
    info!(
        "Metadata corrected for {} files ({} exact, {} cleaned, {} truncated, {} ambiguous applied, {} unmatched)",
        report.updated,
        report.matched_exact,
        report.matched_cleaned,
        report.matched_truncated,
        report.ambiguous_applied,
        report.unmatched.len()
    );
}

/// Set both access and modification time of `path` to `timestamp` (Unix seconds).
pub fn apply_capture_time(path: &Path, timestamp: i64) -> std::io::Result<()> {
    let time = FileTime::from_unix_time(timestamp, 0);
    filetime::set_file_times(path, time, time)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parsing() {
        assert_eq!("yes".parse::<AmbiguousPolicy>().unwrap(), AmbiguousPolicy::Yes);
        assert_eq!("NO".parse::<AmbiguousPolicy>().unwrap(), AmbiguousPolicy::No);
        assert_eq!(
            "interactive".parse::<AmbiguousPolicy>().unwrap(),
            AmbiguousPolicy::Interactive
        );
        assert!("maybe".parse::<AmbiguousPolicy>().is_err());
    }

    #[test]
    fn test_media_detection() {
        assert!(is_media_path(Path::new("a/IMG.JPG")));
        assert!(is_media_path(Path::new("a/clip.mp4")));
        assert!(is_media_path(Path::new("raw.NEF")));
        assert!(!is_media_path(Path::new("IMG.jpg.json")));
        assert!(!is_media_path(Path::new("notes.txt")));
        assert!(is_json_path(Path::new("IMG.jpg.JSON")));
    }

    #[test]
    fn test_summary_caps_examples() {
        let matches: Vec<AmbiguousMatch> = (0..20)
            .map(|i| AmbiguousMatch {
                media: PathBuf::from(format!("/a/IMG_{}x.jpg", i)),
                sidecar: PathBuf::from("/a/IMG.json"),
                shared_prefix: 3,
            })
            .collect();
        let summary = AmbiguousSummary::from_matches(&matches);
        assert_eq!(summary.total, 20);
        assert_eq!(summary.distinct_sidecars, 1);
        assert_eq!(summary.examples.len(), 15);
        let text = summary.to_string();
        assert!(text.contains("20 ambiguous"));
        assert!(text.contains("and 5 more"));
    }
}
