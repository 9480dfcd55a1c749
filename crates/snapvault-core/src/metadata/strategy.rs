use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

lazy_static! {
    // -edited, -edit, -edi, -ed, -e, or a bare separator at the end of a stem
    static ref EDITED_SUFFIX: Regex = Regex::new(r"[-_]e?d?i?t?e?d?$").unwrap();
    // duplicate counter such as (1), (12) at the end of a stem
    static ref COUNTER_SUFFIX: Regex = Regex::new(r"\((\d+)\)$").unwrap();
}

const SUPPLEMENTAL: &str = "supplemental-metadata";

/// Which heuristic produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchTier {
    Exact,
    Cleaned,
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Secure,
    /// Prefix match shorter than the secure threshold.
    Ambiguous { shared_prefix: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub sidecar: PathBuf,
    pub tier: MatchTier,
    pub confidence: Confidence,
}

/// Every JSON sidecar known to a run, addressable by full path and by directory.
#[derive(Debug, Default)]
pub struct SidecarCatalog {
    paths: HashSet<PathBuf>,
    by_dir: BTreeMap<PathBuf, Vec<String>>,
}

impl SidecarCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: PathBuf) {
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        if let Some(name) = path.file_name() {
            let names = self.by_dir.entry(dir).or_default();
            names.push(name.to_string_lossy().into_owned());
            names.sort();
        }
        self.paths.insert(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn in_dir(&self, dir: &Path) -> &[String] {
        self.by_dir.get(dir).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// One independently testable way of pairing a media file with its sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchStrategy {
    /// `media.ext.json` or `media.ext.supplemental-metadata.json`.
    Exact,
    /// Probe names rebuilt from the stem with counters and "edited" suffixes removed.
    Cleaned,
    /// Prefix comparison against every sidecar in the same directory.
    Truncated { min_secure_prefix: usize },
}

impl MatchStrategy {
    /// The standard ordered pipeline.
    pub fn pipeline(min_secure_prefix: usize) -> Vec<MatchStrategy> {
        vec![
            MatchStrategy::Exact,
            MatchStrategy::Cleaned,
            MatchStrategy::Truncated { min_secure_prefix },
        ]
    }

    pub fn find(&self, media: &Path, catalog: &SidecarCatalog) -> Option<Candidate> {
        match self {
            MatchStrategy::Exact => find_exact(media, catalog),
            MatchStrategy::Cleaned => find_cleaned(media, catalog),
            MatchStrategy::Truncated { min_secure_prefix } => {
                find_truncated(media, catalog, *min_secure_prefix)
            }
        }
    }
}

fn secure(sidecar: PathBuf, tier: MatchTier) -> Candidate {
    Candidate {
        sidecar,
        tier,
        confidence: Confidence::Secure,
    }
}

fn find_exact(media: &Path, catalog: &SidecarCatalog) -> Option<Candidate> {
    let name = media.file_name()?.to_string_lossy();
    [
        format!("{}.json", name),
        format!("{}.{}.json", name, SUPPLEMENTAL),
    ]
    .into_iter()
    .map(|candidate| media.with_file_name(candidate))
    .find(|path| catalog.contains(path))
    .map(|path| secure(path, MatchTier::Exact))
}

fn find_cleaned(media: &Path, catalog: &SidecarCatalog) -> Option<Candidate> {
    let parts = MediaName::from_path(media)?;
    parts
        .cleaned_candidates()
        .into_iter()
        .map(|candidate| media.with_file_name(candidate))
        .find(|path| catalog.contains(path))
        .map(|path| secure(path, MatchTier::Cleaned))
}

fn find_truncated(
    media: &Path,
    catalog: &SidecarCatalog,
    min_secure_prefix: usize,
) -> Option<Candidate> {
    let parts = MediaName::from_path(media)?;
    let dir = media.parent()?;

    let mut best: Option<(usize, &String)> = None;
    for json_name in catalog.in_dir(dir) {
        let stem = sidecar_stem(json_name);
        let shared = [parts.stem.as_str(), parts.clean.as_str()]
            .iter()
            .filter_map(|media_stem| prefix_overlap(media_stem, &stem))
            .max();
        if let Some(shared) = shared {
            // names are visited sorted, so ties keep the smallest name
            if best.map_or(true, |(len, _)| shared > len) {
                best = Some((shared, json_name));
            }
        }
    }

    let (shared, json_name) = best?;
    let confidence = if shared >= min_secure_prefix {
        Confidence::Secure
    } else {
        Confidence::Ambiguous {
            shared_prefix: shared,
        }
    };
    Some(Candidate {
        sidecar: dir.join(json_name),
        tier: MatchTier::Truncated,
        confidence,
    })
}

/// Length (in chars) of the shared prefix when one string is a prefix of the other.
fn prefix_overlap(a: &str, b: &str) -> Option<usize> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    if a.starts_with(b) {
        Some(b.chars().count())
    } else if b.starts_with(a) {
        Some(a.chars().count())
    } else {
        None
    }
}

/// A media file name split into the pieces the heuristics work with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaName {
    /// Stem as found on disk, extension removed.
    pub stem: String,
    /// Extension including the dot, or empty.
    pub ext: String,
    /// Stem with the duplicate counter and "edited" suffix removed.
    pub clean: String,
    /// The stripped duplicate counter, if any.
    pub counter: Option<String>,
}

impl MediaName {
    pub fn from_path(path: &Path) -> Option<Self> {
        Some(Self::parse(&path.file_name()?.to_string_lossy()))
    }

    pub fn parse(file_name: &str) -> Self {
        let (stem, ext) = match file_name.rfind('.') {
            Some(pos) if pos > 0 => (&file_name[..pos], &file_name[pos..]),
            _ => (file_name, ""),
        };

        let mut clean = stem.to_string();
        let mut counter = None;
        if let Some(caps) = COUNTER_SUFFIX.captures(&clean) {
            counter = caps.get(1).map(|m| m.as_str().to_string());
            let start = caps.get(0).map(|m| m.start()).unwrap_or(clean.len());
            clean.truncate(start);
        }
        if let Some(m) = EDITED_SUFFIX.find(&clean) {
            let start = m.start();
            clean.truncate(start);
        }

        Self {
            stem: stem.to_string(),
            ext: ext.to_string(),
            clean,
            counter,
        }
    }

    /// Sidecar names to probe, in priority order.
    pub fn cleaned_candidates(&self) -> Vec<String> {
        let c = &self.clean;
        let e = &self.ext;
        let mut names = vec![
            format!("{c}.json"),
            format!("{c}{e}.json"),
            format!("{c}.jpg.json"),
            format!("{c}.JPG.json"),
            format!("{c}.jpeg.json"),
            format!("{c}.heic.json"),
            format!("{c}{e}.{SUPPLEMENTAL}.json"),
            format!("{c}.{SUPPLEMENTAL}.json"),
        ];
        if let Some(n) = &self.counter {
            names.push(format!("{c}{e}({n}).json"));
            names.push(format!("{c}{e}.{SUPPLEMENTAL}({n}).json"));
        }
        names
    }
}

/// Sidecar file name with `.json`, counters and metadata suffixes removed.
pub fn sidecar_stem(json_name: &str) -> String {
    let mut stem = strip_suffix_ignore_case(json_name, ".json").to_string();

    if let Some(m) = COUNTER_SUFFIX.find(&stem) {
        let start = m.start();
        stem.truncate(start);
    }

    if let Some(pos) = stem.rfind('.') {
        let last = &stem[pos + 1..];
        let is_meta = last == "metadata" || (last.len() >= 2 && SUPPLEMENTAL.starts_with(last));
        if is_meta {
            stem.truncate(pos);
        }
    }
    stem
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> &'a str {
    if s.len() >= suffix.len() && s.is_char_boundary(s.len() - suffix.len()) {
        let (head, tail) = s.split_at(s.len() - suffix.len());
        if tail.eq_ignore_ascii_case(suffix) {
            return head;
        }
    }
    s
}
