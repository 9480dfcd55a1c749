use serde::Deserialize;
use std::cmp::Ordering;
use std::path::Path;

/// One row of the primary-selection table: a case-insensitive substring of the
/// parent directory name and the penalty applied when it matches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScoreRule {
    pub pattern: String,
    pub penalty: i64,
}

impl ScoreRule {
    pub fn new(pattern: &str, penalty: i64) -> Self {
        Self {
            pattern: pattern.to_lowercase(),
            penalty,
        }
    }
}

/// Folder names produced by export tooling rather than by a person.
pub fn default_rules() -> Vec<ScoreRule> {
    vec![
        ScoreRule::new("photos from", 50),
        ScoreRule::new("fotos de", 50),
        ScoreRule::new("trash", 100),
        ScoreRule::new("bin", 100),
        ScoreRule::new("papelera", 100),
        ScoreRule::new("hangout", 20),
        ScoreRule::new("chat", 20),
    ]
}

/// Ranks hash-equal locations so exactly one becomes the primary.
#[derive(Debug, Clone)]
pub struct PathScorer {
    rules: Vec<ScoreRule>,
}

impl Default for PathScorer {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl PathScorer {
    pub fn new(rules: Vec<ScoreRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|r| ScoreRule::new(&r.pattern, r.penalty))
            .collect();
        Self { rules }
    }

    /// Higher is better. Only the immediate parent directory name is considered.
    pub fn score(&self, path: &Path) -> i64 {
        let parent = path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        self.rules
            .iter()
            .filter(|rule| !rule.pattern.is_empty() && parent.contains(&rule.pattern))
            .map(|rule| -rule.penalty.abs())
            .sum()
    }

    /// Best-scoring path; ties go to the lexicographically smallest.
    pub fn choose_primary<'a, P: AsRef<Path>>(&self, paths: &'a [P]) -> Option<&'a P> {
        paths.iter().max_by(|a, b| {
            let (a, b) = (a.as_ref(), b.as_ref());
            match self.score(a).cmp(&self.score(b)) {
                Ordering::Equal => b.cmp(a),
                other => other,
            }
        })
    }
}
