use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, warn};

/// One line of `history.json`. Only the fields that drive ordering are read.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    #[serde(default)]
    pub requested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: String,
}

/// The export request log, one JSON object per line.
#[derive(Debug, Clone, Default)]
pub struct History {
    pub entries: Vec<HistoryEntry>,
}

impl History {
    /// A missing file is an empty history; unparsable lines are skipped.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No history at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryEntry>(line) {
                Ok(entry) if !entry.id.is_empty() => entries.push(entry),
                Ok(_) => {}
                Err(e) => warn!("Skipping history line {}: {}", n + 1, e),
            }
        }
        Ok(Self { entries })
    }

    /// Export ids ordered by request time, oldest first. Entries without a
    /// timestamp keep their file order after the dated ones.
    pub fn ordered_ids(&self) -> Vec<String> {
        let mut entries: Vec<&HistoryEntry> = self.entries.iter().collect();
        entries.sort_by_key(|e| (e.requested_at.is_none(), e.requested_at));
        let mut ids: Vec<String> = Vec::with_capacity(entries.len());
        for entry in entries {
            if !ids.contains(&entry.id) {
                ids.push(entry.id.clone());
            }
        }
        ids
    }

    pub fn status_of(&self, id: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.id == id)
            .map(|e| e.status.as_str())
    }
}
