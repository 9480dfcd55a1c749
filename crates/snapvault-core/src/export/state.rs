use super::record::ProcessingRecord;
use super::{is_archive_name, STATE_FILE_NAME};
use crate::error::Error;
use crate::fsutil;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const STATUS_COMPLETED: &str = "completed";

/// One downloadable part of an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivePart {
    #[serde(default)]
    pub part_number: u32,
    pub filename: String,
    /// Human readable size as reported upstream, e.g. "50 GB".
    #[serde(default)]
    pub size: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub size_bytes: u64,
    #[serde(default)]
    pub status: String,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl ArchivePart {
    pub fn is_completed(&self) -> bool {
        self.status == STATUS_COMPLETED
    }
}

/// `state.json`: the parts an export is made of and how far each got.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionState {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub files: Vec<ArchivePart>,
}

impl CompletionState {
    /// A missing state file is a validation failure, not an empty state.
    pub fn load(export_dir: &Path, export_id: &str) -> Result<Self, Error> {
        let path = export_dir.join(STATE_FILE_NAME);
        match fsutil::read_json_opt(&path) {
            Ok(Some(state)) => Ok(state),
            Ok(None) => Err(Error::validation(export_id, "missing state.json")),
            Err(Error::Json(e)) => Err(Error::validation(
                export_id,
                format!("invalid state.json: {}", e),
            )),
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, export_dir: &Path) -> Result<(), Error> {
        fsutil::write_json_atomic(&export_dir.join(STATE_FILE_NAME), self)
    }

    /// Every part not yet unpacked must be downloaded, present and of the expected size.
    pub fn validate(
        &self,
        export_dir: &Path,
        export_id: &str,
        record: &ProcessingRecord,
    ) -> Result<(), Error> {
        if self.files.is_empty() {
            return Err(Error::validation(export_id, "state.json lists no parts"));
        }

        for part in &self.files {
            if record.is_archive_processed(export_id, &part.filename) {
                continue;
            }
            if !part.is_completed() {
                return Err(Error::validation(
                    export_id,
                    format!(
                        "file {} is not marked as completed (status: {})",
                        part.filename, part.status
                    ),
                ));
            }
            let metadata = match fs::metadata(export_dir.join(&part.filename)) {
                Ok(m) => m,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(Error::validation(
                        export_id,
                        format!("missing file: {}", part.filename),
                    ));
                }
                Err(e) => return Err(e.into()),
            };
            if part.size_bytes > 0 && metadata.len() != part.size_bytes {
                return Err(Error::validation(
                    export_id,
                    format!(
                        "size mismatch for {}: expected {}, got {}",
                        part.filename,
                        part.size_bytes,
                        metadata.len()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Archive parts in part order.
    pub fn archives(&self) -> Vec<&ArchivePart> {
        let mut parts: Vec<&ArchivePart> = self
            .files
            .iter()
            .filter(|p| is_archive_name(&p.filename))
            .collect();
        parts.sort_by_key(|p| p.part_number);
        parts
    }

    /// True when there is at least one archive part and all of them are unpacked.
    pub fn all_archives_processed(&self, export_id: &str, records: &[&ProcessingRecord]) -> bool {
        let archives = self.archives();
        !archives.is_empty()
            && archives.iter().all(|part| {
                records
                    .iter()
                    .any(|r| r.is_archive_processed(export_id, &part.filename))
            })
    }
}
