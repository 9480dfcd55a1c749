use super::PROCESSING_RECORD_FILE_NAME;
use crate::error::Error;
use crate::fsutil;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// One extracted file as recorded while its archive was unpacked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    /// Empty when the file was recorded without hashing.
    #[serde(default)]
    pub hash: String,
    pub size: u64,
    #[serde(default)]
    pub extension: String,
    #[serde(default)]
    pub is_json: bool,
}

impl FileRecord {
    pub fn new(path: &Path, hash: String, size: u64) -> Self {
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        let is_json = extension == ".json";
        Self {
            path: path.to_string_lossy().into_owned(),
            hash,
            size,
            extension,
            is_json,
        }
    }
}

/// `processing_index.json`: per export it lists the extracted files and the
/// archive parts already unpacked; the copy in the downloads root lists the
/// exports that finished processing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    #[serde(default)]
    pub file_index: BTreeMap<String, FileRecord>,
    #[serde(default)]
    pub processed_exports: BTreeMap<String, bool>,
    #[serde(default)]
    pub processed_archives: BTreeMap<String, bool>,
}

pub fn archive_key(export_id: &str, filename: &str) -> String {
    format!("{}/{}", export_id, filename)
}

impl ProcessingRecord {
    pub fn load_in(dir: &Path) -> Result<Self, Error> {
        Ok(fsutil::read_json_opt(&dir.join(PROCESSING_RECORD_FILE_NAME))?.unwrap_or_default())
    }

    pub fn save_in(&self, dir: &Path) -> Result<(), Error> {
        fsutil::write_json_atomic(&dir.join(PROCESSING_RECORD_FILE_NAME), self)
    }

    pub fn is_export_processed(&self, export_id: &str) -> bool {
        self.processed_exports.get(export_id).copied().unwrap_or(false)
    }

    pub fn mark_export_processed(&mut self, export_id: &str) {
        self.processed_exports.insert(export_id.to_string(), true);
    }

    pub fn is_archive_processed(&self, export_id: &str, filename: &str) -> bool {
        self.processed_archives
            .get(&archive_key(export_id, filename))
            .copied()
            .unwrap_or(false)
    }

    pub fn mark_archive_processed(&mut self, export_id: &str, filename: &str) {
        self.processed_archives
            .insert(archive_key(export_id, filename), true);
    }

    pub fn record_file(&mut self, record: FileRecord) {
        self.file_index.insert(record.path.clone(), record);
    }

    pub fn get_file(&self, path: &Path) -> Option<&FileRecord> {
        self.file_index.get(path.to_string_lossy().as_ref())
    }

    /// Drop file entries whose path no longer exists. Returns how many were dropped.
    pub fn prune_missing(&mut self) -> usize {
        let before = self.file_index.len();
        self.file_index.retain(|path, _| Path::new(path).exists());
        let dropped = before - self.file_index.len();
        if dropped > 0 {
            debug!("Dropped {} recorded files that no longer exist", dropped);
        }
        dropped
    }

    /// Recorded media files with a known hash.
    pub fn hashed_media(&self) -> impl Iterator<Item = &FileRecord> {
        self.file_index
            .values()
            .filter(|r| !r.is_json && !r.hash.is_empty())
    }
}
