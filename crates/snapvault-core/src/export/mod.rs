//! Layout and bookkeeping of downloaded exports.
//!
//! ```text
//! <downloads>/processing_index.json      exports that finished processing
//! <downloads>/<id>/<part>.zip|.tgz       archive parts
//! <downloads>/<id>/state.json            expected parts and their status
//! <downloads>/<id>/processing_index.json extracted files and unpacked parts
//! <downloads>/<id>/raw/                  extracted content
//! ```

pub mod history;
pub mod record;
pub mod state;

pub use history::{History, HistoryEntry};
pub use record::{archive_key, FileRecord, ProcessingRecord};
pub use state::{ArchivePart, CompletionState};

use crate::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const PROCESSING_RECORD_FILE_NAME: &str = "processing_index.json";
pub const STATE_FILE_NAME: &str = "state.json";
pub const RAW_DIR_NAME: &str = "raw";

/// Folder that wraps the content root in downloaded archives.
const TAKEOUT_DIR_NAME: &str = "Takeout";

pub fn is_archive_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".zip") || lower.ends_with(".tgz") || lower.ends_with(".tar.gz")
}

/// One export directory under the downloads root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDir {
    pub id: String,
    pub path: PathBuf,
}

impl ExportDir {
    pub fn new(downloads_root: &Path, id: &str) -> Self {
        Self {
            id: id.to_string(),
            path: downloads_root.join(id),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.path.join(RAW_DIR_NAME)
    }

    pub fn has_raw(&self) -> bool {
        self.raw_dir().is_dir()
    }

    pub fn load_state(&self) -> Result<CompletionState, Error> {
        CompletionState::load(&self.path, &self.id)
    }

    pub fn load_record(&self) -> Result<ProcessingRecord, Error> {
        ProcessingRecord::load_in(&self.path)
    }

    /// The directory whose contents are flattened into a snapshot.
    ///
    /// Tried in order: `raw/Takeout/<name>`, `raw/<name>`, then `raw/` itself.
    pub fn content_root(&self, content_root_name: &str) -> Option<PathBuf> {
        let raw = self.raw_dir();
        [
            raw.join(TAKEOUT_DIR_NAME).join(content_root_name),
            raw.join(content_root_name),
            raw,
        ]
        .into_iter()
        .find(|candidate| candidate.is_dir())
    }
}

/// Exports in processing order: history order first, then any other
/// directories by name.
pub fn list_exports(downloads_root: &Path, history: &History) -> Result<Vec<ExportDir>, Error> {
    let mut exports = Vec::new();
    for id in history.ordered_ids() {
        let export = ExportDir::new(downloads_root, &id);
        if export.exists() {
            exports.push(export);
        } else {
            debug!("Export {} from history has no directory", id);
        }
    }

    let mut others: Vec<String> = match fs::read_dir(downloads_root) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| !name.starts_with('.'))
            .filter(|name| !exports.iter().any(|x| &x.id == name))
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    others.sort();
    exports.extend(others.iter().map(|id| ExportDir::new(downloads_root, id)));
    Ok(exports)
}

/// Whether an export may feed a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Marked processed in the global record.
    Complete,
    /// Not marked, but every archive part is unpacked; the caller should upgrade the mark.
    ImplicitlyComplete,
    Incomplete(String),
}

pub fn readiness(export: &ExportDir, global: &ProcessingRecord) -> Result<Readiness, Error> {
    if global.is_export_processed(&export.id) {
        return Ok(Readiness::Complete);
    }

    let state = match export.load_state() {
        Ok(s) => s,
        Err(Error::Validation { reason, .. }) => return Ok(Readiness::Incomplete(reason)),
        Err(e) => return Err(e),
    };
    let local = export.load_record()?;
    if state.all_archives_processed(&export.id, &[global, &local]) {
        Ok(Readiness::ImplicitlyComplete)
    } else {
        Ok(Readiness::Incomplete(
            "not every archive part has been processed".to_string(),
        ))
    }
}
