use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Archive error in {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error("Export {export_id} is not ready: {reason}")]
    Validation { export_id: String, reason: String },

    /// The original file is gone and no link took its place. Needs manual attention.
    #[error("Path {0} was left without content after a failed link")]
    Stranded(PathBuf),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(export_id: &str, reason: impl Into<String>) -> Self {
        Error::Validation {
            export_id: export_id.to_string(),
            reason: reason.into(),
        }
    }

    /// True when the underlying cause is a missing file or directory.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}
