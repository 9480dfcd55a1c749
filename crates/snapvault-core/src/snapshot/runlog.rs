use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const RUN_LOG_FILE_NAME: &str = "backup_log.jsonl";

/// One line of the append-only run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: String,
    pub source: String,
    pub snapshot_path: String,
    pub added_count: usize,
    pub linked_count: usize,
    pub internal_links: usize,
    pub total_new_bytes: u64,
    pub added_files: Vec<String>,
}

pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn in_backup_root(backup_root: &Path) -> Self {
        Self {
            path: backup_root.join(RUN_LOG_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &RunRecord) -> Result<(), Error> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<RunRecord>, Error> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(Error::from))
            .collect()
    }
}
