pub mod builder;
pub mod place;
pub mod runlog;

pub use builder::{BuildReport, SnapshotBuilder};
pub use runlog::{RunLog, RunRecord};

use crate::error::Error;
use chrono::{DateTime, Duration, Local, NaiveDateTime};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Local-time name of a snapshot directory, e.g. `2024-02-01-153000`.
pub const SNAPSHOT_NAME_FORMAT: &str = "%Y-%m-%d-%H%M%S";

pub fn is_snapshot_name(name: &str) -> bool {
    NaiveDateTime::parse_from_str(name, SNAPSHOT_NAME_FORMAT).is_ok()
}

/// Snapshot directories under `backup_root`, oldest first.
pub fn list_snapshots(backup_root: &Path) -> Result<Vec<PathBuf>, Error> {
    let entries = match fs::read_dir(backup_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| is_snapshot_name(name))
        .collect();
    names.sort();
    Ok(names.into_iter().map(|n| backup_root.join(n)).collect())
}

pub fn latest_snapshot(backup_root: &Path) -> Result<Option<PathBuf>, Error> {
    Ok(list_snapshots(backup_root)?.pop())
}

/// Name for a snapshot taken at `now`, moved forward a second at a time
/// until no directory of that name exists.
pub fn next_snapshot_name(backup_root: &Path, now: DateTime<Local>) -> String {
    let mut at = now;
    loop {
        let name = at.format(SNAPSHOT_NAME_FORMAT).to_string();
        if !backup_root.join(&name).exists() {
            return name;
        }
        at += Duration::seconds(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_snapshot_names() {
        assert!(is_snapshot_name("2024-02-01-153000"));
        assert!(!is_snapshot_name("master"));
        assert!(!is_snapshot_name("2024-02-01"));
        assert!(!is_snapshot_name("2024-13-01-153000"));
    }

    #[test]
    fn test_list_and_latest() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["2024-02-01-153000", "2023-12-31-235959", "master"] {
            fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("2025-01-01-000000"), b"not a dir").unwrap();

        let snaps = list_snapshots(dir.path()).unwrap();
        assert_eq!(
            snaps,
            vec![
                dir.path().join("2023-12-31-235959"),
                dir.path().join("2024-02-01-153000")
            ]
        );
        assert_eq!(
            latest_snapshot(dir.path()).unwrap(),
            Some(dir.path().join("2024-02-01-153000"))
        );
    }

    #[test]
    fn test_next_name_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local.with_ymd_and_hms(2024, 2, 1, 15, 30, 0).unwrap();
        assert_eq!(next_snapshot_name(dir.path(), now), "2024-02-01-153000");

        fs::create_dir_all(dir.path().join("2024-02-01-153000")).unwrap();
        assert_eq!(next_snapshot_name(dir.path(), now), "2024-02-01-153001");
    }

    #[test]
    fn test_missing_root_has_no_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_snapshots(&dir.path().join("nope")).unwrap().is_empty());
    }
}
