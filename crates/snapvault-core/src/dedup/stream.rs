use super::link::{replace_with_hardlink, LinkOutcome};
use crate::error::Error;
use crate::index::HashIndex;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// First time this content was seen.
    Unique,
    /// Linked to content already in the backup.
    LinkedGlobal,
    /// Linked to an earlier file of the same batch.
    LinkedLocal,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StreamStats {
    pub unique: usize,
    pub linked_global: usize,
    pub linked_local: usize,
    pub failed: usize,
}

/// Deduplicates files as they are written, one at a time.
///
/// `global` is preloaded from the persisted indices of the backup root and is
/// read-only for the batch; `local` grows with every unique file of the batch.
#[derive(Debug, Default)]
pub struct StreamingDeduper {
    global: HashIndex,
    local: HashIndex,
    stats: StreamStats,
}

impl StreamingDeduper {
    pub fn new(global: HashIndex) -> Self {
        Self {
            global,
            local: HashIndex::new(),
            stats: StreamStats::default(),
        }
    }

    /// Seed the batch map with files written by an earlier, interrupted run.
    pub fn remember(&mut self, hash: &str, path: PathBuf) {
        self.local.insert_if_absent(hash, path);
    }

    /// Link `path` to known content with the same hash, if there is any on its device.
    pub fn observe(&mut self, hash: &str, path: &Path) -> StreamOutcome {
        match self.try_link(hash, path) {
            Ok(outcome) => {
                match outcome {
                    StreamOutcome::Unique => self.stats.unique += 1,
                    StreamOutcome::LinkedGlobal => self.stats.linked_global += 1,
                    StreamOutcome::LinkedLocal => self.stats.linked_local += 1,
                }
                outcome
            }
            Err(Error::Stranded(stranded)) => {
                error!("{} was left without content", stranded.display());
                self.stats.failed += 1;
                StreamOutcome::Unique
            }
            Err(e) => {
                warn!("Deduplication of {} failed: {}", path.display(), e);
                self.stats.failed += 1;
                self.local.insert_if_absent(hash, path.to_path_buf());
                StreamOutcome::Unique
            }
        }
    }

    fn try_link(&mut self, hash: &str, path: &Path) -> Result<StreamOutcome, Error> {
        if let Some(known) = self.global.get(hash).map(Path::to_path_buf) {
            if known != path {
                if known.exists() {
                    match replace_with_hardlink(&known, path)? {
                        LinkOutcome::Linked | LinkOutcome::AlreadyLinked => {
                            debug!("Linked {} to backup copy {}", path.display(), known.display());
                            self.local.insert_if_absent(hash, path.to_path_buf());
                            return Ok(StreamOutcome::LinkedGlobal);
                        }
                        LinkOutcome::CrossDevice => {}
                    }
                } else {
                    self.global.remove(hash);
                }
            }
        }

        if let Some(earlier) = self.local.get(hash).map(Path::to_path_buf) {
            if earlier != path && earlier.exists() {
                match replace_with_hardlink(&earlier, path)? {
                    LinkOutcome::Linked | LinkOutcome::AlreadyLinked => {
                        return Ok(StreamOutcome::LinkedLocal);
                    }
                    LinkOutcome::CrossDevice => {}
                }
            }
        }

        self.local.insert(hash, path.to_path_buf());
        Ok(StreamOutcome::Unique)
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn test_batch_duplicates_are_linked() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        fs::write(&a, b"x").unwrap();
        fs::write(&b, b"x").unwrap();

        let mut deduper = StreamingDeduper::new(HashIndex::new());
        assert_eq!(deduper.observe("h", &a), StreamOutcome::Unique);
        assert_eq!(deduper.observe("h", &b), StreamOutcome::LinkedLocal);
        assert_eq!(
            fs::metadata(&a).unwrap().ino(),
            fs::metadata(&b).unwrap().ino()
        );
    }

    #[test]
    fn test_backup_copy_wins_over_batch() {
        let dir = tempfile::tempdir().unwrap();
        let backed_up = dir.path().join("backup.jpg");
        let fresh = dir.path().join("fresh.jpg");
        fs::write(&backed_up, b"x").unwrap();
        fs::write(&fresh, b"x").unwrap();

        let mut global = HashIndex::new();
        global.insert("h", backed_up.clone());
        let mut deduper = StreamingDeduper::new(global);

        assert_eq!(deduper.observe("h", &fresh), StreamOutcome::LinkedGlobal);
        assert_eq!(
            fs::metadata(&backed_up).unwrap().ino(),
            fs::metadata(&fresh).unwrap().ino()
        );
        assert_eq!(deduper.stats().linked_global, 1);
    }

    #[test]
    fn test_stale_global_entry_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("fresh.jpg");
        fs::write(&fresh, b"x").unwrap();

        let mut global = HashIndex::new();
        global.insert("h", dir.path().join("deleted.jpg"));
        let mut deduper = StreamingDeduper::new(global);

        assert_eq!(deduper.observe("h", &fresh), StreamOutcome::Unique);
    }
}
