use crate::error::Error;
use crate::fsutil;
use crate::platform::{self, FileId};
use std::fs;
use std::path::Path;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// `target` now shares the primary's inode.
    Linked,
    /// `target` was already a hardlink of the primary.
    AlreadyLinked,
    /// The two paths live on different devices; nothing was attempted.
    CrossDevice,
}

/// Replace `target` with a hardlink to `primary`.
///
/// The link is created under a temporary sibling name and renamed over `target`,
/// so at every point `target` holds either its old content or the new link.
pub fn replace_with_hardlink(primary: &Path, target: &Path) -> Result<LinkOutcome, Error> {
    let primary_id = FileId::of(primary)?;
    let target_id = FileId::of(target)?;

    if let (Some(p), Some(t)) = (primary_id, target_id) {
        if p == t {
            return Ok(LinkOutcome::AlreadyLinked);
        }
        if p.device != t.device {
            debug!(
                "Not linking across devices: {} -> {}",
                target.display(),
                primary.display()
            );
            return Ok(LinkOutcome::CrossDevice);
        }
    }

    let temp = fsutil::temp_sibling(target);
    if temp.exists() {
        fs::remove_file(&temp)?;
    }

    if let Err(e) = fs::hard_link(primary, &temp) {
        if platform::is_cross_device(&e) {
            return Ok(LinkOutcome::CrossDevice);
        }
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&temp, target) {
        if let Err(cleanup) = fs::remove_file(&temp) {
            warn!("Failed to remove temporary link {}: {}", temp.display(), cleanup);
        }
        if !target.exists() {
            error!(
                "{} is gone after a failed link to {}: {}",
                target.display(),
                primary.display(),
                e
            );
            return Err(Error::Stranded(target.to_path_buf()));
        }
        return Err(e.into());
    }

    Ok(LinkOutcome::Linked)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn test_replaces_duplicate_with_link() {
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("a.jpg");
        let dup = dir.path().join("b.jpg");
        fs::write(&primary, b"pixels").unwrap();
        fs::write(&dup, b"pixels").unwrap();

        assert_eq!(
            replace_with_hardlink(&primary, &dup).unwrap(),
            LinkOutcome::Linked
        );
        assert_eq!(
            fs::metadata(&primary).unwrap().ino(),
            fs::metadata(&dup).unwrap().ino()
        );
        assert_eq!(fs::read(&dup).unwrap(), b"pixels");
        assert!(!fsutil::temp_sibling(&dup).exists());

        assert_eq!(
            replace_with_hardlink(&primary, &dup).unwrap(),
            LinkOutcome::AlreadyLinked
        );
    }

    #[test]
    fn test_missing_primary_leaves_target_intact() {
        let dir = tempfile::tempdir().unwrap();
        let dup = dir.path().join("b.jpg");
        fs::write(&dup, b"pixels").unwrap();

        let result = replace_with_hardlink(&dir.path().join("gone.jpg"), &dup);
        assert!(result.is_err());
        assert_eq!(fs::read(&dup).unwrap(), b"pixels");
    }
}
