use std::fs::{self, Metadata};
use std::io;
use std::path::Path;

/// Identity of a file on disk: the (device, inode) pair shared by every hardlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId {
    pub device: u64,
    pub inode: u64,
}

impl FileId {
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            device: metadata.dev(),
            inode: metadata.ino(),
        })
    }

    #[cfg(not(unix))]
    pub fn from_metadata(_metadata: &Metadata) -> Option<Self> {
        None
    }

    /// Identity of `path` itself; symlinks are not followed.
    pub fn of(path: &Path) -> io::Result<Option<Self>> {
        let metadata = fs::symlink_metadata(path)?;
        Ok(Self::from_metadata(&metadata))
    }
}

/// Inode number used as a cache hint in persisted indices.
pub fn inode_of(metadata: &Metadata) -> Option<u64> {
    FileId::from_metadata(metadata).map(|id| id.inode)
}

/// Whether two paths already belong to the same hardlink group.
pub fn same_file(a: &Path, b: &Path) -> bool {
    match (FileId::of(a), FileId::of(b)) {
        (Ok(Some(x)), Ok(Some(y))) => x == y,
        _ => false,
    }
}

/// Device id of `path`, if the platform exposes one.
pub fn device_of(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .and_then(|m| FileId::from_metadata(&m))
        .map(|id| id.device)
}

pub fn is_cross_device(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::CrossesDevices
}

/// Operating-system clutter that never belongs in an index.
pub fn is_os_junk(file_name: &str) -> bool {
    matches!(file_name, ".DS_Store" | "Thumbs.db" | "desktop.ini") || file_name.starts_with("._")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_junk() {
        assert!(is_os_junk(".DS_Store"));
        assert!(is_os_junk("._IMG_0001.jpg"));
        assert!(is_os_junk("Thumbs.db"));
        assert!(!is_os_junk("IMG_0001.jpg"));
        assert!(!is_os_junk(".hidden_album_cover.jpg"));
    }

    #[cfg(unix)]
    #[test]
    fn test_same_file_after_hard_link() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let c = dir.path().join("c.bin");
        fs::write(&a, b"same").unwrap();
        fs::hard_link(&a, &b).unwrap();
        fs::write(&c, b"same").unwrap();

        assert!(same_file(&a, &b));
        assert!(!same_file(&a, &c));
        assert!(!same_file(&a, &dir.path().join("missing")));
    }
}
