use crate::platform;
use filetime::FileTime;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Hardlink `existing` at `dest`, creating parent directories.
pub fn link_into(existing: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::hard_link(existing, dest)
}

/// Rename `src` to `dest`; across filesystems, copy then delete the source.
pub fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(e) if platform::is_cross_device(&e) => {
            debug!("Cross-device move of {}, copying", src.display());
            copy_then_remove(src, dest)
        }
        Err(e) => Err(e),
    }
}

/// Copy `src` to `dest` keeping its modification time, then remove `src`.
pub fn copy_then_remove(src: &Path, dest: &Path) -> io::Result<()> {
    let metadata = fs::metadata(src)?;
    fs::copy(src, dest)?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    filetime::set_file_mtime(dest, mtime)?;
    fs::remove_file(src)
}
