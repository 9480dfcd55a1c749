//! Archive unpacking with on-the-fly hashing.

mod tarball;
mod zip_archive;

use crate::error::Error;
use crate::fsutil;
use crate::hasher::HashingWriter;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::path::{Component, Path, PathBuf};

/// A regular file written during extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub path: PathBuf,
    pub hash: String,
    pub size: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtractStats {
    pub files: usize,
    pub bytes: u64,
    /// Entries skipped for escaping the destination or failing to write.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if name.ends_with(".zip") {
            Some(ArchiveKind::Zip)
        } else if name.ends_with(".tgz") || name.ends_with(".tar.gz") {
            Some(ArchiveKind::TarGz)
        } else {
            None
        }
    }
}

/// Unpack `archive` into `dest`, calling `on_file` after each regular file is written.
///
/// Per-entry failures are logged and counted; failing to open or read the
/// archive itself is an error.
pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    on_file: &mut dyn FnMut(ExtractedFile),
) -> Result<ExtractStats, Error> {
    let kind = ArchiveKind::from_path(archive).ok_or_else(|| Error::Archive {
        path: archive.to_path_buf(),
        reason: "unsupported archive type".to_string(),
    })?;
    fs::create_dir_all(dest)?;

    match kind {
        ArchiveKind::Zip => zip_archive::extract(archive, dest, on_file),
        ArchiveKind::TarGz => tarball::extract(archive, dest, on_file),
    }
}

/// Join an archive entry name onto `dest`, refusing names that would escape it.
pub fn safe_join(dest: &Path, entry_name: &Path) -> Option<PathBuf> {
    let mut joined = dest.to_path_buf();
    let mut depth = 0usize;
    for component in entry_name.components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (depth > 0).then_some(joined)
}

/// Stream `reader` into `path`, hashing as it goes.
///
/// The bytes land in a temp sibling that is renamed over `path`. An existing
/// file at `path` may be a hardlink into a snapshot, so its inode is never
/// written to.
fn write_entry<R: Read>(reader: &mut R, path: &Path) -> io::Result<ExtractedFile> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = fsutil::temp_sibling(path);
    let written = copy_into(reader, &temp_path).and_then(|stats| {
        fs::rename(&temp_path, path)?;
        Ok(stats)
    });
    let (hash, size) = match written {
        Ok(stats) => stats,
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
    };
    Ok(ExtractedFile {
        path: path.to_path_buf(),
        hash,
        size,
    })
}

fn copy_into<R: Read>(reader: &mut R, path: &Path) -> io::Result<(String, u64)> {
    let file = File::create(path)?;
    let mut writer = HashingWriter::new(BufWriter::new(file));
    io::copy(reader, &mut writer)?;
    writer.finish()
}

fn archive_error(archive: &Path, reason: impl ToString) -> Error {
    Error::Archive {
        path: archive.to_path_buf(),
        reason: reason.to_string(),
    }
}
