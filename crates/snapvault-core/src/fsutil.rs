use crate::error::Error;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Suffix of in-flight files written by this crate; scanners skip them.
pub const TEMP_SUFFIX: &str = ".snapvault-tmp";

/// Read a JSON document, returning `None` when the file does not exist.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, Error> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let value = serde_json::from_reader(BufReader::new(file))?;
    Ok(Some(value))
}

/// Write a pretty JSON document by writing a temp file then renaming it into place.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_sibling(path);
    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?
        .sync_all()?;

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// `dir/.name.snapvault-tmp` next to `path`.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}{}", name, TEMP_SUFFIX))
}

/// Path of `path` relative to `base`, always with `/` separators.
pub fn rel_path_string(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let value: Option<BTreeMap<String, u32>> =
            read_json_opt(&dir.path().join("nope.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let mut doc = BTreeMap::new();
        doc.insert("a".to_string(), 1u32);

        write_json_atomic(&path, &doc).unwrap();

        let back: BTreeMap<String, u32> = read_json_opt(&path).unwrap().unwrap();
        assert_eq!(back, doc);
        assert!(!temp_sibling(&path).exists());
    }

    #[test]
    fn test_corrupt_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        let result: Result<Option<BTreeMap<String, u32>>, Error> = read_json_opt(&path);
        assert!(matches!(result, Err(Error::Json(_))));
    }

    #[test]
    fn test_rel_path_string() {
        let base = Path::new("/backup/snap");
        let path = Path::new("/backup/snap/Google Photos/Album/a.jpg");
        assert_eq!(
            rel_path_string(base, path).as_deref(),
            Some("Google Photos/Album/a.jpg")
        );
        assert_eq!(rel_path_string(base, Path::new("/elsewhere/a.jpg")), None);
    }
}
