pub mod scan;

pub use scan::{ensure_index, IndexOutcome, IndexScanner, ScanStats};

use crate::error::Error;
use crate::fsutil;
use crate::platform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Sidecar file persisted next to the data an [`Index`] describes.
pub const INDEX_FILE_NAME: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub rel_path: String,
    pub hash: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inode: Option<u64>,
}

impl IndexEntry {
    pub fn from_metadata(rel_path: String, hash: String, metadata: &Metadata) -> Self {
        Self {
            rel_path,
            hash,
            size: metadata.len(),
            mod_time: modified_utc(metadata),
            inode: platform::inode_of(metadata),
        }
    }

    /// Whether the cached hash can be trusted for a file with this metadata.
    pub fn is_fresh(&self, metadata: &Metadata) -> bool {
        if self.size != metadata.len() || self.mod_time != modified_utc(metadata) {
            return false;
        }
        match (self.inode, platform::inode_of(metadata)) {
            (Some(cached), Some(current)) => cached == current,
            (None, None) => true,
            _ => false,
        }
    }
}

/// Modification time of `metadata` as UTC, falling back to the epoch.
pub fn modified_utc(metadata: &Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_default()
}

/// Per-directory content index keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Index {
    #[serde(default)]
    pub files: BTreeMap<String, IndexEntry>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an index file; a missing file yields an empty index.
    pub fn load(path: &Path) -> Result<Self, Error> {
        Ok(fsutil::read_json_opt(path)?.unwrap_or_default())
    }

    /// Load `dir/index.json`, treating a corrupt file as absent.
    pub fn load_lenient(dir: &Path) -> Result<Self, Error> {
        let path = dir.join(INDEX_FILE_NAME);
        match Self::load(&path) {
            Ok(index) => Ok(index),
            Err(Error::Json(e)) => {
                warn!("Ignoring unreadable index {}: {}", path.display(), e);
                Ok(Self::new())
            }
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        fsutil::write_json_atomic(path, self)?;
        debug!("Saved index with {} entries to {}", self.len(), path.display());
        Ok(())
    }

    pub fn save_in(&self, dir: &Path) -> Result<(), Error> {
        self.save(&dir.join(INDEX_FILE_NAME))
    }

    pub fn add_or_update(&mut self, entry: IndexEntry) {
        self.files.insert(entry.rel_path.clone(), entry);
    }

    pub fn get(&self, rel_path: &str) -> Option<&IndexEntry> {
        self.files.get(rel_path)
    }

    pub fn remove(&mut self, rel_path: &str) -> Option<IndexEntry> {
        self.files.remove(rel_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexEntry> {
        self.files.values()
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|e| e.size).sum()
    }

    /// Hash → absolute path view of this index, rooted at `base_dir`.
    pub fn hash_index(&self, base_dir: &Path) -> HashIndex {
        let mut map = HashIndex::new();
        map.extend_from_index(self, base_dir);
        map
    }
}

/// In-memory hash → path map used while a run links against known content.
///
/// Owned by whichever component needs it and passed explicitly; nothing here is global.
#[derive(Debug, Clone, Default)]
pub struct HashIndex {
    paths: HashMap<String, PathBuf>,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `path` for `hash` unless the hash is already known. Returns true if inserted.
    pub fn insert_if_absent(&mut self, hash: &str, path: PathBuf) -> bool {
        if self.paths.contains_key(hash) {
            return false;
        }
        self.paths.insert(hash.to_string(), path);
        true
    }

    pub fn insert(&mut self, hash: &str, path: PathBuf) {
        self.paths.insert(hash.to_string(), path);
    }

    pub fn get(&self, hash: &str) -> Option<&Path> {
        self.paths.get(hash).map(PathBuf::as_path)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.paths.contains_key(hash)
    }

    pub fn remove(&mut self, hash: &str) -> Option<PathBuf> {
        self.paths.remove(hash)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Add every entry of `index` (first path per hash wins, in path order).
    pub fn extend_from_index(&mut self, index: &Index, base_dir: &Path) {
        for entry in index.iter() {
            self.insert_if_absent(&entry.hash, base_dir.join(&entry.rel_path));
        }
    }

    /// Preload from every persisted index directly under `backup_root`
    /// (`<root>/index.json` and `<root>/<dir>/index.json`). Nothing is rehashed.
    pub fn load_backup_root(backup_root: &Path) -> Result<Self, Error> {
        let mut map = Self::new();
        if !backup_root.is_dir() {
            return Ok(map);
        }

        let mut dirs = vec![backup_root.to_path_buf()];
        let mut children: Vec<PathBuf> = std::fs::read_dir(backup_root)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        children.sort();
        dirs.extend(children);

        for dir in dirs {
            let index = Index::load_lenient(&dir)?;
            if !index.is_empty() {
                debug!("Loaded {} indexed files from {}", index.len(), dir.display());
                map.extend_from_index(&index, &dir);
            }
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn entry(rel: &str, hash: &str) -> IndexEntry {
        IndexEntry {
            rel_path: rel.to_string(),
            hash: hash.to_string(),
            size: 4,
            mod_time: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            inode: Some(42),
        }
    }

    #[test]
    fn test_one_entry_per_path() {
        let mut index = Index::new();
        index.add_or_update(entry("a/b.jpg", "h1"));
        index.add_or_update(entry("a/b.jpg", "h2"));
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a/b.jpg").unwrap().hash, "h2");
    }

    #[test]
    fn test_save_and_load_keeps_shape() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = Index::new();
        index.add_or_update(entry("x.jpg", "abc"));
        index.save_in(dir.path()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(INDEX_FILE_NAME)).unwrap())
                .unwrap();
        let file = &raw["files"]["x.jpg"];
        assert_eq!(file["rel_path"], "x.jpg");
        assert_eq!(file["hash"], "abc");
        assert_eq!(file["size"], 4);
        assert_eq!(file["inode"], 42);
        assert!(file["mod_time"].is_string());

        let loaded = Index::load(&dir.path().join(INDEX_FILE_NAME)).unwrap();
        assert_eq!(loaded, index);
    }

    #[test]
    fn test_missing_inode_is_omitted() {
        let mut e = entry("x.jpg", "abc");
        e.inode = None;
        let json = serde_json::to_value(&e).unwrap();
        assert!(json.get("inode").is_none());
    }

    #[test]
    fn test_load_lenient_ignores_corrupt_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(INDEX_FILE_NAME), "garbage").unwrap();
        let index = Index::load_lenient(dir.path()).unwrap();
        assert!(index.is_empty());
    }

    #[test]
    fn test_hash_index_first_path_wins() {
        let mut index = Index::new();
        index.add_or_update(entry("b.jpg", "same"));
        index.add_or_update(entry("a.jpg", "same"));
        let map = index.hash_index(Path::new("/snap"));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("same"), Some(Path::new("/snap/a.jpg")));
    }
}
