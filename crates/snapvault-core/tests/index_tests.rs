use std::fs;
use std::path::Path;
use tempfile::tempdir;

use snapvault_core::index::{Index, IndexScanner, INDEX_FILE_NAME};
use snapvault_core::SilentReporter;

fn create_tree(root: &Path) {
    fs::create_dir_all(root.join("Album")).unwrap();
    fs::write(root.join("Album").join("a.jpg"), "photo a").unwrap();
    fs::write(root.join("Album").join("b.jpg"), "photo b").unwrap();
    fs::write(root.join("c.mp4"), "video c").unwrap();
}

#[test]
fn test_second_scan_reuses_every_hash() {
    let dir = tempdir().unwrap();
    create_tree(dir.path());
    let scanner = IndexScanner::default();

    let first = scanner.ensure_index(dir.path(), &SilentReporter).unwrap();
    assert_eq!(first.stats.files_hashed, 3);
    assert!(dir.path().join(INDEX_FILE_NAME).is_file());

    let second = scanner.ensure_index(dir.path(), &SilentReporter).unwrap();
    assert_eq!(second.stats.files_hashed, 0);
    assert_eq!(second.stats.files_reused, 3);
    assert_eq!(second.index, first.index);
}

#[test]
fn test_index_does_not_list_itself() {
    let dir = tempdir().unwrap();
    create_tree(dir.path());
    let scanner = IndexScanner::default();
    scanner.ensure_index(dir.path(), &SilentReporter).unwrap();
    let outcome = scanner.ensure_index(dir.path(), &SilentReporter).unwrap();

    assert!(outcome.index.get(INDEX_FILE_NAME).is_none());
    assert_eq!(outcome.index.len(), 3);
}

#[test]
fn test_changed_and_deleted_files() {
    let dir = tempdir().unwrap();
    create_tree(dir.path());
    let scanner = IndexScanner::default();
    let first = scanner.ensure_index(dir.path(), &SilentReporter).unwrap();

    fs::remove_file(dir.path().join("c.mp4")).unwrap();
    fs::write(dir.path().join("Album").join("a.jpg"), "photo a, edited").unwrap();

    let second = scanner.ensure_index(dir.path(), &SilentReporter).unwrap();
    assert_eq!(second.stats.entries_dropped, 1);
    assert_eq!(second.stats.files_hashed, 1);
    assert!(second.index.get("c.mp4").is_none());
    assert_ne!(
        second.index.get("Album/a.jpg").unwrap().hash,
        first.index.get("Album/a.jpg").unwrap().hash
    );

    let persisted = Index::load(&dir.path().join(INDEX_FILE_NAME)).unwrap();
    assert_eq!(persisted, second.index);
}

#[test]
fn test_identical_content_shares_a_hash() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("one.jpg"), "same").unwrap();
    fs::write(dir.path().join("two.jpg"), "same").unwrap();
    let index = snapvault_core::index::ensure_index(dir.path()).unwrap();

    assert_eq!(
        index.get("one.jpg").unwrap().hash,
        index.get("two.jpg").unwrap().hash
    );
    assert_eq!(index.total_bytes(), 8);
}

#[test]
fn test_ignore_patterns() {
    let dir = tempdir().unwrap();
    create_tree(dir.path());
    fs::write(dir.path().join("Album").join("partial.tmp"), "x").unwrap();
    let scanner = IndexScanner::new(&["**/*.tmp".to_string()]);

    let outcome = scanner.ensure_index(dir.path(), &SilentReporter).unwrap();
    assert_eq!(outcome.index.len(), 3);
    assert!(outcome.index.get("Album/partial.tmp").is_none());
}

#[test]
fn test_corrupt_index_is_rebuilt() {
    let dir = tempdir().unwrap();
    create_tree(dir.path());
    fs::write(dir.path().join(INDEX_FILE_NAME), "{ not json").unwrap();

    let outcome = IndexScanner::default()
        .ensure_index(dir.path(), &SilentReporter)
        .unwrap();
    assert_eq!(outcome.stats.files_hashed, 3);
}
