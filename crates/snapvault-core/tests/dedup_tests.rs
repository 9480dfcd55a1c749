#![cfg(unix)]

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

use snapvault_core::dedup::{
    plan_group, replace_with_hardlink, LinkOutcome, Location, PathScorer, StreamOutcome,
    StreamingDeduper,
};
use snapvault_core::index::HashIndex;
use snapvault_core::platform::FileId;
use snapvault_core::{AppConfig, BackupEngine, SilentReporter};

fn inode(path: &Path) -> u64 {
    fs::metadata(path).unwrap().ino()
}

fn write(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, body).unwrap();
}

fn engine_for(backup: &Path) -> BackupEngine {
    BackupEngine::new(AppConfig {
        backup_path: backup.to_string_lossy().into_owned(),
        ..Default::default()
    })
}

#[test]
fn test_fix_hardlinks_links_every_copy() {
    let dir = tempdir().unwrap();
    let backup = dir.path();
    let old = backup.join("2024-01-01-100000").join("Google Photos");
    let new = backup.join("2024-02-01-100000").join("Google Photos");
    write(&old.join("Album").join("a.jpg"), "shared");
    write(&new.join("Album").join("a.jpg"), "shared");
    write(&new.join("Photos from 2024").join("a.jpg"), "shared");
    write(&new.join("Album").join("b.jpg"), "unique");

    let report = engine_for(backup)
        .fix_hardlinks(false, &SilentReporter)
        .unwrap();

    assert_eq!(report.groups, 1);
    assert_eq!(report.linked, 2);
    assert_eq!(report.bytes_reclaimed, 12);
    assert!(report.stranded.is_empty());

    let first = inode(&old.join("Album").join("a.jpg"));
    assert_eq!(first, inode(&new.join("Album").join("a.jpg")));
    assert_eq!(first, inode(&new.join("Photos from 2024").join("a.jpg")));
    assert_eq!(
        fs::read_to_string(new.join("Photos from 2024").join("a.jpg")).unwrap(),
        "shared"
    );
    assert_eq!(fs::metadata(new.join("Album").join("b.jpg")).unwrap().nlink(), 1);

    let again = engine_for(backup)
        .fix_hardlinks(false, &SilentReporter)
        .unwrap();
    assert_eq!(again.linked, 0);
    assert_eq!(again.already_linked, 2);
}

#[test]
fn test_primary_avoids_penalized_folders() {
    let dir = tempdir().unwrap();
    let backup = dir.path();
    let older = backup.join("2024-01-01-100000").join("Google Photos");
    let newer = backup.join("2024-02-01-100000").join("Google Photos");
    let penalized = older.join("Photos from 2019").join("x.jpg");
    let preferred = newer.join("Holiday").join("x.jpg");
    write(&penalized, "x");
    write(&preferred, "x");
    let keep = inode(&preferred);

    engine_for(backup).fix_hardlinks(false, &SilentReporter).unwrap();

    assert_eq!(inode(&penalized), keep);
    assert_eq!(inode(&preferred), keep);
}

#[test]
fn test_dry_run_reports_without_linking() {
    let dir = tempdir().unwrap();
    let backup = dir.path();
    let a = backup.join("2024-01-01-100000").join("a.jpg");
    let b = backup.join("2024-02-01-100000").join("a.jpg");
    write(&a, "same");
    write(&b, "same");

    let report = engine_for(backup).fix_hardlinks(true, &SilentReporter).unwrap();

    assert_eq!(report.linked, 1);
    assert_eq!(report.bytes_reclaimed, 4);
    assert_ne!(inode(&a), inode(&b));
}

#[test]
fn test_groups_never_span_devices() {
    let loc = |path: &str, device: u64, inode: u64| Location {
        path: PathBuf::from(path),
        id: Some(FileId { device, inode }),
        size: 10,
    };
    let plans = plan_group(
        vec![
            loc("/disk1/a/x.jpg", 1, 100),
            loc("/disk1/b/x.jpg", 1, 101),
            loc("/disk2/a/x.jpg", 2, 100),
            loc("/disk2/b/x.jpg", 2, 200),
            loc("/disk3/x.jpg", 3, 7),
        ],
        &PathScorer::default(),
    );

    assert_eq!(plans.len(), 2);
    for plan in &plans {
        let device = plan.primary.id.unwrap().device;
        assert!(plan.relink.iter().all(|l| l.id.unwrap().device == device));
        assert_eq!(plan.relink.len(), 1);
    }
}

#[test]
fn test_replace_keeps_target_content_on_same_file() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.jpg");
    let b = dir.path().join("b.jpg");
    write(&a, "same");
    fs::hard_link(&a, &b).unwrap();

    assert_eq!(replace_with_hardlink(&a, &b).unwrap(), LinkOutcome::AlreadyLinked);
    assert_eq!(fs::read_to_string(&b).unwrap(), "same");
}

#[test]
fn test_streaming_dedup_prefers_backup_copy() {
    let dir = tempdir().unwrap();
    let backed_up = dir.path().join("backup").join("a.jpg");
    let extracted = dir.path().join("raw").join("a.jpg");
    let extracted_again = dir.path().join("raw").join("copy.jpg");
    write(&backed_up, "pixels");
    write(&extracted, "pixels");
    write(&extracted_again, "fresh");
    let fresh_twin = dir.path().join("raw").join("copy 2.jpg");
    write(&fresh_twin, "fresh");

    let hash = snapvault_core::hasher::hash_file(&backed_up).unwrap();
    let fresh = snapvault_core::hasher::hash_file(&extracted_again).unwrap();
    let mut global = HashIndex::new();
    global.insert(&hash, backed_up.clone());

    let mut deduper = StreamingDeduper::new(global);
    assert_eq!(deduper.observe(&hash, &extracted), StreamOutcome::LinkedGlobal);
    assert_eq!(deduper.observe(&fresh, &extracted_again), StreamOutcome::Unique);
    assert_eq!(deduper.observe(&fresh, &fresh_twin), StreamOutcome::LinkedLocal);

    assert_eq!(inode(&extracted), inode(&backed_up));
    assert_eq!(inode(&fresh_twin), inode(&extracted_again));
    assert_eq!(deduper.stats().linked_global, 1);
    assert_eq!(deduper.stats().linked_local, 1);
}
