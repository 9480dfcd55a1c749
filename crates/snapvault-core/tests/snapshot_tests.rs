#![cfg(unix)]

use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

use filetime::FileTime;
use snapvault_core::export::{ArchivePart, CompletionState, ProcessingRecord};
use snapvault_core::snapshot::{self, RunLog};
use snapvault_core::{AppConfig, BackupEngine, SilentReporter, UpdateOptions};

const MTIME: i64 = 1_700_000_000;

struct Workspace {
    _dir: TempDir,
    backup: PathBuf,
    downloads: PathBuf,
    config: AppConfig,
}

fn workspace() -> Workspace {
    let dir = tempdir().unwrap();
    let backup = dir.path().join("backup");
    let working = dir.path().join("work");
    let downloads = working.join("downloads");
    fs::create_dir_all(&backup).unwrap();
    fs::create_dir_all(&downloads).unwrap();
    let config = AppConfig {
        backup_path: backup.to_string_lossy().into_owned(),
        working_path: working.to_string_lossy().into_owned(),
        ..Default::default()
    };
    Workspace {
        _dir: dir,
        backup,
        downloads,
        config,
    }
}

fn content_dir(downloads: &Path, id: &str) -> PathBuf {
    downloads.join(id).join("raw").join("Takeout").join("Google Photos")
}

/// Extracted content for `id`, with no processing marks anywhere.
fn extracted_export(downloads: &Path, id: &str, files: &[(&str, &str)]) {
    let content = content_dir(downloads, id);
    for (rel, body) in files {
        let path = content.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(MTIME, 0)).unwrap();
    }
}

/// An already-extracted export marked processed in the downloads root.
fn completed_export(downloads: &Path, id: &str, files: &[(&str, &str)]) {
    extracted_export(downloads, id, files);
    let mut global = ProcessingRecord::load_in(downloads).unwrap();
    global.mark_export_processed(id);
    global.save_in(downloads).unwrap();
}

fn inode(path: &Path) -> u64 {
    fs::metadata(path).unwrap().ino()
}

fn update(ws: &Workspace) -> snapvault_core::UpdateReport {
    BackupEngine::new(ws.config.clone())
        .update_backup(UpdateOptions::default(), &SilentReporter)
        .unwrap()
}

#[test]
fn test_first_snapshot_moves_content() {
    let ws = workspace();
    completed_export(
        &ws.downloads,
        "export-1",
        &[("Album/a.jpg", "photo a"), ("Album/b.jpg", "photo b")],
    );

    let report = update(&ws);
    let snap = report.snapshot.unwrap();
    assert_eq!(report.build.added, 2);
    assert_eq!(report.build.linked, 0);
    assert_eq!(report.build.total_new_bytes, 14);
    assert_eq!(report.build.exports_processed, vec!["export-1".to_string()]);

    let placed = snap.join("Google Photos").join("Album").join("a.jpg");
    assert_eq!(fs::read_to_string(&placed).unwrap(), "photo a");
    assert_eq!(
        FileTime::from_last_modification_time(&fs::metadata(&placed).unwrap()).unix_seconds(),
        MTIME
    );
    assert!(!ws.downloads.join("export-1").join("raw").exists());
    assert!(snap.join("index.json").is_file());

    let log = RunLog::in_backup_root(&ws.backup).read_all().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].added_count, 2);
}

#[test]
fn test_unchanged_content_links_to_previous_snapshot() {
    let ws = workspace();
    let files = [("Album/a.jpg", "photo a"), ("Album/b.jpg", "photo b")];
    completed_export(&ws.downloads, "export-1", &files);
    let first = update(&ws).snapshot.unwrap();

    completed_export(&ws.downloads, "export-2", &files);
    let report = update(&ws);
    let second = report.snapshot.unwrap();

    assert_ne!(first, second);
    assert_eq!(report.build.added, 0);
    assert_eq!(report.build.linked, 2);
    assert_eq!(report.build.total_new_bytes, 0);
    for (rel, _) in &files {
        let a = first.join("Google Photos").join(rel);
        let b = second.join("Google Photos").join(rel);
        assert_eq!(inode(&a), inode(&b));
    }

    let master = report.master.unwrap();
    assert_eq!(master.linked, 0);
    assert_eq!(master.known, 2);
}

#[test]
fn test_changed_file_is_added_not_linked() {
    let ws = workspace();
    completed_export(&ws.downloads, "export-1", &[("a.jpg", "version 1")]);
    let first = update(&ws).snapshot.unwrap();

    completed_export(&ws.downloads, "export-2", &[("a.jpg", "version 2")]);
    let report = update(&ws);
    let second = report.snapshot.unwrap();

    assert_eq!(report.build.added, 1);
    assert_eq!(report.build.linked, 0);
    let a = first.join("Google Photos").join("a.jpg");
    let b = second.join("Google Photos").join("a.jpg");
    assert_ne!(inode(&a), inode(&b));
    assert_eq!(fs::read_to_string(a).unwrap(), "version 1");
    assert_eq!(fs::read_to_string(b).unwrap(), "version 2");
}

#[test]
fn test_hardlinked_sources_stay_linked() {
    let ws = workspace();
    completed_export(&ws.downloads, "export-1", &[("Album/a.jpg", "same")]);
    let content = ws
        .downloads
        .join("export-1")
        .join("raw")
        .join("Takeout")
        .join("Google Photos");
    fs::create_dir_all(content.join("Photos from 2023")).unwrap();
    fs::hard_link(
        content.join("Album").join("a.jpg"),
        content.join("Photos from 2023").join("a.jpg"),
    )
    .unwrap();

    let report = update(&ws);
    let snap = report.snapshot.unwrap().join("Google Photos");
    assert_eq!(report.build.added, 1);
    assert_eq!(report.build.internal_links, 1);
    assert_eq!(
        inode(&snap.join("Album").join("a.jpg")),
        inode(&snap.join("Photos from 2023").join("a.jpg"))
    );
}

#[test]
fn test_incomplete_export_is_left_alone() {
    let ws = workspace();
    let raw = ws.downloads.join("pending").join("raw").join("Google Photos");
    fs::create_dir_all(&raw).unwrap();
    fs::write(raw.join("a.jpg"), "a").unwrap();

    let report = update(&ws);
    assert!(report.snapshot.is_none());
    assert_eq!(report.build.exports_skipped.len(), 1);
    assert!(raw.join("a.jpg").is_file());
    assert!(snapshot::list_snapshots(&ws.backup).unwrap().is_empty());
    assert!(RunLog::in_backup_root(&ws.backup).read_all().unwrap().is_empty());
}

#[test]
fn test_dry_run_touches_nothing() {
    let ws = workspace();
    completed_export(&ws.downloads, "export-1", &[("a.jpg", "a")]);

    let report = BackupEngine::new(ws.config.clone())
        .update_backup(
            UpdateOptions {
                source: None,
                dry_run: true,
            },
            &SilentReporter,
        )
        .unwrap();

    assert_eq!(report.build.added, 1);
    assert!(snapshot::list_snapshots(&ws.backup).unwrap().is_empty());
    assert!(ws
        .downloads
        .join("export-1/raw/Takeout/Google Photos/a.jpg")
        .is_file());
}

#[test]
fn test_master_holds_each_content_once() {
    let ws = workspace();
    completed_export(
        &ws.downloads,
        "export-1",
        &[("Album 1/a.jpg", "first a"), ("Album 2/a.jpg", "second a"), ("Album 2/b.jpg", "first a")],
    );
    let report = update(&ws);
    let snap = report.snapshot.unwrap();
    let master = report.master.unwrap();
    assert_eq!(master.linked, 2);
    assert_eq!(master.known, 1);
    assert_eq!(master.renamed, 1);

    let bucket = ws.backup.join("master").join("2023").join("11");
    let names: BTreeSet<String> = fs::read_dir(&bucket)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        BTreeSet::from(["a.jpg".to_string(), "a_1.jpg".to_string()])
    );
    let contents: BTreeSet<String> = names
        .iter()
        .map(|n| fs::read_to_string(bucket.join(n)).unwrap())
        .collect();
    assert_eq!(
        contents,
        BTreeSet::from(["first a".to_string(), "second a".to_string()])
    );
    assert_eq!(
        inode(&snap.join("Google Photos/Album 1/a.jpg")),
        inode(&bucket.join("a.jpg"))
    );
}

#[test]
fn test_rebuild_master_is_idempotent() {
    let ws = workspace();
    completed_export(&ws.downloads, "export-1", &[("a.jpg", "a"), ("b.jpg", "b")]);
    update(&ws);

    let engine = BackupEngine::new(ws.config.clone());
    let again = engine.rebuild_master(&SilentReporter).unwrap();
    assert_eq!(again.linked, 0);
    assert_eq!(again.known, 2);

    fs::remove_dir_all(ws.backup.join("master")).unwrap();
    let rebuilt = engine.rebuild_master(&SilentReporter).unwrap();
    assert_eq!(rebuilt.linked, 2);
    assert!(ws.backup.join("master/2023/11/a.jpg").is_file());
}

#[test]
fn test_replaced_path_is_not_reused_for_internal_links() {
    let ws = workspace();
    completed_export(&ws.downloads, "export-1", &[("Album/IMG_1.jpg", "v1")]);
    completed_export(&ws.downloads, "export-2", &[("Album/IMG_1.jpg", "v2-edited")]);
    let older = content_dir(&ws.downloads, "export-2").join("Photos from 2020");
    fs::create_dir_all(&older).unwrap();
    fs::hard_link(
        content_dir(&ws.downloads, "export-1").join("Album/IMG_1.jpg"),
        older.join("IMG_1.jpg"),
    )
    .unwrap();

    let report = update(&ws);
    let snap = report.snapshot.unwrap().join("Google Photos");

    assert_eq!(report.build.exports_processed.len(), 2);
    assert_eq!(report.build.internal_links, 0);
    assert_eq!(report.build.added, 3);
    assert_eq!(
        fs::read_to_string(snap.join("Album/IMG_1.jpg")).unwrap(),
        "v2-edited"
    );
    assert_eq!(
        fs::read_to_string(snap.join("Photos from 2020/IMG_1.jpg")).unwrap(),
        "v1"
    );
}

#[test]
fn test_fully_unpacked_export_is_marked_complete() {
    let ws = workspace();
    extracted_export(&ws.downloads, "export-1", &[("a.jpg", "a")]);
    let export_dir = ws.downloads.join("export-1");
    CompletionState {
        id: "export-1".to_string(),
        last_updated: None,
        files: vec![ArchivePart {
            part_number: 1,
            filename: "takeout-001.zip".to_string(),
            size: String::new(),
            size_bytes: 0,
            status: "completed".to_string(),
        }],
    }
    .save(&export_dir)
    .unwrap();
    let mut local = ProcessingRecord::default();
    local.mark_archive_processed("export-1", "takeout-001.zip");
    local.save_in(&export_dir).unwrap();
    assert!(!ProcessingRecord::load_in(&ws.downloads)
        .unwrap()
        .is_export_processed("export-1"));

    let report = update(&ws);

    assert!(report.snapshot.is_some());
    assert_eq!(report.build.exports_processed, vec!["export-1".to_string()]);
    let global = ProcessingRecord::load_in(&ws.downloads).unwrap();
    assert_eq!(global.processed_exports.get("export-1"), Some(&true));
}

#[test]
fn test_second_update_without_new_content_is_a_no_op() {
    let ws = workspace();
    completed_export(&ws.downloads, "export-1", &[("a.jpg", "a")]);
    let first = update(&ws).snapshot.unwrap();

    let again = update(&ws);

    assert!(again.snapshot.is_none());
    assert!(again.build.exports_processed.is_empty());
    assert_eq!(snapshot::list_snapshots(&ws.backup).unwrap(), vec![first]);
    assert_eq!(RunLog::in_backup_root(&ws.backup).read_all().unwrap().len(), 1);
}
