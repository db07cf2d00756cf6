use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use tempfile::tempdir;

use shoebox::storage::{Database, MemorySink};
use shoebox::{AppConfig, Error, ScanEngine, SilentReporter};

fn sidecar_json(title: &str) -> String {
    format!(
        r#"{{
  "title": "{}",
  "description": "",
  "photoTakenTime": {{"timestamp": "1577882096", "formatted": "Jan 1, 2020, 1:14:56 PM UTC"}},
  "geoData": {{"latitude": 46.94, "longitude": 7.44, "altitude": 540.0}}
}}"#,
        title
    )
}

/// Layout mirroring a real export archive:
///   root/Takeout/Google Photos/
///     Holiday 2019/
///       metadata.json
///       IMG_0001.jpg + IMG_0001.jpg.json          → exact
///       IMG_0002(1).jpg + IMG_0002.jpg.json       → copy-index
///       IMG_0003-edited.jpg + IMG_0003.jpg.json   → edited-variant
///       IMG_0004.jpg                              → unmatched
///     Frühling/
///       clip.mp4 + clip.mp4.json                  → exact
fn create_export_tree(root: &Path) -> PathBuf {
    let photos = root.join("Takeout").join("Google Photos");
    let holiday = photos.join("Holiday 2019");
    let spring = photos.join("Frühling");
    fs::create_dir_all(&holiday).unwrap();
    fs::create_dir_all(&spring).unwrap();

    fs::write(holiday.join("metadata.json"), r#"{"title": "Holiday 2019"}"#).unwrap();
    fs::write(holiday.join("IMG_0001.jpg"), b"jpeg-one").unwrap();
    fs::write(holiday.join("IMG_0001.jpg.json"), sidecar_json("IMG_0001.jpg")).unwrap();
    fs::write(holiday.join("IMG_0002(1).jpg"), b"jpeg-two").unwrap();
    fs::write(holiday.join("IMG_0002.jpg.json"), sidecar_json("IMG_0002.jpg")).unwrap();
    fs::write(holiday.join("IMG_0003-edited.jpg"), b"jpeg-three-edited").unwrap();
    fs::write(holiday.join("IMG_0003.jpg.json"), sidecar_json("IMG_0003.jpg")).unwrap();
    fs::write(holiday.join("IMG_0004.jpg"), b"jpeg-four").unwrap();

    fs::write(spring.join("clip.mp4"), b"not really a video").unwrap();
    fs::write(spring.join("clip.mp4.json"), sidecar_json("clip.mp4")).unwrap();

    photos
}

fn test_config(root: &Path, state_dir: &Path) -> AppConfig {
    AppConfig {
        root_path: root.to_string_lossy().into_owned(),
        state_path: state_dir.join("scan_state.db").to_string_lossy().into_owned(),
        db_path: state_dir.join("shoebox.db").to_string_lossy().into_owned(),
        cpu_workers: 2,
        io_workers: 2,
        ..AppConfig::default()
    }
}

#[test]
fn test_full_scan_pipeline() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("export");
    fs::create_dir_all(&root).unwrap();
    create_export_tree(&root);

    let state_dir = tempdir().unwrap();
    let config = test_config(&root, state_dir.path());

    let sink = MemorySink::default();
    let engine = ScanEngine::new(config);
    let summary = engine.scan(&sink, &SilentReporter).unwrap();

    assert_eq!(summary.albums, 2);
    assert_eq!(summary.scheduled, 5);
    assert_eq!(summary.processed, 5);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.matched_exact, 2);
    assert_eq!(summary.matched_copy_index, 1);
    assert_eq!(summary.matched_edited, 1);
    assert_eq!(summary.unmatched_media, 1);
    assert_eq!(summary.unmatched_sidecars, 0);
    assert!(!summary.cancelled);

    let media = sink.media.borrow();
    assert_eq!(media.len(), 5);

    let exact = media.iter().find(|m| m.file_name == "IMG_0001.jpg").unwrap();
    assert_eq!(exact.match_phase, "exact");
    assert_eq!(exact.title.as_deref(), Some("IMG_0001.jpg"));
    assert_eq!(exact.latitude, Some(46.94));
    assert!(exact.taken_at.is_some());

    let copy = media.iter().find(|m| m.file_name == "IMG_0002(1).jpg").unwrap();
    assert_eq!(copy.match_phase, "copy-index");
    assert_eq!(copy.confidence, "heuristic");
    assert!(copy.sidecar_path.as_deref().unwrap().ends_with("IMG_0002.jpg.json"));

    let edited = media.iter().find(|m| m.file_name == "IMG_0003-edited.jpg").unwrap();
    assert_eq!(edited.match_phase, "edited-variant");

    let unmatched = media.iter().find(|m| m.file_name == "IMG_0004.jpg").unwrap();
    assert_eq!(unmatched.match_phase, "unmatched");
    assert!(unmatched.sidecar_path.is_none());
    assert!(unmatched.title.is_none());

    let albums = sink.albums.borrow();
    assert_eq!(albums.len(), 2);
    let holiday = albums.iter().find(|a| a.name == "Holiday 2019").unwrap();
    assert!(holiday.metadata_json.as_deref().unwrap().contains("Holiday 2019"));
}

#[test]
fn test_resume_idempotence() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("export");
    fs::create_dir_all(&root).unwrap();
    create_export_tree(&root);

    let state_dir = tempdir().unwrap();
    let config = test_config(&root, state_dir.path());
    let db = Database::open(&config.db_path).unwrap();

    let first = ScanEngine::new(config.clone())
        .scan(&db, &SilentReporter)
        .unwrap();
    assert_eq!(first.processed, 5);
    assert_eq!(db.media_count().unwrap(), 5);

    // unchanged tree: the second run schedules nothing and the catalog is
    // byte-for-byte the same set of rows
    let second = ScanEngine::new(config).scan(&db, &SilentReporter).unwrap();
    assert_eq!(second.scheduled, 0);
    assert_eq!(second.processed, 0);
    assert_eq!(second.skipped, 5);
    assert_eq!(second.errors, 0);
    assert_eq!(db.media_count().unwrap(), 5);
}

#[test]
fn test_change_detection_reprocesses_exactly_one_key() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("export");
    fs::create_dir_all(&root).unwrap();
    let photos = create_export_tree(&root);

    let state_dir = tempdir().unwrap();
    let config = test_config(&root, state_dir.path());
    let db = Database::open(&config.db_path).unwrap();

    ScanEngine::new(config.clone())
        .scan(&db, &SilentReporter)
        .unwrap();
    let before = db
        .get_media("Holiday 2019/IMG_0002(1).jpg")
        .unwrap()
        .unwrap();

    // different size guarantees a different resume key
    fs::write(
        photos.join("Holiday 2019").join("IMG_0002(1).jpg"),
        b"jpeg-two-rewritten-with-more-bytes",
    )
    .unwrap();

    let summary = ScanEngine::new(config).scan(&db, &SilentReporter).unwrap();
    assert_eq!(summary.scheduled, 1);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.skipped, 4);

    let after = db
        .get_media("Holiday 2019/IMG_0002(1).jpg")
        .unwrap()
        .unwrap();
    assert_ne!(before.content_hash, after.content_hash);
    assert_ne!(before.file_size, after.file_size);
    assert_eq!(db.media_count().unwrap(), 5);
}

#[test]
fn test_corrupted_files_are_counted_not_fatal() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("export");
    let album = root.join("Shoebox");
    fs::create_dir_all(&album).unwrap();

    for i in 0..10 {
        fs::write(album.join(format!("IMG_{:03}.jpg", i)), format!("media {}", i)).unwrap();
    }
    // valid sidecars for the first seven, three of them deliberately broken
    for i in 0..7 {
        let body = if i >= 4 {
            "{broken json".to_string()
        } else {
            sidecar_json(&format!("IMG_{:03}.jpg", i))
        };
        fs::write(album.join(format!("IMG_{:03}.jpg.json", i)), body).unwrap();
    }
    // a zero-byte media file is classified corrupted and never scheduled
    fs::write(album.join("empty.jpg"), b"").unwrap();

    let state_dir = tempdir().unwrap();
    let config = test_config(&root, state_dir.path());

    let sink = MemorySink::default();
    let summary = ScanEngine::new(config)
        .scan(&sink, &SilentReporter)
        .unwrap();

    assert_eq!(summary.scheduled, 10);
    // 3 broken sidecars fail extraction, the empty file is corrupted
    assert_eq!(summary.errors, 4);
    assert_eq!(summary.processed, 7);
    assert_eq!(summary.unmatched_media, 3);
    assert_eq!(sink.errors.borrow().len(), 4);
    assert_eq!(sink.media.borrow().len(), 7);
}

#[test]
fn test_flat_layout_without_export_nesting() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("flat");
    let album = root.join("Christmas");
    fs::create_dir_all(&album).unwrap();
    fs::write(album.join("IMG_0001.jpg"), b"data").unwrap();
    fs::write(album.join("IMG_0001.jpg.json"), sidecar_json("IMG_0001.jpg")).unwrap();

    let state_dir = tempdir().unwrap();
    let config = test_config(&root, state_dir.path());

    let sink = MemorySink::default();
    let summary = ScanEngine::new(config)
        .scan(&sink, &SilentReporter)
        .unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(summary.matched_exact, 1);
    assert_eq!(sink.albums.borrow()[0].name, "Christmas");
}

#[test]
fn test_cancel_before_start() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("export");
    fs::create_dir_all(&root).unwrap();
    create_export_tree(&root);

    let state_dir = tempdir().unwrap();
    let config = test_config(&root, state_dir.path());

    let engine = ScanEngine::new(config);
    engine.cancel_token().store(true, Ordering::Relaxed);

    let sink = MemorySink::default();
    match engine.scan(&sink, &SilentReporter) {
        Err(Error::Cancelled) => {}
        other => panic!("Expected Cancelled, got {:?}", other.map(|s| s.processed)),
    }
}

#[test]
fn test_no_resume_rescans_everything() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("export");
    fs::create_dir_all(&root).unwrap();
    create_export_tree(&root);

    let state_dir = tempdir().unwrap();
    let mut config = test_config(&root, state_dir.path());
    let db = Database::open(&config.db_path).unwrap();

    ScanEngine::new(config.clone())
        .scan(&db, &SilentReporter)
        .unwrap();

    config.resume = false;
    let summary = ScanEngine::new(config).scan(&db, &SilentReporter).unwrap();
    assert_eq!(summary.scheduled, 5);
    assert_eq!(summary.processed, 5);
    assert_eq!(summary.skipped, 0);
    // upserts keep the catalog at one row per file
    assert_eq!(db.media_count().unwrap(), 5);
}

#[test]
fn test_larger_tree_all_items_complete() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("export");
    for album_idx in 0..3 {
        let album = root.join(format!("Album {:02}", album_idx));
        fs::create_dir_all(&album).unwrap();
        for i in 0..100 {
            fs::write(
                album.join(format!("IMG_{:04}.jpg", i)),
                format!("album {} media {}", album_idx, i),
            )
            .unwrap();
            fs::write(
                album.join(format!("IMG_{:04}.jpg.json", i)),
                sidecar_json(&format!("IMG_{:04}.jpg", i)),
            )
            .unwrap();
        }
    }

    let state_dir = tempdir().unwrap();
    let mut config = test_config(&root, state_dir.path());
    config.cpu_workers = 4;
    config.io_workers = 4;

    let sink = MemorySink::default();
    let summary = ScanEngine::new(config)
        .scan(&sink, &SilentReporter)
        .unwrap();

    assert_eq!(summary.scheduled, 300);
    assert_eq!(summary.processed, 300);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.matched_exact, 300);
    assert_eq!(sink.media.borrow().len(), 300);
}
