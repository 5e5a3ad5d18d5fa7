use std::fs::{self, File};
use std::io::Read;
use std::sync::Arc;

use flate2::read::GzDecoder;
use imagedups::app::{AppError, ImageDups};
use imagedups::store::{HashStore, StoreError};
use sha2::{Digest, Sha256};
use tempfile::tempdir;

use crate::common::{self, PrefixHasher};

fn decode(path: &std::path::Path) -> (serde_json::Value, u32) {
    let mut decoder = GzDecoder::new(File::open(path).unwrap());
    let mut json = String::new();
    decoder.read_to_string(&mut json).unwrap();
    let mtime = decoder.header().unwrap().mtime();
    (serde_json::from_str(&json).unwrap(), mtime)
}

#[test]
fn test_database_file_layout() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let db = dir.path().join("db.json.gz");
    let hasher = Arc::new(PrefixHasher::default());

    common::open(common::config(db.clone()), false, &hasher)
        .hash(&photos, false, false)
        .unwrap();

    let (value, mtime) = decode(&db);
    assert!(mtime > 0);
    let records = value.as_array().unwrap();
    assert_eq!(records.len(), 2);

    let a = &records[0];
    let bytes = fs::read(photos.join("A.jpg")).unwrap();
    assert_eq!(
        a["names"],
        serde_json::json!([
            photos.join("A.jpg").display().to_string(),
            photos.join("B.jpg").display().to_string()
        ])
    );
    assert_eq!(a["size"], 1000);
    assert_eq!(a["first_512b_sha256"], format!("{:x}", Sha256::digest(&bytes[..512])));
    assert_eq!(a["sha256"], format!("{:x}", Sha256::digest(&bytes)));
    assert_eq!(a["ph_dct"], "0".repeat(40));
    assert_eq!(records[1]["ph_dct"], format!("FF{}", "0".repeat(38)));
}

#[test]
fn test_round_trip_through_app() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let db = dir.path().join("db.json.gz");
    let hasher = Arc::new(PrefixHasher::default());

    common::open(common::config(db.clone()), false, &hasher)
        .hash(&photos, false, false)
        .unwrap();

    let mut reopened = common::open(common::config(db.clone()), true, &hasher);
    let first = reopened.search(None, None).unwrap();
    let mut again = common::open(common::config(db), true, &hasher);
    assert_eq!(again.search(None, None).unwrap(), first);
    assert!(!first.is_empty());
}

#[test]
fn test_emptied_database_is_removed() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let db = dir.path().join("db.json.gz");
    let hasher = Arc::new(PrefixHasher::default());

    common::open(common::config(db.clone()), false, &hasher)
        .hash(&photos, false, false)
        .unwrap();
    assert!(db.exists());

    fs::remove_dir_all(&photos).unwrap();
    let mut app = common::open(common::config(db.clone()), true, &hasher);
    assert_eq!(app.cleanup(true).unwrap().len(), 3);
    assert_eq!(app.prune().unwrap(), 2);
    assert!(!db.exists());
}

#[test]
fn test_cleanup_detects_changed_content() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let db = dir.path().join("db.json.gz");
    let hasher = Arc::new(PrefixHasher::default());

    common::open(common::config(db.clone()), false, &hasher)
        .hash(&photos, false, false)
        .unwrap();

    // Same size and prefix, different tail: only a full comparison notices.
    let mut changed = common::content(0, b'a', 1000);
    changed[999] = b'!';
    fs::write(photos.join("B.jpg"), &changed).unwrap();

    let mut fast = common::open(common::config(db.clone()), true, &hasher);
    assert!(fast.cleanup(true).unwrap().is_empty());

    let mut thorough = common::open(common::config(db.clone()), true, &hasher);
    assert_eq!(thorough.cleanup(false).unwrap(), vec![photos.join("B.jpg")]);
    let store = HashStore::load(&db).unwrap();
    assert!(store.index().binary_duplicates().next().is_none());
}

#[test]
fn test_corrupt_database() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("db.json.gz");
    fs::write(&db, b"definitely not gzip").unwrap();

    let result = ImageDups::open(common::config(db.clone()), true);
    assert!(matches!(
        result,
        Err(AppError::Store(StoreError::Corrupt { .. }))
    ));

    // Without the requirement, the run starts from an empty database.
    let hasher = Arc::new(PrefixHasher::default());
    let mut app = common::open(common::config(db.clone()), false, &hasher);
    assert!(app.search(None, None).unwrap().is_empty());
}

#[test]
fn test_missing_database_is_fatal_when_required() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("absent.json.gz");
    let err = ImageDups::open(common::config(db.clone()), true)
        .err()
        .unwrap();
    assert!(matches!(err, AppError::Store(StoreError::NotFound(ref p)) if *p == db));
}
