use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use imagedups::config::DatabaseLayout;
use imagedups::store::HashStore;
use tempfile::tempdir;

use crate::common::{self, PrefixHasher};

#[test]
fn test_unchanged_files_are_not_rehashed() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let db = dir.path().join("db.json.gz");
    let hasher = Arc::new(PrefixHasher::default());

    let mut first = common::open(common::config(db.clone()), false, &hasher);
    first.hash(&photos, true, false).unwrap();
    assert_eq!(hasher.calls(), 2);

    hasher.reset();
    let mut second = common::open(common::config(db.clone()), true, &hasher);
    let summary = second.hash(&photos, true, false).unwrap();
    assert_eq!(summary.images, 3);
    assert_eq!(summary.computed, 0);
    assert_eq!(hasher.calls(), 0);
}

#[test]
fn test_modified_file_is_rehashed_once() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let db = dir.path().join("db.json.gz");
    let hasher = Arc::new(PrefixHasher::default());

    let mut first = common::open(common::config(db.clone()), false, &hasher);
    first.hash(&photos, true, false).unwrap();

    let future = SystemTime::now() + Duration::from_secs(3600);
    filetime::set_file_mtime(
        photos.join("C.jpg"),
        filetime::FileTime::from_system_time(future),
    )
    .unwrap();

    hasher.reset();
    let mut second = common::open(common::config(db.clone()), true, &hasher);
    let summary = second.hash(&photos, true, false).unwrap();
    assert_eq!(summary.computed, 1);
    assert_eq!(hasher.calls(), 1);
}

#[test]
fn test_database_timestamp_survives_updates() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let db = dir.path().join("db.json.gz");
    let hasher = Arc::new(PrefixHasher::default());

    common::open(common::config(db.clone()), false, &hasher)
        .hash(&photos, false, false)
        .unwrap();
    let created = HashStore::load(&db).unwrap().timestamp();

    common::write_old(&photos.join("D.jpg"), &common::content(2, b'd', 300));
    common::open(common::config(db.clone()), true, &hasher)
        .hash(&photos, false, false)
        .unwrap();

    let store = HashStore::load(&db).unwrap();
    assert_eq!(store.timestamp(), created);
    assert_eq!(store.index().len(), 3);
}

#[test]
fn test_new_alias_for_known_content() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let db = dir.path().join("db.json.gz");
    let hasher = Arc::new(PrefixHasher::default());

    common::open(common::config(db.clone()), false, &hasher)
        .hash(&photos, false, false)
        .unwrap();

    fs::copy(photos.join("C.jpg"), photos.join("C-copy.jpg")).unwrap();
    filetime::set_file_mtime(
        photos.join("C-copy.jpg"),
        filetime::FileTime::from_unix_time(1_000_000_000, 0),
    )
    .unwrap();

    hasher.reset();
    common::open(common::config(db.clone()), true, &hasher)
        .hash(&photos, false, false)
        .unwrap();
    assert_eq!(hasher.calls(), 0);

    let store = HashStore::load(&db).unwrap();
    let c = store
        .index()
        .iter()
        .find(|item| item.aliases().contains(&photos.join("C.jpg")))
        .unwrap();
    assert!(c.aliases().contains(&photos.join("C-copy.jpg")));
}

#[test]
fn test_unreadable_images_are_skipped() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    // Too short for the test hasher: hashing fails, the file is still indexed.
    common::write_old(&photos.join("broken.png"), b"xx");
    let db = dir.path().join("db.json.gz");
    let hasher = Arc::new(PrefixHasher::default());

    let summary = common::open(common::config(db.clone()), false, &hasher)
        .hash(&photos, false, false)
        .unwrap();
    assert_eq!(summary.images, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.computed, 2);
    assert_eq!(HashStore::load(&db).unwrap().index().len(), 3);
}

#[test]
fn test_sharded_incremental_update() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    common::write_old(&photos.join("sub/E.png"), &common::content(3, b'e', 64));
    let root = dir.path().join("shards");
    let hasher = Arc::new(PrefixHasher::default());

    let mut config = common::config(root.clone());
    config.layout = DatabaseLayout::Sharded;

    common::open(config.clone(), false, &hasher)
        .hash(&photos, true, false)
        .unwrap();
    assert_eq!(hasher.calls(), 3);
    let index = fs::read_to_string(root.join("index")).unwrap();
    assert!(index.starts_with("#seqnext 3\n"));

    hasher.reset();
    common::open(config, true, &hasher)
        .hash(&photos, true, false)
        .unwrap();
    assert_eq!(hasher.calls(), 0);
}

#[test]
fn test_hash_without_path_updates_known_directories() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let db = dir.path().join("db.json.gz");
    let hasher = Arc::new(PrefixHasher::default());

    common::open(common::config(db.clone()), false, &hasher)
        .hash(&photos, true, false)
        .unwrap();

    hasher.reset();
    let summary = common::open(common::config(db.clone()), true, &hasher)
        .rehash_known(true, false)
        .unwrap();
    assert_eq!(summary.directories, 1);
    assert_eq!(summary.images, 3);
    assert_eq!(hasher.calls(), 0);

    common::write_old(&photos.join("D.jpg"), &common::content(2, b'd', 300));
    let summary = common::open(common::config(db.clone()), true, &hasher)
        .rehash_known(true, false)
        .unwrap();
    assert_eq!(summary.images, 4);
    assert_eq!(hasher.calls(), 1);
    assert_eq!(HashStore::load(&db).unwrap().index().len(), 3);
}

#[test]
fn test_hash_without_path_skips_vanished_directories() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let other = dir.path().join("other");
    common::write_old(&other.join("E.png"), &common::content(3, b'e', 64));
    let other = fs::canonicalize(&other).unwrap();
    let db = dir.path().join("db.json.gz");
    let hasher = Arc::new(PrefixHasher::default());

    let mut app = common::open(common::config(db.clone()), false, &hasher);
    app.hash(&photos, false, false).unwrap();
    app.hash(&other, false, false).unwrap();
    fs::remove_dir_all(&other).unwrap();

    hasher.reset();
    let summary = common::open(common::config(db), true, &hasher)
        .rehash_known(false, false)
        .unwrap();
    assert_eq!(summary.directories, 1);
    assert_eq!(summary.images, 3);
    assert_eq!(hasher.calls(), 0);
}

#[test]
fn test_large_directory_is_fully_indexed() {
    // More distinct files than a default open-file limit allows at once.
    const FILES: u32 = 1200;
    let dir = tempdir().unwrap();
    let photos = dir.path().join("many");
    for i in 0..FILES {
        let mut bytes = common::content(0, b'x', 64);
        bytes[..4].copy_from_slice(&i.to_be_bytes());
        common::write_old(&photos.join(format!("{i:04}.png")), &bytes);
    }
    let photos = fs::canonicalize(&photos).unwrap();
    let db = dir.path().join("db.json.gz");
    let hasher = Arc::new(PrefixHasher::default());

    let summary = common::open(common::config(db.clone()), false, &hasher)
        .hash(&photos, false, false)
        .unwrap();
    assert_eq!(summary.images, FILES as usize);
    assert_eq!(summary.failed, 0);
    assert_eq!(hasher.calls(), FILES as usize);
    assert_eq!(HashStore::load(&db).unwrap().index().len(), FILES as usize);
}
