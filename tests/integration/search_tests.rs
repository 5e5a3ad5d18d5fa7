use std::fs;
use std::sync::Arc;

use imagedups::output::{similarity, JsonOutput, SearchReport, TextOutput};
use tempfile::tempdir;

use crate::common::{self, PrefixHasher};

#[test]
fn test_binary_and_near_duplicates() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let hasher = Arc::new(PrefixHasher::default());

    let mut app = common::open(common::config(dir.path().join("db.json.gz")), false, &hasher);
    let summary = app.hash(&photos, true, false).unwrap();
    assert_eq!(summary.images, 3);
    // B.jpg is recognized as A.jpg's content and reuses its hash.
    assert_eq!(hasher.calls(), 2);

    let SearchReport::Database { binary, similar } = app.search(None, None).unwrap() else {
        panic!("expected a database report");
    };
    assert_eq!(binary, vec![vec![photos.join("A.jpg"), photos.join("B.jpg")]]);

    assert_eq!(similar.len(), 1);
    assert_eq!(similar[0].representative, photos.join("A.jpg"));
    assert_eq!(similar[0].members.len(), 1);
    let (path, distance) = &similar[0].members[0];
    assert_eq!(*path, photos.join("C.jpg"));
    assert!((distance - 0.05).abs() < 1e-9);
    assert_eq!(similarity(*distance).round(), 95.0);
}

#[test]
fn test_text_report_of_search() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let hasher = Arc::new(PrefixHasher::default());

    let mut app = common::open(common::config(dir.path().join("db.json.gz")), false, &hasher);
    app.hash(&photos, false, false).unwrap();
    let report = app.search(None, None).unwrap();

    let text = TextOutput::new(&report, false).render().unwrap();
    let expected = format!(
        "--- Files with same binary content (1) ---\n{a}\n{b}\n\
         --- Perceptually similar images (1) ---\n{a}\n{c} (95%)\n",
        a = photos.join("A.jpg").display(),
        b = photos.join("B.jpg").display(),
        c = photos.join("C.jpg").display(),
    );
    assert_eq!(text, expected);
}

#[test]
fn test_json_report_of_search() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let hasher = Arc::new(PrefixHasher::default());

    let mut app = common::open(common::config(dir.path().join("db.json.gz")), false, &hasher);
    app.hash(&photos, false, false).unwrap();
    let report = app.search(None, None).unwrap();

    let json = JsonOutput::new(&report).to_json_pretty().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["binary_duplicates"].as_array().unwrap().len(), 1);
    let group = &value["similar_groups"][0];
    assert_eq!(
        group["representative"],
        photos.join("A.jpg").display().to_string()
    );
    assert_eq!(
        group["members"][0]["path"],
        photos.join("C.jpg").display().to_string()
    );
}

#[test]
fn test_stricter_threshold_drops_near_duplicate() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let hasher = Arc::new(PrefixHasher::default());

    let mut config = common::config(dir.path().join("db.json.gz"));
    config.threshold = 99.0;
    let mut app = common::open(config, false, &hasher);
    app.hash(&photos, false, false).unwrap();

    let SearchReport::Database { binary, similar } = app.search(None, None).unwrap() else {
        panic!("expected a database report");
    };
    assert_eq!(binary.len(), 1);
    assert!(similar.is_empty());
}

#[test]
fn test_sample_search() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let sample = dir.path().join("sample.jpg");
    fs::write(&sample, common::content(1, b'z', 500)).unwrap();
    let hasher = Arc::new(PrefixHasher::default());

    let mut app = common::open(common::config(dir.path().join("db.json.gz")), false, &hasher);
    app.hash(&photos, false, false).unwrap();

    let SearchReport::Sample { sample: reported, matches } =
        app.search(None, Some(&sample)).unwrap()
    else {
        panic!("expected a sample report");
    };
    assert_eq!(reported, sample);
    // A.jpg stands for both A.jpg and B.jpg; C.jpg has the same hash prefix.
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].0, photos.join("A.jpg"));
    assert!((matches[0].1 - 0.05).abs() < 1e-9);
    assert_eq!(matches[1].0, photos.join("C.jpg"));
    assert_eq!(matches[1].1, 0.0);
}

#[test]
fn test_sample_that_is_not_an_image() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let sample = dir.path().join("tiny.jpg");
    fs::write(&sample, b"x").unwrap();
    let hasher = Arc::new(PrefixHasher::default());

    let mut app = common::open(common::config(dir.path().join("db.json.gz")), false, &hasher);
    app.hash(&photos, false, false).unwrap();

    let err = app.search(None, Some(&sample)).unwrap_err();
    assert!(err.to_string().contains("tiny.jpg"));
}

#[test]
fn test_search_only_under_path() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    common::write_old(
        &photos.join("other/A-copy.jpg"),
        &common::content(0, b'a', 1000),
    );
    let hasher = Arc::new(PrefixHasher::default());

    let mut app = common::open(common::config(dir.path().join("db.json.gz")), false, &hasher);
    app.hash(&photos, true, false).unwrap();

    let SearchReport::Database { binary, similar } =
        app.search(Some(&photos.join("other")), None).unwrap()
    else {
        panic!("expected a database report");
    };
    // Only one alias of the A content lies under other/.
    assert!(binary.is_empty());
    assert!(similar.is_empty());
}

#[test]
fn test_search_does_not_modify_database() {
    let dir = tempdir().unwrap();
    let photos = common::abc(dir.path());
    let db = dir.path().join("db.json.gz");
    let hasher = Arc::new(PrefixHasher::default());

    let mut app = common::open(common::config(db.clone()), false, &hasher);
    app.hash(&photos, false, false).unwrap();
    let before = fs::read(&db).unwrap();

    let mut app = common::open(common::config(db.clone()), true, &hasher);
    app.search(Some(&photos.join("nowhere")), None).unwrap();
    assert_eq!(fs::read(&db).unwrap(), before);
}
