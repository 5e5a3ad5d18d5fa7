//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use imagedups::app::ImageDups;
use imagedups::config::{Config, DatabaseLayout};
use imagedups::phash::{Algorithm, PerceptualError, PerceptualHash, PerceptualHasher};

/// Number of leading file bytes used as the hash by [`PrefixHasher`].
pub const HASH_LEN: usize = 20;

/// Uses the first [`HASH_LEN`] bytes of a file as its perceptual hash and
/// counts how often it is asked.
#[derive(Default)]
pub struct PrefixHasher {
    calls: AtomicUsize,
}

impl PrefixHasher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }
}

impl PerceptualHasher for PrefixHasher {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Dct
    }

    fn compute(&self, path: &Path) -> Result<PerceptualHash, PerceptualError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let bytes = fs::read(path).unwrap_or_default();
        if bytes.len() < HASH_LEN {
            return Err(PerceptualError::Parse {
                algorithm: Algorithm::Dct,
                value: path.display().to_string(),
            });
        }
        Ok(PerceptualHash::new(Algorithm::Dct, bytes[..HASH_LEN].to_vec()))
    }
}

/// Content whose hash differs from `base` in `flipped_bytes` whole bytes.
pub fn content(flipped_bytes: usize, tail: u8, len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    for b in bytes.iter_mut().take(flipped_bytes) {
        *b = 0xFF;
    }
    for b in bytes.iter_mut().skip(HASH_LEN) {
        *b = tail;
    }
    bytes
}

/// Write `bytes` to `path` with an mtime long before any test database.
pub fn write_old(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, bytes).unwrap();
    let old = filetime::FileTime::from_unix_time(1_000_000_000, 0);
    filetime::set_file_mtime(path, old).unwrap();
}

/// The A/B/C fixture: A and B are byte-identical, C differs from A in one
/// byte of its 20-byte hash (distance 8/160 = 0.05).
pub fn abc(dir: &Path) -> PathBuf {
    let photos = dir.join("photos");
    write_old(&photos.join("A.jpg"), &content(0, b'a', 1000));
    write_old(&photos.join("B.jpg"), &content(0, b'a', 1000));
    write_old(&photos.join("C.jpg"), &content(1, b'c', 1000));
    fs::canonicalize(&photos).unwrap()
}

pub fn config(dbpath: PathBuf) -> Config {
    Config {
        dbpath,
        layout: DatabaseLayout::Single,
        threshold: 90.0,
        ..Config::default()
    }
}

pub fn open(config: Config, must_exist: bool, hasher: &Arc<PrefixHasher>) -> ImageDups {
    let hasher: Arc<dyn PerceptualHasher> = hasher.clone();
    ImageDups::open(config, must_exist)
        .unwrap()
        .with_hasher(hasher)
}
