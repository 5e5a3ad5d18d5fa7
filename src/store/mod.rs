//! Persistent hash database.
//!
//! A database is a gzip-compressed JSON array of
//! [`PersistentRecord`](record::PersistentRecord)s. The creation time of the
//! database lives in the gzip header (`MTIME`); it decides whether cached
//! perceptual hashes may be reused (see [`HashStore::is_stale`]).
//!
//! Writes go to a temporary sibling file that is renamed over the target, so
//! an interrupted save never leaves a truncated database behind. Saving an
//! empty index deletes the file.
//!
//! [`shard`] splits one logical database into a file per directory.

pub mod record;
pub mod shard;

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use thiserror::Error;

use crate::index::DuplicateIndex;

pub use record::PersistentRecord;
pub use shard::{ShardIndex, ShardedStore};

/// Errors that can occur while reading or writing a database.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The database file does not exist.
    #[error("Database not found: {0}")]
    NotFound(PathBuf),

    /// Reading or writing failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The file is not a gzip-compressed record array.
    #[error("Corrupt database {path}: {source}")]
    Corrupt {
        /// File involved
        path: PathBuf,
        /// Decoding error
        #[source]
        source: serde_json::Error,
    },

    /// A shard index line could not be parsed.
    #[error("Invalid shard index {path} at line {line}")]
    ShardIndex {
        /// Shard index file
        path: PathBuf,
        /// 1-based line number
        line: usize,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Seconds since the epoch, floored.
pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// A database file together with its loaded index.
#[derive(Debug)]
pub struct HashStore {
    path: PathBuf,
    timestamp: i64,
    index: DuplicateIndex,
}

impl HashStore {
    /// A new, empty database at `path`, created now.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timestamp: now_secs(),
            index: DuplicateIndex::new(),
        }
    }

    /// Override the creation time (seconds since the epoch).
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Read the database at `path`.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the file is missing, [`StoreError::Corrupt`]
    /// if it cannot be decoded.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let file = File::open(&path).map_err(|e| StoreError::io(&path, e))?;
        let mut decoder = GzDecoder::new(BufReader::new(file));
        let records: Vec<PersistentRecord> =
            serde_json::from_reader(&mut decoder).map_err(|source| StoreError::Corrupt {
                path: path.clone(),
                source,
            })?;
        let timestamp = decoder.header().map_or(0, |h| i64::from(h.mtime()));

        log::debug!(
            "Loaded {} records from {} (timestamp {})",
            records.len(),
            path.display(),
            timestamp
        );

        Ok(Self {
            path,
            timestamp,
            index: DuplicateIndex::load(records),
        })
    }

    /// Read the database at `path`, or start an empty one.
    ///
    /// When `must_exist` is false, a missing or unreadable file yields a new
    /// empty database (logged as a warning if the file existed).
    ///
    /// # Errors
    ///
    /// With `must_exist`, any [`load`](Self::load) failure.
    pub fn open(path: impl Into<PathBuf>, must_exist: bool) -> Result<Self, StoreError> {
        let path = path.into();
        match Self::load(&path) {
            Ok(store) => Ok(store),
            Err(e) if must_exist => Err(e),
            Err(StoreError::NotFound(_)) => Ok(Self::new(path)),
            Err(e) => {
                log::warn!("{}; starting a new database", e);
                Ok(Self::new(path))
            }
        }
    }

    /// Write the database, or delete the file if the index is empty.
    ///
    /// The creation timestamp is preserved.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the file cannot be written or removed.
    pub fn save(&mut self) -> Result<(), StoreError> {
        if self.index.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => {
                    log::info!("Index is empty, removed {}", self.path.display());
                    Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(StoreError::io(&self.path, e)),
            };
        }

        let records = self.index.dump();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let temp_path = temp_sibling(&self.path);
        let mtime = u32::try_from(self.timestamp).unwrap_or(0);
        let written = write_records(&temp_path, mtime, &records)
            .and_then(|()| fs::rename(&temp_path, &self.path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::io(&self.path, e));
        }

        log::debug!("Saved {} records to {}", records.len(), self.path.display());
        Ok(())
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creation time in seconds since the epoch; `0` if unknown.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Creation time, if known.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        (self.timestamp > 0)
            .then(|| DateTime::from_timestamp(self.timestamp, 0))
            .flatten()
    }

    /// The loaded index.
    #[must_use]
    pub fn index(&self) -> &DuplicateIndex {
        &self.index
    }

    /// The loaded index, mutably.
    pub fn index_mut(&mut self) -> &mut DuplicateIndex {
        &mut self.index
    }

    /// Consume the store, returning its index.
    #[must_use]
    pub fn into_index(self) -> DuplicateIndex {
        self.index
    }

    /// Whether cached hashes for `path` must be recomputed.
    ///
    /// True when the file was modified after the database was created, or
    /// when its modification time cannot be read.
    #[must_use]
    pub fn is_stale(&self, path: &Path) -> bool {
        let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) else {
            return true;
        };
        let created = UNIX_EPOCH + Duration::from_secs(u64::try_from(self.timestamp).unwrap_or(0));
        modified > created
    }
}

pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

fn write_records(path: &Path, mtime: u32, records: &[PersistentRecord]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut encoder = GzBuilder::new()
        .mtime(mtime)
        .write(BufWriter::new(file), Compression::default());
    serde_json::to_writer_pretty(&mut encoder, records)?;
    let file = encoder.finish()?.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()
}
