//! One database file per directory.
//!
//! A sharded database is a directory holding an `index` file and numbered
//! shard files. The index maps each hashed directory to its shard name:
//!
//! ```text
//! #seqnext 3
//! 1 /photos/2020
//! 2 /photos/2021 summer
//! ```
//!
//! Lines starting with `#` are control lines; `#seqnext` records the next
//! free shard number. Everything after the first space is the directory.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use super::{temp_sibling, HashStore, StoreError};
use crate::index::DuplicateIndex;

/// Name of the index file inside a sharded database directory.
pub const INDEX_FILE: &str = "index";

const SEQ_NEXT: &str = "#seqnext";
const SHARD_EXTENSION: &str = "json.gz";

/// Directory to shard-name mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardIndex {
    seq_next: u64,
    shards: BTreeMap<PathBuf, String>,
}

impl Default for ShardIndex {
    fn default() -> Self {
        Self {
            seq_next: 1,
            shards: BTreeMap::new(),
        }
    }
}

impl ShardIndex {
    /// Parse the text form of a shard index.
    ///
    /// # Errors
    ///
    /// [`StoreError::ShardIndex`] for a line without a name and a path, or a
    /// malformed `#seqnext` value. `path` is only used in the error.
    pub fn parse(path: &Path, content: &str) -> Result<Self, StoreError> {
        let mut index = Self::default();
        for (number, line) in content.lines().enumerate() {
            let invalid = || StoreError::ShardIndex {
                path: path.to_path_buf(),
                line: number + 1,
            };
            if line.is_empty() {
                continue;
            }
            if let Some(control) = line.strip_prefix('#') {
                if let Some(value) = control.strip_prefix(&SEQ_NEXT[1..]) {
                    index.seq_next = value.trim().parse().map_err(|_| invalid())?;
                } else {
                    log::debug!("Ignoring control line '{}'", line);
                }
                continue;
            }
            let (name, dir) = line.split_once(' ').ok_or_else(invalid)?;
            if name.is_empty() || dir.is_empty() {
                return Err(invalid());
            }
            index.shards.insert(PathBuf::from(dir), name.to_string());
        }
        Ok(index)
    }

    /// Text form, as written to disk.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("{SEQ_NEXT} {}\n", self.seq_next);
        for (dir, name) in &self.shards {
            let _ = writeln!(out, "{} {}", name, dir.display());
        }
        out
    }

    /// Shard name of `dir`, if one was assigned.
    #[must_use]
    pub fn get(&self, dir: &Path) -> Option<&str> {
        self.shards.get(dir).map(String::as_str)
    }

    /// Shard name of `dir`, assigning the next free one if needed.
    pub fn name_for(&mut self, dir: &Path) -> &str {
        if !self.shards.contains_key(dir) {
            self.shards
                .insert(dir.to_path_buf(), self.seq_next.to_string());
            self.seq_next += 1;
        }
        self.shards.get(dir).map_or("", String::as_str)
    }

    /// Every `(directory, shard name)` entry, sorted by directory.
    pub fn items(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.shards
            .iter()
            .map(|(dir, name)| (dir.as_path(), name.as_str()))
    }

    /// Forget the shard of `dir`, returning its name.
    pub fn remove(&mut self, dir: &Path) -> Option<String> {
        self.shards.remove(dir)
    }

    /// Number of shards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Whether no shard is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

/// A database split into one [`HashStore`] per directory.
#[derive(Debug)]
pub struct ShardedStore {
    root: PathBuf,
    index: ShardIndex,
}

impl ShardedStore {
    /// Open the sharded database rooted at `root`.
    ///
    /// # Errors
    ///
    /// With `must_exist`, [`StoreError::NotFound`] if there is no index file.
    /// A present but malformed index is always an error.
    pub fn open(root: impl Into<PathBuf>, must_exist: bool) -> Result<Self, StoreError> {
        let root = root.into();
        let index_path = root.join(INDEX_FILE);
        let index = match fs::read_to_string(&index_path) {
            Ok(content) => ShardIndex::parse(&index_path, &content)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound && !must_exist => ShardIndex::default(),
            Err(e) => return Err(StoreError::io(&index_path, e)),
        };
        Ok(Self { root, index })
    }

    /// Directory holding the shard files.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory to shard mapping.
    #[must_use]
    pub fn shard_index(&self) -> &ShardIndex {
        &self.index
    }

    fn shard_file(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{SHARD_EXTENSION}"))
    }

    /// Open the shard of `dir`, creating the mapping if needed.
    ///
    /// A shard whose file is missing or unreadable starts empty.
    ///
    /// # Errors
    ///
    /// Propagates [`HashStore::open`] failures.
    pub fn open_shard(&mut self, dir: &Path) -> Result<HashStore, StoreError> {
        let name = self.index.name_for(dir).to_string();
        HashStore::open(self.shard_file(&name), false)
    }

    /// Every shard, loaded, with the directory it belongs to.
    ///
    /// Shards whose file has gone missing are skipped.
    ///
    /// # Errors
    ///
    /// Fails on the first shard that exists but cannot be read.
    pub fn load_shards(&self) -> Result<Vec<(PathBuf, HashStore)>, StoreError> {
        let mut shards = Vec::with_capacity(self.index.len());
        for (dir, name) in self.index.items() {
            match HashStore::load(self.shard_file(name)) {
                Ok(store) => shards.push((dir.to_path_buf(), store)),
                Err(StoreError::NotFound(path)) => {
                    log::debug!("Shard {} for {} is gone", path.display(), dir.display());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(shards)
    }

    /// All shards merged into one index.
    ///
    /// # Errors
    ///
    /// See [`load_shards`](Self::load_shards).
    pub fn load_all(&self) -> Result<DuplicateIndex, StoreError> {
        let mut merged = DuplicateIndex::new();
        for (_, store) in self.load_shards()? {
            merged.merge(store.into_index());
        }
        Ok(merged)
    }

    /// Drop mappings whose shard file no longer exists.
    pub fn forget_missing(&mut self) -> usize {
        let missing: Vec<PathBuf> = self
            .index
            .items()
            .filter(|(_, name)| !self.shard_file(name).exists())
            .map(|(dir, _)| dir.to_path_buf())
            .collect();
        for dir in &missing {
            self.index.remove(dir);
        }
        missing.len()
    }

    /// Write the index file through a temporary sibling.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the directory or file cannot be written.
    pub fn save_index(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let path = self.root.join(INDEX_FILE);
        let temp_path = temp_sibling(&path);
        let written = write_synced(&temp_path, self.index.render().as_bytes())
            .and_then(|()| fs::rename(&temp_path, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::io(&path, e));
        }
        Ok(())
    }
}

fn write_synced(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content)?;
    file.sync_all()
}
