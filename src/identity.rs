//! Binary content identity of a file.
//!
//! # Overview
//!
//! A [`ContentIdentity`] describes file content independently of its name:
//! size, SHA-256 of the first [`PREFIX_SIZE`] bytes and SHA-256 of the whole
//! content. Every path known to hold exactly this content is an *alias*.
//!
//! The full hash is computed lazily. Probing a file reads only its prefix and
//! keeps the file handle open in the [`ContentState::Probed`] state; the first
//! call to [`ContentIdentity::full_hash`] streams the remainder, moves the
//! identity to [`ContentState::FullyHashed`] and releases the handle.
//!
//! # Example
//!
//! ```no_run
//! use imagedups::identity::ContentIdentity;
//! use std::path::Path;
//!
//! let mut a = ContentIdentity::probe(Path::new("a.jpg")).unwrap();
//! let mut b = ContentIdentity::probe(Path::new("b.jpg")).unwrap();
//! if a.binary_equal(&mut b, false).unwrap() {
//!     println!("same content: {}", a.full_hash().unwrap());
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::phash::{Algorithm, PerceptualHash};

/// Number of leading bytes hashed when a file is probed.
pub const PREFIX_SIZE: usize = 512;

/// Chunk size used when streaming the rest of the file.
const CHUNK_SIZE: usize = 32 * 1024;

/// Errors that can occur while hashing file content.
#[derive(thiserror::Error, Debug)]
pub enum HashError {
    /// The specified file was not found.
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Permission was denied when reading the file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// An I/O error occurred while reading the file.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl HashError {
    fn from_io(path: &Path, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

/// Progress of the full content hash.
#[derive(Debug)]
pub enum ContentState {
    /// Prefix was read; the handle is positioned right after it.
    Probed {
        /// File the remaining content is read from
        path: PathBuf,
        /// Open handle, released on transition
        reader: BufReader<File>,
        /// Digest state after consuming the prefix
        digest: Sha256,
    },
    /// Whole content was hashed.
    FullyHashed(String),
}

/// Binary identity of a file's content plus its known aliases.
#[derive(Debug)]
pub struct ContentIdentity {
    aliases: BTreeSet<PathBuf>,
    size: u64,
    prefix_hash: String,
    state: ContentState,
    perceptual: BTreeMap<Algorithm, PerceptualHash>,
}

impl ContentIdentity {
    /// Open `path`, read its size and prefix, and hash the prefix.
    ///
    /// The file handle stays open until [`full_hash`](Self::full_hash) is
    /// called or the identity is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] when the file cannot be opened or read. Callers
    /// skip the file in that case.
    pub fn probe(path: &Path) -> Result<Self, HashError> {
        let file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
        let size = file
            .metadata()
            .map_err(|e| HashError::from_io(path, e))?
            .len();
        let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);

        let mut prefix = Vec::with_capacity(PREFIX_SIZE);
        (&mut reader)
            .take(PREFIX_SIZE as u64)
            .read_to_end(&mut prefix)
            .map_err(|e| HashError::from_io(path, e))?;

        let mut digest = Sha256::new();
        digest.update(&prefix);
        let prefix_hash = format!("{:x}", digest.clone().finalize());

        Ok(Self {
            aliases: BTreeSet::from([path.to_path_buf()]),
            size,
            prefix_hash,
            state: ContentState::Probed {
                path: path.to_path_buf(),
                reader,
                digest,
            },
            perceptual: BTreeMap::new(),
        })
    }

    /// Rebuild an identity whose hashes are already known (database load).
    #[must_use]
    pub fn from_parts(
        aliases: BTreeSet<PathBuf>,
        size: u64,
        prefix_hash: String,
        full_hash: String,
        perceptual: impl IntoIterator<Item = PerceptualHash>,
    ) -> Self {
        Self {
            aliases,
            size,
            prefix_hash,
            state: ContentState::FullyHashed(full_hash),
            perceptual: perceptual
                .into_iter()
                .map(|h| (h.algorithm(), h))
                .collect(),
        }
    }

    /// Content size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Hex SHA-256 of the first [`PREFIX_SIZE`] bytes.
    #[must_use]
    pub fn prefix_hash(&self) -> &str {
        &self.prefix_hash
    }

    /// Whether the full hash has been computed.
    #[must_use]
    pub fn is_fully_hashed(&self) -> bool {
        self.known_full_hash().is_some()
    }

    /// Hex SHA-256 of the whole content, computing it on first use.
    ///
    /// Repeated calls return the cached value without touching the file.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if reading the remainder fails. The identity
    /// stays probed so the call can be retried.
    pub fn full_hash(&mut self) -> Result<&str, HashError> {
        if let ContentState::Probed {
            path,
            reader,
            digest,
        } = &mut self.state
        {
            let hash = stream_remainder(path, reader, digest.clone(), self.size)?;
            log::trace!("Full hash computed: {}", path.display());
            self.state = ContentState::FullyHashed(hash);
        }
        Ok(self.known_full_hash().unwrap_or_default())
    }

    /// The full hash, if it was already computed.
    #[must_use]
    pub fn known_full_hash(&self) -> Option<&str> {
        match &self.state {
            ContentState::FullyHashed(hash) => Some(hash),
            ContentState::Probed { .. } => None,
        }
    }

    /// Compare binary content with another identity.
    ///
    /// Size and prefix hash are always compared. Unless `fast` is set, the
    /// full hashes are compared too (computing them if needed). Fast mode
    /// never reports different content as unequal, but may report files
    /// that only share size and prefix as equal.
    ///
    /// # Errors
    ///
    /// Propagates read failures from computing either full hash.
    pub fn binary_equal(&mut self, other: &mut Self, fast: bool) -> Result<bool, HashError> {
        if self.size != other.size || self.prefix_hash != other.prefix_hash {
            return Ok(false);
        }
        if fast {
            return Ok(true);
        }
        let mine = self.full_hash()?.to_owned();
        Ok(mine == other.full_hash()?)
    }

    /// Re-probe every alias and drop those that no longer hold this content.
    ///
    /// Missing, unreadable and modified files are dropped silently; the
    /// dropped aliases are returned so the caller can report them.
    pub fn check_aliases(&mut self, fast: bool) -> Vec<PathBuf> {
        let mut dropped = Vec::new();
        let aliases = std::mem::take(&mut self.aliases);
        for alias in aliases {
            let keep = match Self::probe(&alias) {
                Ok(mut current) => self.binary_equal(&mut current, fast).unwrap_or_else(|e| {
                    log::debug!("Alias check failed for {}: {}", alias.display(), e);
                    false
                }),
                Err(e) => {
                    log::trace!("Alias {} unreadable: {}", alias.display(), e);
                    false
                }
            };
            if keep {
                self.aliases.insert(alias);
            } else {
                dropped.push(alias);
            }
        }
        dropped
    }

    /// All paths known to hold this content.
    #[must_use]
    pub fn aliases(&self) -> &BTreeSet<PathBuf> {
        &self.aliases
    }

    /// Add a path holding this content.
    pub fn add_alias(&mut self, path: PathBuf) -> bool {
        self.aliases.insert(path)
    }

    /// Keep only aliases accepted by `keep`.
    pub fn retain_aliases(&mut self, mut keep: impl FnMut(&Path) -> bool) {
        self.aliases.retain(|p| keep(p));
    }

    /// Whether no alias is left.
    #[must_use]
    pub fn is_orphan(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Lexicographically smallest alias, used as the label in reports.
    #[must_use]
    pub fn representative(&self) -> Option<&Path> {
        self.aliases
            .iter()
            .min_by(|a, b| a.as_os_str().cmp(b.as_os_str()))
            .map(PathBuf::as_path)
    }

    /// Perceptual hash for `algorithm`, if computed.
    #[must_use]
    pub fn perceptual_hash(&self, algorithm: Algorithm) -> Option<&PerceptualHash> {
        self.perceptual.get(&algorithm)
    }

    /// All computed perceptual hashes.
    pub fn perceptual_hashes(&self) -> impl Iterator<Item = &PerceptualHash> {
        self.perceptual.values()
    }

    /// Store a perceptual hash, replacing an older one of the same algorithm.
    pub fn set_perceptual_hash(&mut self, hash: PerceptualHash) {
        self.perceptual.insert(hash.algorithm(), hash);
    }
}

/// Finish `digest` with everything `reader` has left.
///
/// On a read error the reader is rewound to just after the prefix, so a
/// later attempt streams the same bytes again.
fn stream_remainder(
    path: &Path,
    reader: &mut BufReader<File>,
    mut digest: Sha256,
    size: u64,
) -> Result<String, HashError> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => return Ok(format!("{:x}", digest.finalize())),
            Ok(n) => digest.update(&buffer[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let consumed = size.min(PREFIX_SIZE as u64);
                if let Err(seek_err) = reader.seek(SeekFrom::Start(consumed)) {
                    log::debug!("Cannot rewind {}: {}", path.display(), seek_err);
                }
                return Err(HashError::from_io(path, e));
            }
        }
    }
}
