//! The duplicate index: content identities and similarity searches.
//!
//! # Overview
//!
//! [`DuplicateIndex`] is an ordered list of [`ContentIdentity`] values with
//! the invariant that no two entries hold binary-equal content. Adding a path
//! either extends the alias set of a matching identity or appends a new one.
//!
//! Similarity searches compare the perceptual hashes of identities:
//!
//! - [`DuplicateIndex::find_pairs`] yields every close pair in nested order
//!   (outer identity, then the identities after it).
//! - [`DuplicateIndex::find_groups`] folds consecutive pairs sharing the same
//!   first representative into one group and skips pairs already implied by
//!   an earlier group.
//! - [`DuplicateIndex::query`] compares an outside hash against the index.
//!
//! # Example
//!
//! ```no_run
//! use imagedups::index::DuplicateIndex;
//! use imagedups::phash::Algorithm;
//! use std::path::Path;
//!
//! let mut index = DuplicateIndex::new();
//! index.add(Path::new("/photos/a.jpg"), false).unwrap();
//! index.add(Path::new("/photos/b.jpg"), false).unwrap();
//!
//! for group in index.find_groups(0.1, Algorithm::Dct) {
//!     println!("{}: {} similar", group.representative.display(), group.members.len());
//! }
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::identity::{ContentIdentity, HashError};
use crate::phash::{Algorithm, PerceptualHash};

/// Most identities allowed to keep their file open between finalizations.
pub const MAX_OPEN_HANDLES: usize = 256;

/// Position of an identity in a [`DuplicateIndex`].
///
/// Ids stay valid until the index is pruned, filtered or merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityId(usize);

impl IdentityId {
    /// Raw position.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Two perceptually similar identities, labelled by their representatives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarPair {
    /// Representative of the earlier identity
    pub first: PathBuf,
    /// Representative of the later identity
    pub second: PathBuf,
    /// Normalized hash distance
    pub distance: f64,
}

/// A representative and the images found similar to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarGroup {
    /// Representative the pairs were grouped by
    pub representative: PathBuf,
    /// Similar representatives with their distance, sorted by path
    pub members: Vec<(PathBuf, f64)>,
}

/// Ordered collection of content identities.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    items: Vec<ContentIdentity>,
}

impl DuplicateIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from identities that are already distinct.
    #[must_use]
    pub fn from_identities(items: Vec<ContentIdentity>) -> Self {
        Self { items }
    }

    /// Number of identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the index holds no identity.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Identity at `id`.
    #[must_use]
    pub fn get(&self, id: IdentityId) -> Option<&ContentIdentity> {
        self.items.get(id.0)
    }

    /// Mutable identity at `id`.
    pub fn get_mut(&mut self, id: IdentityId) -> Option<&mut ContentIdentity> {
        self.items.get_mut(id.0)
    }

    /// Iterate identities in index order.
    pub fn iter(&self) -> impl Iterator<Item = &ContentIdentity> {
        self.items.iter()
    }

    /// Iterate identities mutably in index order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ContentIdentity> {
        self.items.iter_mut()
    }

    /// Consume the index, returning its identities in order.
    #[must_use]
    pub fn into_identities(self) -> Vec<ContentIdentity> {
        self.items
    }

    /// Add `path`, merging it into a binary-equal identity if one exists.
    ///
    /// With `fast_compare`, an existing identity matches on size and prefix
    /// hash alone. Once more than [`MAX_OPEN_HANDLES`] identities hold an open
    /// file, all of them are finalized.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if `path` cannot be probed; the index is left
    /// unchanged and the caller is expected to skip the file.
    pub fn add(&mut self, path: &Path, fast_compare: bool) -> Result<IdentityId, HashError> {
        let mut probed = ContentIdentity::probe(path)?;

        for (pos, item) in self.items.iter_mut().enumerate() {
            match item.binary_equal(&mut probed, fast_compare) {
                Ok(true) => {
                    if item.add_alias(path.to_path_buf()) {
                        log::debug!("New alias {} for existing content", path.display());
                    }
                    return Ok(IdentityId(pos));
                }
                Ok(false) => {}
                Err(e) => log::warn!("Skipping comparison against {}: {}", path.display(), e),
            }
        }

        self.items.push(probed);
        if self.open_handles() > MAX_OPEN_HANDLES {
            log::debug!("{} files open, finalizing content hashes", MAX_OPEN_HANDLES);
            self.finalize_hashes();
        }
        Ok(IdentityId(self.items.len() - 1))
    }

    /// Number of identities still holding their file open.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.items.iter().filter(|i| !i.is_fully_hashed()).count()
    }

    /// Complete the full hash of every identity still in the probed state.
    ///
    /// Releases the file handles kept open since probing. Identities whose
    /// file can no longer be read stay probed and are reported in the log.
    pub fn finalize_hashes(&mut self) {
        for item in self.items.iter_mut().filter(|i| !i.is_fully_hashed()) {
            if let Err(e) = item.full_hash() {
                log::warn!("Failed to hash content: {}", e);
            }
        }
    }

    /// Re-check every alias on disk, dropping missing or changed files.
    ///
    /// Returns the aliases that were dropped.
    pub fn cleanup(&mut self, fast: bool) -> Vec<PathBuf> {
        self.items
            .iter_mut()
            .flat_map(|item| item.check_aliases(fast))
            .collect()
    }

    /// Remove identities without aliases, returning how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.items.len();
        self.items.retain(|item| !item.is_orphan());
        before - self.items.len()
    }

    /// Restrict the index to aliases under `prefix`.
    ///
    /// Identities without such an alias are removed; the others keep only
    /// the aliases under `prefix`.
    pub fn filter_by_path(&mut self, prefix: &Path) {
        self.items.retain_mut(|item| {
            item.retain_aliases(|alias| alias.starts_with(prefix));
            !item.is_orphan()
        });
    }

    /// Minimal sorted set of directories covering every alias.
    pub fn list_top_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = Vec::new();
        for alias in self.items.iter().flat_map(|item| item.aliases()) {
            let Some(dir) = alias.parent() else {
                continue;
            };
            if paths.iter().any(|p| dir.starts_with(p)) {
                continue;
            }
            paths.retain(|p| !p.starts_with(dir));
            paths.push(dir.to_path_buf());
        }
        paths.sort();
        paths
    }

    /// Identities whose content is known under two or more paths.
    pub fn binary_duplicates(&self) -> impl Iterator<Item = &ContentIdentity> {
        self.items.iter().filter(|item| item.aliases().len() > 1)
    }

    /// Every pair of identities within `threshold` for `algorithm`.
    ///
    /// Identities without aliases or without a hash for `algorithm` are
    /// skipped. Pairs come out in nested order, so all pairs sharing a first
    /// identity are adjacent.
    pub fn find_pairs(
        &self,
        threshold: f64,
        algorithm: Algorithm,
    ) -> impl Iterator<Item = SimilarPair> + '_ {
        let candidates: Vec<(&Path, &PerceptualHash)> = self
            .items
            .iter()
            .filter_map(|item| {
                let hash = item.perceptual_hash(algorithm)?;
                Some((item.representative()?, hash))
            })
            .collect();

        (0..candidates.len()).flat_map(move |i| {
            let (first, hash_a) = candidates[i];
            candidates[i + 1..]
                .iter()
                .filter_map(move |&(second, hash_b)| {
                    let distance = hash_a.distance(hash_b)?;
                    (distance <= threshold).then(|| SimilarPair {
                        first: first.to_path_buf(),
                        second: second.to_path_buf(),
                        distance,
                    })
                })
                .collect::<Vec<_>>()
        })
    }

    /// Similar images grouped by their first representative.
    ///
    /// Consecutive pairs from [`find_pairs`](Self::find_pairs) that share the
    /// first representative form one group. A group is closed as soon as a
    /// pair with a different first representative shows up, and a pair whose
    /// two members already appear together in a closed group is skipped.
    /// Grouping relies on pair adjacency only: a chain `a~b`, `b~c` yields two
    /// groups, not one.
    #[must_use]
    pub fn find_groups(&self, threshold: f64, algorithm: Algorithm) -> Vec<SimilarGroup> {
        let mut emitted: Vec<SimilarGroup> = Vec::new();
        let mut reported: Vec<BTreeSet<PathBuf>> = Vec::new();
        let mut current: Option<SimilarGroup> = None;

        for pair in self.find_pairs(threshold, algorithm) {
            if current
                .as_ref()
                .is_some_and(|group| group.representative != pair.first)
            {
                if let Some(done) = current.take() {
                    reported.push(finish_group(&mut emitted, done));
                }
            }

            let derived = reported
                .iter()
                .any(|group| group.contains(&pair.first) && group.contains(&pair.second));
            if derived {
                continue;
            }

            match current.as_mut() {
                Some(group) => match group.members.iter_mut().find(|(p, _)| *p == pair.second) {
                    Some(member) => member.1 = pair.distance,
                    None => group.members.push((pair.second, pair.distance)),
                },
                None => {
                    current = Some(SimilarGroup {
                        representative: pair.first,
                        members: vec![(pair.second, pair.distance)],
                    });
                }
            }
        }

        if let Some(done) = current {
            finish_group(&mut emitted, done);
        }
        emitted
    }

    /// Identities within `threshold` of a hash that is not in the index.
    ///
    /// Returns `(representative, distance)` in index order.
    #[must_use]
    pub fn query(&self, hash: &PerceptualHash, threshold: f64) -> Vec<(PathBuf, f64)> {
        self.items
            .iter()
            .filter_map(|item| {
                let distance = item.perceptual_hash(hash.algorithm())?.distance(hash)?;
                let name = item.representative()?;
                (distance <= threshold).then(|| (name.to_path_buf(), distance))
            })
            .collect()
    }

    /// Absorb the identities of `other`.
    ///
    /// Identities binary-equal to one already present contribute their
    /// aliases and any perceptual hash the present one lacks.
    pub fn merge(&mut self, other: DuplicateIndex) {
        'incoming: for mut incoming in other.items {
            for item in &mut self.items {
                if item.binary_equal(&mut incoming, false).unwrap_or(false) {
                    for alias in incoming.aliases() {
                        item.add_alias(alias.clone());
                    }
                    for hash in incoming.perceptual_hashes() {
                        if item.perceptual_hash(hash.algorithm()).is_none() {
                            item.set_perceptual_hash(hash.clone());
                        }
                    }
                    continue 'incoming;
                }
            }
            self.items.push(incoming);
        }
    }
}

/// Sort a finished group, emit it and return its member set.
fn finish_group(emitted: &mut Vec<SimilarGroup>, mut group: SimilarGroup) -> BTreeSet<PathBuf> {
    group
        .members
        .sort_by(|a, b| a.0.as_os_str().cmp(b.0.as_os_str()));
    let mut members: BTreeSet<PathBuf> = group.members.iter().map(|(p, _)| p.clone()).collect();
    members.insert(group.representative.clone());
    emitted.push(group);
    members
}
