//! Serialized form of the index.
//!
//! Each identity becomes one [`PersistentRecord`]:
//!
//! ```json
//! {
//!   "names": ["/photos/a.jpg", "/backup/a.jpg"],
//!   "size": 1000,
//!   "first_512b_sha256": "…",
//!   "sha256": "…",
//!   "ph_dct": "C3A1F0E07C3E1F0F"
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::identity::ContentIdentity;
use crate::index::DuplicateIndex;
use crate::phash::{Algorithm, PerceptualHash};

/// Key prefix of perceptual hash fields.
const PERCEPTUAL_PREFIX: &str = "ph_";

/// One identity as stored in the database file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentRecord {
    /// Alias paths
    pub names: Vec<PathBuf>,
    /// Content size in bytes
    pub size: u64,
    /// Hex SHA-256 of the first 512 bytes
    pub first_512b_sha256: String,
    /// Hex SHA-256 of the whole content
    pub sha256: String,
    /// `ph_<algorithm>` fields
    #[serde(flatten)]
    pub perceptual: BTreeMap<String, String>,
}

impl PersistentRecord {
    fn into_identity(self) -> ContentIdentity {
        let hashes = self
            .perceptual
            .iter()
            .filter_map(|(key, value)| {
                let name = key.strip_prefix(PERCEPTUAL_PREFIX)?;
                let algorithm = match name.parse::<Algorithm>() {
                    Ok(algorithm) => algorithm,
                    Err(e) => {
                        log::debug!("Ignoring field {}: {}", key, e);
                        return None;
                    }
                };
                match PerceptualHash::from_hex(algorithm, value) {
                    Ok(hash) => Some(hash),
                    Err(e) => {
                        log::warn!("Dropping stored hash: {}", e);
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        ContentIdentity::from_parts(
            self.names.into_iter().collect::<BTreeSet<_>>(),
            self.size,
            self.first_512b_sha256,
            self.sha256,
            hashes,
        )
    }
}

impl DuplicateIndex {
    /// Serialize every identity, completing full hashes where needed.
    ///
    /// Identities whose full hash cannot be computed anymore (file gone
    /// since probing) are left out with a warning.
    pub fn dump(&mut self) -> Vec<PersistentRecord> {
        self.iter_mut()
            .filter_map(|item| {
                let sha256 = match item.full_hash() {
                    Ok(hash) => hash.to_owned(),
                    Err(e) => {
                        log::warn!("Not saving content without full hash: {}", e);
                        return None;
                    }
                };
                Some(PersistentRecord {
                    names: item.aliases().iter().cloned().collect(),
                    size: item.size(),
                    first_512b_sha256: item.prefix_hash().to_owned(),
                    sha256,
                    perceptual: item
                        .perceptual_hashes()
                        .map(|h| (format!("{PERCEPTUAL_PREFIX}{}", h.algorithm()), h.to_hex()))
                        .collect(),
                })
            })
            .collect()
    }

    /// Rebuild an index from its records, preserving their order.
    #[must_use]
    pub fn load(records: Vec<PersistentRecord>) -> Self {
        Self::from_identities(
            records
                .into_iter()
                .map(PersistentRecord::into_identity)
                .collect(),
        )
    }
}
