//! Perceptual image hashes.
//!
//! This module defines the value type [`PerceptualHash`], the named
//! [`Algorithm`]s the database knows about and the [`PerceptualHasher`]
//! capability that computes a hash for an image file. The hashing itself is
//! delegated to `image_hasher` (see [`provider`]); this crate only stores,
//! serializes and compares the results.
//!
//! Distances are normalized to `[0, 1]`: `0.0` means identical hashes,
//! `1.0` maximally different ones. Hashes of different algorithms are never
//! comparable.

pub mod provider;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use provider::{lookup, registry, ImageHasherProvider};

/// Supported perceptual hashing algorithms.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// DCT-based hash, robust to scaling and compression.
    #[default]
    Dct,
    /// Marr-Hildreth style edge hash, compared by Hamming distance.
    Mh,
    /// Radial projection style hash, compared by cross-correlation.
    Radial,
}

impl Algorithm {
    /// Every registered algorithm.
    pub const ALL: [Algorithm; 3] = [Algorithm::Dct, Algorithm::Mh, Algorithm::Radial];

    /// Name used on the command line and in database keys (`ph_<name>`).
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Dct => "dct",
            Self::Mh => "mh",
            Self::Radial => "radial",
        }
    }

    /// How two hashes of this algorithm are compared.
    #[must_use]
    pub fn metric(self) -> Metric {
        match self {
            Self::Dct | Self::Mh => Metric::Hamming,
            Self::Radial => Metric::CrossCorrelation,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An algorithm name that is not registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown perceptual hash algorithm '{0}' (expected one of: dct, mh, radial)")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for Algorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownAlgorithm(s.to_string()))
    }
}

/// Distance function between two hash byte strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Differing bits divided by the number of bits.
    Hamming,
    /// One minus the peak normalized circular cross-correlation.
    CrossCorrelation,
}

impl Metric {
    /// Normalized distance in `[0, 1]`.
    ///
    /// Hashes of different lengths are treated as maximally different.
    #[must_use]
    pub fn distance(self, a: &[u8], b: &[u8]) -> f64 {
        if a.len() != b.len() || a.is_empty() {
            return if a == b { 0.0 } else { 1.0 };
        }
        match self {
            Self::Hamming => {
                let differing: u32 = a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum();
                f64::from(differing) / (a.len() * 8) as f64
            }
            Self::CrossCorrelation => (1.0 - peak_cross_correlation(a, b)).clamp(0.0, 1.0),
        }
    }
}

fn peak_cross_correlation(x: &[u8], y: &[u8]) -> f64 {
    let n = x.len();
    let mean = |v: &[u8]| v.iter().map(|&b| f64::from(b)).sum::<f64>() / n as f64;
    let (mx, my) = (mean(x), mean(y));
    let dx: Vec<f64> = x.iter().map(|&b| f64::from(b) - mx).collect();
    let dy: Vec<f64> = y.iter().map(|&b| f64::from(b) - my).collect();

    let energy = |v: &[f64]| v.iter().map(|d| d * d).sum::<f64>();
    let denominator = (energy(&dx) * energy(&dy)).sqrt();
    if denominator == 0.0 {
        // Flat signals: only identical ones correlate.
        return if x == y { 1.0 } else { 0.0 };
    }

    (0..n)
        .map(|shift| {
            let numerator: f64 = (0..n).map(|i| dx[i] * dy[(n + i - shift) % n]).sum();
            numerator / denominator
        })
        .fold(f64::MIN, f64::max)
}

/// Errors from computing or parsing perceptual hashes.
#[derive(Debug, Error)]
pub enum PerceptualError {
    /// Failed to open or decode the image.
    #[error("Failed to load image {0}: {1}")]
    LoadError(String, #[source] image::ImageError),

    /// A stored hash string could not be decoded.
    #[error("Invalid {algorithm} hash '{value}'")]
    Parse {
        /// Algorithm the value was stored under
        algorithm: Algorithm,
        /// The offending value
        value: String,
    },
}

/// Perceptual hash bytes tagged with the algorithm that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerceptualHash {
    algorithm: Algorithm,
    bytes: Vec<u8>,
}

impl PerceptualHash {
    /// Wrap raw hash bytes.
    #[must_use]
    pub fn new(algorithm: Algorithm, bytes: Vec<u8>) -> Self {
        Self { algorithm, bytes }
    }

    /// Algorithm that produced this hash.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Raw hash bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Uppercase hex form stored in the database.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(&self.bytes)
    }

    /// Parse the hex form produced by [`to_hex`](Self::to_hex).
    ///
    /// # Errors
    ///
    /// Returns [`PerceptualError::Parse`] for odd lengths or non-hex digits.
    pub fn from_hex(algorithm: Algorithm, value: &str) -> Result<Self, PerceptualError> {
        let bytes = hex::decode(value).map_err(|_| PerceptualError::Parse {
            algorithm,
            value: value.to_string(),
        })?;
        Ok(Self::new(algorithm, bytes))
    }

    /// Normalized distance to another hash of the same algorithm.
    ///
    /// Returns `None` when the algorithms differ.
    #[must_use]
    pub fn distance(&self, other: &PerceptualHash) -> Option<f64> {
        (self.algorithm == other.algorithm)
            .then(|| self.algorithm.metric().distance(&self.bytes, &other.bytes))
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Capability that computes perceptual hashes for image files.
///
/// Implementations must be shareable across the hashing worker pool.
pub trait PerceptualHasher: Send + Sync {
    /// Algorithm implemented by this hasher.
    fn algorithm(&self) -> Algorithm;

    /// Compute the hash of the image at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or decoded as an image.
    fn compute(&self, path: &Path) -> Result<PerceptualHash, PerceptualError>;

    /// Encode a hash for storage.
    fn serialize(&self, hash: &PerceptualHash) -> String {
        hash.to_hex()
    }

    /// Decode a stored hash.
    ///
    /// # Errors
    ///
    /// See [`PerceptualHash::from_hex`].
    fn parse(&self, value: &str) -> Result<PerceptualHash, PerceptualError> {
        PerceptualHash::from_hex(self.algorithm(), value)
    }

    /// Normalized distance between two hashes of this algorithm.
    fn distance(&self, a: &PerceptualHash, b: &PerceptualHash) -> f64 {
        self.algorithm().metric().distance(a.as_bytes(), b.as_bytes())
    }
}
