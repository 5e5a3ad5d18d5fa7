//! `image_hasher` backed providers and the algorithm registry.
//!
//! The registry is built once on first use and maps every [`Algorithm`] to a
//! shared provider, so resolving a name is a single lookup.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use image_hasher::{HashAlg, HasherConfig};

use super::{Algorithm, PerceptualError, PerceptualHash, PerceptualHasher, UnknownAlgorithm};

/// Computes perceptual hashes with `image_hasher`.
pub struct ImageHasherProvider {
    hasher: image_hasher::Hasher,
    algorithm: Algorithm,
}

impl ImageHasherProvider {
    /// Create a provider for the given algorithm.
    pub fn new(algorithm: Algorithm) -> Self {
        let config = match algorithm {
            Algorithm::Dct => HasherConfig::new()
                .hash_size(8, 8)
                .hash_alg(HashAlg::Median)
                .preproc_dct(),
            Algorithm::Mh => HasherConfig::new()
                .hash_size(8, 8)
                .hash_alg(HashAlg::DoubleGradient),
            Algorithm::Radial => HasherConfig::new()
                .hash_size(16, 16)
                .hash_alg(HashAlg::Blockhash),
        };

        Self {
            hasher: config.to_hasher(),
            algorithm,
        }
    }
}

impl std::fmt::Debug for ImageHasherProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageHasherProvider")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl PerceptualHasher for ImageHasherProvider {
    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn compute(&self, path: &Path) -> Result<PerceptualHash, PerceptualError> {
        let img = image::open(path)
            .map_err(|e| PerceptualError::LoadError(path.display().to_string(), e))?;
        let hash = self.hasher.hash_image(&img);
        Ok(PerceptualHash::new(self.algorithm, hash.as_bytes().to_vec()))
    }
}

static REGISTRY: OnceLock<BTreeMap<Algorithm, Arc<dyn PerceptualHasher>>> = OnceLock::new();

/// All registered providers, keyed by algorithm.
pub fn registry() -> &'static BTreeMap<Algorithm, Arc<dyn PerceptualHasher>> {
    REGISTRY.get_or_init(|| {
        Algorithm::ALL
            .into_iter()
            .map(|algorithm| {
                let provider: Arc<dyn PerceptualHasher> =
                    Arc::new(ImageHasherProvider::new(algorithm));
                (algorithm, provider)
            })
            .collect()
    })
}

/// Resolve an algorithm name to its provider.
///
/// # Errors
///
/// Returns [`UnknownAlgorithm`] for names outside the registry.
pub fn lookup(name: &str) -> Result<Arc<dyn PerceptualHasher>, UnknownAlgorithm> {
    let algorithm: Algorithm = name.parse()?;
    registry()
        .get(&algorithm)
        .cloned()
        .ok_or_else(|| UnknownAlgorithm(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn checkerboard(cell: u32) -> RgbImage {
        let mut img = RgbImage::new(64, 64);
        for x in 0..64 {
            for y in 0..64 {
                let white = (x / cell + y / cell) % 2 == 0;
                let v = if white { 255 } else { 0 };
                img.put_pixel(x, y, Rgb([v, v, v]));
            }
        }
        img
    }

    #[test]
    fn test_registry_has_every_algorithm() {
        for algorithm in Algorithm::ALL {
            let provider = lookup(algorithm.name()).unwrap();
            assert_eq!(provider.algorithm(), algorithm);
        }
        assert!(lookup("ahash").is_err());
    }

    #[test]
    fn test_invalid_image() {
        let temp_dir = tempdir().unwrap();
        let file_path = temp_dir.path().join("invalid.png");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not an image").unwrap();

        let provider = ImageHasherProvider::new(Algorithm::Dct);
        assert!(provider.compute(&file_path).is_err());
    }

    #[test]
    fn test_identical_images_have_distance_zero() {
        let temp_dir = tempdir().unwrap();
        let path1 = temp_dir.path().join("img1.png");
        let path2 = temp_dir.path().join("img2.png");
        checkerboard(8).save(&path1).unwrap();
        checkerboard(8).save(&path2).unwrap();

        for algorithm in Algorithm::ALL {
            let provider = ImageHasherProvider::new(algorithm);
            let h1 = provider.compute(&path1).unwrap();
            let h2 = provider.compute(&path2).unwrap();
            assert_eq!(provider.distance(&h1, &h2), 0.0, "{algorithm}");
        }
    }

    #[test]
    fn test_serialize_parse_round_trip() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("img.png");
        checkerboard(4).save(&path).unwrap();

        let provider = ImageHasherProvider::new(Algorithm::Dct);
        let hash = provider.compute(&path).unwrap();
        assert_eq!(hash.as_bytes().len(), 8);
        let parsed = provider.parse(&provider.serialize(&hash)).unwrap();
        assert_eq!(parsed, hash);
    }
}
