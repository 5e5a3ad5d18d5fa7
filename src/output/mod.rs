//! Formatters for search results.
//!
//! A search produces a [`SearchReport`]; [`TextOutput`] renders it the way a
//! person reads it and [`JsonOutput`] the way a script consumes it.

pub mod json;
pub mod text;

use std::path::PathBuf;

use crate::index::SimilarGroup;

pub use json::JsonOutput;
pub use text::TextOutput;

/// Result of a search phase.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchReport {
    /// The database compared against itself.
    Database {
        /// Alias sets of content stored under several paths
        binary: Vec<Vec<PathBuf>>,
        /// Perceptually similar groups
        similar: Vec<SimilarGroup>,
    },
    /// The database compared against one sample image.
    Sample {
        /// The sample file
        sample: PathBuf,
        /// Matching representatives with their distance, in index order
        matches: Vec<(PathBuf, f64)>,
    },
}

impl SearchReport {
    /// Whether nothing was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Database { binary, similar } => binary.is_empty() && similar.is_empty(),
            Self::Sample { matches, .. } => matches.is_empty(),
        }
    }
}

/// Similarity in percent for a normalized distance.
#[must_use]
pub fn similarity(distance: f64) -> f64 {
    (1.0 - distance) * 100.0
}

/// Errors that can occur while writing a report.
#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Writing to the output failed
    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),
}
