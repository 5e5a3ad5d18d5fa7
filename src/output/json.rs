//! JSON report for scripting.
//!
//! # Output Schema
//!
//! ```json
//! {
//!   "sample": null,
//!   "binary_duplicates": [["/p/a.png", "/p/copy.png"]],
//!   "similar_groups": [
//!     {
//!       "representative": "/p/a.png",
//!       "members": [{ "path": "/p/b.png", "distance": 0.05, "similarity": 95.0 }]
//!     }
//!   ],
//!   "matches": []
//! }
//! ```
//!
//! `matches` is filled for a sample search, the two group lists for a
//! database search.

use std::io::Write;
use std::path::Path;

use serde::Serialize;

use super::{similarity, OutputError, SearchReport};

/// One matching image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonMatch {
    /// Representative path
    pub path: String,
    /// Normalized hash distance
    pub distance: f64,
    /// Similarity in percent
    pub similarity: f64,
}

impl JsonMatch {
    fn new(path: &Path, distance: f64) -> Self {
        Self {
            path: path.to_string_lossy().into_owned(),
            distance,
            similarity: similarity(distance),
        }
    }
}

/// A group of similar images.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonGroup {
    /// Path the group is keyed by
    pub representative: String,
    /// Images similar to it
    pub members: Vec<JsonMatch>,
}

/// Complete JSON document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonOutput {
    /// Sample file of a sample search
    pub sample: Option<String>,
    /// Paths sharing identical content
    pub binary_duplicates: Vec<Vec<String>>,
    /// Perceptually similar groups
    pub similar_groups: Vec<JsonGroup>,
    /// Matches of a sample search
    pub matches: Vec<JsonMatch>,
}

impl JsonOutput {
    /// Build the document for `report`.
    #[must_use]
    pub fn new(report: &SearchReport) -> Self {
        match report {
            SearchReport::Database { binary, similar } => Self {
                sample: None,
                binary_duplicates: binary
                    .iter()
                    .map(|paths| {
                        paths
                            .iter()
                            .map(|p| p.to_string_lossy().into_owned())
                            .collect()
                    })
                    .collect(),
                similar_groups: similar
                    .iter()
                    .map(|group| JsonGroup {
                        representative: group.representative.to_string_lossy().into_owned(),
                        members: group
                            .members
                            .iter()
                            .map(|(path, distance)| JsonMatch::new(path, *distance))
                            .collect(),
                    })
                    .collect(),
                matches: Vec::new(),
            },
            SearchReport::Sample { sample, matches } => Self {
                sample: Some(sample.to_string_lossy().into_owned()),
                binary_duplicates: Vec::new(),
                similar_groups: Vec::new(),
                matches: matches
                    .iter()
                    .map(|(path, distance)| JsonMatch::new(path, *distance))
                    .collect(),
            },
        }
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (unlikely for valid data).
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write the document followed by a newline.
    ///
    /// # Errors
    ///
    /// [`OutputError`] if serialization or writing fails.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), OutputError> {
        let json = self.to_json_pretty()?;
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}
