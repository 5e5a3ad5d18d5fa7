//! Command-line interface definitions.
//!
//! The tool has no subcommands: phase flags select what runs, always in the
//! fixed order hash, cleanup, prune, search. Without any phase flag, hash,
//! cleanup and search run.
//!
//! ```bash
//! # Hash a photo tree and report duplicates in it
//! imagedups -r ~/Pictures
//!
//! # Only add hashes to the database
//! imagedups --hash -r ~/Pictures
//!
//! # Images similar to one sample, at least 95% alike
//! imagedups --search -f sample.jpg -t 95
//!
//! # Drop references to deleted files and forget their content
//! imagedups --cleanup --prune
//! ```

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::{Config, DatabaseLayout};
use crate::phash::Algorithm;

const LONG_ABOUT: &str = "\
Finds exact and near-duplicate images.

Image hashes are kept in a database, so repeated runs only hash new or
modified files. Use --hash to add a directory (-r for subdirectories) and
--search to report groups of similar images. --cleanup removes references
to files that were deleted or changed; --prune then forgets content that is
no longer referenced anywhere.

Phases always run in the order hash, cleanup, prune, search. Without any
phase flag, hash, cleanup and search run. Hashing without PATH updates the
directories already in the database.";

/// Find exact and near-duplicate images with a persistent hash database.
#[derive(Debug, Parser)]
#[command(name = "imagedups")]
#[command(author, version, about, long_about = LONG_ABOUT)]
pub struct Cli {
    /// Directory to hash (default: those already in the database); also
    /// restricts the search to images under it
    #[arg(value_name = "PATH")]
    pub path: Option<PathBuf>,

    /// Add or update image hashes for PATH
    #[arg(long)]
    pub hash: bool,

    /// Remove references to deleted or modified files
    #[arg(long)]
    pub cleanup: bool,

    /// Remove content no longer referenced by any file
    #[arg(long)]
    pub prune: bool,

    /// Report similar images
    #[arg(long)]
    pub search: bool,

    /// Perceptual hash algorithm (dct, mh, radial)
    #[arg(short, long, value_name = "NAME")]
    pub algorithm: Option<Algorithm>,

    /// Minimum similarity in percent (default: 90)
    #[arg(short, long, value_name = "PERCENT", value_parser = parse_threshold)]
    pub threshold: Option<f64>,

    /// Search for images similar to this file instead of whole groups
    #[arg(short = 'f', long, value_name = "FILE")]
    pub samplefile: Option<PathBuf>,

    /// Hash subdirectories too
    #[arg(short, long)]
    pub recursive: bool,

    /// Treat files with equal size and first 512 bytes as identical when hashing
    #[arg(long)]
    pub fast: bool,

    /// Hash database file (directory with --sharded)
    #[arg(long, value_name = "PATH")]
    pub dbpath: Option<PathBuf>,

    /// Keep one database file per hashed directory
    #[arg(long)]
    pub sharded: bool,

    /// Output format for search results
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors and results
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, env = "NO_COLOR")]
    pub no_color: bool,

    /// Report errors as JSON on stderr
    #[arg(long)]
    pub json_errors: bool,
}

/// Output format for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human readable report
    #[default]
    Text,
    /// JSON document on stdout
    Json,
}

/// A step of a run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    /// Add or update hashes
    Hash,
    /// Drop dead references
    Cleanup,
    /// Drop unreferenced content
    Prune,
    /// Report similar images
    Search,
}

impl Cli {
    /// Phases to run, in their fixed order.
    ///
    /// Without a phase flag: hash, cleanup and search.
    #[must_use]
    pub fn phases(&self) -> Vec<Phase> {
        if !self.any_phase_flag() {
            return vec![Phase::Hash, Phase::Cleanup, Phase::Search];
        }
        [
            (self.hash, Phase::Hash),
            (self.cleanup, Phase::Cleanup),
            (self.prune, Phase::Prune),
            (self.search, Phase::Search),
        ]
        .into_iter()
        .filter_map(|(on, phase)| on.then_some(phase))
        .collect()
    }

    fn any_phase_flag(&self) -> bool {
        self.hash || self.cleanup || self.prune || self.search
    }

    /// Whether the database has to exist already.
    ///
    /// Only explicitly requested phases without `--hash` need one; a bare
    /// run starts from an empty database.
    #[must_use]
    pub fn requires_database(&self) -> bool {
        self.any_phase_flag() && !self.hash
    }

    /// Override configuration values with the flags given.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(algorithm) = self.algorithm {
            config.algorithm = algorithm;
        }
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(dbpath) = &self.dbpath {
            config.dbpath.clone_from(dbpath);
        }
        if self.sharded {
            config.layout = DatabaseLayout::Sharded;
        }
    }
}

/// Parse a similarity percentage in 0..=100.
///
/// # Errors
///
/// Returns a message for non-numbers and values out of range.
pub fn parse_threshold(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .trim()
        .trim_end_matches('%')
        .parse()
        .map_err(|_| format!("'{s}' is not a number"))?;
    if !(0.0..=100.0).contains(&value) {
        return Err(format!("threshold must be between 0 and 100, got {value}"));
    }
    Ok(value)
}
