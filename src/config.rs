//! Layered configuration.
//!
//! Settings are merged with figment, later layers winning:
//!
//! 1. built-in defaults ([`Config::default`])
//! 2. `config.toml` in the platform config directory
//!    (`~/.config/imagedups/config.toml` on Linux)
//! 3. `IMAGEDUPS_*` environment variables (`IMAGEDUPS_THRESHOLD=95`)
//! 4. command-line flags (applied by [`crate::cli::Cli::apply_to`])
//!
//! When no config file exists yet, a commented one with the defaults is
//! written so users have something to edit.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::phash::{Algorithm, UnknownAlgorithm};

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "IMAGEDUPS_";

const CONFIG_HEADER: &str = "\
# imagedups configuration
#
# algorithm:          perceptual hash used for searching (dct, mh, radial)
# threshold:          minimum similarity in percent for two images to match
# dbpath:             hash database file (directory when layout = \"sharded\")
# layout:             \"single\" database file or \"sharded\" per directory
# task_timeout_secs:  give up when no image finishes hashing for this long

";

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A layer could not be parsed or merged.
    #[error("Invalid configuration: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// The requested algorithm is not registered.
    #[error(transparent)]
    UnknownAlgorithm(#[from] UnknownAlgorithm),

    /// Threshold outside 0..=100.
    #[error("Threshold must be between 0 and 100, got {0}")]
    InvalidThreshold(f64),

    /// The default config file could not be written.
    #[error("Cannot write config file {path}: {source}")]
    Io {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// The defaults could not be rendered as TOML.
    #[error("Cannot render default config: {0}")]
    Render(#[from] toml::ser::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Figment(Box::new(e))
    }
}

/// How the hash database is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseLayout {
    /// One gzip file holding every record
    #[default]
    Single,
    /// A directory with one file per hashed directory
    Sharded,
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Perceptual hash algorithm.
    pub algorithm: Algorithm,
    /// Minimum similarity in percent.
    pub threshold: f64,
    /// Database file, or directory for the sharded layout.
    pub dbpath: PathBuf,
    /// Database layout.
    pub layout: DatabaseLayout,
    /// Seconds to wait for the next hash result.
    pub task_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            threshold: 90.0,
            dbpath: default_dbpath(),
            layout: DatabaseLayout::default(),
            task_timeout_secs: 60,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "imagedups")
}

fn default_dbpath() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from(".imagedups.json.gz"),
        |dirs| dirs.cache_dir().join("hashdb.json.gz"),
    )
}

impl Config {
    /// Platform-specific config file path.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Defaults merged with `file` (if given) and the environment.
    #[must_use]
    pub fn figment(file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load from the platform config file and the environment.
    ///
    /// Writes the default config file first if there is none; failing to do
    /// so is only logged.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] if a layer is malformed or the result is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();
        if let Some(path) = path.as_deref().filter(|p| !p.exists()) {
            match Self::write_defaults(path) {
                Ok(()) => log::info!("Wrote default configuration to {}", path.display()),
                Err(e) => log::debug!("{}", e),
            }
        }
        Self::load_from(path.as_deref())
    }

    /// Load from an explicit config file (or none) and the environment.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_from(file: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Config = Self::figment(file).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Write a commented file holding the defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file or its directory cannot be created.
    pub fn write_defaults(path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let body = toml::to_string_pretty(&Config::default())?;
        fs::write(path, format!("{CONFIG_HEADER}{body}")).map_err(io_err)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidThreshold`] outside 0..=100.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.threshold) {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        Ok(())
    }

    /// Maximum hash distance accepted as similar: `1 - threshold / 100`.
    #[must_use]
    pub fn distance_threshold(&self) -> f64 {
        1.0 - self.threshold / 100.0
    }

    /// Hash task timeout.
    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}
