//! The operations of a run: hash, cleanup, prune and search.
//!
//! [`ImageDups`] owns the opened database and the perceptual hasher chosen
//! by the configuration. Each operation works on the database in memory
//! and saves it when it changed something; search only reads.
//!
//! # Incremental hashing
//!
//! Hashing walks the given directory one subdirectory at a time. Every image
//! is added to the index, which either finds its content already known or
//! probes it as new content. A perceptual hash is then computed only when
//! the content has none for the configured algorithm, or when the file was
//! modified after the database was created. At the end of each directory
//! the full content hashes are completed, which closes the files probed for
//! that directory.

use std::fs;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::config::{Config, ConfigError, DatabaseLayout};
use crate::output::SearchReport;
use crate::phash::{self, PerceptualError, PerceptualHasher};
use crate::progress::ProgressCallback;
use crate::scheduler::{HashScheduler, HashTask, SchedulerError};
use crate::signal::ShutdownHandler;
use crate::store::{HashStore, ShardedStore, StoreError};
use crate::walker::{self, DirectoryBatch, WalkError};

/// Errors from running an operation.
#[derive(Error, Debug)]
pub enum AppError {
    /// Reading or writing the database failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A hashing batch was aborted.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// The directory to hash cannot be walked.
    #[error(transparent)]
    Walk(#[from] WalkError),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The sample image of a search cannot be hashed.
    #[error("Cannot hash sample {path}: {source}")]
    Sample {
        /// Sample file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: PerceptualError,
    },
}

impl AppError {
    /// Whether the error comes from Ctrl+C.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Scheduler(SchedulerError::Interrupted))
    }

    /// Whether the error is a usage or configuration mistake.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// An opened hash database.
#[derive(Debug)]
pub enum Database {
    /// One file
    Single(HashStore),
    /// One file per directory
    Sharded(ShardedStore),
}

impl Database {
    /// Open the database described by `config`.
    ///
    /// # Errors
    ///
    /// With `must_exist`, a missing or unreadable database.
    pub fn open(config: &Config, must_exist: bool) -> Result<Self, StoreError> {
        match config.layout {
            DatabaseLayout::Single => HashStore::open(&config.dbpath, must_exist).map(Self::Single),
            DatabaseLayout::Sharded => {
                ShardedStore::open(&config.dbpath, must_exist).map(Self::Sharded)
            }
        }
    }
}

/// Counts of a hash operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashSummary {
    /// Directories processed
    pub directories: usize,
    /// Images added to the index
    pub images: usize,
    /// Perceptual hashes computed
    pub computed: usize,
    /// Images that could not be hashed
    pub failed: usize,
}

impl AddAssign for HashSummary {
    fn add_assign(&mut self, other: Self) {
        self.directories += other.directories;
        self.images += other.images;
        self.computed += other.computed;
        self.failed += other.failed;
    }
}

/// Application state for one run.
pub struct ImageDups {
    config: Config,
    database: Database,
    hasher: Arc<dyn PerceptualHasher>,
    shutdown: ShutdownHandler,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl ImageDups {
    /// Open the configured database and resolve the configured algorithm.
    ///
    /// # Errors
    ///
    /// [`AppError::Store`] if `must_exist` and the database cannot be read.
    pub fn open(config: Config, must_exist: bool) -> Result<Self, AppError> {
        let hasher = phash::lookup(config.algorithm.name()).map_err(ConfigError::from)?;
        let database = Database::open(&config, must_exist)?;
        Ok(Self {
            config,
            database,
            hasher,
            shutdown: ShutdownHandler::new(),
            progress: None,
        })
    }

    /// Use another hasher, e.g. a test double.
    #[must_use]
    pub fn with_hasher(mut self, hasher: Arc<dyn PerceptualHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Observe `handler` while hashing.
    #[must_use]
    pub fn with_shutdown(mut self, handler: ShutdownHandler) -> Self {
        self.shutdown = handler;
        self
    }

    /// Report hashing progress to `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// The effective configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The opened database.
    #[must_use]
    pub fn database(&self) -> &Database {
        &self.database
    }

    fn scheduler(&self) -> Result<HashScheduler, SchedulerError> {
        let mut scheduler = HashScheduler::with_default_workers(self.config.task_timeout())?
            .with_shutdown_flag(self.shutdown.get_flag());
        if let Some(progress) = &self.progress {
            scheduler = scheduler.with_progress(Arc::clone(progress));
        }
        Ok(scheduler)
    }

    /// Add or update the hashes of the images under `path`.
    ///
    /// The database is saved even when hashing fails midway, so work done
    /// before an interruption is kept.
    ///
    /// # Errors
    ///
    /// Walking, scheduling and saving errors. The first error wins.
    pub fn hash(
        &mut self,
        path: &Path,
        recursive: bool,
        fast_compare: bool,
    ) -> Result<HashSummary, AppError> {
        let batches = walker::image_batches(path, recursive)?;
        let scheduler = self.scheduler()?;
        let hasher = Arc::clone(&self.hasher);
        let mut summary = HashSummary::default();

        match &mut self.database {
            Database::Single(store) => {
                let updated = batches.iter().try_for_each(|batch| {
                    update_batch(store, batch, fast_compare, &scheduler, &hasher, &mut summary)
                });
                let saved = store.save();
                updated?;
                saved?;
            }
            Database::Sharded(sharded) => {
                let updated = batches.iter().try_for_each(|batch| -> Result<(), AppError> {
                    let mut shard = sharded.open_shard(&batch.dir)?;
                    let result =
                        update_batch(&mut shard, batch, fast_compare, &scheduler, &hasher, &mut summary);
                    let saved = shard.save();
                    result?;
                    Ok(saved?)
                });
                let saved = sharded.save_index();
                updated?;
                saved?;
            }
        }

        log::info!(
            "Hashed {} images in {} directories ({} computed, {} failed)",
            summary.images,
            summary.directories,
            summary.computed,
            summary.failed
        );
        Ok(summary)
    }

    /// Hash again every directory the database already covers.
    ///
    /// The directories are the minimal set returned by
    /// [`DuplicateIndex::list_top_paths`]; those that no longer exist are
    /// skipped.
    ///
    /// # Errors
    ///
    /// See [`hash`](Self::hash). The first failing directory stops the run.
    ///
    /// [`DuplicateIndex::list_top_paths`]: crate::index::DuplicateIndex::list_top_paths
    pub fn rehash_known(
        &mut self,
        recursive: bool,
        fast_compare: bool,
    ) -> Result<HashSummary, AppError> {
        let top_paths = match &self.database {
            Database::Single(store) => store.index().list_top_paths(),
            Database::Sharded(sharded) => sharded.load_all()?.list_top_paths(),
        };

        let mut summary = HashSummary::default();
        for dir in top_paths {
            if !dir.is_dir() {
                log::info!("Skipping vanished directory {}", dir.display());
                continue;
            }
            summary += self.hash(&dir, recursive, fast_compare)?;
        }
        Ok(summary)
    }

    /// Drop references to files that are missing or no longer match.
    ///
    /// Returns the dropped paths.
    ///
    /// # Errors
    ///
    /// Database read or write errors.
    pub fn cleanup(&mut self, fast: bool) -> Result<Vec<PathBuf>, AppError> {
        let dropped = match &mut self.database {
            Database::Single(store) => {
                let dropped = store.index_mut().cleanup(fast);
                store.save()?;
                dropped
            }
            Database::Sharded(sharded) => {
                let mut dropped = Vec::new();
                for (_, mut shard) in sharded.load_shards()? {
                    let removed = shard.index_mut().cleanup(fast);
                    if !removed.is_empty() {
                        shard.save()?;
                    }
                    dropped.extend(removed);
                }
                dropped
            }
        };

        for path in &dropped {
            log::info!("Removing dead file reference {}", path.display());
        }
        Ok(dropped)
    }

    /// Forget content without any remaining reference.
    ///
    /// Returns the number of entries removed.
    ///
    /// # Errors
    ///
    /// Database read or write errors.
    pub fn prune(&mut self) -> Result<usize, AppError> {
        let pruned = match &mut self.database {
            Database::Single(store) => {
                let pruned = store.index_mut().prune();
                store.save()?;
                pruned
            }
            Database::Sharded(sharded) => {
                let mut pruned = 0;
                for (_, mut shard) in sharded.load_shards()? {
                    let removed = shard.index_mut().prune();
                    if removed > 0 {
                        shard.save()?;
                    }
                    pruned += removed;
                }
                let forgotten = sharded.forget_missing();
                if forgotten > 0 {
                    log::debug!("Dropped {} empty shards", forgotten);
                    sharded.save_index()?;
                }
                pruned
            }
        };

        log::info!("Pruned {} hashed files without any file names", pruned);
        Ok(pruned)
    }

    /// Report similar images.
    ///
    /// With `path`, only images under it take part. With `sample`, the
    /// database is compared against that one image instead of itself.
    ///
    /// Search is the last phase of a run: restricting to `path` narrows the
    /// index in memory, and nothing is saved afterwards.
    ///
    /// # Errors
    ///
    /// [`AppError::Sample`] if the sample cannot be hashed; database errors
    /// for the sharded layout.
    pub fn search(
        &mut self,
        path: Option<&Path>,
        sample: Option<&Path>,
    ) -> Result<SearchReport, AppError> {
        let mut merged;
        let index = match &mut self.database {
            Database::Single(store) => store.index_mut(),
            Database::Sharded(sharded) => {
                merged = sharded.load_all()?;
                &mut merged
            }
        };

        if let Some(path) = path {
            let prefix = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            index.filter_by_path(&prefix);
        }

        let threshold = self.config.distance_threshold();

        if let Some(sample) = sample {
            let hash = self
                .hasher
                .compute(sample)
                .map_err(|source| AppError::Sample {
                    path: sample.to_path_buf(),
                    source,
                })?;
            return Ok(SearchReport::Sample {
                sample: sample.to_path_buf(),
                matches: index.query(&hash, threshold),
            });
        }

        let binary = index
            .binary_duplicates()
            .map(|item| item.aliases().iter().cloned().collect())
            .collect();
        let similar = index.find_groups(threshold, self.hasher.algorithm());
        log::debug!("{} similar groups within distance {:.3}", similar.len(), threshold);

        Ok(SearchReport::Database { binary, similar })
    }
}

/// Add one directory's images and hash what is missing or stale.
fn update_batch(
    store: &mut HashStore,
    batch: &DirectoryBatch,
    fast_compare: bool,
    scheduler: &HashScheduler,
    hasher: &Arc<dyn PerceptualHasher>,
    summary: &mut HashSummary,
) -> Result<(), AppError> {
    log::info!("Hashing {}", batch.dir.display());
    let algorithm = hasher.algorithm();
    let mut tasks = Vec::new();

    for path in &batch.files {
        let id = match store.index_mut().add(path, fast_compare) {
            Ok(id) => id,
            Err(e) => {
                log::warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };
        summary.images += 1;

        let cached = store
            .index()
            .get(id)
            .is_some_and(|item| item.perceptual_hash(algorithm).is_some());
        if !cached || store.is_stale(path) {
            tasks.push(HashTask {
                id,
                path: path.clone(),
            });
        }
    }

    let outcome = scheduler.run(hasher, tasks, store.index_mut());
    store.index_mut().finalize_hashes();
    let batch = outcome?;

    summary.directories += 1;
    summary.computed += batch.computed;
    summary.failed += batch.failed;
    Ok(())
}
