//! Parallel perceptual hashing.
//!
//! [`HashScheduler`] runs one batch of [`HashTask`]s on a bounded rayon pool.
//! Workers only compute; each result travels back over a channel tagged with
//! the identity it belongs to, and the calling thread applies it to the
//! index. The index is therefore never touched from a worker thread.
//!
//! The join waits at most `task_timeout` for the next completion. If nothing
//! completes in that window the batch fails with [`SchedulerError::Timeout`];
//! a raised shutdown flag fails it with [`SchedulerError::Interrupted`].
//! Results applied before either failure stay in the index.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::index::{DuplicateIndex, IdentityId};
use crate::phash::{PerceptualError, PerceptualHash, PerceptualHasher};
use crate::progress::ProgressCallback;

/// Default time to wait for the next completed task.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// Minimum worker count.
const MIN_WORKERS: usize = 4;

/// How often the join wakes up to look at the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Phase name reported to the progress callback.
pub const PHASE_HASHING: &str = "hashing";

/// Errors that abort a hashing batch.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The worker pool could not be created.
    #[error("Failed to build hashing thread pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    /// No task completed within the timeout.
    #[error("No hash task completed within {0:?}")]
    Timeout(Duration),

    /// The shutdown flag was raised during the join.
    #[error("Hashing interrupted")]
    Interrupted,
}

/// One image to hash and the identity that receives the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashTask {
    /// Identity the hash belongs to
    pub id: IdentityId,
    /// File to read
    pub path: PathBuf,
}

/// Counts of a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Hashes computed and stored
    pub computed: usize,
    /// Files that could not be hashed
    pub failed: usize,
}

struct HashOutcome {
    id: IdentityId,
    path: PathBuf,
    result: Result<PerceptualHash, PerceptualError>,
}

/// Bounded pool running perceptual hash batches.
pub struct HashScheduler {
    pool: rayon::ThreadPool,
    task_timeout: Duration,
    shutdown_flag: Option<Arc<AtomicBool>>,
    progress: Option<Arc<dyn ProgressCallback>>,
}

impl HashScheduler {
    /// Worker count used by [`with_default_workers`](Self::with_default_workers):
    /// available parallelism, but at least four.
    #[must_use]
    pub fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map_or(MIN_WORKERS, |n| n.get())
            .max(MIN_WORKERS)
    }

    /// Create a scheduler with `workers` threads.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Pool`] if the threads cannot be spawned.
    pub fn new(workers: usize, task_timeout: Duration) -> Result<Self, SchedulerError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("imagedups-hash-{i}"))
            .build()?;
        Ok(Self {
            pool,
            task_timeout,
            shutdown_flag: None,
            progress: None,
        })
    }

    /// Create a scheduler sized by [`default_workers`](Self::default_workers).
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_default_workers(task_timeout: Duration) -> Result<Self, SchedulerError> {
        Self::new(Self::default_workers(), task_timeout)
    }

    /// Observe `flag` during the join.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Report progress to `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Number of worker threads.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Hash every task with `hasher` and store the results in `index`.
    ///
    /// An identity listed more than once is hashed once. A file that fails
    /// to hash is logged and counted; its identity keeps no hash for the
    /// algorithm.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Timeout`] or [`SchedulerError::Interrupted`]; tasks
    /// still running are abandoned and their results discarded.
    pub fn run(
        &self,
        hasher: &Arc<dyn PerceptualHasher>,
        tasks: Vec<HashTask>,
        index: &mut DuplicateIndex,
    ) -> Result<BatchSummary, SchedulerError> {
        let mut scheduled = HashSet::with_capacity(tasks.len());
        let (tx, rx) = mpsc::channel::<HashOutcome>();

        for task in tasks {
            if !scheduled.insert(task.id) {
                log::debug!("{} already scheduled", task.path.display());
                continue;
            }
            let tx = tx.clone();
            let hasher = Arc::clone(hasher);
            self.pool.spawn(move || {
                let result = hasher.compute(&task.path);
                let _ = tx.send(HashOutcome {
                    id: task.id,
                    path: task.path,
                    result,
                });
            });
        }
        drop(tx);

        let total = scheduled.len();
        if let Some(progress) = &self.progress {
            progress.on_phase_start(PHASE_HASHING, total);
        }

        let joined = self.join(&rx, total, index);

        if let Some(progress) = &self.progress {
            progress.on_phase_end(PHASE_HASHING);
        }
        joined
    }

    fn join(
        &self,
        rx: &mpsc::Receiver<HashOutcome>,
        total: usize,
        index: &mut DuplicateIndex,
    ) -> Result<BatchSummary, SchedulerError> {
        let mut summary = BatchSummary::default();
        let mut last_completion = Instant::now();
        let mut done = 0;

        while done < total {
            if self.is_shutdown_requested() {
                log::warn!("Hashing interrupted after {} of {} files", done, total);
                return Err(SchedulerError::Interrupted);
            }

            let outcome = match rx.recv_timeout(POLL_INTERVAL) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => {
                    if last_completion.elapsed() >= self.task_timeout {
                        return Err(SchedulerError::Timeout(self.task_timeout));
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    log::warn!("{} hash tasks ended without a result", total - done);
                    break;
                }
            };

            done += 1;
            last_completion = Instant::now();

            match outcome.result {
                Ok(hash) => match index.get_mut(outcome.id) {
                    Some(item) => {
                        item.set_perceptual_hash(hash);
                        summary.computed += 1;
                    }
                    None => log::warn!("No identity for {}", outcome.path.display()),
                },
                Err(e) => {
                    log::warn!("Skipping {}: {}", outcome.path.display(), e);
                    summary.failed += 1;
                }
            }

            if let Some(progress) = &self.progress {
                progress.on_progress(done, &outcome.path.to_string_lossy());
            }
        }

        Ok(summary)
    }
}
