//! Progress reporting using indicatif.
//!
//! The hash operation reports one phase per directory batch: the perceptual
//! hashing of the files whose hash was missing or stale. [`Progress`] draws a
//! bar for it; [`ProgressCallback`] lets tests and library users observe the
//! same events without a terminal.

use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Receiver of progress events.
pub trait ProgressCallback: Send + Sync {
    /// A phase with `total` items starts.
    fn on_phase_start(&self, phase: &str, total: usize);

    /// `current` items of the running phase are done; `path` was the last.
    fn on_progress(&self, current: usize, path: &str);

    /// The running phase is over.
    fn on_phase_end(&self, phase: &str);

    /// Free-form status line.
    fn on_message(&self, _message: &str) {}
}

/// Terminal progress bar.
pub struct Progress {
    bar: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl Progress {
    /// Create a reporter; with `quiet` nothing is drawn.
    ///
    /// ```
    /// use imagedups::progress::Progress;
    ///
    /// let progress = Progress::new(false);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            bar: Mutex::new(None),
            quiet,
        }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(bar) = guard.as_ref() {
                f(bar);
            }
        }
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }
        let bar = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr());
        bar.set_style(Self::style());
        bar.set_message(phase.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(previous) = guard.replace(bar) {
                previous.finish_and_clear();
            }
        }
    }

    fn on_progress(&self, current: usize, path: &str) {
        self.with_bar(|bar| {
            bar.set_position(current as u64);
            bar.set_message(truncate_path(path, 30));
        });
    }

    fn on_phase_end(&self, _phase: &str) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(bar) = guard.take() {
                bar.finish_and_clear();
            }
        }
    }

    fn on_message(&self, message: &str) {
        self.with_bar(|bar| bar.println(message));
    }
}

/// Shorten a path to its file name when it is longer than `max_len`.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }

    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let count = file_name.chars().count();
    if count >= max_len {
        let tail: String = file_name.chars().skip(count + 3 - max_len).collect();
        return format!("...{tail}");
    }

    format!(".../{file_name}")
}
