//! imagedups - exact and near-duplicate image finder.
//!
//! Images are identified by content (SHA-256 of a 512-byte prefix, then of
//! the whole file) and compared by perceptual hash. Both are kept in a
//! gzip-compressed JSON database so later runs only hash what changed.
//!
//! The library is split along the pipeline:
//!
//! - [`identity`]: content identity of a file and its aliases
//! - [`index`]: the duplicate index and similarity searches
//! - [`phash`]: perceptual hash algorithms and providers
//! - [`store`]: database files, single or sharded per directory
//! - [`scheduler`]: parallel perceptual hashing
//! - [`walker`]: image discovery per directory
//! - [`app`]: the hash, cleanup, prune and search operations
//!
//! [`run_app`] ties them to the command line.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod index;
pub mod logging;
pub mod output;
pub mod phash;
pub mod progress;
pub mod scheduler;
pub mod signal;
pub mod store;
pub mod walker;

use std::io::{self, IsTerminal, Write};
use std::sync::Arc;

use anyhow::Context;

use app::{AppError, ImageDups};
use cli::{Cli, OutputFormat, Phase};
use config::{Config, ConfigError};
use error::ExitCode;
use output::{JsonOutput, TextOutput};
use progress::{Progress, ProgressCallback};

/// Run the phases selected on the command line.
///
/// # Errors
///
/// The first failing phase, with context. Use [`exit_code_for`] to map it
/// to a process exit code.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let mut config = Config::load().context("Failed to load configuration")?;
    cli.apply_to(&mut config);
    config.validate()?;

    let shutdown = signal::install_handler()?;
    let progress: Arc<dyn ProgressCallback> = Arc::new(Progress::new(cli.quiet));
    let mut app = ImageDups::open(config, cli.requires_database())
        .context("Failed to open hash database")?
        .with_shutdown(shutdown)
        .with_progress(progress);

    for phase in cli.phases() {
        match phase {
            Phase::Hash => match cli.path.as_deref() {
                Some(path) => {
                    app.hash(path, cli.recursive, cli.fast)
                        .with_context(|| format!("Failed to hash {}", path.display()))?;
                }
                None => {
                    app.rehash_known(cli.recursive, cli.fast)
                        .context("Failed to update known directories")?;
                }
            },
            Phase::Cleanup => {
                app.cleanup(true).context("Cleanup failed")?;
            }
            Phase::Prune => {
                app.prune().context("Prune failed")?;
            }
            Phase::Search => {
                let report = app
                    .search(cli.path.as_deref(), cli.samplefile.as_deref())
                    .context("Search failed")?;
                let stdout = io::stdout();
                let mut out = stdout.lock();
                match cli.output {
                    OutputFormat::Text => {
                        let color = !cli.no_color && stdout.is_terminal();
                        TextOutput::new(&report, color).write_to(&mut out)?;
                    }
                    OutputFormat::Json => JsonOutput::new(&report).write_to(&mut out)?,
                }
                out.flush()?;
            }
        }
    }

    Ok(ExitCode::Success)
}

/// Exit code for an error returned by [`run_app`].
#[must_use]
pub fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    if let Some(app_err) = err.downcast_ref::<AppError>() {
        if app_err.is_interrupted() {
            return ExitCode::Interrupted;
        }
        if app_err.is_config() {
            return ExitCode::ConfigError;
        }
    }
    if err.downcast_ref::<ConfigError>().is_some() {
        return ExitCode::ConfigError;
    }
    ExitCode::GeneralError
}
