//! Exit codes and structured error output.

use serde::Serialize;

/// Process exit codes.
///
/// - 0: Success
/// - 1: General error (database, I/O, hashing)
/// - 2: Configuration error (bad config file, unknown algorithm, missing path)
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Every requested phase completed.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// The run was misconfigured.
    ConfigError = 2,
    /// Hashing was interrupted by Ctrl+C.
    Interrupted = 130,
}

impl ExitCode {
    /// Numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "ID000",
            Self::GeneralError => "ID001",
            Self::ConfigError => "ID002",
            Self::Interrupted => "ID130",
        }
    }
}

/// Error report printed with `--json-errors`.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// Error code (e.g., "ID001")
    pub code: String,
    /// Exit code number
    pub exit_code: i32,
    /// Human-readable message including its causes
    pub message: String,
    /// Whether the run was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Build from an error chain and the exit code it maps to.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
