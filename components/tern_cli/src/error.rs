//! Error types for the CLI.

use core_types::FatalError;
use std::fmt;

/// CLI-level failures.
#[derive(Debug)]
pub enum CliError {
    /// The module could not be loaded or deserialized.
    LoadError(String),
    /// Execution ended with a fatal runtime error.
    Fatal(FatalError),
    /// File I/O error outside module loading.
    IoError(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoadError(msg) => write!(f, "load error: {}", msg),
            CliError::Fatal(e) => write!(f, "fatal error: {}", e),
            CliError::IoError(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::IoError(e) => Some(e),
            CliError::Fatal(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FatalError> for CliError {
    fn from(err: FatalError) -> Self {
        CliError::Fatal(err)
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::IoError(err)
    }
}

/// Result alias for CLI operations.
pub type CliResult<T> = Result<T, CliError>;
