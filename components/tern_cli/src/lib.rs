//! Tern CLI library.
//!
//! Provides the argument surface, the runtime driver, and the error types
//! behind the `tern` binary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod error;
pub mod runtime;

pub use cli::Cli;
pub use error::{CliError, CliResult};
pub use runtime::Runtime;
