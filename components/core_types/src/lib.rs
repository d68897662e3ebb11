//! Core runtime types for the Tern VM.
//!
//! This crate provides the `Value` tagged union and its polymorphic
//! operations (equality, membership, indexing, iteration, casting), the
//! host calling convention, and the diagnostics types the interpreter and
//! CLI report through.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod native;
pub mod source;
pub mod value;

pub use error::{Diagnostic, DiagnosticKind, ErrorReporter, FatalError};
pub use native::{FatalSignal, NativeCall, NativeEnv, NativeFn};
pub use source::{position_of, SourcePosition};
pub use value::{
    cast, contains, eql, eql_handles, handle, index_get, index_set, FuncValue, Handle, IndexGet,
    IterItem, IterState, NativeValue, RangeValue, StrValue, Value, ValueError, ValueMap,
};
