//! The Tern bytecode interpreter.
//!
//! Executes compiled modules against a managed value heap: the dispatch
//! loop, call frames with ref-indexed evaluation stacks, the error-handler
//! stack, frame caching, and import resolution.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod context;
mod dispatch;
pub mod frame;
pub mod frame_cache;
pub mod handlers;
pub mod import;
pub mod vm;

pub use frame::{BodyRef, Frame, Slots};
pub use frame_cache::FrameCache;
pub use handlers::{ErrorHandlerStack, Handler};
pub use import::{
    BinaryModuleLoader, ImportResolver, ModuleLoader, COMPILED_EXTENSION, SOURCE_EXTENSION,
};
pub use vm::{Vm, VmOptions, MAX_CALL_DEPTH};
