//! Heap management for the Tern VM.
//!
//! Supplies value slots to the interpreter under a configurable page
//! budget. See [`heap::Heap`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod heap;

pub use heap::{GcStats, Heap, HeapError, DEFAULT_PAGE_LIMIT, PAGE_BYTES};
