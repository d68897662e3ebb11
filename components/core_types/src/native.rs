//! The host calling convention.
//!
//! Natives are plain function pointers invoked by the dispatch loop with an
//! environment trait and a materialized argument array. A native returns a
//! value, or reports that it already threw through the environment (the
//! handler path was taken inside [`NativeEnv::throw`]), or escalates to a
//! fatal error.

use crate::value::{Handle, Value};

/// A host function entry point.
pub type NativeFn = fn(&mut dyn NativeEnv, &[Handle]) -> NativeCall;

/// Outcome of a native call.
#[derive(Debug, Clone)]
pub enum NativeCall {
    /// Ordinary return value.
    Value(Handle),
    /// The native threw via [`NativeEnv::throw`]; control was already
    /// routed to the frame's handler.
    Thrown,
    /// Unrecoverable error; unwinds every frame.
    Fatal,
}

/// Marker for a fatal condition raised by an environment helper.
#[derive(Debug, Clone, Copy)]
pub struct FatalSignal;

impl From<FatalSignal> for NativeCall {
    fn from(_: FatalSignal) -> Self {
        NativeCall::Fatal
    }
}

/// What the interpreter exposes to a running native.
pub trait NativeEnv {
    /// Throw a runtime error on the calling frame. Routes to the frame's
    /// top handler when one exists, else records a fatal diagnostic.
    /// The returned [`NativeCall`] is what the native should return.
    fn throw(&mut self, message: &str) -> NativeCall;

    /// Formatted variant of [`NativeEnv::throw`].
    fn throw_fmt(&mut self, args: std::fmt::Arguments<'_>) -> NativeCall {
        self.throw(&args.to_string())
    }

    /// The receiver for method calls, when one was bound.
    fn this(&self) -> Option<Handle>;

    /// Allocate a value slot through the VM heap.
    fn alloc(&mut self, value: Value) -> Result<Handle, FatalSignal>;
}
