//! The `NativeEnv` implementation handed to running natives.

use core_types::{FatalError, FatalSignal, Handle, NativeCall, NativeEnv, Value};

use crate::frame::Frame;
use crate::vm::Vm;

/// Environment for one native invocation: the VM, the calling frame, and
/// the bound receiver.
pub(crate) struct NativeCtx<'a> {
    pub vm: &'a mut Vm,
    pub frame: &'a mut Frame,
    pub this: Option<Handle>,
    /// Set when an environment helper escalated to fatal; the dispatch
    /// loop picks it up after the native returns.
    pub fatal: Option<FatalError>,
}

impl<'a> NativeCtx<'a> {
    pub fn new(vm: &'a mut Vm, frame: &'a mut Frame, this: Option<Handle>) -> Self {
        Self {
            vm,
            frame,
            this,
            fatal: None,
        }
    }

    /// The fatal error recorded during the call, if any.
    pub fn take_fatal(&mut self) -> Option<FatalError> {
        self.fatal.take()
    }
}

impl NativeEnv for NativeCtx<'_> {
    fn throw(&mut self, message: &str) -> NativeCall {
        match self.vm.throw_in(self.frame, message) {
            Ok(()) => NativeCall::Thrown,
            Err(fatal) => {
                self.fatal = Some(fatal);
                NativeCall::Fatal
            }
        }
    }

    fn this(&self) -> Option<Handle> {
        self.this.clone()
    }

    fn alloc(&mut self, value: Value) -> Result<Handle, FatalSignal> {
        // Keep the singleton invariant: null and bools canonicalize to the
        // heap's instances.
        match value {
            Value::Null => Ok(self.vm.heap.null()),
            Value::Bool(b) => Ok(self.vm.heap.bool_val(b)),
            other => match self.vm.heap.alloc(other) {
                Ok(slot) => Ok(slot),
                Err(e) => {
                    self.fatal = Some(self.vm.fatal_in(self.frame, &e.to_string()));
                    Err(FatalSignal)
                }
            },
        }
    }
}
