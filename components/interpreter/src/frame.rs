//! The dynamic activation record of one call.
//!
//! A frame owns a ref-indexed evaluation stack (grown lazily, holes filled
//! with the uninitialized sentinel), the handler stack, the captures and
//! `this` binding of the running function, and its position in the body.
//! The caller chain is the native Rust call stack: calls re-enter the
//! dispatch loop recursively.

use std::cell::RefCell;
use std::rc::Rc;

use bytecode_system::{index_to_ref, Module, Op, OpData, Ref};
use core_types::Handle;

use crate::handlers::ErrorHandlerStack;

/// Shared evaluation-stack storage. Function frames hold their own; the
/// module frame's storage doubles as the global slot vector every frame in
/// the module can read through `load_global`.
pub type Slots = Rc<RefCell<Vec<Handle>>>;

/// Where a frame's instruction words live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyRef {
    /// The module's top-level body.
    Main,
    /// A function body slice in the module's `extra` pool.
    Extra {
        /// Start index into `extra`.
        index: u32,
        /// Length in words.
        len: u32,
    },
}

/// One call's activation record.
pub struct Frame {
    /// The module the body belongs to.
    pub module: Rc<Module>,
    /// The body being executed.
    pub body: BodyRef,
    /// Ref-indexed evaluation stack.
    pub slots: Slots,
    /// Installed error handlers.
    pub handlers: ErrorHandlerStack,
    /// Captured slots of the running closure.
    pub captures: Vec<Handle>,
    /// Receiver binding for method calls.
    pub this: Option<Handle>,
    /// Parameter count; result refs start after it.
    pub params: u16,
    /// The module frame's slot storage (its own, for the module frame).
    pub globals: Slots,
    /// Next body index to execute.
    pub ip: usize,
    /// Code index of the word currently executing, for diagnostics.
    pub code_index: usize,
}

impl Frame {
    /// Fetch the next instruction: its op, data, and destination ref.
    /// Returns `None` at the end of the body.
    pub fn fetch(&mut self) -> Option<(Op, OpData, Ref)> {
        let at = self.ip;
        let word = match self.body {
            BodyRef::Main => self.module.main.get(at).copied(),
            BodyRef::Extra { index, len } => {
                if at < len as usize {
                    self.module.extra.get(index as usize + at).copied()
                } else {
                    None
                }
            }
        }?;
        let idx = word as usize;
        let op = self.module.code.ops.get(idx).copied()?;
        let data = self.module.code.data.get(idx).copied()?;
        self.code_index = idx;
        self.ip = at + 1;
        Some((op, data, index_to_ref(at, self.params)))
    }

    /// Read a slot. `None` when the ref was never materialized.
    pub fn val(&self, r: Ref) -> Option<Handle> {
        self.slots.borrow().get(r.index()).cloned()
    }

    /// Write a slot, growing the stack and filling holes with the
    /// uninitialized sentinel.
    pub fn put(&self, r: Ref, value: Handle, uninit: &Handle) {
        let mut slots = self.slots.borrow_mut();
        if slots.len() <= r.index() {
            slots.resize_with(r.index() + 1, || uninit.clone());
        }
        slots[r.index()] = value;
    }

    /// Current evaluation-stack height.
    pub fn height(&self) -> usize {
        self.slots.borrow().len()
    }
}
