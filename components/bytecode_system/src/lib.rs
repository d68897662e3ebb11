//! Compiled module representation for the Tern VM.
//!
//! This crate owns everything the interpreter consumes from the compiler:
//! the opcode set, the operand encodings, the immutable [`Module`] record
//! (instruction words, op/data parallel arrays, `extra` pool, string pool,
//! debug info), the [`ModuleBuilder`] used by tests and tooling, the
//! `.tbc` binary codec, and a disassembler.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod binary;
pub mod disasm;
pub mod module;
pub mod opcode;

pub use disasm::disassemble;
pub use module::{Code, DebugInfo, FuncLayout, Module, ModuleBuilder};
pub use opcode::{index_to_ref, Op, OpData, Primitive, Ref, TypeTag};
