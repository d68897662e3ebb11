//! Standard library surface for the Tern VM.
//!
//! Two things live here: the native packages the import resolver registers
//! (`std.math`, `std.io`), and the per-type method tables consulted when a
//! property name is read off a value (`xs.append`, `s.upper`, ...).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod io;
pub mod math;
pub mod methods;

#[cfg(test)]
pub(crate) mod testutil;

use core_types::NativeFn;

pub use methods::method;

/// The packages this crate provides, as `(import name, thunk)` pairs.
///
/// A thunk is an ordinary native invoked with no arguments; its return
/// value is what `import` yields (and what the resolver caches).
pub fn packages() -> &'static [(&'static str, NativeFn)] {
    &[("std.math", math::package), ("std.io", io::package)]
}

pub(crate) mod support {
    //! Shared plumbing for package and method natives.

    use core_types::{Handle, NativeCall, NativeEnv, NativeValue, StrValue, Value};

    /// Wrap a native fn as a value.
    pub fn native(func: core_types::NativeFn, arity: u8, variadic: bool) -> NativeValue {
        NativeValue {
            func,
            arity,
            variadic,
        }
    }

    /// Allocate and return a value, escalating allocation failure.
    pub fn ret(env: &mut dyn NativeEnv, value: Value) -> NativeCall {
        match env.alloc(value) {
            Ok(slot) => NativeCall::Value(slot),
            Err(fatal) => fatal.into(),
        }
    }

    /// Read a numeric argument as f64, throwing on any other tag.
    pub fn num_arg(
        env: &mut dyn NativeEnv,
        args: &[Handle],
        at: usize,
        who: &str,
    ) -> Result<f64, NativeCall> {
        let Some(slot) = args.get(at) else {
            return Err(env.throw_fmt(format_args!("{}: missing argument {}", who, at)));
        };
        let value = slot.borrow().clone();
        match value {
            Value::Int(i) => Ok(i as f64),
            Value::Num(n) => Ok(n),
            other => Err(env.throw_fmt(format_args!(
                "{}: expected int or num, got {}",
                who,
                other.type_name()
            ))),
        }
    }

    /// The receiver of a method call, or a thrown error when absent.
    pub fn receiver(env: &mut dyn NativeEnv, who: &str) -> Result<Handle, NativeCall> {
        env.this()
            .ok_or_else(|| env.throw_fmt(format_args!("{}: missing receiver", who)))
    }

    /// A shared (capacity 0) string value.
    pub fn shared_str(s: &str) -> Value {
        Value::Str(StrValue::shared(s))
    }
}
