//! The `std.io` package.

use core_types::{FatalSignal, Handle, NativeCall, NativeEnv, NativeFn, Value, ValueMap};

use crate::support::{native, ret, shared_str};

/// Package thunk: builds the `std.io` map.
pub fn package(env: &mut dyn NativeEnv, _args: &[Handle]) -> NativeCall {
    match build(env) {
        Ok(slot) => NativeCall::Value(slot),
        Err(fatal) => fatal.into(),
    }
}

fn build(env: &mut dyn NativeEnv) -> Result<Handle, FatalSignal> {
    const FNS: &[(&str, NativeFn, u8, bool)] =
        &[("print", print, 1, true), ("println", println, 1, true)];

    let mut map = ValueMap::new();
    for &(name, func, arity, variadic) in FNS {
        let key = env.alloc(shared_str(name))?;
        let value = env.alloc(Value::Native(native(func, arity, variadic)))?;
        map.insert(key, value);
    }
    env.alloc(Value::Map(map))
}

fn render(args: &[Handle]) -> String {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&arg.borrow().to_string());
    }
    out
}

fn print(env: &mut dyn NativeEnv, args: &[Handle]) -> NativeCall {
    print!("{}", render(args));
    ret(env, Value::Null)
}

fn println(env: &mut dyn NativeEnv, args: &[Handle]) -> NativeCall {
    println!("{}", render(args));
    ret(env, Value::Null)
}
