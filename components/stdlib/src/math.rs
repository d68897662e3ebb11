//! The `std.math` package.

use core_types::{FatalSignal, Handle, NativeCall, NativeEnv, NativeFn, Value, ValueMap};

use crate::support::{native, num_arg, ret, shared_str};

/// Package thunk: builds the `std.math` map.
pub fn package(env: &mut dyn NativeEnv, _args: &[Handle]) -> NativeCall {
    match build(env) {
        Ok(slot) => NativeCall::Value(slot),
        Err(fatal) => fatal.into(),
    }
}

fn build(env: &mut dyn NativeEnv) -> Result<Handle, FatalSignal> {
    const FNS: &[(&str, NativeFn, u8, bool)] = &[
        ("abs", abs, 1, false),
        ("floor", floor, 1, false),
        ("ceil", ceil, 1, false),
        ("sqrt", sqrt, 1, false),
        ("pow", pow, 2, false),
        ("min", min, 1, true),
        ("max", max, 1, true),
    ];

    let mut map = ValueMap::new();
    for &(name, func, arity, variadic) in FNS {
        let key = env.alloc(shared_str(name))?;
        let value = env.alloc(Value::Native(native(func, arity, variadic)))?;
        map.insert(key, value);
    }
    let key = env.alloc(shared_str("pi"))?;
    let value = env.alloc(Value::Num(std::f64::consts::PI))?;
    map.insert(key, value);

    env.alloc(Value::Map(map))
}

fn abs(env: &mut dyn NativeEnv, args: &[Handle]) -> NativeCall {
    match num_arg(env, args, 0, "abs") {
        Ok(x) => ret(env, Value::Num(x.abs())),
        Err(call) => call,
    }
}

fn floor(env: &mut dyn NativeEnv, args: &[Handle]) -> NativeCall {
    match num_arg(env, args, 0, "floor") {
        Ok(x) => ret(env, Value::Num(x.floor())),
        Err(call) => call,
    }
}

fn ceil(env: &mut dyn NativeEnv, args: &[Handle]) -> NativeCall {
    match num_arg(env, args, 0, "ceil") {
        Ok(x) => ret(env, Value::Num(x.ceil())),
        Err(call) => call,
    }
}

fn sqrt(env: &mut dyn NativeEnv, args: &[Handle]) -> NativeCall {
    match num_arg(env, args, 0, "sqrt") {
        Ok(x) if x >= 0.0 => ret(env, Value::Num(x.sqrt())),
        Ok(_) => env.throw("sqrt: negative argument"),
        Err(call) => call,
    }
}

fn pow(env: &mut dyn NativeEnv, args: &[Handle]) -> NativeCall {
    let base = match num_arg(env, args, 0, "pow") {
        Ok(x) => x,
        Err(call) => return call,
    };
    match num_arg(env, args, 1, "pow") {
        Ok(exp) => ret(env, Value::Num(base.powf(exp))),
        Err(call) => call,
    }
}

fn fold(
    env: &mut dyn NativeEnv,
    args: &[Handle],
    who: &str,
    pick: fn(f64, f64) -> f64,
) -> NativeCall {
    let mut best = match num_arg(env, args, 0, who) {
        Ok(x) => x,
        Err(call) => return call,
    };
    for at in 1..args.len() {
        match num_arg(env, args, at, who) {
            Ok(x) => best = pick(best, x),
            Err(call) => return call,
        }
    }
    ret(env, Value::Num(best))
}

fn min(env: &mut dyn NativeEnv, args: &[Handle]) -> NativeCall {
    fold(env, args, "min", f64::min)
}

fn max(env: &mut dyn NativeEnv, args: &[Handle]) -> NativeCall {
    fold(env, args, "max", f64::max)
}
