//! Per-type method tables.
//!
//! `get(container, "name")` on an indexable value resolves here when the
//! name is not a map key. A hit yields a native value; the receiver
//! reaches it through the `this` channel of a `this_call`.

use core_types::{Handle, NativeCall, NativeEnv, NativeValue, StrValue, Value, ValueMap};

use crate::support::{native, receiver, ret, shared_str};

/// Look up a method for a receiver value. `None` means the type has no
/// method of that name (the `len` attribute is handled before this table).
pub fn method(receiver: &Value, name: &str) -> Option<NativeValue> {
    match receiver {
        Value::List(_) => list_method(name),
        Value::Str(_) => str_method(name),
        Value::Map(_) => map_method(name),
        _ => None,
    }
}

fn list_method(name: &str) -> Option<NativeValue> {
    match name {
        "append" => Some(native(list_append, 1, false)),
        "pop" => Some(native(list_pop, 0, false)),
        "clear" => Some(native(list_clear, 0, false)),
        _ => None,
    }
}

fn str_method(name: &str) -> Option<NativeValue> {
    match name {
        "upper" => Some(native(str_upper, 0, false)),
        "lower" => Some(native(str_lower, 0, false)),
        _ => None,
    }
}

fn map_method(name: &str) -> Option<NativeValue> {
    match name {
        "keys" => Some(native(map_keys, 0, false)),
        "values" => Some(native(map_values, 0, false)),
        "has" => Some(native(map_has, 1, false)),
        _ => None,
    }
}

fn list_append(env: &mut dyn NativeEnv, args: &[Handle]) -> NativeCall {
    let this = match receiver(env, "append") {
        Ok(slot) => slot,
        Err(call) => return call,
    };
    let Some(value) = args.first() else {
        return env.throw("append: missing argument");
    };
    match &mut *this.borrow_mut() {
        Value::List(items) => items.push(value.clone()),
        _ => return env.throw("append: receiver is not a list"),
    }
    ret(env, Value::Null)
}

fn list_pop(env: &mut dyn NativeEnv, _args: &[Handle]) -> NativeCall {
    let this = match receiver(env, "pop") {
        Ok(slot) => slot,
        Err(call) => return call,
    };
    let popped = match &mut *this.borrow_mut() {
        Value::List(items) => items.pop(),
        _ => return env.throw("pop: receiver is not a list"),
    };
    match popped {
        Some(slot) => NativeCall::Value(slot),
        None => env.throw("pop from empty list"),
    }
}

fn list_clear(env: &mut dyn NativeEnv, _args: &[Handle]) -> NativeCall {
    let this = match receiver(env, "clear") {
        Ok(slot) => slot,
        Err(call) => return call,
    };
    match &mut *this.borrow_mut() {
        Value::List(items) => items.clear(),
        _ => return env.throw("clear: receiver is not a list"),
    }
    ret(env, Value::Null)
}

fn str_case(
    env: &mut dyn NativeEnv,
    who: &str,
    apply: fn(&str) -> String,
) -> NativeCall {
    let this = match receiver(env, who) {
        Ok(slot) => slot,
        Err(call) => return call,
    };
    let mapped = match &*this.borrow() {
        Value::Str(s) => apply(&s.bytes),
        _ => return env.throw_fmt(format_args!("{}: receiver is not a str", who)),
    };
    ret(env, Value::Str(StrValue::owned(mapped)))
}

fn str_upper(env: &mut dyn NativeEnv, _args: &[Handle]) -> NativeCall {
    str_case(env, "upper", |s| s.to_uppercase())
}

fn str_lower(env: &mut dyn NativeEnv, _args: &[Handle]) -> NativeCall {
    str_case(env, "lower", |s| s.to_lowercase())
}

fn map_entries(env: &mut dyn NativeEnv, who: &str) -> Result<ValueMap, NativeCall> {
    let this = receiver(env, who)?;
    let map = match &*this.borrow() {
        Value::Map(map) => map.clone(),
        _ => return Err(env.throw_fmt(format_args!("{}: receiver is not a map", who))),
    };
    Ok(map)
}

fn map_keys(env: &mut dyn NativeEnv, _args: &[Handle]) -> NativeCall {
    let map = match map_entries(env, "keys") {
        Ok(map) => map,
        Err(call) => return call,
    };
    let keys = map.entries().iter().map(|(k, _)| k.clone()).collect();
    ret(env, Value::List(keys))
}

fn map_values(env: &mut dyn NativeEnv, _args: &[Handle]) -> NativeCall {
    let map = match map_entries(env, "values") {
        Ok(map) => map,
        Err(call) => return call,
    };
    let values = map.entries().iter().map(|(_, v)| v.clone()).collect();
    ret(env, Value::List(values))
}

fn map_has(env: &mut dyn NativeEnv, args: &[Handle]) -> NativeCall {
    let map = match map_entries(env, "has") {
        Ok(map) => map,
        Err(call) => return call,
    };
    let Some(key) = args.first() else {
        return env.throw("has: missing argument");
    };
    let present = map.contains_key(&key.borrow());
    ret(env, Value::Bool(present))
}
