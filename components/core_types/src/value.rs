//! Runtime value representation.
//!
//! `Value` is the tagged union every opcode operates on. Slots are
//! [`Handle`]s (`Rc<RefCell<Value>>`): aggregates hold handles to their
//! elements, closures hold handles to their captures, and mutation through
//! one alias is visible through all of them. The canonical `null`, `true`
//! and `false` handles live on the heap and compare by pointer identity.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bytecode_system::{Module, TypeTag};

use crate::native::NativeFn;

/// A shared, mutable value slot.
pub type Handle = Rc<RefCell<Value>>;

/// Wrap a value in a fresh handle.
///
/// The interpreter allocates slots through the heap so the page budget sees
/// them; this is the raw constructor the heap itself (and interior values
/// like materialized range elements) are built from.
pub fn handle(value: Value) -> Handle {
    Rc::new(RefCell::new(value))
}

/// String payload. `capacity == 0` marks a borrowed/shared string (a pool
/// literal); such values are fair game for in-place reuse by arithmetic
/// slots and are cloned rather than aliased into aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct StrValue {
    /// The bytes.
    pub bytes: String,
    /// Reuse marker; 0 for borrowed/shared strings.
    pub capacity: usize,
}

impl StrValue {
    /// A borrowed/shared string (capacity 0).
    pub fn shared(s: &str) -> Self {
        Self {
            bytes: s.to_string(),
            capacity: 0,
        }
    }

    /// An owned string with its own storage.
    pub fn owned(bytes: String) -> Self {
        let capacity = bytes.capacity().max(1);
        Self { bytes, capacity }
    }
}

/// A half-open integer range with a non-zero step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    /// First element.
    pub start: i64,
    /// Exclusive end bound.
    pub end: i64,
    /// Step; never zero.
    pub step: i64,
}

impl RangeValue {
    /// Construct a range; a zero step is rejected.
    pub fn new(start: i64, end: i64, step: i64) -> Result<Self, ValueError> {
        if step == 0 {
            return Err(ValueError::new("range step cannot be zero"));
        }
        Ok(Self { start, end, step })
    }

    /// Number of elements the range yields.
    pub fn count(&self) -> i64 {
        if self.step > 0 {
            if self.end <= self.start {
                0
            } else {
                (self.end - self.start + self.step - 1) / self.step
            }
        } else if self.start <= self.end {
            0
        } else {
            (self.start - self.end + (-self.step) - 1) / (-self.step)
        }
    }

    /// Whether `v` is one of the range's elements.
    pub fn contains(&self, v: i64) -> bool {
        let in_bounds = if self.step > 0 {
            v >= self.start && v < self.end
        } else {
            v <= self.start && v > self.end
        };
        in_bounds && (v - self.start) % self.step == 0
    }
}

/// A user function: a body slice into its module's `extra` pool plus the
/// captured slots.
#[derive(Clone)]
pub struct FuncValue {
    /// The module the body lives in.
    pub module: Rc<Module>,
    /// Start of the body slice in the module's `extra` pool.
    pub body_index: u32,
    /// Body length in instruction words.
    pub body_len: u32,
    /// Declared parameter count (a variadic tail counts as one).
    pub arity: u8,
    /// Whether surplus arguments pack into a trailing list.
    pub variadic: bool,
    /// Captured slots, shared with the defining frame.
    pub captures: Vec<Handle>,
}

impl fmt::Debug for FuncValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncValue")
            .field("body_index", &self.body_index)
            .field("body_len", &self.body_len)
            .field("arity", &self.arity)
            .field("variadic", &self.variadic)
            .field("captures", &self.captures.len())
            .finish()
    }
}

/// A host function and its calling shape.
#[derive(Clone, Copy)]
pub struct NativeValue {
    /// The host entry point.
    pub func: NativeFn,
    /// Declared parameter count.
    pub arity: u8,
    /// Whether the native accepts surplus arguments.
    pub variadic: bool,
}

impl fmt::Debug for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeValue")
            .field("arity", &self.arity)
            .field("variadic", &self.variadic)
            .finish()
    }
}

impl PartialEq for NativeValue {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.func as *const (), other.func as *const ())
            && self.arity == other.arity
            && self.variadic == other.variadic
    }
}

/// Insertion-ordered map keyed by structural equality.
///
/// Cross-tag numeric equality (`1 == 1.0`) rules out `Hash`-based storage;
/// lookup is a linear `eql` scan over the pair vector.
#[derive(Debug, Clone, Default)]
pub struct ValueMap {
    entries: Vec<(Handle, Handle)>,
}

impl ValueMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the value bound to a key.
    pub fn get(&self, key: &Value) -> Option<Handle> {
        self.entries
            .iter()
            .find(|(k, _)| eql(&k.borrow(), key))
            .map(|(_, v)| v.clone())
    }

    /// Whether a key is present.
    pub fn contains_key(&self, key: &Value) -> bool {
        self.entries.iter().any(|(k, _)| eql(&k.borrow(), key))
    }

    /// Bind `key` to `value`. Replacing an existing key keeps its
    /// insertion position.
    pub fn insert(&mut self, key: Handle, value: Handle) {
        let probe = key.borrow().clone();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| eql(&k.borrow(), &probe)) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// The entries in insertion order.
    pub fn entries(&self) -> &[(Handle, Handle)] {
        &self.entries
    }
}

/// Per-container iteration cursor, produced by `iter_init`.
#[derive(Debug, Clone)]
pub enum IterState {
    /// Over a range's elements.
    Range {
        /// Next value to yield.
        next: i64,
        /// Exclusive end bound.
        end: i64,
        /// Step; never zero.
        step: i64,
    },
    /// Over a string's codepoints, snapshotted at `iter_init`.
    Str {
        /// The snapshot.
        bytes: String,
        /// Byte position of the next codepoint.
        pos: usize,
    },
    /// Over a tuple's or list's elements, read live through the container.
    Seq {
        /// The container handle.
        container: Handle,
        /// Next element index.
        pos: usize,
    },
    /// Over a map's entries, yielding key/value tuples.
    Map {
        /// The map handle.
        container: Handle,
        /// Next entry index.
        pos: usize,
    },
}

/// One step of iteration: either an existing slot or a value the caller
/// still has to allocate.
#[derive(Debug, Clone)]
pub enum IterItem {
    /// An element handle shared with the container.
    Slot(Handle),
    /// A freshly computed value.
    Fresh(Value),
}

impl IterState {
    /// Build iteration state for a value; containers that cannot be
    /// iterated are rejected.
    pub fn over(v: &Value, container: &Handle) -> Result<IterState, ValueError> {
        match v {
            Value::Range(r) => Ok(IterState::Range {
                next: r.start,
                end: r.end,
                step: r.step,
            }),
            Value::Str(s) => Ok(IterState::Str {
                bytes: s.bytes.clone(),
                pos: 0,
            }),
            Value::Tuple(_) | Value::List(_) => Ok(IterState::Seq {
                container: container.clone(),
                pos: 0,
            }),
            Value::Map(_) => Ok(IterState::Map {
                container: container.clone(),
                pos: 0,
            }),
            other => Err(ValueError::new(format!(
                "cannot iterate {}",
                other.type_name()
            ))),
        }
    }

    /// Advance the cursor.
    pub fn next(&mut self) -> Option<IterItem> {
        match self {
            IterState::Range { next, end, step } => {
                let live = if *step > 0 { *next < *end } else { *next > *end };
                if !live {
                    return None;
                }
                let v = *next;
                *next += *step;
                Some(IterItem::Fresh(Value::Int(v)))
            }
            IterState::Str { bytes, pos } => {
                let rest = &bytes[*pos..];
                let ch = rest.chars().next()?;
                *pos += ch.len_utf8();
                Some(IterItem::Fresh(Value::Str(StrValue::shared(
                    ch.encode_utf8(&mut [0u8; 4]),
                ))))
            }
            IterState::Seq { container, pos } => {
                let item = match &*container.borrow() {
                    Value::Tuple(items) | Value::List(items) => items.get(*pos).cloned(),
                    _ => None,
                }?;
                *pos += 1;
                Some(IterItem::Slot(item))
            }
            IterState::Map { container, pos } => {
                let pair = match &*container.borrow() {
                    Value::Map(map) => map
                        .entries()
                        .get(*pos)
                        .map(|(k, v)| Value::Tuple(vec![k.clone(), v.clone()])),
                    _ => None,
                }?;
                *pos += 1;
                Some(IterItem::Fresh(pair))
            }
        }
    }
}

/// Any Tern runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    /// The null singleton.
    Null,
    /// A boolean singleton.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// IEEE 754 double.
    Num(f64),
    /// Byte string.
    Str(StrValue),
    /// Integer range.
    Range(RangeValue),
    /// Fixed-length sequence.
    Tuple(Vec<Handle>),
    /// Growable sequence.
    List(Vec<Handle>),
    /// Insertion-ordered structural map.
    Map(ValueMap),
    /// A thrown payload wrapper.
    Err(Handle),
    /// A named discriminator around one value.
    Tagged {
        /// Interned discriminator name.
        name: Rc<str>,
        /// The payload.
        value: Handle,
    },
    /// A user function.
    Func(FuncValue),
    /// A host function.
    Native(NativeValue),
    /// Opaque iteration state.
    Iterator(IterState),
    /// Transient spread wrapper, consumed by the next aggregate or call.
    Spread(Handle),
}

/// Error from a value-level operation. The dispatch loop turns these into
/// thrown errors on the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueError {
    /// Human-readable description.
    pub message: String,
}

impl ValueError {
    /// Build an error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result of an indexing read: an existing slot or a computed value the
/// caller allocates.
#[derive(Debug, Clone)]
pub enum IndexGet {
    /// An element handle shared with the container.
    Slot(Handle),
    /// A freshly computed value.
    Fresh(Value),
}

impl Value {
    /// Short stable lowercase tag name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Num(_) => "num",
            Value::Str(_) => "str",
            Value::Range(_) => "range",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Err(_) => "err",
            Value::Tagged { .. } => "tagged",
            Value::Func(_) => "func",
            Value::Native(_) => "native",
            Value::Iterator(_) => "iterator",
            Value::Spread(_) => "spread",
        }
    }

    /// Whether this tag is "simple": reusable in place by hot arithmetic
    /// slots, and cloned rather than aliased into aggregates.
    pub fn is_simple(&self) -> bool {
        matches!(
            self,
            Value::Int(_) | Value::Num(_) | Value::Range(_) | Value::Native(_)
        ) || matches!(self, Value::Str(s) if s.capacity == 0)
    }

    /// Element count for sized containers; `None` for everything else.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.bytes.chars().count()),
            Value::Tuple(items) | Value::List(items) => Some(items.len()),
            Value::Map(map) => Some(map.len()),
            Value::Range(r) => Some(r.count() as usize),
            _ => None,
        }
    }
}

/// Structural equality over handles; pointer-equal handles short-circuit.
pub fn eql_handles(a: &Handle, b: &Handle) -> bool {
    Rc::ptr_eq(a, b) || eql(&a.borrow(), &b.borrow())
}

/// Structural equality. `int` and `num` compare numerically across tags;
/// aggregates compare element-wise; two `err` values are equal iff their
/// payloads are.
pub fn eql(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Num(x), Value::Num(y)) => x == y,
        (Value::Int(x), Value::Num(y)) | (Value::Num(y), Value::Int(x)) => *x as f64 == *y,
        (Value::Str(x), Value::Str(y)) => x.bytes == y.bytes,
        (Value::Range(x), Value::Range(y)) => x == y,
        (Value::Tuple(xs), Value::Tuple(ys)) | (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| eql_handles(x, y))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.entries().iter().all(|(k, v)| {
                    y.get(&k.borrow())
                        .map(|other| eql_handles(v, &other))
                        .unwrap_or(false)
                })
        }
        (Value::Err(x), Value::Err(y)) => eql_handles(x, y),
        (
            Value::Tagged { name: xn, value: xv },
            Value::Tagged { name: yn, value: yv },
        ) => xn == yn && eql_handles(xv, yv),
        (Value::Func(x), Value::Func(y)) => {
            Rc::ptr_eq(&x.module, &y.module) && x.body_index == y.body_index
        }
        (Value::Native(x), Value::Native(y)) => x == y,
        _ => false,
    }
}

/// Membership test (`needle in hay`). Defined for str, tuple, list, map
/// and range receivers; anything else is an error the opcode throws.
pub fn contains(needle: &Value, hay: &Value) -> Result<bool, ValueError> {
    match hay {
        Value::Str(s) => match needle {
            Value::Str(n) => Ok(s.bytes.contains(&n.bytes)),
            other => Err(ValueError::new(format!(
                "in: expected str needle, got {}",
                other.type_name()
            ))),
        },
        Value::Tuple(items) | Value::List(items) => {
            Ok(items.iter().any(|item| eql(&item.borrow(), needle)))
        }
        Value::Map(map) => Ok(map.contains_key(needle)),
        Value::Range(r) => match needle {
            Value::Int(i) => Ok(r.contains(*i)),
            _ => Ok(false),
        },
        other => Err(ValueError::new(format!(
            "in not supported for {}",
            other.type_name()
        ))),
    }
}

fn wrap_index(i: i64, len: usize) -> Result<usize, ValueError> {
    let len = len as i64;
    let wrapped = if i < 0 { i + len } else { i };
    if wrapped < 0 || wrapped >= len {
        return Err(ValueError::new("index out of bounds"));
    }
    Ok(wrapped as usize)
}

/// Indexing read. Lists and tuples take int indexes with negative wrap;
/// maps take any key; strings take int indexes and yield one-codepoint
/// strings. Property-name reads are resolved above this function by the
/// dispatch loop's method tables.
pub fn index_get(container: &Value, index: &Value) -> Result<IndexGet, ValueError> {
    match container {
        Value::Tuple(items) | Value::List(items) => match index {
            Value::Int(i) => {
                let at = wrap_index(*i, items.len())?;
                Ok(IndexGet::Slot(items[at].clone()))
            }
            other => Err(ValueError::new(format!(
                "{} index must be int, got {}",
                container.type_name(),
                other.type_name()
            ))),
        },
        Value::Map(map) => map
            .get(index)
            .map(IndexGet::Slot)
            .ok_or_else(|| ValueError::new("no such key")),
        Value::Str(s) => match index {
            Value::Int(i) => {
                let at = wrap_index(*i, s.bytes.chars().count())?;
                let ch = s.bytes.chars().nth(at).unwrap_or('\0');
                Ok(IndexGet::Fresh(Value::Str(StrValue::shared(
                    ch.encode_utf8(&mut [0u8; 4]),
                ))))
            }
            other => Err(ValueError::new(format!(
                "str index must be int, got {}",
                other.type_name()
            ))),
        },
        other => Err(ValueError::new(format!(
            "cannot index {}",
            other.type_name()
        ))),
    }
}

/// Indexing write. Lists and tuples take int indexes with negative wrap;
/// maps bind any key.
pub fn index_set(container: &mut Value, index: &Value, value: Handle) -> Result<(), ValueError> {
    let cname = container.type_name();
    match container {
        Value::Tuple(items) | Value::List(items) => match index {
            Value::Int(i) => {
                let at = wrap_index(*i, items.len())?;
                items[at] = value;
                Ok(())
            }
            other => Err(ValueError::new(format!(
                "{} index must be int, got {}",
                cname,
                other.type_name()
            ))),
        },
        Value::Map(map) => {
            let key = handle(index.clone());
            map.insert(key, value);
            Ok(())
        }
        _ => Err(ValueError::new(format!("cannot index {}", cname))),
    }
}

/// Explicit type coercion for the `cast` opcode. Pairs outside the matrix
/// are rejected.
pub fn cast(v: &Value, ty: TypeTag) -> Result<Value, ValueError> {
    let fail = || {
        ValueError::new(format!(
            "cannot cast {} to {}",
            v.type_name(),
            ty.name()
        ))
    };
    match ty {
        TypeTag::Bool => match v {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            _ => Err(fail()),
        },
        TypeTag::Int => match v {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Num(n) if n.is_finite() => Ok(Value::Int(*n as i64)),
            Value::Str(s) => s
                .bytes
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| fail()),
            _ => Err(fail()),
        },
        TypeTag::Num => match v {
            Value::Int(i) => Ok(Value::Num(*i as f64)),
            Value::Num(n) => Ok(Value::Num(*n)),
            Value::Str(s) => s
                .bytes
                .trim()
                .parse::<f64>()
                .map(Value::Num)
                .map_err(|_| fail()),
            _ => Err(fail()),
        },
        TypeTag::Str => match v {
            Value::Str(s) => Ok(Value::Str(StrValue::owned(s.bytes.clone()))),
            Value::Int(_) | Value::Num(_) => Ok(Value::Str(StrValue::owned(v.to_string()))),
            _ => Err(fail()),
        },
        TypeTag::Tuple => match v {
            Value::Tuple(items) => Ok(Value::Tuple(items.clone())),
            Value::List(items) => Ok(Value::Tuple(items.clone())),
            _ => Err(fail()),
        },
        TypeTag::List => match v {
            Value::List(items) => Ok(Value::List(items.clone())),
            Value::Tuple(items) => Ok(Value::List(items.clone())),
            Value::Range(r) => {
                let mut items = Vec::with_capacity(r.count() as usize);
                let mut state = IterState::Range {
                    next: r.start,
                    end: r.end,
                    step: r.step,
                };
                while let Some(IterItem::Fresh(item)) = state.next() {
                    items.push(handle(item));
                }
                Ok(Value::List(items))
            }
            _ => Err(fail()),
        },
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::Int(i) => write!(f, "{}", i),
            Value::Num(n) => {
                if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                    // Integer-valued doubles display without a decimal point
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Str(s) => write!(f, "{}", s.bytes),
            Value::Range(r) => {
                if r.step == 1 {
                    write!(f, "{}..{}", r.start, r.end)
                } else {
                    write!(f, "{}..{}:{}", r.start, r.end, r.step)
                }
            }
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.borrow())?;
                }
                write!(f, ")")
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.borrow())?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.entries().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k.borrow(), v.borrow())?;
                }
                write!(f, "}}")
            }
            Value::Err(payload) => write!(f, "err({})", payload.borrow()),
            Value::Tagged { name, value } => write!(f, "{}: {}", name, value.borrow()),
            Value::Func(func) => write!(f, "<fn/{}>", func.arity),
            Value::Native(native) => write!(f, "<native/{}>", native.arity),
            Value::Iterator(_) => write!(f, "<iterator>"),
            Value::Spread(_) => write!(f, "<spread>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn str_val(s: &str) -> Value {
        Value::Str(StrValue::shared(s))
    }

    #[test]
    fn test_eql_cross_tag_numeric() {
        assert!(eql(&Value::Int(1), &Value::Num(1.0)));
        assert!(eql(&Value::Num(2.5), &Value::Num(2.5)));
        assert!(!eql(&Value::Int(1), &Value::Num(1.5)));
        assert!(!eql(&Value::Int(1), &str_val("1")));
    }

    #[test]
    fn test_eql_aggregates_elementwise() {
        let a = Value::List(vec![handle(Value::Int(1)), handle(str_val("x"))]);
        let b = Value::List(vec![handle(Value::Num(1.0)), handle(str_val("x"))]);
        assert!(eql(&a, &b));
        let c = Value::Tuple(vec![handle(Value::Int(1)), handle(str_val("x"))]);
        assert!(!eql(&a, &c));
    }

    #[test]
    fn test_eql_err_by_payload() {
        let a = Value::Err(handle(str_val("boom")));
        let b = Value::Err(handle(str_val("boom")));
        let c = Value::Err(handle(str_val("bang")));
        assert!(eql(&a, &b));
        assert!(!eql(&a, &c));
    }

    #[test]
    fn test_eql_tagged_requires_name_and_payload() {
        let name: Rc<str> = Rc::from("Some");
        let a = Value::Tagged {
            name: name.clone(),
            value: handle(Value::Int(1)),
        };
        let b = Value::Tagged {
            name,
            value: handle(Value::Int(1)),
        };
        let c = Value::Tagged {
            name: Rc::from("None"),
            value: handle(Value::Int(1)),
        };
        assert!(eql(&a, &b));
        assert!(!eql(&a, &c));
    }

    #[test]
    fn test_range_count_matches_iteration() {
        for (start, end, step) in [(1, 5, 2), (0, 10, 1), (10, 0, -3), (5, 5, 1), (3, 1, 1)] {
            let r = RangeValue::new(start, end, step).unwrap();
            let mut state = IterState::Range {
                next: start,
                end,
                step,
            };
            let mut n = 0;
            while state.next().is_some() {
                n += 1;
            }
            assert_eq!(r.count(), n, "range {}..{}:{}", start, end, step);
        }
    }

    #[test]
    fn test_range_rejects_zero_step() {
        assert!(RangeValue::new(0, 5, 0).is_err());
    }

    #[test]
    fn test_contains_variants() {
        let list = Value::List(vec![handle(Value::Int(1)), handle(Value::Int(2))]);
        assert!(contains(&Value::Int(2), &list).unwrap());
        assert!(!contains(&Value::Int(3), &list).unwrap());

        assert!(contains(&str_val("oo"), &str_val("boom")).unwrap());

        let range = Value::Range(RangeValue::new(1, 5, 2).unwrap());
        assert!(contains(&Value::Int(3), &range).unwrap());
        assert!(!contains(&Value::Int(4), &range).unwrap());
        assert!(!contains(&Value::Int(5), &range).unwrap());

        assert!(contains(&Value::Int(1), &Value::Int(2)).is_err());
    }

    #[test]
    fn test_index_get_negative_wrap() {
        let list = Value::List(vec![
            handle(Value::Int(1)),
            handle(Value::Int(2)),
            handle(Value::Int(3)),
        ]);
        let IndexGet::Slot(last) = index_get(&list, &Value::Int(-1)).unwrap() else {
            panic!("expected slot");
        };
        assert!(eql(&last.borrow(), &Value::Int(3)));
        assert!(index_get(&list, &Value::Int(3)).is_err());
        assert!(index_get(&list, &Value::Int(-4)).is_err());
    }

    #[test]
    fn test_index_get_map_and_missing_key() {
        let mut map = ValueMap::new();
        map.insert(handle(str_val("a")), handle(Value::Int(1)));
        let map = Value::Map(map);
        let IndexGet::Slot(v) = index_get(&map, &str_val("a")).unwrap() else {
            panic!("expected slot");
        };
        assert!(eql(&v.borrow(), &Value::Int(1)));
        let err = index_get(&map, &str_val("b")).unwrap_err();
        assert_eq!(err.message, "no such key");
    }

    #[test]
    fn test_index_set_then_get() {
        let mut list = Value::List(vec![handle(Value::Int(1)), handle(Value::Int(2))]);
        index_set(&mut list, &Value::Int(-1), handle(Value::Int(9))).unwrap();
        let IndexGet::Slot(v) = index_get(&list, &Value::Int(1)).unwrap() else {
            panic!("expected slot");
        };
        assert!(eql(&v.borrow(), &Value::Int(9)));
    }

    #[test]
    fn test_map_insert_replaces_in_place() {
        let mut map = ValueMap::new();
        map.insert(handle(Value::Int(1)), handle(str_val("a")));
        map.insert(handle(str_val("k")), handle(str_val("b")));
        // Numeric key equality: 1.0 replaces 1, keeping position 0.
        map.insert(handle(Value::Num(1.0)), handle(str_val("c")));
        assert_eq!(map.len(), 2);
        assert!(eql(&map.entries()[0].1.borrow(), &str_val("c")));
    }

    #[test]
    fn test_cast_matrix() {
        assert!(eql(&cast(&Value::Int(3), TypeTag::Num).unwrap(), &Value::Num(3.0)));
        assert!(eql(&cast(&Value::Num(3.9), TypeTag::Int).unwrap(), &Value::Int(3)));
        assert!(eql(&cast(&str_val(" 42 "), TypeTag::Int).unwrap(), &Value::Int(42)));
        assert!(cast(&str_val("nope"), TypeTag::Int).is_err());
        assert!(eql(&cast(&Value::Int(7), TypeTag::Str).unwrap(), &str_val("7")));
        assert!(cast(&Value::Int(1), TypeTag::Bool).is_err());

        let range = Value::Range(RangeValue::new(1, 5, 2).unwrap());
        let list = cast(&range, TypeTag::List).unwrap();
        let expect = Value::List(vec![handle(Value::Int(1)), handle(Value::Int(3))]);
        assert!(eql(&list, &expect));

        let tuple = cast(&list, TypeTag::Tuple).unwrap();
        assert_eq!(tuple.type_name(), "tuple");
        assert_eq!(tuple.len(), Some(2));
    }

    #[test]
    fn test_is_simple_tags() {
        assert!(Value::Int(1).is_simple());
        assert!(Value::Num(1.0).is_simple());
        assert!(Value::Range(RangeValue::new(0, 1, 1).unwrap()).is_simple());
        assert!(str_val("lit").is_simple());
        assert!(!Value::Str(StrValue::owned("own".to_string())).is_simple());
        assert!(!Value::Null.is_simple());
        assert!(!Value::List(vec![]).is_simple());
    }

    #[test]
    fn test_iterate_str_codepoints() {
        let s = handle(str_val("hé"));
        let mut state = IterState::over(&s.borrow(), &s).unwrap();
        let mut seen = Vec::new();
        while let Some(IterItem::Fresh(v)) = state.next() {
            seen.push(v.to_string());
        }
        assert_eq!(seen, vec!["h", "é"]);
    }

    #[test]
    fn test_iterate_map_yields_pairs() {
        let mut map = ValueMap::new();
        map.insert(handle(str_val("a")), handle(Value::Int(1)));
        map.insert(handle(str_val("b")), handle(Value::Int(2)));
        let m = handle(Value::Map(map));
        let mut state = IterState::over(&m.borrow(), &m).unwrap();
        let Some(IterItem::Fresh(first)) = state.next() else {
            panic!("expected an entry");
        };
        let expect = Value::Tuple(vec![handle(str_val("a")), handle(Value::Int(1))]);
        assert!(eql(&first, &expect));
        assert!(state.next().is_some());
        assert!(state.next().is_none());
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::Num(3.0).to_string(), "3");
        assert_eq!(Value::Num(3.5).to_string(), "3.5");
        let r = Value::Range(RangeValue::new(1, 5, 2).unwrap());
        assert_eq!(r.to_string(), "1..5:2");
        let t = Value::Tuple(vec![handle(Value::Int(1)), handle(Value::Int(2))]);
        assert_eq!(t.to_string(), "(1, 2)");
    }
}
