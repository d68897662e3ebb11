//! The dispatch loop.
//!
//! `run_frame` executes one frame's body to completion: each iteration
//! fetches an instruction word, derives the destination ref from the word's
//! position, and branches on the opcode. Function calls re-enter
//! `run_frame` recursively; fatal errors unwind through the recursion,
//! collecting one trace diagnostic per caller.

use std::cell::RefCell;
use std::rc::Rc;

use bytecode_system::{Op, OpData, Primitive, Ref};
use core_types::{
    cast, contains, eql_handles, index_get, index_set, position_of, Diagnostic, DiagnosticKind,
    FatalError, Handle, IndexGet, IterItem, IterState, NativeCall, StrValue, Value,
};

use crate::context::NativeCtx;
use crate::frame::{BodyRef, Frame, Slots};
use crate::handlers::{ErrorHandlerStack, Handler};
use crate::import::Resolution;
use crate::vm::{Vm, MAX_CALL_DEPTH};

impl Vm {
    /// Execute `frame` until it returns. Falling off the end of the body
    /// yields `null`.
    pub(crate) fn run_frame(&mut self, frame: &mut Frame) -> Result<Handle, FatalError> {
        loop {
            let Some((op, data, dst)) = frame.fetch() else {
                return Ok(self.heap.null());
            };
            match op {
                Op::Nop => {}

                // --- constants and literals ---
                Op::Primitive => {
                    let OpData::Primitive(p) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = match p {
                        Primitive::Null => self.heap.null(),
                        Primitive::True => self.heap.bool_val(true),
                        Primitive::False => self.heap.bool_val(false),
                    };
                    self.put(frame, dst, slot);
                }
                Op::Int => {
                    let OpData::Int(v) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    self.store(frame, dst, Value::Int(v))?;
                }
                Op::Num => {
                    let OpData::Num(v) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    self.store(frame, dst, Value::Num(v))?;
                }
                Op::Str => {
                    let OpData::Str { offset, len } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let literal = frame.module.str_at(offset, len).to_string();
                    self.store(frame, dst, Value::Str(StrValue::shared(&literal)))?;
                }

                // --- aggregate construction ---
                Op::BuildTuple | Op::BuildList => {
                    let OpData::Extra { index, len } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let refs = frame.module.extra_slice(index, len).to_vec();
                    let elems = self.flatten(frame, &refs)?;
                    let value = if op == Op::BuildTuple {
                        Value::Tuple(elems)
                    } else {
                        Value::List(elems)
                    };
                    self.store(frame, dst, value)?;
                }
                Op::BuildMap => {
                    let OpData::Extra { index, len } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let refs = frame.module.extra_slice(index, len).to_vec();
                    let elems = self.flatten(frame, &refs)?;
                    if elems.len() % 2 != 0 {
                        self.throw_in(frame, "map literal requires key/value pairs")?;
                        continue;
                    }
                    let mut map = core_types::ValueMap::new();
                    for pair in elems.chunks(2) {
                        map.insert(pair[0].clone(), pair[1].clone());
                    }
                    self.store(frame, dst, Value::Map(map))?;
                }
                Op::BuildError => {
                    let OpData::Un(r) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let payload = self.slot(frame, r)?;
                    let payload = self.dupe_simple(frame, &payload)?;
                    self.store(frame, dst, Value::Err(payload))?;
                }
                Op::BuildErrorNull => {
                    self.store(frame, dst, Value::Err(self.heap.null()))?;
                }
                Op::BuildTagged => {
                    let OpData::Extra { index, len } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let words = frame.module.extra_slice(index, len).to_vec();
                    if words.len() != 3 {
                        return Err(self.malformed(frame, op));
                    }
                    let name: Rc<str> = Rc::from(frame.module.str_at(words[0], words[1]));
                    let payload = self.slot(frame, Ref(words[2]))?;
                    let payload = self.dupe_simple(frame, &payload)?;
                    self.store(frame, dst, Value::Tagged {
                        name,
                        value: payload,
                    })?;
                }
                Op::BuildTaggedNull => {
                    let OpData::Str { offset, len } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let name: Rc<str> = Rc::from(frame.module.str_at(offset, len));
                    self.store(frame, dst, Value::Tagged {
                        name,
                        value: self.heap.null(),
                    })?;
                }
                Op::BuildFunc => {
                    let OpData::Extra { index, len } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let Some(layout) = frame.module.func_layout(index, len) else {
                        return Err(self.malformed(frame, op));
                    };
                    let mut captures = Vec::with_capacity(layout.captures.len());
                    for &cap in &layout.captures {
                        let slot = self.slot(frame, cap)?;
                        captures.push(self.dupe_simple(frame, &slot)?);
                    }
                    let func = core_types::FuncValue {
                        module: frame.module.clone(),
                        body_index: layout.body_index,
                        body_len: layout.body_len,
                        arity: layout.arity,
                        variadic: layout.variadic,
                        captures,
                    };
                    self.store(frame, dst, Value::Func(func))?;
                }
                Op::BuildRange | Op::BuildRangeStep => {
                    let OpData::Range { start, extra } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let nbounds = if op == Op::BuildRangeStep { 2 } else { 1 };
                    let bounds = frame.module.extra_slice(extra, nbounds).to_vec();
                    if bounds.len() != nbounds as usize {
                        return Err(self.malformed(frame, op));
                    }
                    let Some(start) = self.read_int(frame, start)? else {
                        continue;
                    };
                    let Some(end) = self.read_int(frame, Ref(bounds[0]))? else {
                        continue;
                    };
                    let step = if op == Op::BuildRangeStep {
                        match self.read_int(frame, Ref(bounds[1]))? {
                            Some(step) => step,
                            None => continue,
                        }
                    } else {
                        1
                    };
                    match core_types::RangeValue::new(start, end, step) {
                        Ok(range) => self.store(frame, dst, Value::Range(range))?,
                        Err(e) => self.throw_in(frame, &e.message)?,
                    }
                }

                // --- arithmetic ---
                Op::Add
                | Op::Sub
                | Op::Mul
                | Op::Div
                | Op::DivFloor
                | Op::Rem
                | Op::Pow
                | Op::LShift
                | Op::RShift
                | Op::BitAnd
                | Op::BitOr
                | Op::BitXor => {
                    let OpData::Bin { lhs, rhs } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let a = self.slot(frame, lhs)?;
                    let b = self.slot(frame, rhs)?;
                    let result = {
                        let av = a.borrow();
                        let bv = b.borrow();
                        numeric_binop(op, &av, &bv)
                    };
                    match result {
                        Ok(v) => self.store(frame, dst, v)?,
                        Err(msg) => self.throw_in(frame, &msg)?,
                    }
                }

                // --- unary ---
                Op::Negate => {
                    let OpData::Un(r) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = self.slot(frame, r)?;
                    let result = match &*slot.borrow() {
                        Value::Int(i) => i
                            .checked_neg()
                            .map(Value::Int)
                            .ok_or_else(|| "operation overflowed".to_string()),
                        Value::Num(n) => Ok(Value::Num(-n)),
                        other => Err(format!("cannot negate {}", other.type_name())),
                    };
                    match result {
                        Ok(v) => self.store(frame, dst, v)?,
                        Err(msg) => self.throw_in(frame, &msg)?,
                    }
                }
                Op::BoolNot => {
                    let OpData::Un(r) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let Some(b) = self.read_bool(frame, r)? else {
                        continue;
                    };
                    self.put_bool(frame, dst, !b);
                }
                Op::BitNot => {
                    let OpData::Un(r) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let Some(i) = self.read_int(frame, r)? else {
                        continue;
                    };
                    self.store(frame, dst, Value::Int(!i))?;
                }

                // --- comparison ---
                Op::Equal | Op::NotEqual => {
                    let OpData::Bin { lhs, rhs } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let a = self.slot(frame, lhs)?;
                    let b = self.slot(frame, rhs)?;
                    let equal = eql_handles(&a, &b);
                    self.put_bool(frame, dst, if op == Op::Equal { equal } else { !equal });
                }
                Op::LessThan | Op::LessThanEqual | Op::GreaterThan | Op::GreaterThanEqual => {
                    let OpData::Bin { lhs, rhs } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let a = self.slot(frame, lhs)?;
                    let b = self.slot(frame, rhs)?;
                    let result = {
                        let av = a.borrow();
                        let bv = b.borrow();
                        ordering(op, &av, &bv)
                    };
                    match result {
                        Ok(b) => self.put_bool(frame, dst, b),
                        Err(msg) => self.throw_in(frame, &msg)?,
                    }
                }

                // --- containers ---
                Op::Get | Op::GetOrNull => {
                    let OpData::Bin { lhs, rhs } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let index = self.slot(frame, rhs)?;
                    let index = index.borrow().clone();
                    self.get_op(frame, dst, lhs, &index, op == Op::GetOrNull)?;
                }
                Op::GetInt => {
                    let OpData::UnImm { operand, imm } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let index = Value::Int(imm as i32 as i64);
                    self.get_op(frame, dst, operand, &index, false)?;
                }
                Op::Set => {
                    let OpData::Extra { index, len } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let words = frame.module.extra_slice(index, len).to_vec();
                    if words.len() != 3 {
                        return Err(self.malformed(frame, op));
                    }
                    let container = self.slot(frame, Ref(words[0]))?;
                    let key = self.slot(frame, Ref(words[1]))?;
                    let key = key.borrow().clone();
                    let value = self.slot(frame, Ref(words[2]))?;
                    let value = self.dupe_simple(frame, &value)?;
                    let outcome = index_set(&mut container.borrow_mut(), &key, value);
                    if let Err(e) = outcome {
                        self.throw_in(frame, &e.message)?;
                    }
                }
                Op::Append => {
                    let OpData::Bin { lhs, rhs } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let list = self.slot(frame, lhs)?;
                    let value = self.slot(frame, rhs)?;
                    let value = self.dupe_simple(frame, &value)?;
                    let outcome = match &mut *list.borrow_mut() {
                        Value::List(items) => {
                            items.push(value);
                            Ok(())
                        }
                        other => Err(format!("cannot append to {}", other.type_name())),
                    };
                    if let Err(msg) = outcome {
                        self.throw_in(frame, &msg)?;
                    }
                }
                Op::In => {
                    let OpData::Bin { lhs, rhs } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let needle = self.slot(frame, lhs)?;
                    let hay = self.slot(frame, rhs)?;
                    let result = {
                        let nv = needle.borrow();
                        let hv = hay.borrow();
                        contains(&nv, &hv)
                    };
                    match result {
                        Ok(b) => self.put_bool(frame, dst, b),
                        Err(e) => self.throw_in(frame, &e.message)?,
                    }
                }
                Op::Spread => {
                    let OpData::Un(r) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = self.slot(frame, r)?;
                    let outcome = {
                        let v = slot.borrow();
                        match &*v {
                            Value::Tuple(_) | Value::List(_) => Ok(None),
                            Value::Range(_) => {
                                Ok(Some(cast(&v, bytecode_system::TypeTag::List).map_err(
                                    |e| e.message,
                                )))
                            }
                            Value::Str(_) => Err("cannot spread str".to_string()),
                            other => Err(format!("cannot spread {}", other.type_name())),
                        }
                    };
                    match outcome {
                        Ok(None) => {
                            let spread = self.alloc_in(frame, Value::Spread(slot))?;
                            self.put(frame, dst, spread);
                        }
                        Ok(Some(Ok(list))) => {
                            let list = self.alloc_in(frame, list)?;
                            let spread = self.alloc_in(frame, Value::Spread(list))?;
                            self.put(frame, dst, spread);
                        }
                        Ok(Some(Err(msg))) | Err(msg) => self.throw_in(frame, &msg)?,
                    }
                }

                // --- destructuring ---
                Op::CheckLen => {
                    let OpData::UnImm { operand, imm } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = self.slot(frame, operand)?;
                    let len = slot.borrow().len();
                    self.put_bool(frame, dst, len == Some(imm as usize));
                }
                Op::AssertLen => {
                    let OpData::UnImm { operand, imm } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = self.slot(frame, operand)?;
                    let outcome = match slot.borrow().len() {
                        Some(n) if n == imm as usize => Ok(()),
                        Some(n) => Err(format!("expected length {}, got {}", imm, n)),
                        None => Err(format!(
                            "cannot take length of {}",
                            slot.borrow().type_name()
                        )),
                    };
                    if let Err(msg) = outcome {
                        self.throw_in(frame, &msg)?;
                    }
                }
                Op::SpreadDest => {
                    let OpData::UnImm { operand, imm } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = self.slot(frame, operand)?;
                    let tail = match &*slot.borrow() {
                        Value::Tuple(items) | Value::List(items) => {
                            Ok(items.get(imm as usize..).unwrap_or(&[]).to_vec())
                        }
                        other => Err(format!("cannot destructure {}", other.type_name())),
                    };
                    match tail {
                        Ok(items) => {
                            let mut cloned = Vec::with_capacity(items.len());
                            for item in &items {
                                cloned.push(self.dupe_simple(frame, item)?);
                            }
                            self.store(frame, dst, Value::List(cloned))?;
                        }
                        Err(msg) => self.throw_in(frame, &msg)?,
                    }
                }

                // --- error and tagged unwrapping ---
                Op::UnwrapError => {
                    let OpData::Un(r) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = self.slot(frame, r)?;
                    let payload = match &*slot.borrow() {
                        Value::Err(payload) => Ok(payload.clone()),
                        other => Err(format!("expected err, got {}", other.type_name())),
                    };
                    match payload {
                        Ok(payload) => {
                            let duped = self.dupe_in(frame, &payload)?;
                            self.put(frame, dst, duped);
                        }
                        Err(msg) => self.throw_in(frame, &msg)?,
                    }
                }
                Op::UnwrapTagged | Op::UnwrapTaggedOrNull => {
                    let OpData::Extra { index, len } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let words = frame.module.extra_slice(index, len).to_vec();
                    if words.len() != 3 {
                        return Err(self.malformed(frame, op));
                    }
                    let wanted = frame.module.str_at(words[1], words[2]).to_string();
                    let slot = self.slot(frame, Ref(words[0]))?;
                    let matched = match &*slot.borrow() {
                        Value::Tagged { name, value } if **name == *wanted => {
                            Some(value.clone())
                        }
                        _ => None,
                    };
                    match matched {
                        Some(payload) => self.put(frame, dst, payload),
                        None if op == Op::UnwrapTaggedOrNull => {
                            let null = self.heap.null();
                            self.put(frame, dst, null);
                        }
                        None => {
                            let msg = format!("expected tagged {}", wanted);
                            self.throw_in(frame, &msg)?;
                        }
                    }
                }
                Op::Cast => {
                    let OpData::BinTy { operand, ty } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = self.slot(frame, operand)?;
                    let result = {
                        let v = slot.borrow();
                        cast(&v, ty)
                    };
                    match result {
                        Ok(v) => self.store(frame, dst, v)?,
                        Err(e) => self.throw_in(frame, &e.message)?,
                    }
                }

                // --- variables ---
                Op::CopyUn => {
                    let OpData::Un(r) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = self.slot(frame, r)?;
                    let duped = self.dupe_in(frame, &slot)?;
                    self.put(frame, dst, duped);
                }
                Op::Copy => {
                    let OpData::Bin { lhs, rhs } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = self.slot(frame, lhs)?;
                    let duped = self.dupe_in(frame, &slot)?;
                    self.put(frame, rhs, duped);
                }
                Op::Move => {
                    let OpData::Bin { lhs, rhs } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = self.slot(frame, lhs)?;
                    self.put(frame, rhs, slot);
                }
                Op::LoadGlobal => {
                    let OpData::Un(r) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let global = frame.globals.borrow().get(r.index()).cloned();
                    match global {
                        Some(slot) if !self.heap.is_uninit(&slot) => self.put(frame, dst, slot),
                        _ => return Err(self.fatal_in(frame, "use of undefined variable")),
                    }
                }
                Op::LoadCapture => {
                    let OpData::CaptureIdx(idx) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    match frame.captures.get(idx as usize).cloned() {
                        Some(slot) => self.put(frame, dst, slot),
                        None => return Err(self.fatal_in(frame, "invalid capture reference")),
                    }
                }
                Op::LoadThis => {
                    let slot = frame.this.clone().unwrap_or_else(|| self.heap.null());
                    self.put(frame, dst, slot);
                }

                // --- control flow ---
                Op::Jump => {
                    let OpData::Jump(offset) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    frame.ip = offset as usize;
                }
                Op::JumpIfTrue | Op::JumpIfFalse => {
                    let OpData::JumpCond { operand, offset } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let Some(b) = self.read_bool(frame, operand)? else {
                        continue;
                    };
                    if b == (op == Op::JumpIfTrue) {
                        frame.ip = offset as usize;
                    }
                }
                Op::JumpIfNull => {
                    let OpData::JumpCond { operand, offset } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = self.slot(frame, operand)?;
                    let is_null = matches!(&*slot.borrow(), Value::Null);
                    if is_null {
                        frame.ip = offset as usize;
                    }
                }
                Op::PushErrHandler => {
                    let OpData::JumpCond { operand, offset } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    // Pre-clear the target so pop_err_handler can tell "no
                    // error stored" from a stale value.
                    let uninit = self.heap.uninit();
                    frame.put(operand, uninit.clone(), &uninit);
                    frame.handlers.push(Handler {
                        target: operand,
                        offset,
                    });
                }
                Op::PopErrHandler => {
                    let OpData::Jump(offset) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let Some(handler) = frame.handlers.pop() else {
                        return Err(self.fatal_in(frame, "handler stack underflow"));
                    };
                    let untouched = frame
                        .val(handler.target)
                        .map(|slot| self.heap.is_uninit(&slot))
                        .unwrap_or(true);
                    if untouched {
                        frame.ip = offset as usize;
                    }
                }
                Op::UnwrapErrorOrJump => {
                    let OpData::JumpCond { operand, offset } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = self.slot(frame, operand)?;
                    let payload = match &*slot.borrow() {
                        Value::Err(payload) => Some(payload.clone()),
                        _ => None,
                    };
                    match payload {
                        Some(payload) => {
                            let duped = self.dupe_in(frame, &payload)?;
                            self.put(frame, dst, duped);
                        }
                        None => frame.ip = offset as usize,
                    }
                }

                // --- iteration ---
                Op::IterInit => {
                    let OpData::Un(r) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = self.slot(frame, r)?;
                    let state = {
                        let v = slot.borrow();
                        IterState::over(&v, &slot)
                    };
                    match state {
                        Ok(state) => self.store(frame, dst, Value::Iterator(state))?,
                        Err(e) => self.throw_in(frame, &e.message)?,
                    }
                }
                Op::IterNext => {
                    let OpData::JumpCond { operand, offset } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let iter = self.slot(frame, operand)?;
                    let step = {
                        match &mut *iter.borrow_mut() {
                            Value::Iterator(state) => Ok(state.next()),
                            other => Err(other.type_name()),
                        }
                    };
                    match step {
                        Ok(Some(IterItem::Slot(item))) => {
                            self.put(frame, dst, item);
                            frame.ip = offset as usize;
                        }
                        Ok(Some(IterItem::Fresh(value))) => {
                            self.store(frame, dst, value)?;
                            frame.ip = offset as usize;
                        }
                        Ok(None) => {}
                        Err(name) => {
                            let msg = format!("expected iterator, got {}", name);
                            self.throw_in(frame, &msg)?;
                        }
                    }
                }

                // --- calls ---
                Op::Call => {
                    let OpData::Extra { index, len } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let words = frame.module.extra_slice(index, len).to_vec();
                    let Some((&callee, args)) = words.split_first() else {
                        return Err(self.malformed(frame, op));
                    };
                    let args = args.to_vec();
                    self.do_call(frame, dst, Ref(callee), None, &args)?;
                }
                Op::CallOne => {
                    let OpData::Bin { lhs, rhs } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    self.do_call(frame, dst, lhs, None, &[rhs.0])?;
                }
                Op::CallZero => {
                    let OpData::Un(r) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    self.do_call(frame, dst, r, None, &[])?;
                }
                Op::ThisCall => {
                    let OpData::Extra { index, len } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let words = frame.module.extra_slice(index, len).to_vec();
                    if words.len() < 2 {
                        return Err(self.malformed(frame, op));
                    }
                    let this = self.slot(frame, Ref(words[1]))?;
                    let args = words[2..].to_vec();
                    self.do_call(frame, dst, Ref(words[0]), Some(this), &args)?;
                }
                Op::ThisCallZero => {
                    let OpData::Bin { lhs, rhs } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let this = self.slot(frame, rhs)?;
                    self.do_call(frame, dst, lhs, Some(this), &[])?;
                }

                // --- module level ---
                Op::Import => {
                    let OpData::Str { offset, len } = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let name = frame.module.str_at(offset, len).to_string();
                    self.run_import(frame, dst, &name)?;
                }
                Op::Discard => {
                    let OpData::Un(r) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = self.slot(frame, r)?;
                    let discarded_err = match &*slot.borrow() {
                        Value::Err(payload) => Some(payload.borrow().to_string()),
                        _ => None,
                    };
                    if let Some(payload) = discarded_err {
                        let msg = format!("discarded error: {}", payload);
                        return Err(self.fatal_in(frame, &msg));
                    }
                }
                Op::Ret => {
                    let OpData::Un(r) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    return self.slot(frame, r);
                }
                Op::RetNull => {
                    return Ok(self.heap.null());
                }
                Op::Throw => {
                    let OpData::Un(r) = data else {
                        return Err(self.malformed(frame, op));
                    };
                    let slot = self.slot(frame, r)?;
                    let already_err = matches!(&*slot.borrow(), Value::Err(_));
                    let err = if already_err {
                        slot
                    } else {
                        let payload = self.dupe_simple(frame, &slot)?;
                        self.alloc_in(frame, Value::Err(payload))?
                    };
                    if !self.deliver_err(frame, err.clone()) {
                        return Ok(err);
                    }
                }
            }
        }
    }

    // --- helpers -----------------------------------------------------

    fn put(&self, frame: &Frame, r: Ref, slot: Handle) {
        frame.put(r, slot, &self.heap.uninit());
    }

    fn put_bool(&self, frame: &Frame, r: Ref, b: bool) {
        self.put(frame, r, self.heap.bool_val(b));
    }

    /// Write a computed value, reusing the destination slot in place when
    /// its current occupant is a simple tag. This is what keeps hot
    /// arithmetic loops allocation-free.
    fn store(&mut self, frame: &Frame, dst: Ref, value: Value) -> Result<(), FatalError> {
        match value {
            Value::Null => {
                self.put(frame, dst, self.heap.null());
                return Ok(());
            }
            Value::Bool(b) => {
                self.put_bool(frame, dst, b);
                return Ok(());
            }
            _ => {}
        }
        if let Some(slot) = frame.val(dst) {
            if slot.borrow().is_simple() {
                *slot.borrow_mut() = value;
                return Ok(());
            }
        }
        let slot = self.alloc_in(frame, value)?;
        self.put(frame, dst, slot);
        Ok(())
    }

    fn slot(&mut self, frame: &Frame, r: Ref) -> Result<Handle, FatalError> {
        match frame.val(r) {
            Some(slot) => Ok(slot),
            None => Err(self.fatal_in(frame, "reference to unmaterialized slot")),
        }
    }

    fn alloc_in(&mut self, frame: &Frame, value: Value) -> Result<Handle, FatalError> {
        match self.heap.alloc(value) {
            Ok(slot) => Ok(slot),
            Err(e) => Err(self.fatal_in(frame, &e.to_string())),
        }
    }

    fn dupe_in(&mut self, frame: &Frame, slot: &Handle) -> Result<Handle, FatalError> {
        match self.heap.dupe(slot) {
            Ok(copy) => Ok(copy),
            Err(e) => Err(self.fatal_in(frame, &e.to_string())),
        }
    }

    /// Clone simple tags, share everything else. Inserting into an
    /// aggregate goes through this so members never alias per-loop scratch
    /// slots.
    fn dupe_simple(&mut self, frame: &Frame, slot: &Handle) -> Result<Handle, FatalError> {
        let simple = slot.borrow().is_simple();
        if simple {
            self.dupe_in(frame, slot)
        } else {
            Ok(slot.clone())
        }
    }

    fn read_int(&mut self, frame: &mut Frame, r: Ref) -> Result<Option<i64>, FatalError> {
        let slot = self.slot(frame, r)?;
        let found = match &*slot.borrow() {
            Value::Int(i) => Ok(*i),
            other => Err(other.type_name()),
        };
        match found {
            Ok(i) => Ok(Some(i)),
            Err(name) => {
                let msg = format!("expected int, got {}", name);
                self.throw_in(frame, &msg)?;
                Ok(None)
            }
        }
    }

    fn read_bool(&mut self, frame: &mut Frame, r: Ref) -> Result<Option<bool>, FatalError> {
        let slot = self.slot(frame, r)?;
        let found = match &*slot.borrow() {
            Value::Bool(b) => Ok(*b),
            other => Err(other.type_name()),
        };
        match found {
            Ok(b) => Ok(Some(b)),
            Err(name) => {
                let msg = format!("expected bool, got {}", name);
                self.throw_in(frame, &msg)?;
                Ok(None)
            }
        }
    }

    /// Route a message to the frame's top handler, or escalate to fatal.
    /// The handler is consumed: a second throw inside the handler body
    /// goes to the next one out.
    pub(crate) fn throw_in(&mut self, frame: &mut Frame, message: &str) -> Result<(), FatalError> {
        if frame.handlers.is_empty() {
            return Err(self.fatal_in(frame, message));
        }
        let payload = self.alloc_in(frame, Value::Str(StrValue::shared(message)))?;
        let err = self.alloc_in(frame, Value::Err(payload))?;
        self.deliver_err(frame, err);
        Ok(())
    }

    /// Store an `err` value at the top handler's target and redirect.
    /// Returns false when no handler is installed.
    fn deliver_err(&mut self, frame: &mut Frame, err: Handle) -> bool {
        match frame.handlers.pop() {
            Some(handler) => {
                self.put(frame, handler.target, err);
                frame.ip = handler.offset as usize;
                true
            }
            None => false,
        }
    }

    /// Record the originating diagnostic for a fatal error. The byte
    /// offset comes from the instruction that was fetched last.
    pub(crate) fn fatal_in(&mut self, frame: &Frame, message: &str) -> FatalError {
        self.report_at(frame, DiagnosticKind::Err, message);
        FatalError::new(message)
    }

    fn trace_in(&mut self, frame: &Frame) {
        self.report_at(frame, DiagnosticKind::Trace, "called from here");
    }

    fn report_at(&mut self, frame: &Frame, kind: DiagnosticKind, message: &str) {
        let byte_offset = frame.module.byte_offset_of(frame.code_index);
        let pos = position_of(&frame.module.debug.source, byte_offset);
        self.reporter.report(Diagnostic {
            kind,
            message: message.to_string(),
            source_path: frame.module.debug.source_path.clone(),
            byte_offset,
            line: pos.line,
            column: pos.column,
        });
    }

    fn malformed(&mut self, frame: &Frame, op: Op) -> FatalError {
        let msg = format!("malformed instruction: {}", op.mnemonic());
        self.fatal_in(frame, &msg)
    }

    /// Pre-flatten and materialize an operand list: spreads contribute
    /// their element counts in a first pass, then everything is
    /// `dupe_simple`-cloned into an exactly-sized array.
    fn flatten(&mut self, frame: &mut Frame, refs: &[u32]) -> Result<Vec<Handle>, FatalError> {
        let mut slots = Vec::with_capacity(refs.len());
        let mut total = 0usize;
        for &r in refs {
            let slot = self.slot(frame, Ref(r))?;
            total += match &*slot.borrow() {
                Value::Spread(inner) => match &*inner.borrow() {
                    Value::Tuple(items) | Value::List(items) => items.len(),
                    _ => 1,
                },
                _ => 1,
            };
            slots.push(slot);
        }
        let mut out = Vec::with_capacity(total);
        for slot in &slots {
            let spread_items = match &*slot.borrow() {
                Value::Spread(inner) => match &*inner.borrow() {
                    Value::Tuple(items) | Value::List(items) => Some(items.clone()),
                    _ => None,
                },
                _ => None,
            };
            match spread_items {
                Some(items) => {
                    for item in &items {
                        out.push(self.dupe_simple(frame, item)?);
                    }
                }
                None => out.push(self.dupe_simple(frame, slot)?),
            }
        }
        Ok(out)
    }

    fn get_op(
        &mut self,
        frame: &mut Frame,
        dst: Ref,
        container: Ref,
        index: &Value,
        or_null: bool,
    ) -> Result<(), FatalError> {
        let container = self.slot(frame, container)?;

        // Property names: map keys win, then the `len` attribute, then the
        // per-type method table.
        if let Value::Str(name) = index {
            let is_map = matches!(&*container.borrow(), Value::Map(_));
            if is_map {
                let found = match &*container.borrow() {
                    Value::Map(map) => map.get(index),
                    _ => None,
                };
                if let Some(value) = found {
                    self.put(frame, dst, value);
                    return Ok(());
                }
            }
            if name.bytes == "len" {
                if let Some(n) = container.borrow().len() {
                    return self.store(frame, dst, Value::Int(n as i64));
                }
            }
            let method = stdlib::method(&container.borrow(), &name.bytes);
            if let Some(native) = method {
                return self.store(frame, dst, Value::Native(native));
            }
            if or_null {
                let null = self.heap.null();
                self.put(frame, dst, null);
                return Ok(());
            }
            let msg = if is_map {
                "no such key".to_string()
            } else {
                format!("no such method: {}", name.bytes)
            };
            return self.throw_in(frame, &msg);
        }

        let got = {
            let cv = container.borrow();
            index_get(&cv, index)
        };
        match got {
            Ok(IndexGet::Slot(slot)) => {
                self.put(frame, dst, slot);
                Ok(())
            }
            Ok(IndexGet::Fresh(value)) => self.store(frame, dst, value),
            Err(e) => {
                if or_null && e.message == "no such key" {
                    let null = self.heap.null();
                    self.put(frame, dst, null);
                    Ok(())
                } else {
                    self.throw_in(frame, &e.message)
                }
            }
        }
    }

    fn do_call(
        &mut self,
        frame: &mut Frame,
        dst: Ref,
        callee_ref: Ref,
        this: Option<Handle>,
        arg_refs: &[u32],
    ) -> Result<(), FatalError> {
        let callee_slot = self.slot(frame, callee_ref)?;
        let callee = callee_slot.borrow().clone();
        match callee {
            Value::Native(native) => {
                let args = self.flatten(frame, arg_refs)?;
                if !arity_ok(native.arity, native.variadic, args.len()) {
                    let msg = arity_msg(native.arity, native.variadic, args.len());
                    return self.throw_in(frame, &msg);
                }
                let mut ctx = NativeCtx::new(self, frame, this);
                let call = (native.func)(&mut ctx, &args);
                let fatal = ctx.take_fatal();
                match call {
                    NativeCall::Value(slot) => {
                        self.put(frame, dst, slot);
                        Ok(())
                    }
                    NativeCall::Thrown => Ok(()),
                    NativeCall::Fatal => Err(match fatal {
                        Some(f) => f,
                        None => self.fatal_in(frame, "native call failed"),
                    }),
                }
            }
            Value::Func(func) => {
                if self.call_depth + 1 > MAX_CALL_DEPTH {
                    return Err(self.fatal_in(frame, "maximum recursion depth exceeded"));
                }
                let args = self.flatten(frame, arg_refs)?;
                if !arity_ok(func.arity, func.variadic, args.len()) {
                    let msg = arity_msg(func.arity, func.variadic, args.len());
                    return self.throw_in(frame, &msg);
                }

                let (slots, handlers) = self.cache.acquire();
                if func.variadic {
                    let positional = (func.arity as usize).saturating_sub(1);
                    slots.borrow_mut().extend(args[..positional].iter().cloned());
                    let tail = Value::List(args[positional..].to_vec());
                    let tail = self.alloc_in(frame, tail)?;
                    slots.borrow_mut().push(tail);
                } else {
                    slots.borrow_mut().extend(args.iter().cloned());
                }

                let mut callee_frame = Frame {
                    module: func.module.clone(),
                    body: BodyRef::Extra {
                        index: func.body_index,
                        len: func.body_len,
                    },
                    slots,
                    handlers,
                    captures: func.captures,
                    this,
                    params: func.arity as u16,
                    globals: frame.globals.clone(),
                    ip: 0,
                    code_index: 0,
                };
                self.call_depth += 1;
                let result = self.run_frame(&mut callee_frame);
                self.call_depth -= 1;
                match result {
                    Ok(ret) => {
                        // Ordinary exit: park the storage for the next call.
                        self.cache.release(callee_frame.slots, callee_frame.handlers);
                        let is_err = matches!(&*ret.borrow(), Value::Err(_));
                        if is_err && self.deliver_err(frame, ret.clone()) {
                            return Ok(());
                        }
                        self.put(frame, dst, ret);
                        Ok(())
                    }
                    Err(fatal) => {
                        // Fatal exit drops the storage.
                        self.trace_in(frame);
                        Err(fatal)
                    }
                }
            }
            other => {
                let msg = format!("cannot call {}", other.type_name());
                self.throw_in(frame, &msg)
            }
        }
    }

    fn run_import(&mut self, frame: &mut Frame, dst: Ref, name: &str) -> Result<(), FatalError> {
        let options = self.options;
        match self.resolver.resolve(name, &options) {
            Resolution::Cached(value) => {
                self.put(frame, dst, value);
                Ok(())
            }
            Resolution::Native(thunk) => {
                let mut ctx = NativeCtx::new(self, frame, None);
                let call = thunk(&mut ctx, &[]);
                let fatal = ctx.take_fatal();
                match call {
                    NativeCall::Value(value) => {
                        self.resolver.cache_value(name, value.clone());
                        self.put(frame, dst, value);
                        Ok(())
                    }
                    NativeCall::Thrown => Ok(()),
                    NativeCall::Fatal => Err(match fatal {
                        Some(f) => f,
                        None => self.fatal_in(frame, "package initialization failed"),
                    }),
                }
            }
            Resolution::Execute(module) => {
                if self.call_depth + 1 > MAX_CALL_DEPTH {
                    return Err(self.fatal_in(frame, "maximum recursion depth exceeded"));
                }
                let slots: Slots = Rc::new(RefCell::new(Vec::new()));
                let mut module_frame = Frame {
                    module,
                    body: BodyRef::Main,
                    slots: slots.clone(),
                    handlers: ErrorHandlerStack::new(),
                    captures: Vec::new(),
                    this: None,
                    params: 0,
                    globals: slots,
                    ip: 0,
                    code_index: 0,
                };
                self.call_depth += 1;
                let result = self.run_frame(&mut module_frame);
                self.call_depth -= 1;
                match result {
                    Ok(value) => {
                        let is_err = matches!(&*value.borrow(), Value::Err(_));
                        if is_err {
                            if self.deliver_err(frame, value.clone()) {
                                return Ok(());
                            }
                            self.put(frame, dst, value);
                            return Ok(());
                        }
                        self.resolver.cache_value(name, value.clone());
                        self.put(frame, dst, value);
                        Ok(())
                    }
                    Err(fatal) => {
                        self.trace_in(frame);
                        Err(fatal)
                    }
                }
            }
            Resolution::Failed(message) => self.throw_in(frame, &message),
        }
    }
}

fn arity_ok(arity: u8, variadic: bool, supplied: usize) -> bool {
    if variadic {
        supplied + 1 >= arity as usize
    } else {
        supplied == arity as usize
    }
}

fn arity_msg(arity: u8, variadic: bool, supplied: usize) -> String {
    if variadic {
        format!(
            "expected at least {} arguments, got {}",
            arity.saturating_sub(1),
            supplied
        )
    } else {
        format!("expected {} arguments, got {}", arity, supplied)
    }
}

/// Binary arithmetic type rule: if either operand is `num` the result is
/// `num` (except `div_floor`, which stays `int`); otherwise everything is
/// checked 64-bit integer arithmetic. Bit operations require ints.
fn numeric_binop(op: Op, a: &Value, b: &Value) -> Result<Value, String> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => int_binop(op, *x, *y),
        (Value::Num(x), Value::Num(y)) => float_binop(op, *x, *y),
        (Value::Int(x), Value::Num(y)) => float_binop(op, *x as f64, *y),
        (Value::Num(x), Value::Int(y)) => float_binop(op, *x, *y as f64),
        _ => Err(format!(
            "cannot {} {} and {}",
            op.mnemonic(),
            a.type_name(),
            b.type_name()
        )),
    }
}

fn int_binop(op: Op, x: i64, y: i64) -> Result<Value, String> {
    const OVERFLOW: &str = "operation overflowed";
    match op {
        Op::Add => x.checked_add(y).map(Value::Int).ok_or_else(|| OVERFLOW.into()),
        Op::Sub => x.checked_sub(y).map(Value::Int).ok_or_else(|| OVERFLOW.into()),
        Op::Mul => x.checked_mul(y).map(Value::Int).ok_or_else(|| OVERFLOW.into()),
        Op::Div => {
            if y == 0 {
                Err("division by zero".into())
            } else {
                Ok(Value::Num(x as f64 / y as f64))
            }
        }
        Op::DivFloor => {
            if y == 0 {
                return Err("division by zero".into());
            }
            let q = x.checked_div(y).ok_or_else(|| String::from(OVERFLOW))?;
            let r = x % y;
            let floored = if r != 0 && (r < 0) != (y < 0) { q - 1 } else { q };
            Ok(Value::Int(floored))
        }
        Op::Rem => {
            if y < 0 {
                Err("rem requires a non-negative denominator".into())
            } else if y == 0 {
                Err("division by zero".into())
            } else {
                // Sign follows the dividend.
                Ok(Value::Int(x % y))
            }
        }
        Op::Pow => {
            if y < 0 {
                return Err("negative exponent".into());
            }
            let exp = u32::try_from(y).map_err(|_| String::from(OVERFLOW))?;
            x.checked_pow(exp).map(Value::Int).ok_or_else(|| OVERFLOW.into())
        }
        Op::LShift => {
            if y < 0 {
                Err("negative shift".into())
            } else if y > 63 {
                Ok(Value::Int(0))
            } else {
                Ok(Value::Int(x.wrapping_shl(y as u32)))
            }
        }
        Op::RShift => {
            if y < 0 {
                Err("negative shift".into())
            } else if y > 63 {
                // Sign-saturating: negative operands pin to maxInt.
                Ok(Value::Int(if x >= 0 { 0 } else { i64::MAX }))
            } else {
                Ok(Value::Int(x >> y))
            }
        }
        Op::BitAnd => Ok(Value::Int(x & y)),
        Op::BitOr => Ok(Value::Int(x | y)),
        Op::BitXor => Ok(Value::Int(x ^ y)),
        _ => Err(format!("{} is not arithmetic", op.mnemonic())),
    }
}

fn float_binop(op: Op, x: f64, y: f64) -> Result<Value, String> {
    match op {
        Op::Add => Ok(Value::Num(x + y)),
        Op::Sub => Ok(Value::Num(x - y)),
        Op::Mul => Ok(Value::Num(x * y)),
        Op::Div => {
            if y == 0.0 {
                Err("division by zero".into())
            } else {
                Ok(Value::Num(x / y))
            }
        }
        Op::DivFloor => {
            if y == 0.0 {
                Err("division by zero".into())
            } else {
                Ok(Value::Int((x / y).floor() as i64))
            }
        }
        Op::Rem => {
            if y < 0.0 {
                Err("rem requires a non-negative denominator".into())
            } else if y == 0.0 {
                Err("division by zero".into())
            } else {
                Ok(Value::Num(x % y))
            }
        }
        Op::Pow => Ok(Value::Num(x.powf(y))),
        Op::LShift | Op::RShift | Op::BitAnd | Op::BitOr | Op::BitXor => {
            Err(format!("cannot {} num operands", op.mnemonic()))
        }
        _ => Err(format!("{} is not arithmetic", op.mnemonic())),
    }
}

/// Ordering comparisons require numeric operands.
fn ordering(op: Op, a: &Value, b: &Value) -> Result<bool, String> {
    let (x, y) = match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            return Ok(match op {
                Op::LessThan => x < y,
                Op::LessThanEqual => x <= y,
                Op::GreaterThan => x > y,
                Op::GreaterThanEqual => x >= y,
                _ => false,
            });
        }
        (Value::Int(x), Value::Num(y)) => (*x as f64, *y),
        (Value::Num(x), Value::Int(y)) => (*x, *y as f64),
        (Value::Num(x), Value::Num(y)) => (*x, *y),
        _ => {
            return Err(format!(
                "cannot compare {} and {}",
                a.type_name(),
                b.type_name()
            ))
        }
    };
    Ok(match op {
        Op::LessThan => x < y,
        Op::LessThanEqual => x <= y,
        Op::GreaterThan => x > y,
        Op::GreaterThanEqual => x >= y,
        _ => false,
    })
}
