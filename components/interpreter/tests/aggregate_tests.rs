//! Aggregate construction, indexing, destructuring, tagged values, casts.

use std::rc::Rc;

use bytecode_system::{Module, ModuleBuilder, Op, OpData, Ref, TypeTag};
use core_types::{eql, handle, FatalError, Handle, StrValue, Value};
use interpreter::{Vm, VmOptions};

fn run(module: Rc<Module>) -> Result<Handle, FatalError> {
    let mut vm = Vm::new(VmOptions::default());
    vm.run_module(module)
}

fn run_ok(module: Rc<Module>) -> Handle {
    run(module).expect("execution failed")
}

fn str_val(s: &str) -> Value {
    Value::Str(StrValue::shared(s))
}

#[test]
fn test_negative_index_reads_from_the_end() {
    // let xs = [1, 2, 3]; xs[-1]
    let mut b = ModuleBuilder::new("agg.tern");
    b.emit(Op::Int, OpData::Int(1));
    b.emit(Op::Int, OpData::Int(2));
    b.emit(Op::Int, OpData::Int(3));
    let elems = b.refs(&[Ref(0), Ref(1), Ref(2)]);
    b.emit(Op::BuildList, elems);
    b.emit(
        Op::GetInt,
        OpData::UnImm {
            operand: Ref(3),
            imm: (-1i32) as u32,
        },
    );
    b.emit(Op::Ret, OpData::Un(Ref(4)));

    let result = run_ok(b.finish());
    assert!(eql(&result.borrow(), &Value::Int(3)));
}

#[test]
fn test_index_out_of_bounds_throws() {
    let mut b = ModuleBuilder::new("agg.tern");
    b.emit(Op::Int, OpData::Int(1));
    let elems = b.refs(&[Ref(0)]);
    b.emit(Op::BuildList, elems);
    b.emit(
        Op::GetInt,
        OpData::UnImm {
            operand: Ref(1),
            imm: 5,
        },
    );
    b.emit(Op::RetNull, OpData::None);

    let err = run(b.finish()).unwrap_err();
    assert_eq!(err.message, "index out of bounds");
}

#[test]
fn test_set_then_get() {
    // xs[1] = 9; xs[1]
    let mut b = ModuleBuilder::new("agg.tern");
    b.emit(Op::Int, OpData::Int(1));
    b.emit(Op::Int, OpData::Int(2));
    let elems = b.refs(&[Ref(0), Ref(1)]);
    b.emit(Op::BuildList, elems);
    b.emit(Op::Int, OpData::Int(1));
    b.emit(Op::Int, OpData::Int(9));
    let set = b.refs(&[Ref(2), Ref(3), Ref(4)]);
    b.emit(Op::Set, set);
    b.emit(
        Op::GetInt,
        OpData::UnImm {
            operand: Ref(2),
            imm: 1,
        },
    );
    b.emit(Op::Ret, OpData::Un(Ref(6)));

    let result = run_ok(b.finish());
    assert!(eql(&result.borrow(), &Value::Int(9)));
}

#[test]
fn test_map_literal_get_and_missing_key() {
    let mut b = ModuleBuilder::new("agg.tern");
    let ka = b.str_data("a");
    b.emit(Op::Str, ka);
    b.emit(Op::Int, OpData::Int(1));
    let pairs = b.refs(&[Ref(0), Ref(1)]);
    b.emit(Op::BuildMap, pairs);
    // get "a" -> 1
    let ka2 = b.str_data("a");
    b.emit(Op::Str, ka2);
    b.emit(
        Op::Get,
        OpData::Bin {
            lhs: Ref(2),
            rhs: Ref(3),
        },
    );
    // get_or_null "b" -> null
    let kb = b.str_data("b");
    b.emit(Op::Str, kb);
    b.emit(
        Op::GetOrNull,
        OpData::Bin {
            lhs: Ref(2),
            rhs: Ref(5),
        },
    );
    let out = b.refs(&[Ref(4), Ref(6)]);
    b.emit(Op::BuildTuple, out);
    b.emit(Op::Ret, OpData::Un(Ref(7)));

    let result = run_ok(b.finish());
    let expect = Value::Tuple(vec![handle(Value::Int(1)), handle(Value::Null)]);
    assert!(eql(&result.borrow(), &expect));
}

#[test]
fn test_missing_map_key_throws() {
    let mut b = ModuleBuilder::new("agg.tern");
    let ka = b.str_data("a");
    b.emit(Op::Str, ka);
    b.emit(Op::Int, OpData::Int(1));
    let pairs = b.refs(&[Ref(0), Ref(1)]);
    b.emit(Op::BuildMap, pairs);
    let kb = b.str_data("b");
    b.emit(Op::Str, kb);
    b.emit(
        Op::Get,
        OpData::Bin {
            lhs: Ref(2),
            rhs: Ref(3),
        },
    );
    b.emit(Op::RetNull, OpData::None);

    let err = run(b.finish()).unwrap_err();
    assert_eq!(err.message, "no such key");
}

#[test]
fn test_spread_roundtrip_preserves_tuple() {
    // (1, 2) == tuple(...(1, 2))
    let mut b = ModuleBuilder::new("agg.tern");
    b.emit(Op::Int, OpData::Int(1));
    b.emit(Op::Int, OpData::Int(2));
    let elems = b.refs(&[Ref(0), Ref(1)]);
    b.emit(Op::BuildTuple, elems);
    b.emit(Op::Spread, OpData::Un(Ref(2)));
    let rebuilt = b.refs(&[Ref(3)]);
    b.emit(Op::BuildTuple, rebuilt);
    b.emit(
        Op::Equal,
        OpData::Bin {
            lhs: Ref(2),
            rhs: Ref(4),
        },
    );
    b.emit(Op::Ret, OpData::Un(Ref(5)));

    let result = run_ok(b.finish());
    assert!(eql(&result.borrow(), &Value::Bool(true)));
}

#[test]
fn test_spread_range_materializes() {
    // [...1..4] == [1, 2, 3]
    let mut b = ModuleBuilder::new("agg.tern");
    b.emit(Op::Int, OpData::Int(1));
    b.emit(Op::Int, OpData::Int(4));
    let end = b.extra_words(&[1]);
    b.emit(
        Op::BuildRange,
        OpData::Range {
            start: Ref(0),
            extra: end,
        },
    );
    b.emit(Op::Spread, OpData::Un(Ref(2)));
    let elems = b.refs(&[Ref(3)]);
    b.emit(Op::BuildList, elems);
    b.emit(Op::Ret, OpData::Un(Ref(4)));

    let result = run_ok(b.finish());
    let expect = Value::List(vec![
        handle(Value::Int(1)),
        handle(Value::Int(2)),
        handle(Value::Int(3)),
    ]);
    assert!(eql(&result.borrow(), &expect));
}

#[test]
fn test_spread_str_throws() {
    let mut b = ModuleBuilder::new("agg.tern");
    let s = b.str_data("abc");
    b.emit(Op::Str, s);
    b.emit(Op::Spread, OpData::Un(Ref(0)));
    b.emit(Op::RetNull, OpData::None);

    let err = run(b.finish()).unwrap_err();
    assert_eq!(err.message, "cannot spread str");
}

#[test]
fn test_append_opcode_grows_list() {
    let mut b = ModuleBuilder::new("agg.tern");
    let elems = b.refs(&[]);
    b.emit(Op::BuildList, elems);
    b.emit(Op::Int, OpData::Int(5));
    b.emit(
        Op::Append,
        OpData::Bin {
            lhs: Ref(0),
            rhs: Ref(1),
        },
    );
    b.emit(Op::Ret, OpData::Un(Ref(0)));

    let result = run_ok(b.finish());
    let expect = Value::List(vec![handle(Value::Int(5))]);
    assert!(eql(&result.borrow(), &expect));
}

#[test]
fn test_in_operator() {
    let mut b = ModuleBuilder::new("agg.tern");
    b.emit(Op::Int, OpData::Int(2));
    b.emit(Op::Int, OpData::Int(1));
    b.emit(Op::Int, OpData::Int(2));
    let elems = b.refs(&[Ref(1), Ref(2)]);
    b.emit(Op::BuildList, elems);
    b.emit(
        Op::In,
        OpData::Bin {
            lhs: Ref(0),
            rhs: Ref(3),
        },
    );
    b.emit(Op::Ret, OpData::Un(Ref(4)));

    let result = run_ok(b.finish());
    assert!(eql(&result.borrow(), &Value::Bool(true)));
}

#[test]
fn test_check_len_and_assert_len() {
    let mut b = ModuleBuilder::new("agg.tern");
    b.emit(Op::Int, OpData::Int(1));
    b.emit(Op::Int, OpData::Int(2));
    let elems = b.refs(&[Ref(0), Ref(1)]);
    b.emit(Op::BuildTuple, elems);
    b.emit(
        Op::CheckLen,
        OpData::UnImm {
            operand: Ref(2),
            imm: 2,
        },
    );
    b.emit(
        Op::AssertLen,
        OpData::UnImm {
            operand: Ref(2),
            imm: 2,
        },
    );
    b.emit(Op::Ret, OpData::Un(Ref(3)));

    let result = run_ok(b.finish());
    assert!(eql(&result.borrow(), &Value::Bool(true)));
}

#[test]
fn test_assert_len_mismatch_throws() {
    let mut b = ModuleBuilder::new("agg.tern");
    b.emit(Op::Int, OpData::Int(1));
    let elems = b.refs(&[Ref(0)]);
    b.emit(Op::BuildTuple, elems);
    b.emit(
        Op::AssertLen,
        OpData::UnImm {
            operand: Ref(1),
            imm: 3,
        },
    );
    b.emit(Op::RetNull, OpData::None);

    let err = run(b.finish()).unwrap_err();
    assert_eq!(err.message, "expected length 3, got 1");
}

#[test]
fn test_spread_dest_extracts_tail() {
    // let [_, ...rest] = [1, 2, 3]; rest == [2, 3]
    let mut b = ModuleBuilder::new("agg.tern");
    b.emit(Op::Int, OpData::Int(1));
    b.emit(Op::Int, OpData::Int(2));
    b.emit(Op::Int, OpData::Int(3));
    let elems = b.refs(&[Ref(0), Ref(1), Ref(2)]);
    b.emit(Op::BuildList, elems);
    b.emit(
        Op::SpreadDest,
        OpData::UnImm {
            operand: Ref(3),
            imm: 1,
        },
    );
    b.emit(Op::Ret, OpData::Un(Ref(4)));

    let result = run_ok(b.finish());
    let expect = Value::List(vec![handle(Value::Int(2)), handle(Value::Int(3))]);
    assert!(eql(&result.borrow(), &expect));
}

#[test]
fn test_tagged_roundtrip_and_mismatch() {
    // Some: 5 |> unwrap_tagged "Some" -> 5
    let mut b = ModuleBuilder::new("agg.tern");
    b.emit(Op::Int, OpData::Int(5));
    let tagged = b.tagged_data("Some", Ref(0));
    b.emit(Op::BuildTagged, tagged);
    let unwrap = b.unwrap_tagged_data(Ref(1), "Some");
    b.emit(Op::UnwrapTagged, unwrap);
    let miss = b.unwrap_tagged_data(Ref(1), "None");
    b.emit(Op::UnwrapTaggedOrNull, miss);
    let out = b.refs(&[Ref(2), Ref(3)]);
    b.emit(Op::BuildTuple, out);
    b.emit(Op::Ret, OpData::Un(Ref(4)));

    let result = run_ok(b.finish());
    let expect = Value::Tuple(vec![handle(Value::Int(5)), handle(Value::Null)]);
    assert!(eql(&result.borrow(), &expect));
}

#[test]
fn test_unwrap_tagged_wrong_name_throws() {
    let mut b = ModuleBuilder::new("agg.tern");
    b.emit(Op::Int, OpData::Int(5));
    let tagged = b.tagged_data("Some", Ref(0));
    b.emit(Op::BuildTagged, tagged);
    let unwrap = b.unwrap_tagged_data(Ref(1), "Other");
    b.emit(Op::UnwrapTagged, unwrap);
    b.emit(Op::RetNull, OpData::None);

    let err = run(b.finish()).unwrap_err();
    assert_eq!(err.message, "expected tagged Other");
}

#[test]
fn test_cast_opcode() {
    // "42" as int + 0.0 as ... keep simple: cast str -> int
    let mut b = ModuleBuilder::new("agg.tern");
    let s = b.str_data("42");
    b.emit(Op::Str, s);
    b.emit(
        Op::Cast,
        OpData::BinTy {
            operand: Ref(0),
            ty: TypeTag::Int,
        },
    );
    b.emit(Op::Ret, OpData::Un(Ref(1)));

    let result = run_ok(b.finish());
    assert!(eql(&result.borrow(), &Value::Int(42)));
}

#[test]
fn test_cast_failure_throws() {
    let mut b = ModuleBuilder::new("agg.tern");
    let s = b.str_data("nope");
    b.emit(Op::Str, s);
    b.emit(
        Op::Cast,
        OpData::BinTy {
            operand: Ref(0),
            ty: TypeTag::Int,
        },
    );
    b.emit(Op::RetNull, OpData::None);

    let err = run(b.finish()).unwrap_err();
    assert_eq!(err.message, "cannot cast str to int");
}

#[test]
fn test_len_attribute_and_method_dispatch() {
    // xs.append(7); (xs, xs.len)
    let mut b = ModuleBuilder::new("agg.tern");
    b.emit(Op::Int, OpData::Int(1));
    let elems = b.refs(&[Ref(0)]);
    b.emit(Op::BuildList, elems);
    let append = b.str_data("append");
    b.emit(Op::Str, append);
    b.emit(
        Op::Get,
        OpData::Bin {
            lhs: Ref(1),
            rhs: Ref(2),
        },
    );
    b.emit(Op::Int, OpData::Int(7));
    let call = b.refs(&[Ref(3), Ref(1), Ref(4)]);
    b.emit(Op::ThisCall, call);
    let len_name = b.str_data("len");
    b.emit(Op::Str, len_name);
    b.emit(
        Op::Get,
        OpData::Bin {
            lhs: Ref(1),
            rhs: Ref(6),
        },
    );
    let out = b.refs(&[Ref(1), Ref(7)]);
    b.emit(Op::BuildTuple, out);
    b.emit(Op::Ret, OpData::Un(Ref(8)));

    let result = run_ok(b.finish());
    let expect = Value::Tuple(vec![
        handle(Value::List(vec![
            handle(Value::Int(1)),
            handle(Value::Int(7)),
        ])),
        handle(Value::Int(2)),
    ]);
    assert!(eql(&result.borrow(), &expect));
}

#[test]
fn test_unknown_method_throws() {
    let mut b = ModuleBuilder::new("agg.tern");
    let elems = b.refs(&[]);
    b.emit(Op::BuildList, elems);
    let name = b.str_data("frobnicate");
    b.emit(Op::Str, name);
    b.emit(
        Op::Get,
        OpData::Bin {
            lhs: Ref(0),
            rhs: Ref(1),
        },
    );
    b.emit(Op::RetNull, OpData::None);

    let err = run(b.finish()).unwrap_err();
    assert_eq!(err.message, "no such method: frobnicate");
}

#[test]
fn test_aggregate_members_do_not_alias_scratch_slots() {
    // Building a list from an int slot then overwriting the slot must not
    // change the list member.
    let mut b = ModuleBuilder::new("agg.tern");
    b.emit(Op::Int, OpData::Int(1));
    let elems = b.refs(&[Ref(0)]);
    b.emit(Op::BuildList, elems);
    b.emit(Op::Int, OpData::Int(99));
    b.emit(
        Op::Move,
        OpData::Bin {
            lhs: Ref(2),
            rhs: Ref(0),
        },
    );
    b.emit(Op::Ret, OpData::Un(Ref(1)));

    let result = run_ok(b.finish());
    let expect = Value::List(vec![handle(Value::Int(1))]);
    assert!(eql(&result.borrow(), &expect));
}

#[test]
fn test_get_with_range_index_throws() {
    let mut b = ModuleBuilder::new("agg.tern");
    b.emit(Op::Int, OpData::Int(1));
    let elems = b.refs(&[Ref(0)]);
    b.emit(Op::BuildList, elems);
    b.emit(Op::Int, OpData::Int(0));
    b.emit(Op::Int, OpData::Int(1));
    let end = b.extra_words(&[3]);
    b.emit(
        Op::BuildRange,
        OpData::Range {
            start: Ref(2),
            extra: end,
        },
    );
    b.emit(
        Op::Get,
        OpData::Bin {
            lhs: Ref(1),
            rhs: Ref(4),
        },
    );
    b.emit(Op::RetNull, OpData::None);

    let err = run(b.finish()).unwrap_err();
    assert_eq!(err.message, "list index must be int, got range");
}

#[test]
fn test_str_indexing_yields_codepoint() {
    let mut b = ModuleBuilder::new("agg.tern");
    let s = b.str_data("héllo");
    b.emit(Op::Str, s);
    b.emit(
        Op::GetInt,
        OpData::UnImm {
            operand: Ref(0),
            imm: 1,
        },
    );
    b.emit(Op::Ret, OpData::Un(Ref(1)));

    let result = run_ok(b.finish());
    assert!(eql(&result.borrow(), &str_val("é")));
}
