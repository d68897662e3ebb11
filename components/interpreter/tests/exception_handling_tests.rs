//! Error handlers, explicit throw, err returns, and the discard rule.

use std::rc::Rc;

use bytecode_system::{Module, ModuleBuilder, Op, OpData, Ref};
use core_types::{eql, FatalError, Handle, StrValue, Value};
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
fn test_try_catch_throw() {
    // try { error "boom" } catch e { e }
    let mut b = ModuleBuilder::new("catch.tern");
    b.emit(
        Op::PushErrHandler,
        OpData::JumpCond {
            operand: Ref(0),
            offset: 4,
        },
    );
    let boom = b.str_data("boom");
    b.emit(Op::Str, boom);
    b.emit(Op::Throw, OpData::Un(Ref(1)));
    b.emit(Op::PopErrHandler, OpData::Jump(6));
    // 4: catch body
    b.emit(Op::UnwrapError, OpData::Un(Ref(0)));
    b.emit(Op::Ret, OpData::Un(Ref(4)));
    // 6:
    b.emit(Op::RetNull, OpData::None);

    let result = run_ok(b.finish());
    assert!(eql(&result.borrow(), &str_val("boom")));
}

#[test]
fn test_no_throw_skips_handler_body() {
    // try { 10 } catch { 20 }: control must reach the instruction after
    // pop_err_handler without entering the catch body.
    let mut b = ModuleBuilder::new("catch.tern");
    b.emit(
        Op::PushErrHandler,
        OpData::JumpCond {
            operand: Ref(0),
            offset: 3,
        },
    );
    b.emit(Op::Int, OpData::Int(10));
    b.emit(Op::PopErrHandler, OpData::Jump(5));
    // 3..4: catch body clobbers the result slot; must be skipped.
    b.emit(Op::Int, OpData::Int(20));
    b.emit(
        Op::Copy,
        OpData::Bin {
            lhs: Ref(3),
            rhs: Ref(1),
        },
    );
    // 5:
    b.emit(Op::Ret, OpData::Un(Ref(1)));

    let result = run_ok(b.finish());
    assert!(eql(&result.borrow(), &Value::Int(10)));
}

#[test]
fn test_top_level_throw_returns_err_value() {
    // throw with no handler anywhere: the frame's result is the err.
    let mut b = ModuleBuilder::new("catch.tern");
    let boom = b.str_data("boom");
    b.emit(Op::Str, boom);
    b.emit(Op::Throw, OpData::Un(Ref(0)));

    let result = run_ok(b.finish());
    let expect = Value::Err(core_types::handle(str_val("boom")));
    assert!(eql(&result.borrow(), &expect));
}

#[test]
fn test_callee_err_redirects_to_caller_handler() {
    let mut b = ModuleBuilder::new("catch.tern");

    // fn() { throw "bad" }
    b.start_function();
    let bad = b.str_data("bad");
    b.emit(Op::Str, bad);
    b.emit(Op::Throw, OpData::Un(Ref(0)));
    let func = b.finish_function(0, false, &[]);

    b.emit(Op::BuildFunc, func);
    b.emit(
        Op::PushErrHandler,
        OpData::JumpCond {
            operand: Ref(1),
            offset: 5,
        },
    );
    b.emit(Op::CallZero, OpData::Un(Ref(0)));
    b.emit(Op::PopErrHandler, OpData::Jump(7));
    b.emit(Op::Nop, OpData::None);
    // 5: catch
    b.emit(Op::UnwrapError, OpData::Un(Ref(1)));
    b.emit(Op::Ret, OpData::Un(Ref(5)));
    // 7:
    b.emit(Op::RetNull, OpData::None);

    let result = run_ok(b.finish());
    assert!(eql(&result.borrow(), &str_val("bad")));
}

#[test]
fn test_callee_err_without_handler_propagates_as_value() {
    let mut b = ModuleBuilder::new("catch.tern");

    b.start_function();
    let bad = b.str_data("bad");
    b.emit(Op::Str, bad);
    b.emit(Op::Throw, OpData::Un(Ref(0)));
    let func = b.finish_function(0, false, &[]);

    b.emit(Op::BuildFunc, func);
    b.emit(Op::CallZero, OpData::Un(Ref(0)));
    b.emit(Op::Ret, OpData::Un(Ref(1)));

    let result = run_ok(b.finish());
    assert_eq!(result.borrow().type_name(), "err");
}

#[test]
fn test_discard_err_is_fatal() {
    let mut b = ModuleBuilder::new("catch.tern");
    let bad = b.str_data("bad");
    b.emit(Op::Str, bad);
    b.emit(Op::BuildError, OpData::Un(Ref(0)));
    b.emit(Op::Discard, OpData::Un(Ref(1)));
    b.emit(Op::RetNull, OpData::None);

    let err = run(b.finish()).unwrap_err();
    assert!(err.message.contains("discarded error"));
    assert!(err.message.contains("bad"));
}

#[test]
fn test_discard_ordinary_value_succeeds() {
    let mut b = ModuleBuilder::new("catch.tern");
    b.emit(Op::Int, OpData::Int(1));
    b.emit(Op::Discard, OpData::Un(Ref(0)));
    b.emit(Op::Int, OpData::Int(2));
    b.emit(Op::Ret, OpData::Un(Ref(2)));

    let result = run_ok(b.finish());
    assert!(eql(&result.borrow(), &Value::Int(2)));
}

#[test]
fn test_build_error_unwrap_roundtrip() {
    let mut b = ModuleBuilder::new("catch.tern");
    b.emit(Op::Int, OpData::Int(42));
    b.emit(Op::BuildError, OpData::Un(Ref(0)));
    b.emit(Op::UnwrapError, OpData::Un(Ref(1)));
    b.emit(Op::Ret, OpData::Un(Ref(2)));

    let result = run_ok(b.finish());
    assert!(eql(&result.borrow(), &Value::Int(42)));
}

#[test]
fn test_unwrap_error_on_non_err_throws() {
    let mut b = ModuleBuilder::new("catch.tern");
    b.emit(Op::Int, OpData::Int(1));
    b.emit(Op::UnwrapError, OpData::Un(Ref(0)));
    b.emit(Op::RetNull, OpData::None);

    let err = run(b.finish()).unwrap_err();
    assert_eq!(err.message, "expected err, got int");
}

#[test]
fn test_unwrap_error_or_jump() {
    // Non-err operand jumps; err operand yields the payload.
    let mut b = ModuleBuilder::new("catch.tern");
    b.emit(Op::Int, OpData::Int(1));
    b.emit(
        Op::UnwrapErrorOrJump,
        OpData::JumpCond {
            operand: Ref(0),
            offset: 3,
        },
    );
    b.emit(Op::RetNull, OpData::None);
    // 3: jump target
    b.emit(Op::Int, OpData::Int(7));
    b.emit(Op::Ret, OpData::Un(Ref(3)));

    let result = run_ok(b.finish());
    assert!(eql(&result.borrow(), &Value::Int(7)));
}

#[test]
fn test_nested_handlers_unwind_in_order() {
    // Inner handler catches first; a second throw from the catch body
    // reaches the outer handler.
    let mut b = ModuleBuilder::new("catch.tern");
    b.emit(
        Op::PushErrHandler,
        OpData::JumpCond {
            operand: Ref(0),
            offset: 7,
        },
    );
    b.emit(
        Op::PushErrHandler,
        OpData::JumpCond {
            operand: Ref(1),
            offset: 4,
        },
    );
    let first = b.str_data("first");
    b.emit(Op::Str, first);
    b.emit(Op::Throw, OpData::Un(Ref(2)));
    // 4: inner catch, rethrows
    let second = b.str_data("second");
    b.emit(Op::Str, second);
    b.emit(Op::Throw, OpData::Un(Ref(4)));
    b.emit(Op::Nop, OpData::None);
    // 7: outer catch
    b.emit(Op::UnwrapError, OpData::Un(Ref(0)));
    b.emit(Op::Ret, OpData::Un(Ref(7)));

    let result = run_ok(b.finish());
    assert!(eql(&result.borrow(), &str_val("second")));
}
