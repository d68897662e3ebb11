//! Disassembler for compiled modules.
//!
//! Renders the `main` body and every function body reachable from a
//! `build_func` word, one instruction per line. Used by the CLI's
//! `--disassemble` flag and by tests poking at generated code.

use std::fmt::Write;

use crate::module::Module;
use crate::opcode::{Op, OpData, Primitive};

/// Render a module listing.
pub fn disassemble(module: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "; module {}", module.debug.source_path);
    render_body(&mut out, module, "main", &module.main);

    // Function bodies live in the extra pool; walk build_func words to
    // find them.
    let mut seen = Vec::new();
    for (i, op) in module.code.ops.iter().enumerate() {
        if *op != Op::BuildFunc {
            continue;
        }
        let OpData::Extra { index, len } = module.code.data[i] else {
            continue;
        };
        let Some(layout) = module.func_layout(index, len) else {
            continue;
        };
        if seen.contains(&layout.body_index) {
            continue;
        }
        seen.push(layout.body_index);
        let body = module.extra_slice(layout.body_index, layout.body_len).to_vec();
        let header = format!(
            "fn@{} (arity {}{})",
            layout.body_index,
            layout.arity,
            if layout.variadic { ", variadic" } else { "" }
        );
        render_body(&mut out, module, &header, &body);
    }
    out
}

fn render_body(out: &mut String, module: &Module, name: &str, body: &[u32]) {
    let _ = writeln!(out, "{}:", name);
    for (i, &word) in body.iter().enumerate() {
        let idx = word as usize;
        let op = module.code.ops.get(idx).copied().unwrap_or(Op::Nop);
        let data = module
            .code
            .data
            .get(idx)
            .copied()
            .unwrap_or(OpData::None);
        let _ = writeln!(out, "  {:4}  {:<22}{}", i, op.mnemonic(), render_data(module, data));
    }
}

fn render_data(module: &Module, data: OpData) -> String {
    match data {
        OpData::None => String::new(),
        OpData::Un(r) => format!("{}", r),
        OpData::Bin { lhs, rhs } => format!("{}, {}", lhs, rhs),
        OpData::BinTy { operand, ty } => format!("{}, {}", operand, ty.name()),
        OpData::Extra { index, len } => {
            let words = module.extra_slice(index, len);
            format!("extra[{}; {}] = {:?}", index, len, words)
        }
        OpData::Jump(offset) => format!("-> {}", offset),
        OpData::JumpCond { operand, offset } => format!("{}, -> {}", operand, offset),
        OpData::UnImm { operand, imm } => format!("{}, #{}", operand, imm as i32),
        OpData::CaptureIdx(idx) => format!("capture {}", idx),
        OpData::Range { start, extra } => format!("{}, extra[{}]", start, extra),
        OpData::Primitive(Primitive::Null) => "null".to_string(),
        OpData::Primitive(Primitive::True) => "true".to_string(),
        OpData::Primitive(Primitive::False) => "false".to_string(),
        OpData::Int(v) => format!("{}", v),
        OpData::Num(v) => format!("{}", v),
        OpData::Str { offset, len } => format!("{:?}", module.str_at(offset, len)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ModuleBuilder;
    use crate::opcode::Ref;

    #[test]
    fn test_disassemble_lists_main_and_functions() {
        let mut b = ModuleBuilder::new("demo.tern");
        b.start_function();
        b.emit(Op::Int, OpData::Int(1));
        b.emit(Op::Ret, OpData::Un(Ref(1)));
        let func = b.finish_function(1, false, &[]);
        b.emit(Op::BuildFunc, func);
        b.emit(Op::RetNull, OpData::None);
        let module = b.finish();

        let listing = disassemble(&module);
        assert!(listing.contains("main:"));
        assert!(listing.contains("build_func"));
        assert!(listing.contains("fn@"));
        assert!(listing.contains("ret_null"));
    }

    #[test]
    fn test_disassemble_renders_negative_get_int() {
        let mut b = ModuleBuilder::new("demo.tern");
        b.emit(
            Op::GetInt,
            OpData::UnImm {
                operand: Ref(0),
                imm: (-1i32) as u32,
            },
        );
        let listing = disassemble(&b.finish());
        assert!(listing.contains("#-1"));
    }
}
