//! Binary serialization for compiled modules.
//!
//! The `.tbc` layout: magic `TNBC`, a version byte, then little-endian
//! sections for code, main, extra, strings, and debug info. The exact
//! layout is private to this module; everything else goes through
//! [`Module::to_bytes`] and [`Module::from_bytes`].

use std::rc::Rc;

use crate::module::{Code, DebugInfo, Module};
use crate::opcode::{Op, OpData, Primitive, Ref, TypeTag};

const MAGIC: &[u8; 4] = b"TNBC";
const VERSION: u8 = 1;

/// Op <-> byte mapping table. Decode indexes it; encode scans it. Order is
/// part of the binary format and must only ever be appended to.
const OP_TABLE: &[Op] = &[
    Op::Nop,
    Op::Primitive,
    Op::Int,
    Op::Num,
    Op::Str,
    Op::BuildTuple,
    Op::BuildList,
    Op::BuildMap,
    Op::BuildError,
    Op::BuildErrorNull,
    Op::BuildTagged,
    Op::BuildTaggedNull,
    Op::BuildFunc,
    Op::BuildRange,
    Op::BuildRangeStep,
    Op::Add,
    Op::Sub,
    Op::Mul,
    Op::Div,
    Op::DivFloor,
    Op::Rem,
    Op::Pow,
    Op::LShift,
    Op::RShift,
    Op::BitAnd,
    Op::BitOr,
    Op::BitXor,
    Op::Negate,
    Op::BoolNot,
    Op::BitNot,
    Op::Equal,
    Op::NotEqual,
    Op::LessThan,
    Op::LessThanEqual,
    Op::GreaterThan,
    Op::GreaterThanEqual,
    Op::Get,
    Op::GetInt,
    Op::GetOrNull,
    Op::Set,
    Op::Append,
    Op::In,
    Op::Spread,
    Op::CheckLen,
    Op::AssertLen,
    Op::SpreadDest,
    Op::UnwrapError,
    Op::UnwrapTagged,
    Op::UnwrapTaggedOrNull,
    Op::Cast,
    Op::CopyUn,
    Op::Copy,
    Op::Move,
    Op::LoadGlobal,
    Op::LoadCapture,
    Op::LoadThis,
    Op::Jump,
    Op::JumpIfTrue,
    Op::JumpIfFalse,
    Op::JumpIfNull,
    Op::PushErrHandler,
    Op::PopErrHandler,
    Op::UnwrapErrorOrJump,
    Op::IterInit,
    Op::IterNext,
    Op::Call,
    Op::CallOne,
    Op::CallZero,
    Op::ThisCall,
    Op::ThisCallZero,
    Op::Import,
    Op::Discard,
    Op::Ret,
    Op::RetNull,
    Op::Throw,
];

const TYPE_TABLE: &[TypeTag] = &[
    TypeTag::Bool,
    TypeTag::Int,
    TypeTag::Num,
    TypeTag::Str,
    TypeTag::Tuple,
    TypeTag::List,
];

fn op_to_byte(op: Op) -> u8 {
    OP_TABLE
        .iter()
        .position(|&o| o == op)
        .map(|i| i as u8)
        .unwrap_or(0)
}

impl Module {
    /// Serialize to the `.tbc` binary format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.push(VERSION);

        write_u32(&mut out, self.code.len() as u32);
        for (op, data) in self.code.ops.iter().zip(&self.code.data) {
            out.push(op_to_byte(*op));
            encode_data(&mut out, data);
        }

        write_words(&mut out, &self.main);
        write_words(&mut out, &self.extra);

        write_u32(&mut out, self.strings.len() as u32);
        out.extend_from_slice(&self.strings);

        write_u32(&mut out, self.debug.source_path.len() as u32);
        out.extend_from_slice(self.debug.source_path.as_bytes());
        write_u32(&mut out, self.debug.source.len() as u32);
        out.extend_from_slice(&self.debug.source);
        write_words(&mut out, &self.debug.lines);

        out
    }

    /// Deserialize from the `.tbc` binary format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Rc<Module>, String> {
        let mut r = Reader { bytes, pos: 0 };
        if r.take(4)? != MAGIC {
            return Err("invalid module magic".to_string());
        }
        let version = r.u8()?;
        if version != VERSION {
            return Err(format!("unsupported module version: {}", version));
        }

        let code_len = r.u32()? as usize;
        let mut ops = Vec::with_capacity(code_len);
        let mut data = Vec::with_capacity(code_len);
        for _ in 0..code_len {
            let tag = r.u8()?;
            let op = OP_TABLE
                .get(tag as usize)
                .copied()
                .ok_or_else(|| format!("unknown opcode tag: {}", tag))?;
            ops.push(op);
            data.push(decode_data(&mut r)?);
        }

        let main = r.words()?;
        let extra = r.words()?;

        let strings_len = r.u32()? as usize;
        let strings = r.take(strings_len)?.to_vec();
        std::str::from_utf8(&strings).map_err(|e| format!("invalid string pool: {}", e))?;

        let path_len = r.u32()? as usize;
        let source_path = String::from_utf8(r.take(path_len)?.to_vec())
            .map_err(|e| format!("invalid source path: {}", e))?;
        let source_len = r.u32()? as usize;
        let source = r.take(source_len)?.to_vec();
        let lines = r.words()?;

        Ok(Rc::new(Module {
            main,
            code: Code { ops, data },
            extra,
            strings,
            debug: DebugInfo {
                source_path,
                source,
                lines,
            },
        }))
    }
}

fn encode_data(out: &mut Vec<u8>, data: &OpData) {
    match data {
        OpData::None => out.push(0),
        OpData::Un(r) => {
            out.push(1);
            write_u32(out, r.0);
        }
        OpData::Bin { lhs, rhs } => {
            out.push(2);
            write_u32(out, lhs.0);
            write_u32(out, rhs.0);
        }
        OpData::BinTy { operand, ty } => {
            out.push(3);
            write_u32(out, operand.0);
            let tag = TYPE_TABLE.iter().position(|&t| t == *ty).unwrap_or(0);
            out.push(tag as u8);
        }
        OpData::Extra { index, len } => {
            out.push(4);
            write_u32(out, *index);
            write_u32(out, *len);
        }
        OpData::Jump(offset) => {
            out.push(5);
            write_u32(out, *offset);
        }
        OpData::JumpCond { operand, offset } => {
            out.push(6);
            write_u32(out, operand.0);
            write_u32(out, *offset);
        }
        OpData::UnImm { operand, imm } => {
            out.push(7);
            write_u32(out, operand.0);
            write_u32(out, *imm);
        }
        OpData::CaptureIdx(idx) => {
            out.push(8);
            write_u32(out, *idx);
        }
        OpData::Range { start, extra } => {
            out.push(9);
            write_u32(out, start.0);
            write_u32(out, *extra);
        }
        OpData::Primitive(p) => {
            out.push(10);
            out.push(match p {
                Primitive::Null => 0,
                Primitive::True => 1,
                Primitive::False => 2,
            });
        }
        OpData::Int(v) => {
            out.push(11);
            out.extend_from_slice(&v.to_le_bytes());
        }
        OpData::Num(v) => {
            out.push(12);
            out.extend_from_slice(&v.to_le_bytes());
        }
        OpData::Str { offset, len } => {
            out.push(13);
            write_u32(out, *offset);
            write_u32(out, *len);
        }
    }
}

fn decode_data(r: &mut Reader<'_>) -> Result<OpData, String> {
    let tag = r.u8()?;
    Ok(match tag {
        0 => OpData::None,
        1 => OpData::Un(Ref(r.u32()?)),
        2 => OpData::Bin {
            lhs: Ref(r.u32()?),
            rhs: Ref(r.u32()?),
        },
        3 => {
            let operand = Ref(r.u32()?);
            let ty_tag = r.u8()?;
            let ty = TYPE_TABLE
                .get(ty_tag as usize)
                .copied()
                .ok_or_else(|| format!("unknown type tag: {}", ty_tag))?;
            OpData::BinTy { operand, ty }
        }
        4 => OpData::Extra {
            index: r.u32()?,
            len: r.u32()?,
        },
        5 => OpData::Jump(r.u32()?),
        6 => OpData::JumpCond {
            operand: Ref(r.u32()?),
            offset: r.u32()?,
        },
        7 => OpData::UnImm {
            operand: Ref(r.u32()?),
            imm: r.u32()?,
        },
        8 => OpData::CaptureIdx(r.u32()?),
        9 => OpData::Range {
            start: Ref(r.u32()?),
            extra: r.u32()?,
        },
        10 => OpData::Primitive(match r.u8()? {
            0 => Primitive::Null,
            1 => Primitive::True,
            2 => Primitive::False,
            other => return Err(format!("unknown primitive tag: {}", other)),
        }),
        11 => OpData::Int(i64::from_le_bytes(r.array()?)),
        12 => OpData::Num(f64::from_le_bytes(r.array()?)),
        13 => OpData::Str {
            offset: r.u32()?,
            len: r.u32()?,
        },
        other => return Err(format!("unknown data tag: {}", other)),
    })
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_words(out: &mut Vec<u8>, words: &[u32]) {
    write_u32(out, words.len() as u32);
    for &w in words {
        write_u32(out, w);
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or("unexpected end of module bytes")?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, String> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, String> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], String> {
        let slice = self.take(N)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(slice);
        Ok(buf)
    }

    fn words(&mut self) -> Result<Vec<u32>, String> {
        let len = self.u32()? as usize;
        let mut words = Vec::with_capacity(len.min(1 << 20));
        for _ in 0..len {
            words.push(self.u32()?);
        }
        Ok(words)
    }
}
