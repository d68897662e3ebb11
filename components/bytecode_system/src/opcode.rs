//! Opcodes and operand encodings for the Tern register VM.
//!
//! Every instruction word is an index into the module's parallel `code`
//! arrays: one `Op` and one `OpData` per entry. Value-producing opcodes do
//! not carry their destination in the data word; it is derived from the
//! instruction's position in the enclosing body via [`index_to_ref`].

/// Index of a slot in a frame's evaluation stack.
///
/// The compiler assigns refs densely per function: parameter slots first,
/// then one result slot per instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ref(pub u32);

impl Ref {
    /// The slot index as a usize, for indexing the evaluation stack.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Ref {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Compute the destination ref for the instruction at `body_index`.
///
/// Result slots follow the parameter slots, one per instruction word, so
/// the mapping is a pure function of position and parameter count.
pub fn index_to_ref(body_index: usize, params: u16) -> Ref {
    Ref(params as u32 + body_index as u32)
}

/// Selector for the `primitive` opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    /// The canonical `null` singleton.
    Null,
    /// The canonical `true` singleton.
    True,
    /// The canonical `false` singleton.
    False,
}

/// Target type selector for the `cast` opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    /// Boolean target.
    Bool,
    /// 64-bit signed integer target.
    Int,
    /// IEEE 754 double target.
    Num,
    /// String target.
    Str,
    /// Fixed-length tuple target.
    Tuple,
    /// Growable list target.
    List,
}

impl TypeTag {
    /// Short lowercase name, matching `Value::type_name` output.
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Num => "num",
            TypeTag::Str => "str",
            TypeTag::Tuple => "tuple",
            TypeTag::List => "list",
        }
    }
}

/// Bytecode operations for the Tern VM.
///
/// Grouped the way the dispatch loop handles them; the operand shape each
/// op expects is documented on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    // Constants and literals
    /// No effect. Data: `None`.
    Nop,
    /// Write a canonical singleton. Data: `Primitive`.
    Primitive,
    /// Write an integer immediate. Data: `Int`.
    Int,
    /// Write a float immediate. Data: `Num`.
    Num,
    /// Write a string literal from the pool. Data: `Str`.
    Str,

    // Aggregate construction
    /// Build a tuple from an operand list. Data: `Extra` (element refs).
    BuildTuple,
    /// Build a list from an operand list. Data: `Extra` (element refs).
    BuildList,
    /// Build a map from an operand list. Data: `Extra` (key/value ref pairs).
    BuildMap,
    /// Wrap an operand in `err`. Data: `Un`.
    BuildError,
    /// Wrap `null` in `err`. Data: `None`.
    BuildErrorNull,
    /// Build a tagged value. Data: `Extra` = `[name offset, name len, operand]`.
    BuildTagged,
    /// Build a tagged value holding `null`. Data: `Str` (the name).
    BuildTaggedNull,
    /// Materialize a closure. Data: `Extra` (function layout, see `FuncLayout`).
    BuildFunc,
    /// Build a range with step 1. Data: `Range`; extra = `[end ref]`.
    BuildRange,
    /// Build a range with explicit step. Data: `Range`; extra = `[end ref, step ref]`.
    BuildRangeStep,

    // Binary arithmetic
    /// Addition. Data: `Bin`.
    Add,
    /// Subtraction. Data: `Bin`.
    Sub,
    /// Multiplication. Data: `Bin`.
    Mul,
    /// True division; always yields `num`. Data: `Bin`.
    Div,
    /// Floor division. Data: `Bin`.
    DivFloor,
    /// Remainder; denominator must be non-negative. Data: `Bin`.
    Rem,
    /// Exponentiation. Data: `Bin`.
    Pow,
    /// Left shift. Data: `Bin`.
    LShift,
    /// Right shift. Data: `Bin`.
    RShift,
    /// Bitwise and. Data: `Bin`.
    BitAnd,
    /// Bitwise or. Data: `Bin`.
    BitOr,
    /// Bitwise xor. Data: `Bin`.
    BitXor,

    // Unary
    /// Arithmetic negation. Data: `Un`.
    Negate,
    /// Boolean not. Data: `Un`.
    BoolNot,
    /// Bitwise not. Data: `Un`.
    BitNot,

    // Comparison
    /// Structural equality. Data: `Bin`.
    Equal,
    /// Structural inequality. Data: `Bin`.
    NotEqual,
    /// Numeric less-than. Data: `Bin`.
    LessThan,
    /// Numeric less-than-or-equal. Data: `Bin`.
    LessThanEqual,
    /// Numeric greater-than. Data: `Bin`.
    GreaterThan,
    /// Numeric greater-than-or-equal. Data: `Bin`.
    GreaterThanEqual,

    // Containers
    /// Index or property read. Data: `Bin` = container, index.
    Get,
    /// Index read with an immediate int index. Data: `UnImm` (imm holds an
    /// i32 bit pattern).
    GetInt,
    /// Map read yielding `null` on a missing key. Data: `Bin`.
    GetOrNull,
    /// Index write. Data: `Extra` = `[container, index, value]`.
    Set,
    /// Append to a list. Data: `Bin` = list, value.
    Append,
    /// Membership test. Data: `Bin` = needle, container.
    In,
    /// Lift a container's elements into the enclosing construction. Data: `Un`.
    Spread,

    // Destructuring
    /// Compare a container's length against an immediate. Data: `UnImm`.
    CheckLen,
    /// Throw unless a container's length equals an immediate. Data: `UnImm`.
    AssertLen,
    /// Extract the `[imm..]` tail into a fresh list. Data: `UnImm`.
    SpreadDest,

    // Error and tagged unwrapping
    /// Require an `err`, yield its payload. Data: `Un`.
    UnwrapError,
    /// Require a matching tagged value, yield its payload.
    /// Data: `Extra` = `[operand, name offset, name len]`.
    UnwrapTagged,
    /// Yield a matching tagged payload, else `null`. Data: `Extra` as above.
    UnwrapTaggedOrNull,
    /// Explicit type cast. Data: `BinTy`.
    Cast,

    // Variables
    /// Dupe a slot into this instruction's result slot. Data: `Un`.
    CopyUn,
    /// Dupe a slot into an explicit destination. Data: `Bin` = src, dst.
    Copy,
    /// Re-alias a slot into an explicit destination. Data: `Bin` = src, dst.
    Move,
    /// Read a module-frame slot. Data: `Un` (ref into the module frame).
    LoadGlobal,
    /// Read a capture. Data: `CaptureIdx`.
    LoadCapture,
    /// Read the current `this` binding. Data: `None`.
    LoadThis,

    // Control flow
    /// Unconditional jump. Data: `Jump` (absolute body index).
    Jump,
    /// Jump when the operand is `true`; throws on non-bool. Data: `JumpCond`.
    JumpIfTrue,
    /// Jump when the operand is `false`; throws on non-bool. Data: `JumpCond`.
    JumpIfFalse,
    /// Jump when the operand is `null`. Data: `JumpCond`.
    JumpIfNull,
    /// Push an error handler. Data: `JumpCond` = target ref, handler offset.
    PushErrHandler,
    /// Pop the top handler; jump past the handler body when no error was
    /// stored. Data: `Jump`.
    PopErrHandler,
    /// Yield an `err` operand's payload, else jump. Data: `JumpCond`.
    UnwrapErrorOrJump,

    // Iteration
    /// Allocate an iterator over the operand. Data: `Un`.
    IterInit,
    /// Advance an iterator; store and jump while live, fall through when
    /// exhausted. Data: `JumpCond` = iterator ref, loop body offset.
    IterNext,

    // Calls
    /// General call. Data: `Extra` = `[callee, args...]`.
    Call,
    /// One-argument call. Data: `Bin` = callee, arg.
    CallOne,
    /// Zero-argument call. Data: `Un` = callee.
    CallZero,
    /// Method call. Data: `Extra` = `[callee, this, args...]`.
    ThisCall,
    /// Zero-argument method call. Data: `Bin` = callee, this.
    ThisCallZero,

    // Module level
    /// Resolve an import by name. Data: `Str`.
    Import,
    /// Drop a value; fatal when it is an `err`. Data: `Un`.
    Discard,
    /// Return a slot's value. Data: `Un`.
    Ret,
    /// Return `null`. Data: `None`.
    RetNull,
    /// Explicit throw. Data: `Un`.
    Throw,
}

impl Op {
    /// The opcode's mnemonic, as rendered by the disassembler.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Op::Nop => "nop",
            Op::Primitive => "primitive",
            Op::Int => "int",
            Op::Num => "num",
            Op::Str => "str",
            Op::BuildTuple => "build_tuple",
            Op::BuildList => "build_list",
            Op::BuildMap => "build_map",
            Op::BuildError => "build_error",
            Op::BuildErrorNull => "build_error_null",
            Op::BuildTagged => "build_tagged",
            Op::BuildTaggedNull => "build_tagged_null",
            Op::BuildFunc => "build_func",
            Op::BuildRange => "build_range",
            Op::BuildRangeStep => "build_range_step",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::Div => "div",
            Op::DivFloor => "div_floor",
            Op::Rem => "rem",
            Op::Pow => "pow",
            Op::LShift => "l_shift",
            Op::RShift => "r_shift",
            Op::BitAnd => "bit_and",
            Op::BitOr => "bit_or",
            Op::BitXor => "bit_xor",
            Op::Negate => "negate",
            Op::BoolNot => "bool_not",
            Op::BitNot => "bit_not",
            Op::Equal => "equal",
            Op::NotEqual => "not_equal",
            Op::LessThan => "less_than",
            Op::LessThanEqual => "less_than_equal",
            Op::GreaterThan => "greater_than",
            Op::GreaterThanEqual => "greater_than_equal",
            Op::Get => "get",
            Op::GetInt => "get_int",
            Op::GetOrNull => "get_or_null",
            Op::Set => "set",
            Op::Append => "append",
            Op::In => "in",
            Op::Spread => "spread",
            Op::CheckLen => "check_len",
            Op::AssertLen => "assert_len",
            Op::SpreadDest => "spread_dest",
            Op::UnwrapError => "unwrap_error",
            Op::UnwrapTagged => "unwrap_tagged",
            Op::UnwrapTaggedOrNull => "unwrap_tagged_or_null",
            Op::Cast => "cast",
            Op::CopyUn => "copy_un",
            Op::Copy => "copy",
            Op::Move => "move",
            Op::LoadGlobal => "load_global",
            Op::LoadCapture => "load_capture",
            Op::LoadThis => "load_this",
            Op::Jump => "jump",
            Op::JumpIfTrue => "jump_if_true",
            Op::JumpIfFalse => "jump_if_false",
            Op::JumpIfNull => "jump_if_null",
            Op::PushErrHandler => "push_err_handler",
            Op::PopErrHandler => "pop_err_handler",
            Op::UnwrapErrorOrJump => "unwrap_error_or_jump",
            Op::IterInit => "iter_init",
            Op::IterNext => "iter_next",
            Op::Call => "call",
            Op::CallOne => "call_one",
            Op::CallZero => "call_zero",
            Op::ThisCall => "this_call",
            Op::ThisCallZero => "this_call_zero",
            Op::Import => "import",
            Op::Discard => "discard",
            Op::Ret => "ret",
            Op::RetNull => "ret_null",
            Op::Throw => "throw",
        }
    }

    /// Whether this opcode ends a basic block.
    pub fn is_terminator(self) -> bool {
        matches!(self, Op::Jump | Op::Ret | Op::RetNull | Op::Throw)
    }
}

/// Operand payload, stored parallel to [`Op`] in the module's code arrays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpData {
    /// No operand.
    None,
    /// One slot operand.
    Un(Ref),
    /// Two slot operands.
    Bin {
        /// Left / first operand.
        lhs: Ref,
        /// Right / second operand.
        rhs: Ref,
    },
    /// A slot operand plus a target type.
    BinTy {
        /// The value being cast.
        operand: Ref,
        /// The cast target.
        ty: TypeTag,
    },
    /// A variable-length operand list in the `extra` pool.
    Extra {
        /// Start index into `extra`.
        index: u32,
        /// Number of `extra` words.
        len: u32,
    },
    /// An absolute jump target (body index).
    Jump(u32),
    /// A slot operand plus an absolute jump target.
    JumpCond {
        /// The slot the condition (or handler target / iterator) lives in.
        operand: Ref,
        /// Absolute body index to jump to.
        offset: u32,
    },
    /// A slot operand plus a 32-bit immediate. `get_int` stores a signed
    /// index here as its bit pattern.
    UnImm {
        /// The container / operand slot.
        operand: Ref,
        /// The immediate.
        imm: u32,
    },
    /// An index into the current function's captures.
    CaptureIdx(u32),
    /// Range construction: start ref plus the `extra` index of the
    /// remaining bound refs.
    Range {
        /// Slot holding the start bound.
        start: Ref,
        /// Index into `extra` of `[end]` or `[end, step]`.
        extra: u32,
    },
    /// A canonical primitive.
    Primitive(Primitive),
    /// An integer immediate.
    Int(i64),
    /// A float immediate.
    Num(f64),
    /// A string-pool slice.
    Str {
        /// Byte offset into the string pool.
        offset: u32,
        /// Byte length.
        len: u32,
    },
}
