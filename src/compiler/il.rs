//! Intermediate Language
//!
//! The flat three-address form produced by lowering and consumed by the
//! register allocator and the assembly emitter. An [`ILValue`] is a typed
//! operand with a storage class; an [`ILCommand`] is one instruction in a
//! function's linear command list.
//!
//! Every command declares which values it reads and which it writes; this
//! metadata drives liveness analysis. Commands additionally declare their
//! placement constraints (clobbered registers, absolute and relative spot
//! preferences and conflicts) which seed the interference graph with the
//! edges the coloring and coalescing phases need.

use std::collections::HashMap;
use std::fmt;

use crate::compiler::spots::{Reg, ARG_REGISTERS, CALLER_SAVED};
use crate::compiler::types::Type;

/// Stable identifier of an IL value within one translation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Identifier of a jump target within the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub u32);

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ".L{}", self.0)
    }
}

/// Storage class of an IL value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueKind {
    /// A compile-time constant.
    Literal(i64),
    /// A compiler temporary with no name; lives wherever the allocator
    /// decides.
    Local,
    /// A declared object; the name is used for static-storage labels.
    Named(String),
    /// A string literal; the index refers to [`ILCode::strings`].
    StringLit(usize),
}

/// One IL value. Immutable once created, apart from the lvalue-location
/// flag which an address-of operation may clear.
#[derive(Debug, Clone)]
pub struct ValueData {
    /// C type of this value.
    pub ty: Type,
    /// Size in bytes, cached at creation (0 for function designators and
    /// incomplete types, which never occupy a dynamic spot).
    pub size: u64,
    /// Whether the value's type is signed, cached at creation.
    pub signed: bool,
    /// Whether the value's type is `_Bool`, cached at creation.
    pub is_bool: bool,
    /// Storage class.
    pub kind: ValueKind,
    /// `true` iff this value holds the *address* of an object rather than
    /// the object's value, i.e. it designates an lvalue location.
    pub lvalue_loc: bool,
}

impl ValueData {
    /// The literal constant held by this value, if any.
    pub fn literal(&self) -> Option<i64> {
        match self.kind {
            ValueKind::Literal(v) => Some(v),
            _ => None,
        }
    }
}

/// Binary arithmetic operations. Both operands and the output must have
/// the same fully promoted arithmetic type; lowering inserts explicit
/// `Set` conversions beforehand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mult,
    Div,
    Mod,
    And,
    Or,
    Xor,
    LShift,
    RShift,
}

/// Unary arithmetic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Two's complement negation.
    Neg,
    /// One's complement (bitwise not).
    Not,
}

/// Comparison operations; the output has `_Bool` type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// One three-address command.
#[derive(Debug, Clone)]
pub enum ILCommand {
    /// `out = lhs op rhs` on identically typed arithmetic operands.
    Binary {
        /// Operation.
        op: BinaryOp,
        /// Output value.
        out: ValueId,
        /// Left operand.
        lhs: ValueId,
        /// Right operand.
        rhs: ValueId,
    },
    /// `out = op arg`.
    Unary {
        /// Operation.
        op: UnaryOp,
        /// Output value.
        out: ValueId,
        /// Operand.
        arg: ValueId,
    },
    /// `out = lhs op rhs`, producing a `_Bool`.
    Compare {
        /// Predicate.
        op: CompareOp,
        /// Output value.
        out: ValueId,
        /// Left operand.
        lhs: ValueId,
        /// Right operand.
        rhs: ValueId,
    },
    /// `out = &var`. Forces `var` into a memory home.
    AddrOf {
        /// Output pointer value.
        out: ValueId,
        /// Object whose address is taken.
        var: ValueId,
    },
    /// `out = *addr`; `addr` must be a pointer, `out` has the pointee type.
    ReadAt {
        /// Output value.
        out: ValueId,
        /// Pointer operand.
        addr: ValueId,
    },
    /// `*addr = val`; pointee and value types must be compatible.
    SetAt {
        /// Pointer operand.
        addr: ValueId,
        /// Value stored.
        val: ValueId,
    },
    /// `out = ptr + offset` where `offset` counts bytes. Lowering performs
    /// any element-size scaling beforehand.
    PointerAdd {
        /// Output pointer.
        out: ValueId,
        /// Base pointer.
        ptr: ValueId,
        /// Byte offset (64-bit integral value).
        offset: ValueId,
    },
    /// `out = ptr - offset`, byte-counted like [`ILCommand::PointerAdd`].
    PointerSub {
        /// Output pointer.
        out: ValueId,
        /// Base pointer.
        ptr: ValueId,
        /// Byte offset.
        offset: ValueId,
    },
    /// `out = (lhs - rhs) / elem_size`; both operands are pointers to the
    /// same element type.
    PointerDiff {
        /// Output (`long`).
        out: ValueId,
        /// Left pointer.
        lhs: ValueId,
        /// Right pointer.
        rhs: ValueId,
        /// Size of the pointed-to element.
        elem_size: u64,
    },
    /// Marks a position in the command list.
    Label(LabelId),
    /// Unconditional jump.
    Jump(LabelId),
    /// Jump to `target` iff `cond` is zero.
    JumpZero {
        /// Condition value.
        cond: ValueId,
        /// Jump target.
        target: LabelId,
    },
    /// Jump to `target` iff `cond` is not zero.
    JumpNotZero {
        /// Condition value.
        cond: ValueId,
        /// Jump target.
        target: LabelId,
    },
    /// Return from the current function, optionally with a value already
    /// converted to the return type.
    Return(Option<ValueId>),
    /// Call `func` with `args`; if the callee returns non-void, the result
    /// lands in `out`.
    Call {
        /// Function designator or function pointer.
        func: ValueId,
        /// Arguments, left to right, already converted to parameter types.
        args: Vec<ValueId>,
        /// Return-value home.
        out: Option<ValueId>,
    },
    /// `out = arg`, converting between widths (sign/zero extension or
    /// truncation) and normalizing `_Bool` targets to 0/1.
    Set {
        /// Output value.
        out: ValueId,
        /// Source value.
        arg: ValueId,
    },
    /// `out = imm`; materializes an integer constant.
    Load {
        /// Output value.
        out: ValueId,
        /// Constant.
        imm: i64,
    },
    /// Copies `size` bytes from `*src` to `*dst`; used for struct and
    /// union assignment and member extraction.
    StructCopy {
        /// Destination address (pointer value).
        dst: ValueId,
        /// Source address (pointer value).
        src: ValueId,
        /// Byte count.
        size: u64,
    },
    /// Zeroes `size` bytes at `*addr`.
    Zero {
        /// Destination address (pointer value).
        addr: ValueId,
        /// Byte count.
        size: u64,
    },
}

impl ILCommand {
    /// Values this command reads.
    pub fn reads(&self) -> Vec<ValueId> {
        match self {
            ILCommand::Binary { lhs, rhs, .. }
            | ILCommand::Compare { lhs, rhs, .. } => vec![*lhs, *rhs],
            ILCommand::Unary { arg, .. } | ILCommand::Set { arg, .. } => {
                vec![*arg]
            }
            ILCommand::AddrOf { var, .. } => vec![*var],
            ILCommand::ReadAt { addr, .. } => vec![*addr],
            ILCommand::SetAt { addr, val } => vec![*addr, *val],
            ILCommand::PointerAdd { ptr, offset, .. }
            | ILCommand::PointerSub { ptr, offset, .. } => {
                vec![*ptr, *offset]
            }
            ILCommand::PointerDiff { lhs, rhs, .. } => vec![*lhs, *rhs],
            ILCommand::JumpZero { cond, .. }
            | ILCommand::JumpNotZero { cond, .. } => vec![*cond],
            ILCommand::Return(arg) => arg.iter().copied().collect(),
            ILCommand::Call { func, args, .. } => {
                let mut reads = vec![*func];
                reads.extend_from_slice(args);
                reads
            }
            ILCommand::StructCopy { dst, src, .. } => vec![*dst, *src],
            ILCommand::Zero { addr, .. } => vec![*addr],
            ILCommand::Label(_)
            | ILCommand::Jump(_)
            | ILCommand::Load { .. } => vec![],
        }
    }

    /// Values this command writes. No later command may rely on the
    /// previous contents of a written value.
    pub fn writes(&self) -> Vec<ValueId> {
        match self {
            ILCommand::Binary { out, .. }
            | ILCommand::Unary { out, .. }
            | ILCommand::Compare { out, .. }
            | ILCommand::AddrOf { out, .. }
            | ILCommand::ReadAt { out, .. }
            | ILCommand::PointerAdd { out, .. }
            | ILCommand::PointerSub { out, .. }
            | ILCommand::PointerDiff { out, .. }
            | ILCommand::Set { out, .. }
            | ILCommand::Load { out, .. } => vec![*out],
            ILCommand::Call { out, .. } => out.iter().copied().collect(),
            _ => vec![],
        }
    }

    /// The label this command defines, if it is a label.
    pub fn label_name(&self) -> Option<LabelId> {
        match self {
            ILCommand::Label(l) => Some(*l),
            _ => None,
        }
    }

    /// Labels this command may jump to.
    pub fn targets(&self) -> Vec<LabelId> {
        match self {
            ILCommand::Jump(l)
            | ILCommand::JumpZero { target: l, .. }
            | ILCommand::JumpNotZero { target: l, .. } => vec![*l],
            _ => vec![],
        }
    }

    /// `true` if control never falls through to the next command.
    pub fn is_terminator(&self) -> bool {
        matches!(self, ILCommand::Jump(_) | ILCommand::Return(_))
    }

    /// If this command is a plain register-to-register copy (same width,
    /// no `_Bool` normalization), returns `(dst, src)` for move-edge
    /// recording; such commands are candidates for coalescing.
    pub fn as_move(&self, il: &ILCode) -> Option<(ValueId, ValueId)> {
        match self {
            ILCommand::Set { out, arg } => {
                let out_v = il.value(*out);
                let arg_v = il.value(*arg);
                let bool_norm = out_v.is_bool && !arg_v.is_bool;
                if out_v.size == arg_v.size && !bool_norm {
                    Some((*out, *arg))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Physical registers this command may overwrite besides its outputs.
    pub fn clobbers(&self, il: &ILCode) -> Vec<Reg> {
        match self {
            ILCommand::Binary { op: BinaryOp::Div | BinaryOp::Mod, .. } => {
                vec![Reg::Rax, Reg::Rdx]
            }
            ILCommand::Binary {
                op: BinaryOp::LShift | BinaryOp::RShift,
                rhs,
                ..
            } => {
                // A literal count is encoded as an immediate; only a
                // dynamic count passes through %cl.
                if il.value(*rhs).literal().is_some() {
                    vec![]
                } else {
                    vec![Reg::Rcx]
                }
            }
            ILCommand::Call { .. } => CALLER_SAVED.to_vec(),
            ILCommand::Return(_) => vec![Reg::Rax],
            // Division by a non-power-of-two element size goes through
            // the hardware divide.
            ILCommand::PointerDiff { elem_size, .. }
                if !elem_size.is_power_of_two() =>
            {
                vec![Reg::Rax, Reg::Rdx]
            }
            // Block copies and fills are emitted as rep movsb/stosb.
            ILCommand::StructCopy { .. } => {
                vec![Reg::Rsi, Reg::Rdi, Reg::Rcx]
            }
            ILCommand::Zero { .. } => vec![Reg::Rdi, Reg::Rcx, Reg::Rax],
            _ => vec![],
        }
    }

    /// Absolute spot preferences: the allocator will try to place each
    /// listed value in the given register, eliminating a move.
    pub fn abs_prefs(&self, il: &ILCode) -> Vec<(ValueId, Reg)> {
        match self {
            ILCommand::Binary { op: BinaryOp::Div, out, lhs, .. } => {
                vec![(*out, Reg::Rax), (*lhs, Reg::Rax)]
            }
            ILCommand::Binary { op: BinaryOp::Mod, out, lhs, .. } => {
                vec![(*out, Reg::Rdx), (*lhs, Reg::Rax)]
            }
            ILCommand::Binary {
                op: BinaryOp::LShift | BinaryOp::RShift,
                rhs,
                ..
            } => {
                if il.value(*rhs).literal().is_some() {
                    vec![]
                } else {
                    vec![(*rhs, Reg::Rcx)]
                }
            }
            ILCommand::Return(Some(arg)) => vec![(*arg, Reg::Rax)],
            ILCommand::StructCopy { dst, src, .. } => {
                vec![(*src, Reg::Rsi), (*dst, Reg::Rdi)]
            }
            ILCommand::Zero { addr, .. } => vec![(*addr, Reg::Rdi)],
            ILCommand::Call { args, out, .. } => {
                let mut prefs: Vec<(ValueId, Reg)> = args
                    .iter()
                    .zip(ARG_REGISTERS.iter())
                    .map(|(&a, &r)| (a, r))
                    .collect();
                if let Some(out) = out {
                    prefs.push((*out, Reg::Rax));
                }
                prefs
            }
            _ => vec![],
        }
    }

    /// Absolute spot conflicts: each listed value must not be placed in
    /// the given register.
    pub fn abs_confs(&self, il: &ILCode) -> Vec<(ValueId, Reg)> {
        match self {
            // The divisor cannot share the registers the division uses for
            // the dividend and remainder.
            ILCommand::Binary { op: BinaryOp::Div | BinaryOp::Mod, rhs, .. } => {
                vec![(*rhs, Reg::Rax), (*rhs, Reg::Rdx)]
            }
            ILCommand::Binary {
                op: BinaryOp::LShift | BinaryOp::RShift,
                out,
                lhs,
                rhs,
            } => {
                if il.value(*rhs).literal().is_some() {
                    vec![]
                } else {
                    vec![(*out, Reg::Rcx), (*lhs, Reg::Rcx)]
                }
            }
            // The source pointer is loaded into %rsi before the
            // destination; the destination must not sit there.
            ILCommand::StructCopy { dst, .. } => vec![(*dst, Reg::Rsi)],
            // The callee address must survive while arguments are moved
            // into the argument registers.
            ILCommand::Call { func, args, .. } => ARG_REGISTERS
                .iter()
                .take(args.len())
                .map(|&r| (*func, r))
                .collect(),
            _ => vec![],
        }
    }

    /// Relative spot preferences: the output would like to share a spot
    /// with one of its inputs, turning the template's setup move into a
    /// no-op.
    pub fn rel_prefs(&self) -> Vec<(ValueId, ValueId)> {
        match self {
            ILCommand::Binary {
                op:
                    BinaryOp::Add
                    | BinaryOp::Sub
                    | BinaryOp::Mult
                    | BinaryOp::And
                    | BinaryOp::Or
                    | BinaryOp::Xor
                    | BinaryOp::LShift
                    | BinaryOp::RShift,
                out,
                lhs,
                ..
            } => vec![(*out, *lhs)],
            ILCommand::Unary { out, arg, .. } => vec![(*out, *arg)],
            ILCommand::Set { out, arg } => vec![(*out, *arg)],
            ILCommand::PointerAdd { out, ptr, .. }
            | ILCommand::PointerSub { out, ptr, .. } => vec![(*out, *ptr)],
            _ => vec![],
        }
    }

    /// Relative spot conflicts: pairs of values whose templates write
    /// the first before reading the second, so they must not share a
    /// spot.
    pub fn rel_confs(&self) -> Vec<(ValueId, ValueId)> {
        match self {
            // `mov lhs, out; op rhs, out` reads rhs after writing out.
            ILCommand::Binary {
                op: BinaryOp::Div | BinaryOp::Mod, ..
            } => vec![],
            ILCommand::Binary { out, rhs, .. } => vec![(*out, *rhs)],
            // The comparison result is initialized before the operands
            // are compared.
            ILCommand::Compare { out, lhs, rhs, .. } => {
                vec![(*out, *lhs), (*out, *rhs)]
            }
            ILCommand::PointerAdd { out, offset, .. }
            | ILCommand::PointerSub { out, offset, .. } => {
                vec![(*out, *offset)]
            }
            ILCommand::PointerDiff { out, rhs, .. } => vec![(*out, *rhs)],
            _ => vec![],
        }
    }

    /// Values whose address escapes through this command and which must
    /// therefore live in memory.
    pub fn address_taken(&self) -> Option<ValueId> {
        match self {
            ILCommand::AddrOf { var, .. } => Some(*var),
            _ => None,
        }
    }

    /// Replaces `from` with `to` in every read position; used when
    /// rewriting spilled values through fresh temporaries.
    pub fn replace_reads(&mut self, from: ValueId, to: ValueId) {
        let repl = |v: &mut ValueId| {
            if *v == from {
                *v = to;
            }
        };
        match self {
            ILCommand::Binary { lhs, rhs, .. }
            | ILCommand::Compare { lhs, rhs, .. } => {
                repl(lhs);
                repl(rhs);
            }
            ILCommand::Unary { arg, .. } | ILCommand::Set { arg, .. } => {
                repl(arg);
            }
            ILCommand::AddrOf { var, .. } => repl(var),
            ILCommand::ReadAt { addr, .. } => repl(addr),
            ILCommand::SetAt { addr, val } => {
                repl(addr);
                repl(val);
            }
            ILCommand::PointerAdd { ptr, offset, .. }
            | ILCommand::PointerSub { ptr, offset, .. } => {
                repl(ptr);
                repl(offset);
            }
            ILCommand::PointerDiff { lhs, rhs, .. } => {
                repl(lhs);
                repl(rhs);
            }
            ILCommand::JumpZero { cond, .. }
            | ILCommand::JumpNotZero { cond, .. } => repl(cond),
            ILCommand::Return(Some(arg)) => repl(arg),
            ILCommand::Call { func, args, .. } => {
                repl(func);
                for arg in args {
                    repl(arg);
                }
            }
            ILCommand::StructCopy { dst, src, .. } => {
                repl(dst);
                repl(src);
            }
            ILCommand::Zero { addr, .. } => repl(addr),
            _ => {}
        }
    }

    /// Replaces `from` with `to` in every write position.
    pub fn replace_writes(&mut self, from: ValueId, to: ValueId) {
        let repl = |v: &mut ValueId| {
            if *v == from {
                *v = to;
            }
        };
        match self {
            ILCommand::Binary { out, .. }
            | ILCommand::Unary { out, .. }
            | ILCommand::Compare { out, .. }
            | ILCommand::AddrOf { out, .. }
            | ILCommand::ReadAt { out, .. }
            | ILCommand::PointerAdd { out, .. }
            | ILCommand::PointerSub { out, .. }
            | ILCommand::PointerDiff { out, .. }
            | ILCommand::Set { out, .. }
            | ILCommand::Load { out, .. } => repl(out),
            ILCommand::Call { out: Some(out), .. } => repl(out),
            _ => {}
        }
    }
}

impl fmt::Display for ILCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ILCommand::Binary { op, out, lhs, rhs } => {
                write!(f, "{:<12}{lhs}, {rhs} -> {out}", format!("{op:?}"))
            }
            ILCommand::Unary { op, out, arg } => {
                write!(f, "{:<12}{arg} -> {out}", format!("{op:?}"))
            }
            ILCommand::Compare { op, out, lhs, rhs } => {
                write!(f, "{:<12}{lhs}, {rhs} -> {out}", format!("{op:?}"))
            }
            ILCommand::AddrOf { out, var } => {
                write!(f, "{:<12}{var} -> {out}", "AddrOf")
            }
            ILCommand::ReadAt { out, addr } => {
                write!(f, "{:<12}[{addr}] -> {out}", "ReadAt")
            }
            ILCommand::SetAt { addr, val } => {
                write!(f, "{:<12}{val} -> [{addr}]", "SetAt")
            }
            ILCommand::PointerAdd { out, ptr, offset } => {
                write!(f, "{:<12}{ptr} + {offset} -> {out}", "PtrAdd")
            }
            ILCommand::PointerSub { out, ptr, offset } => {
                write!(f, "{:<12}{ptr} - {offset} -> {out}", "PtrSub")
            }
            ILCommand::PointerDiff { out, lhs, rhs, elem_size } => {
                write!(f, "{:<12}({lhs} - {rhs}) / {elem_size} -> {out}", "PtrDiff")
            }
            ILCommand::Label(l) => write!(f, "{l}:"),
            ILCommand::Jump(l) => write!(f, "{:<12}{l}", "Jump"),
            ILCommand::JumpZero { cond, target } => {
                write!(f, "{:<12}{cond}, {target}", "JumpZero")
            }
            ILCommand::JumpNotZero { cond, target } => {
                write!(f, "{:<12}{cond}, {target}", "JumpNotZero")
            }
            ILCommand::Return(Some(v)) => write!(f, "{:<12}{v}", "Return"),
            ILCommand::Return(None) => write!(f, "Return"),
            ILCommand::Call { func, args, out } => {
                write!(f, "{:<12}{func}(", "Call")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")?;
                if let Some(out) = out {
                    write!(f, " -> {out}")?;
                }
                Ok(())
            }
            ILCommand::Set { out, arg } => {
                write!(f, "{:<12}{arg} -> {out}", "Set")
            }
            ILCommand::Load { out, imm } => {
                write!(f, "{:<12}{imm} -> {out}", "Load")
            }
            ILCommand::StructCopy { dst, src, size } => {
                write!(f, "{:<12}[{src}] -> [{dst}], {size} bytes", "StructCopy")
            }
            ILCommand::Zero { addr, size } => {
                write!(f, "{:<12}[{addr}], {size} bytes", "Zero")
            }
        }
    }
}

/// One function's worth of IL.
#[derive(Debug)]
pub struct ILFunction {
    /// Function name, also its assembly label.
    pub name: String,
    /// The function designator's IL value, for linkage queries.
    pub value: ValueId,
    /// Parameter values, left to right.
    pub params: Vec<ValueId>,
    /// Linear command list.
    pub commands: Vec<ILCommand>,
}

/// An explicit static-storage initializer, emitted into `.data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticInit {
    /// A scalar constant.
    Scalar(i64),
    /// The bytes of a string literal initializing a character array,
    /// already padded to the array's size.
    Bytes(Vec<u8>),
    /// An address constant: the named value's label, emitted as a
    /// pointer-sized relocation (function designators, `&` of a
    /// static-storage object).
    Addr(ValueId),
}

/// The IL for a whole translation unit, together with the value arena and
/// the static data discovered during lowering.
#[derive(Debug, Default)]
pub struct ILCode {
    values: Vec<ValueData>,
    /// Functions defined in this unit, in source order.
    pub funcs: Vec<ILFunction>,
    /// String literal byte vectors (NUL-terminated), indexed by
    /// [`ValueKind::StringLit`].
    pub strings: Vec<Vec<u8>>,
    /// Static-storage values with an explicit initializer.
    pub static_inits: HashMap<ValueId, StaticInit>,
    label_count: u32,
}

impl ILCode {
    /// Returns an empty unit.
    pub fn new() -> Self {
        Self::default()
    }

    fn push_value(&mut self, data: ValueData) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(data);
        id
    }

    /// Creates a fresh compiler temporary.
    pub fn new_value(
        &mut self,
        ty: Type,
        size: u64,
        signed: bool,
        is_bool: bool,
    ) -> ValueId {
        self.push_value(ValueData {
            ty,
            size,
            signed,
            is_bool,
            kind: ValueKind::Local,
            lvalue_loc: false,
        })
    }

    /// Creates a literal value.
    pub fn new_literal(
        &mut self,
        ty: Type,
        size: u64,
        signed: bool,
        v: i64,
    ) -> ValueId {
        self.push_value(ValueData {
            ty,
            size,
            signed,
            is_bool: false,
            kind: ValueKind::Literal(v),
            lvalue_loc: false,
        })
    }

    /// Creates a named value for a declared object or function.
    pub fn new_named(
        &mut self,
        ty: Type,
        size: u64,
        signed: bool,
        is_bool: bool,
        name: &str,
    ) -> ValueId {
        self.push_value(ValueData {
            ty,
            size,
            signed,
            is_bool,
            kind: ValueKind::Named(name.to_owned()),
            lvalue_loc: false,
        })
    }

    /// Registers a string literal and returns its value (of `char[N]`
    /// type). `bytes` must already contain the terminating NUL.
    pub fn new_string_literal(&mut self, ty: Type, bytes: Vec<u8>) -> ValueId {
        let size = bytes.len() as u64;
        let index = self.strings.len();
        self.strings.push(bytes);
        self.push_value(ValueData {
            ty,
            size,
            signed: false,
            is_bool: false,
            kind: ValueKind::StringLit(index),
            lvalue_loc: false,
        })
    }

    /// Read access to a value.
    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.0 as usize]
    }

    /// Number of values created so far.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Replaces a named value's type after a redeclaration formed a
    /// composite type (e.g. an incomplete array completing).
    pub fn update_value_type(
        &mut self,
        id: ValueId,
        ty: Type,
        size: u64,
        signed: bool,
    ) {
        let data = &mut self.values[id.0 as usize];
        data.ty = ty;
        data.size = size;
        data.signed = signed;
    }

    /// Marks a value as holding the address of an lvalue.
    pub fn mark_lvalue_loc(&mut self, id: ValueId) {
        self.values[id.0 as usize].lvalue_loc = true;
    }

    /// Clears the lvalue-location flag; used when `&` converts an address
    /// into an ordinary pointer rvalue.
    pub fn clear_lvalue_loc(&mut self, id: ValueId) {
        self.values[id.0 as usize].lvalue_loc = false;
    }

    /// Records a static initializer for a static-storage value.
    pub fn static_initialize(&mut self, id: ValueId, init: StaticInit) {
        self.static_inits.insert(id, init);
    }

    /// Starts a new function; subsequent [`Self::add`] calls append to it.
    pub fn start_func(&mut self, name: &str, value: ValueId, params: Vec<ValueId>) {
        self.funcs.push(ILFunction {
            name: name.to_owned(),
            value,
            params,
            commands: Vec::new(),
        });
    }

    /// Appends a command to the current function.
    ///
    /// # Panics
    ///
    /// Panics if no function has been started.
    pub fn add(&mut self, cmd: ILCommand) {
        self.funcs
            .last_mut()
            .expect("no current function")
            .commands
            .push(cmd);
    }

    /// `true` if the current function's command list ends in a return.
    pub fn always_returns(&self) -> bool {
        self.funcs
            .last()
            .map(|f| matches!(f.commands.last(), Some(ILCommand::Return(_))))
            .unwrap_or(false)
    }

    /// Returns a fresh, unit-unique label.
    pub fn new_label(&mut self) -> LabelId {
        let l = LabelId(self.label_count);
        self.label_count += 1;
        l
    }
}

impl fmt::Display for ILCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for func in &self.funcs {
            writeln!(f, "{}:", func.name)?;
            for cmd in &func.commands {
                writeln!(f, "    {cmd}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::TypePool;

    fn int_value(il: &mut ILCode) -> ValueId {
        il.new_value(TypePool::INT, 4, true, false)
    }

    #[test]
    fn binary_reads_and_writes() {
        let mut il = ILCode::new();
        let (a, b, out) = (int_value(&mut il), int_value(&mut il), int_value(&mut il));

        let cmd = ILCommand::Binary { op: BinaryOp::Add, out, lhs: a, rhs: b };
        assert_eq!(cmd.reads(), vec![a, b]);
        assert_eq!(cmd.writes(), vec![out]);
    }

    #[test]
    fn set_at_writes_nothing() {
        let mut il = ILCode::new();
        let (addr, val) = (int_value(&mut il), int_value(&mut il));

        let cmd = ILCommand::SetAt { addr, val };
        assert_eq!(cmd.reads(), vec![addr, val]);
        assert!(cmd.writes().is_empty());
    }

    #[test]
    fn same_size_set_is_move() {
        let mut il = ILCode::new();
        let (a, b) = (int_value(&mut il), int_value(&mut il));
        assert_eq!(
            ILCommand::Set { out: a, arg: b }.as_move(&il),
            Some((a, b))
        );
    }

    #[test]
    fn widening_set_is_not_move() {
        let mut il = ILCode::new();
        let a = il.new_value(TypePool::LONG, 8, true, false);
        let b = int_value(&mut il);
        assert_eq!(ILCommand::Set { out: a, arg: b }.as_move(&il), None);
    }

    #[test]
    fn bool_normalizing_set_is_not_move() {
        let mut il = ILCode::new();
        let flag = il.new_value(TypePool::BOOL, 1, false, true);
        let c = il.new_value(TypePool::CHAR, 1, true, false);
        assert_eq!(
            ILCommand::Set { out: flag, arg: c }.as_move(&il),
            None
        );
    }

    #[test]
    fn div_constraints() {
        let mut il = ILCode::new();
        let (out, lhs, rhs) =
            (int_value(&mut il), int_value(&mut il), int_value(&mut il));
        let cmd = ILCommand::Binary { op: BinaryOp::Div, out, lhs, rhs };

        assert_eq!(cmd.clobbers(&il), vec![Reg::Rax, Reg::Rdx]);
        assert!(cmd.abs_prefs(&il).contains(&(lhs, Reg::Rax)));
        assert!(cmd.abs_confs(&il).contains(&(rhs, Reg::Rax)));
        assert!(cmd.abs_confs(&il).contains(&(rhs, Reg::Rdx)));
    }

    #[test]
    fn literal_shift_count_needs_no_cl() {
        let mut il = ILCode::new();
        let (out, lhs) = (int_value(&mut il), int_value(&mut il));
        let count = il.new_literal(TypePool::INT, 4, true, 3);

        let cmd = ILCommand::Binary { op: BinaryOp::LShift, out, lhs, rhs: count };
        assert!(cmd.clobbers(&il).is_empty());
        assert!(cmd.abs_prefs(&il).is_empty());
    }

    #[test]
    fn call_prefers_arg_registers() {
        let mut il = ILCode::new();
        let func = int_value(&mut il);
        let (a, b) = (int_value(&mut il), int_value(&mut il));
        let out = int_value(&mut il);

        let cmd = ILCommand::Call { func, args: vec![a, b], out: Some(out) };
        let prefs = cmd.abs_prefs(&il);
        assert!(prefs.contains(&(a, Reg::Rdi)));
        assert!(prefs.contains(&(b, Reg::Rsi)));
        assert!(prefs.contains(&(out, Reg::Rax)));

        // The callee must not be clobbered by argument setup.
        let confs = cmd.abs_confs(&il);
        assert!(confs.contains(&(func, Reg::Rdi)));
        assert!(confs.contains(&(func, Reg::Rsi)));
        assert_eq!(confs.len(), 2);
    }

    #[test]
    fn labels_and_targets() {
        let mut il = ILCode::new();
        let l = il.new_label();
        let cond = int_value(&mut il);

        assert_eq!(ILCommand::Label(l).label_name(), Some(l));
        assert_eq!(ILCommand::Jump(l).targets(), vec![l]);
        assert_eq!(
            ILCommand::JumpZero { cond, target: l }.targets(),
            vec![l]
        );
        assert!(ILCommand::Jump(l).is_terminator());
        assert!(!ILCommand::JumpZero { cond, target: l }.is_terminator());
    }
}
