//! Spots
//!
//! A [`Spot`] is the place an IL value lives at emission time: a physical
//! register, a stack slot relative to `%rbp`, an immediate literal, or a
//! labeled memory location. The register allocator produces a mapping from
//! IL values to spots; the emitter renders spots as AT&T operands.

use std::fmt;

/// Physical x86-64 general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum Reg {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

/// Registers handed to the coloring allocator, preferred-first.
///
/// `%r10` and `%r11` are reserved as the emitter's scratch registers and
/// `%rbp`/`%rsp` are the frame registers, leaving twelve colors.
pub const ALLOC_REGISTERS: [Reg; 12] = [
    Reg::Rax,
    Reg::Rcx,
    Reg::Rdx,
    Reg::Rsi,
    Reg::Rdi,
    Reg::R8,
    Reg::R9,
    Reg::Rbx,
    Reg::R12,
    Reg::R13,
    Reg::R14,
    Reg::R15,
];

/// Primary scratch register; any template may clobber it.
pub const SCRATCH: Reg = Reg::R11;

/// Secondary scratch register, for templates whose operands are all in
/// memory or need a 64-bit immediate staged alongside.
pub const SCRATCH2: Reg = Reg::R10;

/// System V AMD64 integer argument registers, in order.
pub const ARG_REGISTERS: [Reg; 6] =
    [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

/// Registers a call may clobber (caller-saved), including the scratch.
pub const CALLER_SAVED: [Reg; 9] = [
    Reg::Rax,
    Reg::Rcx,
    Reg::Rdx,
    Reg::Rsi,
    Reg::Rdi,
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
];

/// Registers the callee must preserve.
pub const CALLEE_SAVED: [Reg; 5] =
    [Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

impl Reg {
    /// AT&T name of this register for an access of `size` bytes.
    ///
    /// # Panics
    ///
    /// Panics on sizes other than 1, 2, 4, or 8.
    pub fn name(self, size: u64) -> &'static str {
        // 64-bit, 32-bit, 16-bit, and low 8-bit names per register.
        let names: [&'static str; 4] = match self {
            Reg::Rax => ["rax", "eax", "ax", "al"],
            Reg::Rbx => ["rbx", "ebx", "bx", "bl"],
            Reg::Rcx => ["rcx", "ecx", "cx", "cl"],
            Reg::Rdx => ["rdx", "edx", "dx", "dl"],
            Reg::Rsi => ["rsi", "esi", "si", "sil"],
            Reg::Rdi => ["rdi", "edi", "di", "dil"],
            Reg::R8 => ["r8", "r8d", "r8w", "r8b"],
            Reg::R9 => ["r9", "r9d", "r9w", "r9b"],
            Reg::R10 => ["r10", "r10d", "r10w", "r10b"],
            Reg::R11 => ["r11", "r11d", "r11w", "r11b"],
            Reg::R12 => ["r12", "r12d", "r12w", "r12b"],
            Reg::R13 => ["r13", "r13d", "r13w", "r13b"],
            Reg::R14 => ["r14", "r14d", "r14w", "r14b"],
            Reg::R15 => ["r15", "r15d", "r15w", "r15b"],
        };

        match size {
            8 => names[0],
            4 => names[1],
            2 => names[2],
            1 => names[3],
            _ => panic!("invalid register access size: {size}"),
        }
    }

    /// `true` if this register must be preserved across calls.
    pub fn is_callee_saved(self) -> bool {
        CALLEE_SAVED.contains(&self)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name(8))
    }
}

/// Where an IL value lives at emission time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Spot {
    /// A physical register.
    Register(Reg),
    /// `offset(%rbp)`; negative offsets are locals, positive offsets are
    /// stack-passed incoming parameters.
    Stack(i64),
    /// An immediate value.
    Literal(i64),
    /// A labeled memory location (global object or string literal).
    MemLabel(String),
}

impl Spot {
    /// `true` for register spots.
    pub fn is_reg(&self) -> bool {
        matches!(self, Spot::Register(_))
    }

    /// `true` for memory spots (stack or labeled).
    pub fn is_mem(&self) -> bool {
        matches!(self, Spot::Stack(_) | Spot::MemLabel(_))
    }

    /// `true` for immediate spots.
    pub fn is_literal(&self) -> bool {
        matches!(self, Spot::Literal(_))
    }

    /// `true` if this literal does not fit in a sign-extended 32-bit
    /// immediate and must be loaded with `movabs`.
    pub fn is_imm64(&self) -> bool {
        matches!(self, Spot::Literal(v)
            if *v > i64::from(i32::MAX) || *v < i64::from(i32::MIN))
    }

    /// How many bytes of the frame this spot occupies below `%rbp`.
    pub fn rbp_offset(&self) -> i64 {
        match self {
            Spot::Stack(offset) if *offset < 0 => -offset,
            _ => 0,
        }
    }

    /// AT&T operand form of this spot for an access of `size` bytes.
    pub fn operand(&self, size: u64) -> String {
        match self {
            Spot::Register(r) => format!("%{}", r.name(size)),
            Spot::Stack(offset) => format!("{offset}(%rbp)"),
            Spot::Literal(v) => format!("${v}"),
            // Globals are addressed RIP-relative.
            Spot::MemLabel(label) => format!("{label}(%rip)"),
        }
    }
}

impl fmt::Display for Spot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Spot::Register(r) => write!(f, "{r}"),
            Spot::Stack(offset) => write!(f, "stack({offset})"),
            Spot::Literal(v) => write!(f, "{v}"),
            Spot::MemLabel(label) => write!(f, "{label}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_names_by_size() {
        assert_eq!(Reg::Rax.name(8), "rax");
        assert_eq!(Reg::Rax.name(4), "eax");
        assert_eq!(Reg::Rax.name(1), "al");
        assert_eq!(Reg::Rcx.name(1), "cl");
        assert_eq!(Reg::R10.name(4), "r10d");
    }

    #[test]
    fn operand_forms() {
        assert_eq!(Spot::Register(Reg::Rax).operand(4), "%eax");
        assert_eq!(Spot::Stack(-16).operand(8), "-16(%rbp)");
        assert_eq!(Spot::Literal(14).operand(4), "$14");
        assert_eq!(Spot::MemLabel("counter".into()).operand(4), "counter(%rip)");
    }

    #[test]
    fn imm64_detection() {
        assert!(!Spot::Literal(14).is_imm64());
        assert!(!Spot::Literal(i64::from(i32::MIN)).is_imm64());
        assert!(Spot::Literal(i64::from(i32::MAX) + 1).is_imm64());
        assert!(Spot::Literal(i64::MIN).is_imm64());
    }

    #[test]
    fn scratch_not_allocatable() {
        assert!(!ALLOC_REGISTERS.contains(&SCRATCH));
        assert!(!ALLOC_REGISTERS.contains(&SCRATCH2));
        assert_eq!(ALLOC_REGISTERS.len(), 12);
    }
}
