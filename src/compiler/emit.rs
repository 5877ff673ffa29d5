//! Code Emission
//!
//! Compiler pass that emits GNU AT&T x86-64 assembly from the IL, using
//! the register allocator's spot assignments. Every IL command owns its
//! instruction template, including the operand-form fixups (no
//! memory-to-memory moves, 32-bit immediate limits, division through
//! `%rax`/`%rdx`, shift counts through `%cl`); the reserved scratch
//! registers `%r10`/`%r11` stage whatever the templates cannot express
//! directly.
//!
//! Sections: `.text` for code, `.data` for initialized statics, `.bss`
//! (via `.comm`) for tentative and zero-initialized statics, and
//! `.rodata` for string literals.

use std::collections::{HashMap, HashSet};
use std::io::{self, BufWriter, Write};

use crate::compiler::il::{
    BinaryOp, CompareOp, ILCode, ILCommand, StaticInit, UnaryOp, ValueId,
};
use crate::compiler::regalloc::{self, Allocation};
use crate::compiler::spots::{Reg, Spot, ARG_REGISTERS, SCRATCH, SCRATCH2};
use crate::compiler::symbols::{Linkage, StorageDur, SymbolTable};
use crate::compiler::types::round_up;

/// Assigns assembly labels to every named static-storage and
/// no-storage value. File-scope names keep their spelling; block-scope
/// statics get a numeric suffix so two functions' `static int i` do not
/// collide.
pub fn static_labels(syms: &SymbolTable) -> HashMap<ValueId, String> {
    let mut labels = HashMap::new();

    let mut metas: Vec<_> = syms.all_meta().collect();
    metas.sort_by_key(|(v, _)| *v);

    let mut suffix = 0u32;
    for (v, meta) in metas {
        match meta.storage {
            StorageDur::None => {
                labels.insert(v, meta.name.clone());
            }
            StorageDur::Static => {
                if meta.linkage == Linkage::None {
                    suffix += 1;
                    labels.insert(v, format!("{}.{}", meta.name, suffix));
                } else {
                    labels.insert(v, meta.name.clone());
                }
            }
            StorageDur::Automatic => {}
        }
    }

    labels
}

/// Allocates registers for every function and writes the unit's
/// assembly to `writer`.
///
/// # Errors
///
/// Returns an error if the assembly cannot be written.
pub fn emit_unit(
    il: &mut ILCode,
    syms: &SymbolTable,
    writer: impl Write,
) -> io::Result<()> {
    let mut w = BufWriter::new(writer);
    let labels = static_labels(syms);

    let defined_funcs: HashSet<String> =
        il.funcs.iter().map(|f| f.name.clone()).collect();

    writeln!(w, "\t.text")?;

    for index in 0..il.funcs.len() {
        let alloc = regalloc::allocate(il, index, syms, &labels);
        let mut emitter = FuncEmitter {
            il,
            alloc: &alloc,
            defined_funcs: &defined_funcs,
            callee_save_base: 0,
            lines: Vec::new(),
        };
        emitter.callee_save_base = alloc.frame_size;
        let body = emitter.emit(index);

        let func = &il.funcs[index];
        let external = syms
            .var_meta(func.value)
            .map(|m| m.linkage == Linkage::External)
            .unwrap_or(true);

        if external {
            writeln!(w, "\t.globl\t{}", func.name)?;
        }
        writeln!(w, "\t.type\t{}, @function", func.name)?;
        writeln!(w, "{}:", func.name)?;
        for line in body {
            writeln!(w, "{line}")?;
        }
        // Record the function's byte size in the ELF symbol table.
        writeln!(w, "\t.size\t{name}, .-{name}", name = func.name)?;
    }

    emit_static_data(il, syms, &labels, &mut w)?;
    emit_string_literals(il, &mut w)?;

    // The program does not need an executable stack.
    writeln!(
        w,
        "\t.ident\t\"occ: {}\"\n\t.section\t.note.GNU-stack,\"\",@progbits",
        env!("CARGO_PKG_VERSION")
    )
}

fn emit_static_data(
    il: &ILCode,
    syms: &SymbolTable,
    labels: &HashMap<ValueId, String>,
    w: &mut impl Write,
) -> io::Result<()> {
    let mut metas: Vec<_> = syms.all_meta().collect();
    metas.sort_by_key(|(v, _)| *v);

    let mut in_data = false;
    for (v, meta) in metas {
        if meta.storage != StorageDur::Static {
            continue;
        }
        let Some(label) = labels.get(&v) else { continue };
        let size = il.value(v).size.max(1);
        // The largest power of two dividing the size bounds the type's
        // real alignment from below and never exceeds 8 here.
        let align = 1u64 << size.trailing_zeros().min(3);

        match il.static_inits.get(&v) {
            Some(init) => {
                if !in_data {
                    writeln!(w, "\t.data")?;
                    in_data = true;
                }
                if meta.linkage == Linkage::External {
                    writeln!(w, "\t.globl\t{label}")?;
                }
                writeln!(
                    w,
                    "\t.align\t{align}\n\t.type\t{label}, @object\n\t.size\t{label}, {size}\n{label}:"
                )?;
                match init {
                    StaticInit::Scalar(v) => {
                        let directive = match size {
                            1 => ".byte",
                            2 => ".short",
                            4 => ".long",
                            _ => ".quad",
                        };
                        writeln!(w, "\t{directive}\t{v}")?;
                    }
                    StaticInit::Bytes(bytes) => {
                        let data = bytes
                            .iter()
                            .map(|b| b.to_string())
                            .collect::<Vec<_>>()
                            .join(",");
                        writeln!(w, "\t.byte\t{data}")?;
                    }
                    StaticInit::Addr(target) => {
                        let target_label = labels
                            .get(target)
                            .cloned()
                            .unwrap_or_default();
                        writeln!(w, "\t.quad\t{target_label}")?;
                    }
                }
            }
            None => {
                // Tentative and uninitialized statics become common
                // symbols; the linker places them in .bss.
                if meta.linkage != Linkage::External {
                    writeln!(w, "\t.local\t{label}")?;
                }
                writeln!(w, "\t.comm\t{label},{size},{align}")?;
            }
        }
    }

    Ok(())
}

fn emit_string_literals(il: &ILCode, w: &mut impl Write) -> io::Result<()> {
    if il.strings.is_empty() {
        return Ok(());
    }
    writeln!(w, "\t.section\t.rodata")?;
    for (index, bytes) in il.strings.iter().enumerate() {
        let data = bytes
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(",");
        writeln!(w, ".Lstr{index}:\n\t.byte\t{data}")?;
    }
    Ok(())
}

/// Emits one function's body given its allocation.
struct FuncEmitter<'a> {
    il: &'a ILCode,
    alloc: &'a Allocation,
    defined_funcs: &'a HashSet<String>,
    // Callee-save slots sit just below the locals.
    callee_save_base: u64,
    lines: Vec<String>,
}

impl FuncEmitter<'_> {
    fn line(&mut self, s: impl Into<String>) {
        self.lines.push(format!("\t{}", s.into()));
    }

    fn label_line(&mut self, s: String) {
        self.lines.push(s);
    }

    fn spot(&self, v: ValueId) -> &Spot {
        self.alloc
            .spots
            .get(&v)
            .unwrap_or_else(|| panic!("value {v} has no spot"))
    }

    fn size_of(&self, v: ValueId) -> u64 {
        self.il.value(v).size.clamp(1, 8)
    }

    fn suffix(size: u64) -> char {
        match size {
            1 => 'b',
            2 => 'w',
            4 => 'l',
            _ => 'q',
        }
    }

    /// Emits a move between spots, staging through `%r11` when both
    /// sides are memory or the immediate needs 64 bits.
    fn move_spot(&mut self, src: &Spot, dst: &Spot, size: u64) {
        if src == dst {
            return;
        }
        let s = Self::suffix(size);

        if src.is_imm64() {
            let Spot::Literal(v) = src else { unreachable!() };
            match dst {
                Spot::Register(r) => {
                    self.line(format!("movabsq\t${v}, %{}", r.name(8)));
                }
                _ => {
                    self.line(format!("movabsq\t${v}, {}", SCRATCH));
                    self.line(format!(
                        "movq\t{}, {}",
                        Spot::Register(SCRATCH).operand(8),
                        dst.operand(8)
                    ));
                }
            }
            return;
        }

        if src.is_mem() && dst.is_mem() {
            self.line(format!(
                "mov{s}\t{}, {}",
                src.operand(size),
                Spot::Register(SCRATCH).operand(size)
            ));
            self.line(format!(
                "mov{s}\t{}, {}",
                Spot::Register(SCRATCH).operand(size),
                dst.operand(size)
            ));
            return;
        }

        self.line(format!("mov{s}\t{}, {}", src.operand(size), dst.operand(size)));
    }

    /// Returns an operand for `v`, staging 64-bit immediates into the
    /// given scratch register first.
    fn operand_imm64_via(&mut self, v: ValueId, scratch: Reg, size: u64) -> String {
        let spot = self.spot(v).clone();
        if spot.is_imm64() {
            let Spot::Literal(val) = spot else { unreachable!() };
            self.line(format!("movabsq\t${val}, %{}", scratch.name(8)));
            Spot::Register(scratch).operand(size)
        } else {
            spot.operand(size)
        }
    }

    /// Loads a pointer value into a register, returning the register to
    /// use as an indirection base.
    fn pointer_base(&mut self, v: ValueId, scratch: Reg) -> Reg {
        match self.spot(v) {
            Spot::Register(r) => *r,
            spot => {
                let spot = spot.clone();
                self.move_spot(&spot, &Spot::Register(scratch), 8);
                scratch
            }
        }
    }

    fn emit(&mut self, index: usize) -> Vec<String> {
        let il = self.il;
        let func = &il.funcs[index];

        // Prologue: save the caller's frame, reserve the 16-byte aligned
        // frame, and preserve the callee-saved registers in it.
        self.line("pushq\t%rbp");
        self.line("movq\t%rsp, %rbp");
        let total = round_up(
            self.alloc.frame_size
                + 8 * self.alloc.callee_saved_used.len() as u64,
            16,
        );
        if total > 0 {
            self.line(format!("subq\t${total}, %rsp"));
        }
        for (i, reg) in self.alloc.callee_saved_used.iter().enumerate() {
            let offset = self.callee_save_base + 8 * (i as u64 + 1);
            self.line(format!("movq\t{reg}, -{offset}(%rbp)"));
        }

        // ABI parameter prelude: move register parameters into their
        // assigned spots; copy stack-passed parameters only if they were
        // given a local home (e.g. their address is taken).
        for (i, &p) in func.params.iter().enumerate() {
            let Some(spot) = self.alloc.spots.get(&p).cloned() else {
                // Dead parameter; its incoming register is ignored.
                continue;
            };
            let size = self.size_of(p);
            if let Some(&incoming) = ARG_REGISTERS.get(i) {
                self.move_spot(&Spot::Register(incoming), &spot, size);
            } else {
                let caller_offset = 16 + 8 * (i - ARG_REGISTERS.len()) as i64;
                let from = Spot::Stack(caller_offset);
                if spot != from {
                    self.move_spot(&from, &spot, size);
                }
            }
        }

        for cmd in &func.commands {
            self.emit_command(cmd);
        }

        std::mem::take(&mut self.lines)
    }

    fn emit_command(&mut self, cmd: &ILCommand) {
        match cmd {
            ILCommand::Load { out, imm } => {
                let dst = self.spot(*out).clone();
                let size = self.size_of(*out);
                self.move_spot(&Spot::Literal(*imm), &dst, size);
            }
            ILCommand::Set { out, arg } => self.emit_set(*out, *arg),
            ILCommand::Unary { op, out, arg } => {
                let size = self.size_of(*out);
                let s = Self::suffix(size);
                let src = self.spot(*arg).clone();
                let dst = self.spot(*out).clone();
                self.move_spot(&src, &dst, size);
                let mnemonic = match op {
                    UnaryOp::Neg => "neg",
                    UnaryOp::Not => "not",
                };
                self.line(format!("{mnemonic}{s}\t{}", dst.operand(size)));
            }
            ILCommand::Binary { op, out, lhs, rhs } => {
                self.emit_binary(*op, *out, *lhs, *rhs);
            }
            ILCommand::Compare { op, out, lhs, rhs } => {
                self.emit_compare(*op, *out, *lhs, *rhs);
            }
            ILCommand::AddrOf { out, var } => {
                let target = match self.spot(*out) {
                    Spot::Register(r) => *r,
                    _ => SCRATCH,
                };
                let var_spot = self.spot(*var).clone();
                self.line(format!(
                    "leaq\t{}, %{}",
                    var_spot.operand(8),
                    target.name(8)
                ));
                let dst = self.spot(*out).clone();
                if dst != Spot::Register(target) {
                    self.line(format!(
                        "movq\t%{}, {}",
                        target.name(8),
                        dst.operand(8)
                    ));
                }
            }
            ILCommand::ReadAt { out, addr } => {
                let size = self.size_of(*out);
                let s = Self::suffix(size);
                let base = self.pointer_base(*addr, SCRATCH2);
                match self.spot(*out).clone() {
                    Spot::Register(r) => {
                        self.line(format!(
                            "mov{s}\t(%{}), %{}",
                            base.name(8),
                            r.name(size)
                        ));
                    }
                    dst => {
                        self.line(format!(
                            "mov{s}\t(%{}), %{}",
                            base.name(8),
                            SCRATCH.name(size)
                        ));
                        self.line(format!(
                            "mov{s}\t%{}, {}",
                            SCRATCH.name(size),
                            dst.operand(size)
                        ));
                    }
                }
            }
            ILCommand::SetAt { addr, val } => {
                let size = self.size_of(*val);
                let s = Self::suffix(size);
                let base = self.pointer_base(*addr, SCRATCH2);
                match self.spot(*val).clone() {
                    Spot::Literal(v) if !self.spot(*val).is_imm64() => {
                        self.line(format!("mov{s}\t${v}, (%{})", base.name(8)));
                    }
                    Spot::Register(r) => {
                        self.line(format!(
                            "mov{s}\t%{}, (%{})",
                            r.name(size),
                            base.name(8)
                        ));
                    }
                    src => {
                        self.move_spot(&src, &Spot::Register(SCRATCH), size);
                        self.line(format!(
                            "mov{s}\t%{}, (%{})",
                            SCRATCH.name(size),
                            base.name(8)
                        ));
                    }
                }
            }
            ILCommand::PointerAdd { out, ptr, offset } => {
                self.emit_pointer_arith("add", *out, *ptr, *offset);
            }
            ILCommand::PointerSub { out, ptr, offset } => {
                self.emit_pointer_arith("sub", *out, *ptr, *offset);
            }
            ILCommand::PointerDiff { out, lhs, rhs, elem_size } => {
                self.emit_pointer_diff(*out, *lhs, *rhs, *elem_size);
            }
            ILCommand::Label(l) => self.label_line(format!("{l}:")),
            ILCommand::Jump(l) => self.line(format!("jmp\t{l}")),
            ILCommand::JumpZero { cond, target } => {
                self.emit_cond_jump(*cond, *target, true);
            }
            ILCommand::JumpNotZero { cond, target } => {
                self.emit_cond_jump(*cond, *target, false);
            }
            ILCommand::Return(value) => {
                if let Some(v) = value {
                    let size = self.size_of(*v);
                    let src = self.spot(*v).clone();
                    self.move_spot(&src, &Spot::Register(Reg::Rax), size);
                }
                for (i, reg) in
                    self.alloc.callee_saved_used.clone().iter().enumerate()
                {
                    let offset = self.callee_save_base + 8 * (i as u64 + 1);
                    self.line(format!("movq\t-{offset}(%rbp), {reg}"));
                }
                self.line("leave");
                self.line("ret");
            }
            ILCommand::Call { func, args, out } => {
                self.emit_call(*func, args, *out);
            }
            ILCommand::StructCopy { dst, src, size } => {
                let src_spot = self.spot(*src).clone();
                self.move_spot(&src_spot, &Spot::Register(Reg::Rsi), 8);
                let dst_spot = self.spot(*dst).clone();
                self.move_spot(&dst_spot, &Spot::Register(Reg::Rdi), 8);
                self.move_spot(
                    &Spot::Literal(*size as i64),
                    &Spot::Register(Reg::Rcx),
                    8,
                );
                self.line("rep movsb");
            }
            ILCommand::Zero { addr, size } => {
                let addr_spot = self.spot(*addr).clone();
                self.move_spot(&addr_spot, &Spot::Register(Reg::Rdi), 8);
                self.line("xorl\t%eax, %eax");
                self.move_spot(
                    &Spot::Literal(*size as i64),
                    &Spot::Register(Reg::Rcx),
                    8,
                );
                self.line("rep stosb");
            }
        }
    }

    /// `Set` converts widths: truncation is a narrow move, widening is a
    /// sign or zero extension, and a `_Bool` destination normalizes to
    /// 0/1.
    fn emit_set(&mut self, out: ValueId, arg: ValueId) {
        let out_data = self.il.value(out);
        let arg_data = self.il.value(arg);
        let out_size = self.size_of(out);
        let arg_size = self.size_of(arg);
        let dst = self.spot(out).clone();
        let src = self.spot(arg).clone();

        // Booleans store only 0 or 1.
        if out_data.is_bool && !arg_data.is_bool {
            if let Spot::Literal(v) = src {
                self.move_spot(&Spot::Literal(i64::from(v != 0)), &dst, 1);
                return;
            }
            let s = Self::suffix(arg_size);
            self.line(format!("cmp{s}\t$0, {}", src.operand(arg_size)));
            self.line(format!("setne\t{}", dst.operand(1)));
            return;
        }

        if src.is_literal() || out_size <= arg_size {
            // Truncating (or same-size) copy: move only the low bytes.
            self.move_spot(&src, &dst, out_size);
            return;
        }

        // Widening: sign-extend signed sources, zero-extend unsigned
        // ones. A 32-to-64 unsigned widening is a plain 32-bit move.
        let target = match dst {
            Spot::Register(r) => r,
            _ => SCRATCH,
        };

        if !arg_data.signed && arg_size == 4 {
            self.line(format!(
                "movl\t{}, %{}",
                src.operand(4),
                target.name(4)
            ));
        } else {
            let mnemonic = if arg_data.signed { "movs" } else { "movz" };
            let s_from = Self::suffix(arg_size);
            let s_to = Self::suffix(out_size);
            self.line(format!(
                "{mnemonic}{s_from}{s_to}\t{}, %{}",
                src.operand(arg_size),
                target.name(out_size)
            ));
        }

        if dst != Spot::Register(target) {
            let s = Self::suffix(out_size);
            self.line(format!(
                "mov{s}\t%{}, {}",
                target.name(out_size),
                dst.operand(out_size)
            ));
        }
    }

    fn emit_binary(&mut self, op: BinaryOp, out: ValueId, lhs: ValueId, rhs: ValueId) {
        // Two literal operands were folded by lowering for constant
        // expressions; fold the stragglers here so no template needs a
        // third scratch register.
        if let (Some(l), Some(r)) = (
            self.il.value(lhs).literal(),
            self.il.value(rhs).literal(),
        ) {
            let signed = self.il.value(out).signed;
            let folded = fold_binary(op, l, r, signed);
            let dst = self.spot(out).clone();
            let size = self.size_of(out);
            self.move_spot(&Spot::Literal(folded), &dst, size);
            return;
        }

        match op {
            BinaryOp::Div | BinaryOp::Mod => self.emit_divmod(op, out, lhs, rhs),
            BinaryOp::LShift | BinaryOp::RShift => {
                self.emit_shift(op, out, lhs, rhs)
            }
            _ => self.emit_simple_binary(op, out, lhs, rhs),
        }
    }

    fn emit_simple_binary(
        &mut self,
        op: BinaryOp,
        out: ValueId,
        lhs: ValueId,
        rhs: ValueId,
    ) {
        let size = self.size_of(out);
        let s = Self::suffix(size);

        // Compute in the output register when there is one, otherwise in
        // scratch. The allocator keeps `out` and `rhs` apart, so the
        // initial copy of `lhs` cannot clobber the right operand.
        let (target, store_back) = match self.spot(out) {
            Spot::Register(r) => (*r, false),
            _ => (SCRATCH, true),
        };

        let lhs_spot = self.spot(lhs).clone();
        self.move_spot(&lhs_spot, &Spot::Register(target), size);

        let rhs_op = self.operand_imm64_via(rhs, SCRATCH2, size);

        match op {
            BinaryOp::Mult => {
                // The immediate form of imul is three-operand and takes
                // only 32-bit immediates; wider ones were staged into
                // scratch by `operand_imm64_via`.
                let rhs_spot = self.spot(rhs).clone();
                match rhs_spot {
                    Spot::Literal(v) if !rhs_spot.is_imm64() => {
                        let t = Spot::Register(target).operand(size);
                        self.line(format!("imul{s}\t${v}, {t}, {t}"));
                    }
                    _ => {
                        self.line(format!(
                            "imul{s}\t{rhs_op}, {}",
                            Spot::Register(target).operand(size)
                        ));
                    }
                }
            }
            _ => {
                let mnemonic = match op {
                    BinaryOp::Add => "add",
                    BinaryOp::Sub => "sub",
                    BinaryOp::And => "and",
                    BinaryOp::Or => "or",
                    BinaryOp::Xor => "xor",
                    _ => unreachable!("handled elsewhere"),
                };
                self.line(format!(
                    "{mnemonic}{s}\t{rhs_op}, {}",
                    Spot::Register(target).operand(size)
                ));
            }
        }

        if store_back {
            let dst = self.spot(out).clone();
            self.line(format!(
                "mov{s}\t{}, {}",
                Spot::Register(target).operand(size),
                dst.operand(size)
            ));
        }
    }

    fn emit_divmod(&mut self, op: BinaryOp, out: ValueId, lhs: ValueId, rhs: ValueId) {
        let size = self.size_of(out).max(4);
        let s = Self::suffix(size);
        let signed = self.il.value(lhs).signed;

        let lhs_spot = self.spot(lhs).clone();
        self.move_spot(&lhs_spot, &Spot::Register(Reg::Rax), size);

        // The divisor must be a register or memory operand outside
        // %rax/%rdx.
        let rhs_spot = self.spot(rhs).clone();
        let divisor = if rhs_spot.is_literal()
            || rhs_spot == Spot::Register(Reg::Rax)
            || rhs_spot == Spot::Register(Reg::Rdx)
        {
            self.move_spot(&rhs_spot, &Spot::Register(SCRATCH), size);
            Spot::Register(SCRATCH).operand(size)
        } else {
            rhs_spot.operand(size)
        };

        if signed {
            self.line(if size == 8 { "cqto" } else { "cltd" });
            self.line(format!("idiv{s}\t{divisor}"));
        } else {
            self.line("xorl\t%edx, %edx");
            self.line(format!("div{s}\t{divisor}"));
        }

        let result = if op == BinaryOp::Div { Reg::Rax } else { Reg::Rdx };
        let dst = self.spot(out).clone();
        if dst != Spot::Register(result) {
            self.move_spot(&Spot::Register(result), &dst, size);
        }
    }

    fn emit_shift(&mut self, op: BinaryOp, out: ValueId, lhs: ValueId, rhs: ValueId) {
        let size = self.size_of(out);
        let s = Self::suffix(size);
        let signed = self.il.value(out).signed;

        let mnemonic = match op {
            BinaryOp::LShift => "shl",
            _ if signed => "sar",
            _ => "shr",
        };

        let count = match self.spot(rhs).clone() {
            Spot::Literal(v) => format!("${v}"),
            spot => {
                // The allocator keeps lhs and out away from %rcx.
                self.move_spot(&spot, &Spot::Register(Reg::Rcx), size);
                "%cl".to_owned()
            }
        };

        let (target, store_back) = match self.spot(out) {
            Spot::Register(r) => (*r, false),
            _ => (SCRATCH, true),
        };
        let lhs_spot = self.spot(lhs).clone();
        self.move_spot(&lhs_spot, &Spot::Register(target), size);
        self.line(format!(
            "{mnemonic}{s}\t{count}, {}",
            Spot::Register(target).operand(size)
        ));

        if store_back {
            let dst = self.spot(out).clone();
            self.line(format!(
                "mov{s}\t{}, {}",
                Spot::Register(target).operand(size),
                dst.operand(size)
            ));
        }
    }

    fn emit_compare(&mut self, op: CompareOp, out: ValueId, lhs: ValueId, rhs: ValueId) {
        let signed = self.il.value(lhs).signed;

        if let (Some(l), Some(r)) = (
            self.il.value(lhs).literal(),
            self.il.value(rhs).literal(),
        ) {
            let result = fold_compare(op, l, r, signed);
            let dst = self.spot(out).clone();
            self.move_spot(&Spot::Literal(i64::from(result)), &dst, 1);
            return;
        }

        let size = self.size_of(lhs);
        let s = Self::suffix(size);

        // AT&T order: `cmp rhs, lhs` sets flags for lhs - rhs. The left
        // operand cannot be an immediate, and at most one operand may be
        // memory.
        let lhs_spot = self.spot(lhs).clone();
        let rhs_spot = self.spot(rhs).clone();
        let lhs_op = if lhs_spot.is_literal()
            || (lhs_spot.is_mem() && rhs_spot.is_mem())
        {
            self.move_spot(&lhs_spot, &Spot::Register(SCRATCH), size);
            Spot::Register(SCRATCH).operand(size)
        } else {
            lhs_spot.operand(size)
        };
        let rhs_op = self.operand_imm64_via(rhs, SCRATCH2, size);

        self.line(format!("cmp{s}\t{rhs_op}, {lhs_op}"));

        let cc = match (op, signed) {
            (CompareOp::Eq, _) => "e",
            (CompareOp::Neq, _) => "ne",
            (CompareOp::Lt, true) => "l",
            (CompareOp::Lt, false) => "b",
            (CompareOp::Le, true) => "le",
            (CompareOp::Le, false) => "be",
            (CompareOp::Gt, true) => "g",
            (CompareOp::Gt, false) => "a",
            (CompareOp::Ge, true) => "ge",
            (CompareOp::Ge, false) => "ae",
        };
        let dst = self.spot(out).clone();
        self.line(format!("set{cc}\t{}", dst.operand(1)));
    }

    fn emit_pointer_arith(
        &mut self,
        mnemonic: &str,
        out: ValueId,
        ptr: ValueId,
        offset: ValueId,
    ) {
        let (target, store_back) = match self.spot(out) {
            Spot::Register(r) => (*r, false),
            _ => (SCRATCH, true),
        };

        let ptr_spot = self.spot(ptr).clone();
        self.move_spot(&ptr_spot, &Spot::Register(target), 8);
        let offset_op = self.operand_imm64_via(offset, SCRATCH2, 8);
        self.line(format!(
            "{mnemonic}q\t{offset_op}, %{}",
            target.name(8)
        ));

        if store_back {
            let dst = self.spot(out).clone();
            self.line(format!("movq\t%{}, {}", target.name(8), dst.operand(8)));
        }
    }

    fn emit_pointer_diff(
        &mut self,
        out: ValueId,
        lhs: ValueId,
        rhs: ValueId,
        elem_size: u64,
    ) {
        let lhs_spot = self.spot(lhs).clone();
        self.move_spot(&lhs_spot, &Spot::Register(SCRATCH), 8);
        let rhs_op = self.spot(rhs).operand(8);
        self.line(format!("subq\t{rhs_op}, %r11"));

        let dst = self.spot(out).clone();
        if elem_size <= 1 {
            self.move_spot(&Spot::Register(SCRATCH), &dst, 8);
        } else if elem_size.is_power_of_two() {
            self.line(format!("sarq\t${}, %r11", elem_size.trailing_zeros()));
            self.move_spot(&Spot::Register(SCRATCH), &dst, 8);
        } else {
            self.line("movq\t%r11, %rax");
            self.line("cqto");
            self.line(format!("movq\t${elem_size}, %r11"));
            self.line("idivq\t%r11");
            self.move_spot(&Spot::Register(Reg::Rax), &dst, 8);
        }
    }

    fn emit_cond_jump(&mut self, cond: ValueId, target: crate::compiler::il::LabelId, on_zero: bool) {
        if let Some(v) = self.il.value(cond).literal() {
            // A constant condition either always jumps or never does.
            if (v == 0) == on_zero {
                self.line(format!("jmp\t{target}"));
            }
            return;
        }

        let size = self.size_of(cond);
        let s = Self::suffix(size);
        let spot = self.spot(cond).clone();
        self.line(format!("cmp{s}\t$0, {}", spot.operand(size)));
        self.line(format!("{}\t{target}", if on_zero { "je" } else { "jne" }));
    }

    fn emit_call(
        &mut self,
        func: ValueId,
        args: &[ValueId],
        out: Option<ValueId>,
    ) {
        // Excess arguments go on the stack, pushed right to left, with
        // the call site kept 16-byte aligned.
        let n_stack = args.len().saturating_sub(ARG_REGISTERS.len());
        let pad = if n_stack % 2 == 1 { 8u64 } else { 0 };
        if pad > 0 {
            self.line("subq\t$8, %rsp");
        }
        for &arg in args.iter().skip(ARG_REGISTERS.len()).rev() {
            match self.spot(arg).clone() {
                spot if spot.is_imm64() => {
                    let Spot::Literal(v) = spot else { unreachable!() };
                    self.line(format!("movabsq\t${v}, %r11"));
                    self.line("pushq\t%r11");
                }
                Spot::Literal(v) => self.line(format!("pushq\t${v}")),
                Spot::Register(r) => self.line(format!("pushq\t{r}")),
                // Frame slots are 8-byte aligned, so the wide read is
                // safe; the callee only inspects the value's width.
                spot => self.line(format!("pushq\t{}", spot.operand(8))),
            }
        }

        // Register arguments: emit the moves in an order that never
        // overwrites a register still serving as another move's source,
        // breaking cycles through %r11.
        let mut pending: Vec<(Reg, Spot, u64)> = args
            .iter()
            .take(ARG_REGISTERS.len())
            .enumerate()
            .filter_map(|(i, &arg)| {
                let spot = self.spot(arg).clone();
                let dst = ARG_REGISTERS[i];
                (spot != Spot::Register(dst))
                    .then(|| (dst, spot, self.size_of(arg)))
            })
            .collect();

        while !pending.is_empty() {
            let ready = pending.iter().position(|(dst, _, _)| {
                !pending
                    .iter()
                    .any(|(_, src, _)| *src == Spot::Register(*dst))
            });
            match ready {
                Some(i) => {
                    let (dst, src, size) = pending.remove(i);
                    self.move_spot(&src, &Spot::Register(dst), size);
                }
                None => {
                    // Every destination is someone's source: a cycle.
                    // Stash one destination's current value in scratch.
                    let blocked = pending[0].0;
                    self.line(format!("movq\t{blocked}, %r11"));
                    for (_, src, _) in pending.iter_mut() {
                        if *src == Spot::Register(blocked) {
                            *src = Spot::Register(SCRATCH);
                        }
                    }
                }
            }
        }

        // Variadic callees expect the number of vector-register
        // arguments in %al; no floating point is ever passed, so zero it
        // unless the call target itself lives in %rax.
        if self.spot(func) != &Spot::Register(Reg::Rax) {
            self.line("movl\t$0, %eax");
        }

        // Direct calls go to the function's label; everything else is an
        // indirect call through the function pointer's spot.
        let fn_designator =
            matches!(self.spot(func), Spot::MemLabel(_))
                && self.il.value(func).size == 0;
        if fn_designator {
            let Spot::MemLabel(label) = self.spot(func).clone() else {
                unreachable!()
            };
            if self.defined_funcs.contains(&label) {
                self.line(format!("call\t{label}"));
            } else {
                // Undefined functions resolve through the PLT.
                self.line(format!("call\t{label}@PLT"));
            }
        } else {
            match self.spot(func).clone() {
                Spot::Register(r) => self.line(format!("call\t*{r}")),
                spot => self.line(format!("call\t*{}", spot.operand(8))),
            }
        }

        if n_stack > 0 || pad > 0 {
            let bytes = 8 * n_stack as u64 + pad;
            self.line(format!("addq\t${bytes}, %rsp"));
        }

        if let Some(out) = out {
            let size = self.size_of(out);
            let dst = self.spot(out).clone();
            if dst != Spot::Register(Reg::Rax) {
                self.move_spot(&Spot::Register(Reg::Rax), &dst, size);
            }
        }
    }
}

fn fold_binary(op: BinaryOp, l: i64, r: i64, signed: bool) -> i64 {
    match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Sub => l.wrapping_sub(r),
        BinaryOp::Mult => l.wrapping_mul(r),
        BinaryOp::Div => {
            if r == 0 {
                0
            } else if signed {
                l.wrapping_div(r)
            } else {
                ((l as u64) / (r as u64)) as i64
            }
        }
        BinaryOp::Mod => {
            if r == 0 {
                0
            } else if signed {
                l.wrapping_rem(r)
            } else {
                ((l as u64) % (r as u64)) as i64
            }
        }
        BinaryOp::And => l & r,
        BinaryOp::Or => l | r,
        BinaryOp::Xor => l ^ r,
        BinaryOp::LShift => l.wrapping_shl(r as u32),
        BinaryOp::RShift => {
            if signed {
                l.wrapping_shr(r as u32)
            } else {
                ((l as u64).wrapping_shr(r as u32)) as i64
            }
        }
    }
}

fn fold_compare(op: CompareOp, l: i64, r: i64, signed: bool) -> bool {
    if signed {
        match op {
            CompareOp::Eq => l == r,
            CompareOp::Neq => l != r,
            CompareOp::Lt => l < r,
            CompareOp::Le => l <= r,
            CompareOp::Gt => l > r,
            CompareOp::Ge => l >= r,
        }
    } else {
        let (l, r) = (l as u64, r as u64);
        match op {
            CompareOp::Eq => l == r,
            CompareOp::Neq => l != r,
            CompareOp::Lt => l < r,
            CompareOp::Le => l <= r,
            CompareOp::Gt => l > r,
            CompareOp::Ge => l >= r,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::lower;
    use crate::compiler::parser;
    use crate::compiler::types::TypePool;
    use crate::error::ErrorCollector;

    fn compile_to_asm(src: &[u8]) -> String {
        let mut errors = ErrorCollector::new();
        let tokens = Lexer::new("test.c", src).lex(&mut errors);
        let unit = parser::parse(&tokens, &mut errors);
        let mut pool = TypePool::new();
        let mut syms = SymbolTable::new();
        let mut il = lower::lower_unit(&unit, &mut pool, &mut syms, &mut errors);
        assert!(errors.ok(), "unexpected errors: {:?}", errors.messages());

        let mut buf = Vec::new();
        emit_unit(&mut il, &syms, &mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn minimal_main_emits_prologue_and_ret() {
        let asm = compile_to_asm(b"int main(void) { return 0; }");
        assert!(asm.contains(".globl\tmain"));
        assert!(asm.contains("main:"));
        assert!(asm.contains("pushq\t%rbp"));
        assert!(asm.contains("movq\t%rsp, %rbp"));
        assert!(asm.contains("leave"));
        assert!(asm.contains("ret"));
        assert!(asm.contains(".note.GNU-stack"));
    }

    #[test]
    fn arithmetic_uses_sized_instructions() {
        let asm = compile_to_asm(
            b"int main(void) { int a = 5; int b = 10; return a + b; }",
        );
        assert!(asm.contains("addl"), "expected 32-bit add in:\n{asm}");
    }

    #[test]
    fn division_goes_through_rax() {
        let asm = compile_to_asm(
            b"int main(void) { int a = 40; int b = 5; return a / b; }",
        );
        // Division with non-constant operands sign-extends and divides.
        assert!(asm.contains("idivl") || asm.contains("movl\t$8"), "{asm}");
    }

    #[test]
    fn static_variable_emitted_as_data() {
        let asm = compile_to_asm(
            b"static int counter = 42; int main(void) { return counter; }",
        );
        assert!(asm.contains(".data"));
        assert!(asm.contains("counter:"));
        assert!(asm.contains(".long\t42"));
    }

    #[test]
    fn tentative_global_becomes_common() {
        let asm = compile_to_asm(b"int shared; int main(void) { return shared; }");
        assert!(asm.contains(".comm\tshared,4,4"), "{asm}");
    }

    #[test]
    fn string_literal_in_rodata() {
        let asm = compile_to_asm(
            b"int puts(char *s); int main(void) { puts(\"hi\"); return 0; }",
        );
        assert!(asm.contains(".rodata"));
        assert!(asm.contains(".Lstr0:"));
        // 'h', 'i', NUL
        assert!(asm.contains(".byte\t104,105,0"));
    }

    #[test]
    fn undefined_function_called_through_plt() {
        let asm = compile_to_asm(
            b"int isalpha(int c); int main(void) { return isalpha(65) == 0; }",
        );
        assert!(asm.contains("call\tisalpha@PLT"), "{asm}");
    }

    #[test]
    fn defined_function_called_directly() {
        let asm = compile_to_asm(
            b"int helper(void) { return 3; } int main(void) { return helper(); }",
        );
        assert!(asm.contains("call\thelper\n"), "{asm}");
    }

    #[test]
    fn while_loop_emits_labels_and_jumps() {
        let asm = compile_to_asm(
            b"int main(void) { int i = 0; while (i < 10) { i = i + 1; } return i; }",
        );
        assert!(asm.contains("jmp\t.L"));
        assert!(asm.contains("je\t.L") || asm.contains("jne\t.L"));
    }

    #[test]
    fn static_local_counters_get_distinct_labels() {
        let asm = compile_to_asm(
            b"int f(void) { static int i; return i++; }
              int g(void) { static int i; return i++; }
              int main(void) { f(); g(); return 0; }",
        );
        assert!(asm.contains("i.1"), "{asm}");
        assert!(asm.contains("i.2"), "{asm}");
    }

    #[test]
    fn char_array_initializer_copies_bytes() {
        let asm = compile_to_asm(
            b"int main(void) { char s[6] = \"hello\"; return s[0]; }",
        );
        assert!(asm.contains("rep movsb"), "{asm}");
    }

    #[test]
    fn function_pointer_call_is_indirect() {
        let asm = compile_to_asm(
            b"int isalpha(int c); int main(void) { int (*f)(int) = isalpha; return f(65) != 0; }",
        );
        assert!(asm.contains("call\t*"), "{asm}");
    }

    #[test]
    fn scenario_array_sum_loop() {
        let asm = compile_to_asm(
            b"int main(void) {
                int vals[5];
                int sum = 0;
                vals[0] = 15; vals[1] = 35; vals[2] = 20;
                vals[3] = 10; vals[4] = 45;
                for (int i = 0; i < 5; i++) {
                    sum = sum + vals[i];
                }
                if (sum != 125) return 1;
                return 0;
            }",
        );
        // The array lives in the frame; elements are reached through a
        // scaled pointer offset.
        assert!(asm.contains("leaq"), "{asm}");
        assert!(asm.contains("(%rbp)"), "{asm}");
    }

    #[test]
    fn scenario_sizeof_battery() {
        let asm = compile_to_asm(
            b"struct inner { long a; int b; };
              struct outer { int x; struct inner in; long y; };
              int main(void) {
                  if (sizeof(_Bool) != 1) return 1;
                  if (sizeof(char) != 1) return 2;
                  if (sizeof(short) != 2) return 3;
                  if (sizeof(int) != 4) return 4;
                  if (sizeof(long) != 8) return 5;
                  if (sizeof(char *) != 8) return 6;
                  if (sizeof(struct outer) != 32) return 7;
                  return 0;
              }",
        );
        // Every branch folds against a constant; the unit still emits a
        // well-formed function.
        assert!(asm.contains("main:"), "{asm}");
        assert!(asm.contains("ret"), "{asm}");
    }

    #[test]
    fn scenario_trie_node_shape() {
        let asm = compile_to_asm(
            b"typedef unsigned long size_t;
              void *malloc(size_t n);
              typedef struct node { struct node *next[27]; int complete; } Node;
              int main(void) {
                  Node *root = malloc(sizeof(Node));
                  root->complete = 1;
                  for (int i = 0; i < 27; i++) root->next[i] = 0;
                  Node **n = &root;
                  (*n)->complete = 0;
                  return root->complete;
              }",
        );
        assert!(asm.contains("call\tmalloc@PLT"), "{asm}");
        // Member stores go through computed addresses.
        assert!(asm.contains("addq"), "{asm}");
    }

    #[test]
    fn scenario_pointer_identities() {
        // &*p is p again: no extra indirection is materialized between
        // the read of p and the store to q.
        let asm = compile_to_asm(
            b"int main(void) {
                int x = 7;
                int *p = &x;
                int *q = &*p;
                return *q - x;
              }",
        );
        assert!(asm.contains("leaq"), "{asm}");
    }
}
