//! Expression lowering.
//!
//! Every expression lowers to an IL value. Lvalues are carried as
//! [`LValue`]: either the object's own IL value (a named variable) or an
//! IL value holding the object's address, marked with the
//! lvalue-location flag. Operators that need the stored value insert an
//! explicit `ReadAt`; taking the address of an indirect lvalue simply
//! clears the flag on the address value.

use crate::compiler::il::{
    BinaryOp, CompareOp, ILCommand, UnaryOp, ValueId,
};
use crate::compiler::lexer::IntSuffix;
use crate::compiler::lower::{apply_declarator, base_type, LowerCtx};
use crate::compiler::parser::ast::*;
use crate::compiler::symbols::Binding;
use crate::compiler::types::{Conversion, Type, TypePool};
use crate::error::Pos;

/// A designated object: directly a named IL value, or indirectly the IL
/// value of its address.
#[derive(Debug, Clone, Copy)]
pub enum LValue {
    /// The object itself (a declared variable or string literal).
    Direct(ValueId),
    /// A value holding the object's address (dereference, subscript,
    /// member access).
    Indirect(ValueId),
}

impl LValue {
    /// The type of the designated object.
    pub fn ty(self, ctx: &LowerCtx<'_>) -> Type {
        match self {
            LValue::Direct(v) => ctx.ty_of(v),
            LValue::Indirect(addr) => ctx
                .pool
                .pointee(ctx.ty_of(addr))
                .expect("indirect lvalue address must be a pointer"),
        }
    }

    /// Emits code producing the stored value.
    pub fn val(self, ctx: &mut LowerCtx<'_>) -> ValueId {
        match self {
            LValue::Direct(v) => v,
            LValue::Indirect(addr) => {
                let ty = self.ty(ctx);
                if ctx.pool.is_record(ty) {
                    // Aggregates are copied through memory rather than
                    // read into a register.
                    let size = ctx.pool.size(ty).unwrap_or(0);
                    let out = ctx.new_value(ty);
                    let ptr_ty = ctx.pool.pointer_to(ty);
                    let out_addr = ctx.new_value(ptr_ty);
                    ctx.il.add(ILCommand::AddrOf { out: out_addr, var: out });
                    ctx.il.add(ILCommand::StructCopy {
                        dst: out_addr,
                        src: addr,
                        size,
                    });
                    out
                } else {
                    let out = ctx.new_value(ty.unqualified());
                    ctx.il.add(ILCommand::ReadAt { out, addr });
                    out
                }
            }
        }
    }

    /// Emits code producing the object's address as an ordinary pointer
    /// rvalue.
    pub fn addr(self, ctx: &mut LowerCtx<'_>) -> ValueId {
        match self {
            LValue::Direct(v) => {
                let ty = ctx.pool.pointer_to(ctx.ty_of(v));
                let out = ctx.new_value(ty);
                ctx.il.add(ILCommand::AddrOf { out, var: v });
                out
            }
            LValue::Indirect(addr) => {
                // `&*p` is just `p` again.
                ctx.il.clear_lvalue_loc(addr);
                addr
            }
        }
    }

    /// `true` if this designates a modifiable lvalue.
    pub fn modable(self, ctx: &LowerCtx<'_>) -> bool {
        let ty = self.ty(ctx);
        if ctx.pool.is_array(ty) || !ctx.pool.is_complete(ty) || ty.is_const() {
            return false;
        }
        if let Some(members) = ctx.pool.members(ty) {
            if members.iter().any(|m| m.ty.is_const()) {
                return false;
            }
        }
        true
    }

    /// Emits code assigning `rvalue` to this lvalue, with conversion
    /// checking, returning the stored (converted) value.
    pub fn set_to(self, rvalue: ValueId, pos: Pos, ctx: &mut LowerCtx<'_>) -> ValueId {
        let ty = self.ty(ctx);
        check_cast(rvalue, ty, pos, ctx);

        if ctx.pool.is_record(ty) {
            let size = ctx.pool.size(ty).unwrap_or(0);
            let dst = match self {
                LValue::Direct(v) => {
                    let ptr_ty = ctx.pool.pointer_to(ty);
                    let out = ctx.new_value(ptr_ty);
                    ctx.il.add(ILCommand::AddrOf { out, var: v });
                    out
                }
                LValue::Indirect(addr) => addr,
            };
            // The right side of a record assignment also lives in
            // memory; copy through its address.
            let src_ty = ctx.pool.pointer_to(ctx.ty_of(rvalue));
            let src = ctx.new_value(src_ty);
            ctx.il.add(ILCommand::AddrOf { out: src, var: rvalue });
            ctx.il.add(ILCommand::StructCopy { dst, src, size });
            return rvalue;
        }

        match self {
            LValue::Direct(v) => set_type(rvalue, ty.unqualified(), Some(v), ctx),
            LValue::Indirect(addr) => {
                let converted = set_type(rvalue, ty.unqualified(), None, ctx);
                ctx.il.add(ILCommand::SetAt { addr, val: converted });
                converted
            }
        }
    }
}

// ----------------------------------------------------------------------
// Conversion helpers.

/// `true` if the value is a null pointer constant: an integer constant
/// expression of value 0.
fn is_null_const(v: ValueId, ctx: &LowerCtx<'_>) -> bool {
    ctx.il.value(v).literal() == Some(0) && ctx.pool.is_integral(ctx.ty_of(v))
}

/// Diagnoses the implicit conversion of `val` to `ty`; does not convert.
pub fn check_cast(val: ValueId, ty: Type, pos: Pos, ctx: &mut LowerCtx<'_>) {
    let from = ctx.ty_of(val);
    match ctx.pool.classify_conversion(from, ty, is_null_const(val, ctx)) {
        Conversion::Identity
        | Conversion::IntegerPromotion
        | Conversion::UsualArithmetic
        | Conversion::PointerToVoid
        | Conversion::NullPointerConstant => {}
        Conversion::IncompatiblePointerWarning => {
            ctx.errors
                .warn("conversion from incompatible pointer type", pos);
        }
        Conversion::Forbidden => {
            ctx.errors.error(
                format!(
                    "invalid conversion from '{}' to '{}'",
                    ctx.pool.display(from),
                    ctx.pool.display(ty)
                ),
                pos,
            );
        }
    }
}

/// Wraps a literal into the representable range of an integral type.
fn shift_into_range(val: i64, ty: Type, ctx: &LowerCtx<'_>) -> i64 {
    let Some(size) = ctx.pool.size(ty) else {
        return val;
    };
    if size >= 8 {
        return val;
    }
    let bits = size * 8;
    let mask = (1i64 << bits) - 1;
    let mut v = val & mask;
    if ctx.pool.is_signed(ty) && v >= (1i64 << (bits - 1)) {
        v -= 1i64 << bits;
    }
    v
}

/// Converts `val` to `ty`, emitting a `Set` if needed. With `output`, the
/// converted value is stored there; otherwise a compatible `val` may be
/// returned unchanged, so callers must not mutate the result.
pub fn set_type(
    val: ValueId,
    ty: Type,
    output: Option<ValueId>,
    ctx: &mut LowerCtx<'_>,
) -> ValueId {
    let from = ctx.ty_of(val);

    match output {
        None if ctx.pool.compatible(from, ty) => val,
        Some(out) if out == val => val,
        None if ctx.il.value(val).literal().is_some()
            && ctx.pool.is_integral(ty) =>
        {
            let v = ctx.il.value(val).literal().unwrap();
            ctx.new_literal(ty, shift_into_range(v, ty, ctx))
        }
        _ => {
            let out = output.unwrap_or_else(|| ctx.new_value(ty));
            ctx.il.add(ILCommand::Set { out, arg: val });
            out
        }
    }
}

/// Converts both operands of an arithmetic operator to their common
/// type, returning the converted values and that type.
fn arith_convert(
    lhs: ValueId,
    rhs: ValueId,
    ctx: &mut LowerCtx<'_>,
) -> (ValueId, ValueId, Type) {
    let ty = ctx.pool.usual_arith(ctx.ty_of(lhs), ctx.ty_of(rhs));
    let l = set_type(lhs, ty, None, ctx);
    let r = set_type(rhs, ty, None, ctx);
    (l, r, ty)
}

// ----------------------------------------------------------------------
// Rvalue lowering.

/// Lowers an expression to an rvalue, applying array-to-pointer and
/// function-to-pointer decay.
pub fn lower_expr(expr: &Expr, ctx: &mut LowerCtx<'_>) -> ValueId {
    match &expr.kind {
        ExprKind::IntLit { value, suffix } => {
            let ty = int_literal_type(*value, *suffix);
            ctx.new_literal(ty, *value)
        }
        ExprKind::CharLit(c) => {
            // Character constants have type int.
            ctx.new_literal(TypePool::INT, i64::from(*c))
        }
        ExprKind::StrLit(_) | ExprKind::Ident(_) => {
            match lower_lvalue(expr, ctx) {
                Some(lv) => rvalue_of(lv, ctx),
                None => lower_ident_rvalue(expr, ctx),
            }
        }
        ExprKind::Unary { op: UnaryOpKind::Deref, .. } => {
            match lower_lvalue(expr, ctx) {
                Some(lv) => {
                    let ty = lv.ty(ctx);
                    if !ctx.pool.is_complete(ty) && !ctx.pool.is_function(ty) {
                        ctx.errors.error(
                            "dereferencing pointer to incomplete type",
                            expr.pos,
                        );
                        return ctx.poison(TypePool::INT);
                    }
                    rvalue_of(lv, ctx)
                }
                None => ctx.poison(TypePool::INT),
            }
        }
        ExprKind::Unary { op, arg } => lower_unary(*op, arg, expr.pos, ctx),
        ExprKind::PostInc(arg) => lower_incdec(arg, expr.pos, true, true, ctx),
        ExprKind::PostDec(arg) => lower_incdec(arg, expr.pos, false, true, ctx),
        ExprKind::Binary { op, lhs, rhs } => {
            lower_binary(*op, lhs, rhs, expr.pos, ctx)
        }
        ExprKind::Assign { lhs, rhs } => {
            let rvalue = lower_expr(rhs, ctx);
            match lower_modable_lvalue(lhs, expr.pos, ctx) {
                Some(lv) => lv.set_to(rvalue, expr.pos, ctx),
                None => rvalue,
            }
        }
        ExprKind::CompoundAssign { op, lhs, rhs } => {
            let rvalue = lower_expr(rhs, ctx);
            let Some(lv) = lower_modable_lvalue(lhs, expr.pos, ctx) else {
                return rvalue;
            };
            let old = lv.val(ctx);
            let result = arith_binary_values(*op, old, rvalue, expr.pos, ctx);
            lv.set_to(result, expr.pos, ctx)
        }
        ExprKind::Conditional { cond, then_expr, else_expr } => {
            lower_conditional(cond, then_expr, else_expr, expr.pos, ctx)
        }
        ExprKind::Call { func, args } => lower_call(func, args, expr.pos, ctx),
        ExprKind::Subscript { .. }
        | ExprKind::Member { .. }
        | ExprKind::Arrow { .. } => match lower_lvalue(expr, ctx) {
            Some(lv) => rvalue_of(lv, ctx),
            None => ctx.poison(TypePool::INT),
        },
        ExprKind::SizeofExpr(arg) => {
            // The operand is not lowered; only its type is computed.
            let ty = expr_type(arg, ctx);
            lower_sizeof(ty, expr.pos, ctx)
        }
        ExprKind::SizeofType(type_name) => {
            let ty = type_from_name(type_name, ctx);
            lower_sizeof(ty, expr.pos, ctx)
        }
        ExprKind::Cast { to, arg } => {
            let ty = type_from_name(to, ctx);
            let v = lower_expr(arg, ctx);
            lower_cast(v, ty, expr.pos, ctx)
        }
    }
}

fn lower_ident_rvalue(expr: &Expr, ctx: &mut LowerCtx<'_>) -> ValueId {
    // `lower_lvalue` already reported the problem or the identifier is
    // an enum constant.
    if let ExprKind::Ident(name) = &expr.kind {
        if let Some(Binding::EnumConst(v)) = ctx.syms.lookup(name) {
            let v = *v;
            return ctx.new_literal(TypePool::INT, v);
        }
    }
    ctx.poison(TypePool::INT)
}

/// Applies decay when an lvalue is used as an rvalue.
fn rvalue_of(lv: LValue, ctx: &mut LowerCtx<'_>) -> ValueId {
    let ty = lv.ty(ctx);

    if let Some(elem) = ctx.pool.elem(ty) {
        // Array decay: the value is a pointer to the first element.
        let ptr_ty = ctx.pool.pointer_to(elem);
        return match lv {
            LValue::Direct(v) => {
                let out = ctx.new_value(ptr_ty);
                ctx.il.add(ILCommand::AddrOf { out, var: v });
                out
            }
            LValue::Indirect(addr) => {
                let out = ctx.new_value(ptr_ty);
                ctx.il.add(ILCommand::Set { out, arg: addr });
                out
            }
        };
    }

    if ctx.pool.is_function(ty) {
        // Function designators decay to function pointers.
        let ptr_ty = ctx.pool.pointer_to(ty);
        return match lv {
            LValue::Direct(v) => {
                let out = ctx.new_value(ptr_ty);
                ctx.il.add(ILCommand::AddrOf { out, var: v });
                out
            }
            LValue::Indirect(addr) => addr,
        };
    }

    lv.val(ctx)
}

/// The C type of an integer literal from its value and suffix.
fn int_literal_type(value: i64, suffix: IntSuffix) -> Type {
    match suffix {
        IntSuffix::None => {
            if value >= i64::from(i32::MIN) && value <= i64::from(i32::MAX) {
                TypePool::INT
            } else {
                TypePool::LONG
            }
        }
        IntSuffix::Unsigned => {
            if value >= 0 && value <= i64::from(u32::MAX) {
                TypePool::UINT
            } else {
                TypePool::ULONG
            }
        }
        IntSuffix::Long => TypePool::LONG,
        IntSuffix::UnsignedLong => TypePool::ULONG,
    }
}

// ----------------------------------------------------------------------
// Lvalue lowering.

/// Lowers an expression as an lvalue. Returns `None` (with a diagnostic
/// where appropriate) if the expression does not designate an object.
pub fn lower_lvalue(expr: &Expr, ctx: &mut LowerCtx<'_>) -> Option<LValue> {
    match &expr.kind {
        ExprKind::Ident(name) => match ctx.syms.lookup(name) {
            Some(Binding::Var(v)) => Some(LValue::Direct(*v)),
            Some(Binding::EnumConst(_)) => None,
            Some(Binding::Typedef(_)) | None => {
                ctx.errors.error(
                    format!("use of undeclared identifier '{name}'"),
                    expr.pos,
                );
                None
            }
        },
        ExprKind::StrLit(bytes) => {
            let mut data = bytes.clone();
            data.push(0);
            let len = data.len() as u64;
            let arr_ty = ctx.pool.array_of(TypePool::CHAR, Some(len));
            let v = ctx.il.new_string_literal(arr_ty, data);
            Some(LValue::Direct(v))
        }
        ExprKind::Unary { op: UnaryOpKind::Deref, arg } => {
            let ptr = lower_expr(arg, ctx);
            let ty = ctx.ty_of(ptr);
            if !ctx.pool.is_pointer(ty) {
                ctx.errors
                    .error("dereferencing a non-pointer value", expr.pos);
                return None;
            }
            ctx.il.mark_lvalue_loc(ptr);
            Some(LValue::Indirect(ptr))
        }
        ExprKind::Subscript { base, index } => {
            let base_v = lower_expr(base, ctx);
            let index_v = lower_expr(index, ctx);
            // Either operand may be the pointer; the other must be
            // integral.
            let (ptr, count) = if ctx.pool.is_pointer(ctx.ty_of(base_v)) {
                (base_v, index_v)
            } else {
                (index_v, base_v)
            };
            if !ctx.pool.is_pointer(ctx.ty_of(ptr))
                || !ctx.pool.is_integral(ctx.ty_of(count))
            {
                ctx.errors.error(
                    "subscripted value is not a pointer into an array",
                    expr.pos,
                );
                return None;
            }
            let addr = pointer_offset_add(ptr, count, false, expr.pos, ctx);
            ctx.il.mark_lvalue_loc(addr);
            Some(LValue::Indirect(addr))
        }
        ExprKind::Member { base, member } => {
            let lv = lower_lvalue(base, ctx)?;
            let base_ty = lv.ty(ctx);
            if !ctx.pool.is_record(base_ty) {
                ctx.errors.error(
                    "member access of non-struct, non-union value",
                    expr.pos,
                );
                return None;
            }
            let addr = lv.addr(ctx);
            member_lvalue(addr, base_ty, member, expr.pos, ctx)
        }
        ExprKind::Arrow { base, member } => {
            let ptr = lower_expr(base, ctx);
            let ptr_ty = ctx.ty_of(ptr);
            let Some(pointee) = ctx.pool.pointee(ptr_ty) else {
                ctx.errors.error(
                    "arrow access of non-pointer value",
                    expr.pos,
                );
                return None;
            };
            if !ctx.pool.is_record(pointee) {
                ctx.errors.error(
                    "member access of non-struct, non-union value",
                    expr.pos,
                );
                return None;
            }
            member_lvalue(ptr, pointee, member, expr.pos, ctx)
        }
        _ => None,
    }
}

/// Lowers an assignment target, diagnosing non-lvalues and unmodifiable
/// lvalues.
fn lower_modable_lvalue(
    expr: &Expr,
    pos: Pos,
    ctx: &mut LowerCtx<'_>,
) -> Option<LValue> {
    let Some(lv) = lower_lvalue(expr, ctx) else {
        // Only add a diagnostic if lowering itself stayed quiet.
        if !matches!(
            expr.kind,
            ExprKind::Ident(_)
                | ExprKind::Unary { op: UnaryOpKind::Deref, .. }
                | ExprKind::Subscript { .. }
                | ExprKind::Member { .. }
                | ExprKind::Arrow { .. }
        ) {
            ctx.errors.error("expression is not assignable", pos);
        }
        return None;
    };

    if !lv.modable(ctx) {
        ctx.errors
            .error("expression is not a modifiable lvalue", pos);
        return None;
    }
    Some(lv)
}

fn member_lvalue(
    record_addr: ValueId,
    record_ty: Type,
    member: &str,
    pos: Pos,
    ctx: &mut LowerCtx<'_>,
) -> Option<LValue> {
    if !ctx.pool.is_complete(record_ty) {
        ctx.errors.error(
            format!(
                "member access of incomplete type '{}'",
                ctx.pool.display(record_ty)
            ),
            pos,
        );
        return None;
    }

    let Some(m) = ctx.pool.member(record_ty, member) else {
        ctx.errors.error(
            format!(
                "no member named '{member}' in '{}'",
                ctx.pool.display(record_ty)
            ),
            pos,
        );
        return None;
    };

    // A const record propagates const to its members.
    let mut mty = m.ty;
    if record_ty.is_const() {
        mty = mty.qualified_const();
    }

    let ptr_ty = ctx.pool.pointer_to(mty);
    let out = ctx.new_value(ptr_ty);
    if m.offset == 0 {
        ctx.il.add(ILCommand::Set { out, arg: record_addr });
    } else {
        let off = ctx.new_literal(TypePool::LONG, m.offset as i64);
        ctx.il.add(ILCommand::PointerAdd {
            out,
            ptr: record_addr,
            offset: off,
        });
    }
    ctx.il.mark_lvalue_loc(out);
    Some(LValue::Indirect(out))
}

// ----------------------------------------------------------------------
// Operators.

fn lower_unary(
    op: UnaryOpKind,
    arg: &Expr,
    pos: Pos,
    ctx: &mut LowerCtx<'_>,
) -> ValueId {
    match op {
        UnaryOpKind::AddrOf => {
            // Arrays and functions do not decay under `&`.
            match lower_lvalue(arg, ctx) {
                Some(lv) => lv.addr(ctx),
                None => {
                    ctx.errors
                        .error("cannot take address of non-lvalue", pos);
                    let ty = ctx.pool.pointer_to(TypePool::INT);
                    ctx.poison(ty)
                }
            }
        }
        UnaryOpKind::Deref => {
            unreachable!("deref rvalues are lowered through lower_lvalue")
        }
        UnaryOpKind::Plus => {
            let v = lower_expr(arg, ctx);
            let ty = ctx.ty_of(v);
            if !ctx.pool.is_arith(ty) {
                ctx.errors
                    .error("invalid operand type for unary operator", pos);
                return ctx.poison(TypePool::INT);
            }
            let promoted = ctx.pool.promoted(ty);
            set_type(v, promoted, None, ctx)
        }
        UnaryOpKind::Neg | UnaryOpKind::BitNot => {
            let v = lower_expr(arg, ctx);
            let ty = ctx.ty_of(v);
            if !ctx.pool.is_arith(ty) {
                ctx.errors
                    .error("invalid operand type for unary operator", pos);
                return ctx.poison(TypePool::INT);
            }
            let promoted = ctx.pool.promoted(ty);
            let v = set_type(v, promoted, None, ctx);
            let out = ctx.new_value(promoted);
            let il_op = if op == UnaryOpKind::Neg {
                UnaryOp::Neg
            } else {
                UnaryOp::Not
            };
            ctx.il.add(ILCommand::Unary { op: il_op, out, arg: v });
            out
        }
        UnaryOpKind::LogicalNot => {
            let v = lower_expr(arg, ctx);
            let ty = ctx.ty_of(v);
            if !ctx.pool.is_scalar(ty) {
                ctx.errors
                    .error("invalid operand type for unary operator", pos);
                return ctx.poison(TypePool::BOOL);
            }
            let zero = ctx.new_literal(ty.unqualified(), 0);
            let out = ctx.new_value(TypePool::BOOL);
            ctx.il.add(ILCommand::Compare {
                op: CompareOp::Eq,
                out,
                lhs: v,
                rhs: zero,
            });
            out
        }
        UnaryOpKind::PreInc => lower_incdec(arg, pos, true, false, ctx),
        UnaryOpKind::PreDec => lower_incdec(arg, pos, false, false, ctx),
    }
}

fn lower_incdec(
    arg: &Expr,
    pos: Pos,
    is_inc: bool,
    is_post: bool,
    ctx: &mut LowerCtx<'_>,
) -> ValueId {
    let Some(lv) = lower_modable_lvalue(arg, pos, ctx) else {
        return ctx.poison(TypePool::INT);
    };
    let ty = lv.ty(ctx);
    if !ctx.pool.is_scalar(ty) {
        ctx.errors
            .error("invalid operand type for increment operator", pos);
        return ctx.poison(TypePool::INT);
    }

    let old = lv.val(ctx);

    let saved = if is_post {
        // The result of a postfix operator is the value before the
        // update; it must be copied out before the store.
        let saved = ctx.new_value(ctx.ty_of(old));
        ctx.il.add(ILCommand::Set { out: saved, arg: old });
        Some(saved)
    } else {
        None
    };

    let one = ctx.new_literal(TypePool::INT, 1);
    let op = if is_inc { BinOpKind::Add } else { BinOpKind::Sub };
    let updated = arith_binary_values(op, old, one, pos, ctx);
    let stored = lv.set_to(updated, pos, ctx);

    saved.unwrap_or(stored)
}

fn lower_binary(
    op: BinOpKind,
    lhs: &Expr,
    rhs: &Expr,
    pos: Pos,
    ctx: &mut LowerCtx<'_>,
) -> ValueId {
    match op {
        BinOpKind::LogAnd | BinOpKind::LogOr => {
            lower_short_circuit(op, lhs, rhs, pos, ctx)
        }
        BinOpKind::Comma => {
            let _ = lower_expr(lhs, ctx);
            lower_expr(rhs, ctx)
        }
        _ => {
            let l = lower_expr(lhs, ctx);
            let r = lower_expr(rhs, ctx);
            arith_binary_values(op, l, r, pos, ctx)
        }
    }
}

/// Lowers a binary operator over already-lowered operand values. Shared
/// by ordinary binary expressions, compound assignment, and the
/// increment/decrement operators.
fn arith_binary_values(
    op: BinOpKind,
    lhs: ValueId,
    rhs: ValueId,
    pos: Pos,
    ctx: &mut LowerCtx<'_>,
) -> ValueId {
    let lty = ctx.ty_of(lhs);
    let rty = ctx.ty_of(rhs);
    let both_arith = ctx.pool.is_arith(lty) && ctx.pool.is_arith(rty);

    match op {
        BinOpKind::Add => {
            if both_arith {
                let (l, r, ty) = arith_convert(lhs, rhs, ctx);
                let out = ctx.new_value(ty);
                ctx.il.add(ILCommand::Binary { op: BinaryOp::Add, out, lhs: l, rhs: r });
                out
            } else if ctx.pool.is_pointer(lty) && ctx.pool.is_integral(rty) {
                pointer_offset_add(lhs, rhs, false, pos, ctx)
            } else if ctx.pool.is_integral(lty) && ctx.pool.is_pointer(rty) {
                pointer_offset_add(rhs, lhs, false, pos, ctx)
            } else {
                invalid_operands(pos, ctx)
            }
        }
        BinOpKind::Sub => {
            if both_arith {
                let (l, r, ty) = arith_convert(lhs, rhs, ctx);
                let out = ctx.new_value(ty);
                ctx.il.add(ILCommand::Binary { op: BinaryOp::Sub, out, lhs: l, rhs: r });
                out
            } else if ctx.pool.is_pointer(lty) && ctx.pool.is_integral(rty) {
                pointer_offset_add(lhs, rhs, true, pos, ctx)
            } else if ctx.pool.is_pointer(lty) && ctx.pool.is_pointer(rty) {
                let (pl, pr) = (
                    ctx.pool.pointee(lty).unwrap(),
                    ctx.pool.pointee(rty).unwrap(),
                );
                if !ctx.pool.compatible(pl, pr) {
                    ctx.errors.warn(
                        "subtraction of pointers to incompatible types",
                        pos,
                    );
                }
                let elem_size = ctx.pool.size(pl).unwrap_or(1);
                let out = ctx.new_value(TypePool::LONG);
                ctx.il.add(ILCommand::PointerDiff {
                    out,
                    lhs,
                    rhs,
                    elem_size,
                });
                out
            } else {
                invalid_operands(pos, ctx)
            }
        }
        BinOpKind::Mul | BinOpKind::Div => {
            if !both_arith {
                return invalid_operands(pos, ctx);
            }
            let (l, r, ty) = arith_convert(lhs, rhs, ctx);
            let il_op = if op == BinOpKind::Mul { BinaryOp::Mult } else { BinaryOp::Div };
            let out = ctx.new_value(ty);
            ctx.il.add(ILCommand::Binary { op: il_op, out, lhs: l, rhs: r });
            out
        }
        BinOpKind::Mod | BinOpKind::BitAnd | BinOpKind::BitOr | BinOpKind::BitXor => {
            if !(ctx.pool.is_integral(lty) && ctx.pool.is_integral(rty)) {
                return invalid_operands(pos, ctx);
            }
            let (l, r, ty) = arith_convert(lhs, rhs, ctx);
            let il_op = match op {
                BinOpKind::Mod => BinaryOp::Mod,
                BinOpKind::BitAnd => BinaryOp::And,
                BinOpKind::BitOr => BinaryOp::Or,
                _ => BinaryOp::Xor,
            };
            let out = ctx.new_value(ty);
            ctx.il.add(ILCommand::Binary { op: il_op, out, lhs: l, rhs: r });
            out
        }
        BinOpKind::Shl | BinOpKind::Shr => {
            if !(ctx.pool.is_integral(lty) && ctx.pool.is_integral(rty)) {
                return invalid_operands(pos, ctx);
            }
            // The result type is the promoted left operand; the count is
            // converted to match so both operands share one type.
            let ty = ctx.pool.promoted(lty);
            let l = set_type(lhs, ty, None, ctx);
            let r = set_type(rhs, ty, None, ctx);
            let il_op = if op == BinOpKind::Shl { BinaryOp::LShift } else { BinaryOp::RShift };
            let out = ctx.new_value(ty);
            ctx.il.add(ILCommand::Binary { op: il_op, out, lhs: l, rhs: r });
            out
        }
        BinOpKind::Lt
        | BinOpKind::Gt
        | BinOpKind::Le
        | BinOpKind::Ge
        | BinOpKind::Eq
        | BinOpKind::Ne => lower_comparison(op, lhs, rhs, pos, ctx),
        BinOpKind::LogAnd | BinOpKind::LogOr | BinOpKind::Comma => {
            unreachable!("handled before operand lowering")
        }
    }
}

fn lower_comparison(
    op: BinOpKind,
    lhs: ValueId,
    rhs: ValueId,
    pos: Pos,
    ctx: &mut LowerCtx<'_>,
) -> ValueId {
    let lty = ctx.ty_of(lhs);
    let rty = ctx.ty_of(rhs);

    let il_op = match op {
        BinOpKind::Lt => CompareOp::Lt,
        BinOpKind::Gt => CompareOp::Gt,
        BinOpKind::Le => CompareOp::Le,
        BinOpKind::Ge => CompareOp::Ge,
        BinOpKind::Eq => CompareOp::Eq,
        _ => CompareOp::Neq,
    };

    let (l, r) = if ctx.pool.is_arith(lty) && ctx.pool.is_arith(rty) {
        let (l, r, _) = arith_convert(lhs, rhs, ctx);
        (l, r)
    } else if ctx.pool.is_pointer(lty) && ctx.pool.is_pointer(rty) {
        let (pl, pr) = (
            ctx.pool.pointee(lty).unwrap(),
            ctx.pool.pointee(rty).unwrap(),
        );
        if !ctx.pool.compatible(pl, pr)
            && !ctx.pool.is_void(pl)
            && !ctx.pool.is_void(pr)
        {
            ctx.errors
                .warn("comparison of distinct pointer types", pos);
        }
        (lhs, rhs)
    } else if ctx.pool.is_pointer(lty) && is_null_const(rhs, ctx) {
        let r = set_type(rhs, lty.unqualified(), None, ctx);
        (lhs, r)
    } else if is_null_const(lhs, ctx) && ctx.pool.is_pointer(rty) {
        let l = set_type(lhs, rty.unqualified(), None, ctx);
        (l, rhs)
    } else {
        return invalid_operands(pos, ctx);
    };

    let out = ctx.new_value(TypePool::BOOL);
    ctx.il.add(ILCommand::Compare { op: il_op, out, lhs: l, rhs: r });
    out
}

fn invalid_operands(pos: Pos, ctx: &mut LowerCtx<'_>) -> ValueId {
    ctx.errors
        .error("invalid operand types for binary operator", pos);
    ctx.poison(TypePool::INT)
}

/// Emits pointer arithmetic `ptr ± count`, scaling the count by the
/// pointee size. The result has the pointer's type.
fn pointer_offset_add(
    ptr: ValueId,
    count: ValueId,
    negate: bool,
    pos: Pos,
    ctx: &mut LowerCtx<'_>,
) -> ValueId {
    let ptr_ty = ctx.ty_of(ptr);
    let pointee = ctx.pool.pointee(ptr_ty).unwrap();
    let Some(elem_size) = ctx.pool.size(pointee) else {
        ctx.errors
            .error("arithmetic on pointer to incomplete type", pos);
        return ctx.poison(ptr_ty);
    };

    // Scale the count to a byte offset in a 64-bit register.
    let count = set_type(count, TypePool::LONG, None, ctx);
    let offset = if elem_size == 1 {
        count
    } else if let Some(v) = ctx.il.value(count).literal() {
        ctx.new_literal(TypePool::LONG, v * elem_size as i64)
    } else {
        let size = ctx.new_literal(TypePool::LONG, elem_size as i64);
        let total = ctx.new_value(TypePool::LONG);
        ctx.il.add(ILCommand::Binary {
            op: BinaryOp::Mult,
            out: total,
            lhs: count,
            rhs: size,
        });
        total
    };

    let out = ctx.new_value(ptr_ty.unqualified());
    if negate {
        ctx.il.add(ILCommand::PointerSub { out, ptr, offset });
    } else {
        ctx.il.add(ILCommand::PointerAdd { out, ptr, offset });
    }
    out
}

fn lower_short_circuit(
    op: BinOpKind,
    lhs: &Expr,
    rhs: &Expr,
    pos: Pos,
    ctx: &mut LowerCtx<'_>,
) -> ValueId {
    let result = ctx.new_value(TypePool::INT);
    let short_label = ctx.il.new_label();
    let end_label = ctx.il.new_label();

    // For `&&` any zero operand short-circuits to 0; for `||` any
    // nonzero operand short-circuits to 1.
    let (short_val, other_val) = if op == BinOpKind::LogAnd { (0, 1) } else { (1, 0) };

    let check = |v: ValueId, ctx: &mut LowerCtx<'_>| {
        let ty = ctx.ty_of(v);
        if !ctx.pool.is_scalar(ty) {
            ctx.errors
                .error("invalid operand types for binary operator", pos);
        }
    };

    let l = lower_expr(lhs, ctx);
    check(l, ctx);
    if op == BinOpKind::LogAnd {
        ctx.il.add(ILCommand::JumpZero { cond: l, target: short_label });
    } else {
        ctx.il.add(ILCommand::JumpNotZero { cond: l, target: short_label });
    }

    let r = lower_expr(rhs, ctx);
    check(r, ctx);
    if op == BinOpKind::LogAnd {
        ctx.il.add(ILCommand::JumpZero { cond: r, target: short_label });
    } else {
        ctx.il.add(ILCommand::JumpNotZero { cond: r, target: short_label });
    }

    ctx.il.add(ILCommand::Load { out: result, imm: other_val });
    ctx.il.add(ILCommand::Jump(end_label));
    ctx.il.add(ILCommand::Label(short_label));
    ctx.il.add(ILCommand::Load { out: result, imm: short_val });
    ctx.il.add(ILCommand::Label(end_label));

    result
}

fn lower_conditional(
    cond: &Expr,
    then_expr: &Expr,
    else_expr: &Expr,
    pos: Pos,
    ctx: &mut LowerCtx<'_>,
) -> ValueId {
    let else_label = ctx.il.new_label();
    let end_label = ctx.il.new_label();

    // The result slot's type must be known before either arm is
    // lowered, so both arm types are computed statically first.
    let then_ty = decay_type(expr_type(then_expr, ctx), ctx);
    let else_ty = decay_type(expr_type(else_expr, ctx), ctx);

    let common_ty = if ctx.pool.is_arith(then_ty) && ctx.pool.is_arith(else_ty) {
        ctx.pool.usual_arith(then_ty, else_ty)
    } else if ctx.pool.is_pointer(then_ty) {
        then_ty.unqualified()
    } else if ctx.pool.is_pointer(else_ty) {
        else_ty.unqualified()
    } else if ctx.pool.is_void(then_ty) && ctx.pool.is_void(else_ty) {
        TypePool::VOID
    } else {
        then_ty.unqualified()
    };

    let c = lower_expr(cond, ctx);
    ctx.il.add(ILCommand::JumpZero { cond: c, target: else_label });

    if ctx.pool.is_void(common_ty) {
        let _ = lower_expr(then_expr, ctx);
        ctx.il.add(ILCommand::Jump(end_label));
        ctx.il.add(ILCommand::Label(else_label));
        let _ = lower_expr(else_expr, ctx);
        ctx.il.add(ILCommand::Label(end_label));
        return ctx.poison(TypePool::VOID);
    }

    let result = ctx.new_value(common_ty);

    let then_v = lower_expr(then_expr, ctx);
    check_cast(then_v, common_ty, pos, ctx);
    set_type(then_v, common_ty, Some(result), ctx);
    ctx.il.add(ILCommand::Jump(end_label));

    ctx.il.add(ILCommand::Label(else_label));
    let else_v = lower_expr(else_expr, ctx);
    check_cast(else_v, common_ty, pos, ctx);
    set_type(else_v, common_ty, Some(result), ctx);
    ctx.il.add(ILCommand::Label(end_label));

    result
}

fn lower_call(
    func: &Expr,
    args: &[Expr],
    pos: Pos,
    ctx: &mut LowerCtx<'_>,
) -> ValueId {
    // Resolve the callee: a function designator stays direct so the
    // emitter can call its label; anything else is a function pointer.
    let func_val = match &func.kind {
        ExprKind::Ident(name) => match ctx.syms.lookup(name) {
            Some(Binding::Var(v)) => *v,
            Some(_) => {
                ctx.errors.error(
                    format!("called object '{name}' is not a function"),
                    pos,
                );
                return ctx.poison(TypePool::INT);
            }
            None => {
                // Calling an undeclared identifier implicitly declares
                // `int name()`, with a warning.
                ctx.errors.warn(
                    format!("implicit declaration of function '{name}'"),
                    pos,
                );
                let fn_ty = ctx.pool.function(TypePool::INT, None);
                match ctx.syms.declare(
                    name,
                    fn_ty,
                    crate::compiler::symbols::DeclStorage::Extern,
                    crate::compiler::symbols::DefState::Declared,
                    pos,
                    ctx.pool,
                    ctx.il,
                    ctx.errors,
                ) {
                    Some(v) => v,
                    None => return ctx.poison(TypePool::INT),
                }
            }
        },
        _ => lower_expr(func, ctx),
    };

    let callee_ty = ctx.ty_of(func_val);
    let fn_ty = if ctx.pool.is_function(callee_ty) {
        callee_ty
    } else if let Some(pointee) = ctx.pool.pointee(callee_ty) {
        if ctx.pool.is_function(pointee) {
            pointee
        } else {
            ctx.errors.error(
                "called object is not a function or function pointer",
                pos,
            );
            return ctx.poison(TypePool::INT);
        }
    } else {
        ctx.errors.error(
            "called object is not a function or function pointer",
            pos,
        );
        return ctx.poison(TypePool::INT);
    };

    let ret_ty = ctx.pool.ret(fn_ty).unwrap();
    let param_tys: Option<Vec<Type>> =
        ctx.pool.params(fn_ty).unwrap().map(|p| p.to_vec());

    let mut arg_vals = Vec::with_capacity(args.len());
    match param_tys {
        Some(params) => {
            if params.len() != args.len() {
                ctx.errors.error(
                    format!(
                        "expected {} argument(s), got {}",
                        params.len(),
                        args.len()
                    ),
                    pos,
                );
                return ctx.poison(ret_ty);
            }
            for (arg, &pty) in args.iter().zip(params.iter()) {
                let v = lower_expr(arg, ctx);
                check_cast(v, pty, arg.pos, ctx);
                arg_vals.push(set_type(v, pty.unqualified(), None, ctx));
            }
        }
        None => {
            // No prototype: apply the default argument promotions.
            for arg in args {
                let v = lower_expr(arg, ctx);
                let ty = ctx.ty_of(v);
                let v = if ctx.pool.is_arith(ty) {
                    let promoted = ctx.pool.promoted(ty);
                    set_type(v, promoted, None, ctx)
                } else {
                    v
                };
                arg_vals.push(v);
            }
        }
    }

    let out = if ctx.pool.is_void(ret_ty) {
        None
    } else {
        if ctx.pool.is_record(ret_ty) {
            // Aggregates are returned by value only when they fit the
            // integer return register.
            let size = ctx.pool.size(ret_ty).unwrap_or(0);
            if !matches!(size, 1 | 2 | 4 | 8) {
                ctx.errors.error(
                    "unsupported: returning a struct larger than a register",
                    pos,
                );
                return ctx.poison(TypePool::INT);
            }
        }
        Some(ctx.new_value(ret_ty))
    };

    ctx.il.add(ILCommand::Call { func: func_val, args: arg_vals, out });

    match out {
        Some(v) => v,
        None => ctx.poison(TypePool::VOID),
    }
}

fn lower_sizeof(ty: Type, pos: Pos, ctx: &mut LowerCtx<'_>) -> ValueId {
    let Some(size) = ctx.pool.size(ty) else {
        ctx.errors.error(
            "invalid application of 'sizeof' to an incomplete type",
            pos,
        );
        return ctx.poison(TypePool::ULONG);
    };
    let out = ctx.new_value(TypePool::ULONG);
    ctx.il.add(ILCommand::Load { out, imm: size as i64 });
    out
}

fn lower_cast(v: ValueId, ty: Type, pos: Pos, ctx: &mut LowerCtx<'_>) -> ValueId {
    if ctx.pool.is_void(ty) {
        return ctx.poison(TypePool::VOID);
    }

    let from = ctx.ty_of(v);
    let scalar_to_scalar = ctx.pool.is_scalar(from) && ctx.pool.is_scalar(ty);
    if !scalar_to_scalar {
        ctx.errors.error(
            format!(
                "invalid cast from '{}' to '{}'",
                ctx.pool.display(from),
                ctx.pool.display(ty)
            ),
            pos,
        );
        return ctx.poison(ty);
    }

    set_type(v, ty.unqualified(), None, ctx)
}

/// Resolves a type name (as in casts and `sizeof`).
pub fn type_from_name(name: &TypeName, ctx: &mut LowerCtx<'_>) -> Type {
    let base = base_type(&name.specs, ctx);
    let (ty, _) = apply_declarator(&name.decl, base, name.specs.pos, ctx);
    ty
}

// ----------------------------------------------------------------------
// Static expression typing, for `sizeof` (whose operand is not lowered).

/// Computes an expression's type without emitting commands. Used by
/// `sizeof`; stays quiet about errors the true lowering would diagnose.
pub fn expr_type(expr: &Expr, ctx: &mut LowerCtx<'_>) -> Type {
    match &expr.kind {
        ExprKind::IntLit { value, suffix } => int_literal_type(*value, *suffix),
        ExprKind::CharLit(_) => TypePool::INT,
        ExprKind::StrLit(bytes) => {
            ctx.pool.array_of(TypePool::CHAR, Some(bytes.len() as u64 + 1))
        }
        ExprKind::Ident(name) => match ctx.syms.lookup(name) {
            Some(Binding::Var(v)) => ctx.ty_of(*v),
            Some(Binding::EnumConst(_)) => TypePool::INT,
            _ => TypePool::INT,
        },
        ExprKind::Unary { op, arg } => match op {
            UnaryOpKind::AddrOf => {
                let inner = expr_type(arg, ctx);
                ctx.pool.pointer_to(inner)
            }
            UnaryOpKind::Deref => {
                let inner = expr_type(arg, ctx);
                let decayed = decay_type(inner, ctx);
                ctx.pool.pointee(decayed).unwrap_or(TypePool::INT)
            }
            UnaryOpKind::LogicalNot => TypePool::BOOL,
            UnaryOpKind::PreInc | UnaryOpKind::PreDec => expr_type(arg, ctx),
            _ => {
                let inner = expr_type(arg, ctx);
                ctx.pool.promoted(inner)
            }
        },
        ExprKind::PostInc(arg) | ExprKind::PostDec(arg) => expr_type(arg, ctx),
        ExprKind::Binary { op, lhs, rhs } => match op {
            BinOpKind::LogAnd | BinOpKind::LogOr => TypePool::INT,
            BinOpKind::Comma => expr_type(rhs, ctx),
            BinOpKind::Lt
            | BinOpKind::Gt
            | BinOpKind::Le
            | BinOpKind::Ge
            | BinOpKind::Eq
            | BinOpKind::Ne => TypePool::BOOL,
            BinOpKind::Shl | BinOpKind::Shr => {
                let l = expr_type(lhs, ctx);
                ctx.pool.promoted(l)
            }
            _ => {
                let l = decay_type(expr_type(lhs, ctx), ctx);
                let r = decay_type(expr_type(rhs, ctx), ctx);
                if ctx.pool.is_pointer(l) && ctx.pool.is_pointer(r) {
                    TypePool::LONG
                } else if ctx.pool.is_pointer(l) {
                    l
                } else if ctx.pool.is_pointer(r) {
                    r
                } else {
                    ctx.pool.usual_arith(l, r)
                }
            }
        },
        ExprKind::Assign { lhs, .. } | ExprKind::CompoundAssign { lhs, .. } => {
            expr_type(lhs, ctx).unqualified()
        }
        ExprKind::Conditional { then_expr, else_expr, .. } => {
            let t = decay_type(expr_type(then_expr, ctx), ctx);
            let e = decay_type(expr_type(else_expr, ctx), ctx);
            if ctx.pool.is_arith(t) && ctx.pool.is_arith(e) {
                ctx.pool.usual_arith(t, e)
            } else {
                t
            }
        }
        ExprKind::Call { func, .. } => {
            let fty = decay_type(expr_type(func, ctx), ctx);
            let fty = ctx.pool.pointee(fty).unwrap_or(fty);
            ctx.pool.ret(fty).unwrap_or(TypePool::INT)
        }
        ExprKind::Subscript { base, index } => {
            let b = decay_type(expr_type(base, ctx), ctx);
            let i = decay_type(expr_type(index, ctx), ctx);
            let ptr = if ctx.pool.is_pointer(b) { b } else { i };
            ctx.pool.pointee(ptr).unwrap_or(TypePool::INT)
        }
        ExprKind::Member { base, member } => {
            let b = expr_type(base, ctx);
            ctx.pool
                .member(b, member)
                .map(|m| m.ty)
                .unwrap_or(TypePool::INT)
        }
        ExprKind::Arrow { base, member } => {
            let b = decay_type(expr_type(base, ctx), ctx);
            let rec = ctx.pool.pointee(b).unwrap_or(TypePool::INT);
            ctx.pool
                .member(rec, member)
                .map(|m| m.ty)
                .unwrap_or(TypePool::INT)
        }
        ExprKind::SizeofExpr(_) | ExprKind::SizeofType(_) => TypePool::ULONG,
        ExprKind::Cast { to, .. } => type_from_name(to, ctx),
    }
}

/// Array-to-pointer and function-to-pointer decay on a computed type.
fn decay_type(ty: Type, ctx: &mut LowerCtx<'_>) -> Type {
    if let Some(elem) = ctx.pool.elem(ty) {
        ctx.pool.pointer_to(elem)
    } else if ctx.pool.is_function(ty) {
        ctx.pool.pointer_to(ty)
    } else {
        ty
    }
}

// ----------------------------------------------------------------------
// Initializers.

/// Lowers `char buf[N] = "..."`: copies the literal bytes and zeroes the
/// remainder of the array.
pub fn lower_char_array_init(
    var: ValueId,
    ty: Type,
    init: &Expr,
    ctx: &mut LowerCtx<'_>,
) {
    let ExprKind::StrLit(bytes) = &init.kind else {
        ctx.errors.error(
            "array initializer must be a string literal",
            init.pos,
        );
        return;
    };

    let elem = ctx.pool.elem(ty).unwrap();
    if ctx.pool.size(elem) != Some(1) {
        ctx.errors.error(
            "string literal can only initialize a character array",
            init.pos,
        );
        return;
    }

    let arr_len = ctx.pool.array_len(ty).unwrap_or(bytes.len() as u64 + 1);
    let str_len = bytes.len() as u64 + 1;
    if str_len - 1 > arr_len {
        ctx.errors.warn(
            "initializer-string for char array is too long",
            init.pos,
        );
    }

    let mut data = bytes.clone();
    data.push(0);
    let lit_ty = ctx.pool.array_of(TypePool::CHAR, Some(str_len));
    let lit = ctx.il.new_string_literal(lit_ty, data);

    let char_ptr = ctx.pool.pointer_to(TypePool::CHAR);
    let dst = ctx.new_value(char_ptr);
    ctx.il.add(ILCommand::AddrOf { out: dst, var });
    let src = ctx.new_value(char_ptr);
    ctx.il.add(ILCommand::AddrOf { out: src, var: lit });

    let copy_len = str_len.min(arr_len);
    ctx.il.add(ILCommand::StructCopy { dst, src, size: copy_len });

    if arr_len > copy_len {
        let off = ctx.new_literal(TypePool::LONG, copy_len as i64);
        let rest = ctx.new_value(char_ptr);
        ctx.il.add(ILCommand::PointerAdd { out: rest, ptr: dst, offset: off });
        ctx.il.add(ILCommand::Zero { addr: rest, size: arr_len - copy_len });
    }
}
