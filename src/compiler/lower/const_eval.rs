//! Integer constant expressions.
//!
//! Folds the subset of expressions C requires to be compile-time
//! constants: array sizes, enumerator values, and static-storage
//! initializers. Returns `None` for anything not constant; the caller
//! decides whether that is an error.

use crate::compiler::lower::{expr, LowerCtx};
use crate::compiler::parser::ast::*;
use crate::compiler::symbols::Binding;

/// Evaluates an integer constant expression.
pub fn eval(e: &Expr, ctx: &mut LowerCtx<'_>) -> Option<i64> {
    match &e.kind {
        ExprKind::IntLit { value, .. } => Some(*value),
        ExprKind::CharLit(c) => Some(i64::from(*c)),
        ExprKind::Ident(name) => match ctx.syms.lookup(name) {
            Some(Binding::EnumConst(v)) => Some(*v),
            _ => None,
        },
        ExprKind::Unary { op, arg } => {
            let v = eval(arg, ctx)?;
            match op {
                UnaryOpKind::Plus => Some(v),
                UnaryOpKind::Neg => Some(v.wrapping_neg()),
                UnaryOpKind::BitNot => Some(!v),
                UnaryOpKind::LogicalNot => Some(i64::from(v == 0)),
                _ => None,
            }
        }
        ExprKind::Binary { op, lhs, rhs } => {
            // Both sides must be constant, but `&&`/`||` still
            // short-circuit the value.
            let l = eval(lhs, ctx)?;
            match op {
                BinOpKind::LogAnd => {
                    if l == 0 {
                        return Some(0);
                    }
                    return eval(rhs, ctx).map(|r| i64::from(r != 0));
                }
                BinOpKind::LogOr => {
                    if l != 0 {
                        return Some(1);
                    }
                    return eval(rhs, ctx).map(|r| i64::from(r != 0));
                }
                _ => {}
            }
            let r = eval(rhs, ctx)?;
            match op {
                BinOpKind::Add => Some(l.wrapping_add(r)),
                BinOpKind::Sub => Some(l.wrapping_sub(r)),
                BinOpKind::Mul => Some(l.wrapping_mul(r)),
                BinOpKind::Div => (r != 0).then(|| l.wrapping_div(r)),
                BinOpKind::Mod => (r != 0).then(|| l.wrapping_rem(r)),
                BinOpKind::BitAnd => Some(l & r),
                BinOpKind::BitOr => Some(l | r),
                BinOpKind::BitXor => Some(l ^ r),
                BinOpKind::Shl => Some(l.wrapping_shl(r as u32)),
                BinOpKind::Shr => Some(l.wrapping_shr(r as u32)),
                BinOpKind::Lt => Some(i64::from(l < r)),
                BinOpKind::Gt => Some(i64::from(l > r)),
                BinOpKind::Le => Some(i64::from(l <= r)),
                BinOpKind::Ge => Some(i64::from(l >= r)),
                BinOpKind::Eq => Some(i64::from(l == r)),
                BinOpKind::Ne => Some(i64::from(l != r)),
                BinOpKind::Comma => None,
                BinOpKind::LogAnd | BinOpKind::LogOr => unreachable!(),
            }
        }
        ExprKind::Conditional { cond, then_expr, else_expr } => {
            let c = eval(cond, ctx)?;
            if c != 0 {
                eval(then_expr, ctx)
            } else {
                eval(else_expr, ctx)
            }
        }
        ExprKind::Cast { to, arg } => {
            let v = eval(arg, ctx)?;
            let ty = expr::type_from_name(to, ctx);
            if !ctx.pool.is_integral(ty) {
                return None;
            }
            let size = ctx.pool.size(ty)?;
            Some(truncate(v, size, ctx.pool.is_signed(ty)))
        }
        ExprKind::SizeofType(type_name) => {
            let ty = expr::type_from_name(type_name, ctx);
            ctx.pool.size(ty).map(|s| s as i64)
        }
        ExprKind::SizeofExpr(arg) => {
            let ty = expr::expr_type(arg, ctx);
            ctx.pool.size(ty).map(|s| s as i64)
        }
        _ => None,
    }
}

fn truncate(v: i64, size: u64, signed: bool) -> i64 {
    if size >= 8 {
        return v;
    }
    let bits = size * 8;
    let mask = (1i64 << bits) - 1;
    let mut out = v & mask;
    if signed && out >= (1i64 << (bits - 1)) {
        out -= 1i64 << bits;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::il::ILCode;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::parser;
    use crate::compiler::symbols::SymbolTable;
    use crate::compiler::types::TypePool;
    use crate::error::ErrorCollector;

    fn eval_src(src: &str) -> Option<i64> {
        // Wrap the expression in an enum so the parser accepts it, then
        // fold the enumerator's value expression.
        let wrapped = format!("int x = {src};");
        let mut errors = ErrorCollector::new();
        let tokens = Lexer::new("test.c", wrapped.as_bytes()).lex(&mut errors);
        let unit = parser::parse(&tokens, &mut errors);
        assert!(errors.ok(), "{:?}", errors.messages());

        let ExternalDecl::Declaration(decl) = &unit.items[0] else {
            panic!("expected declaration");
        };
        let init = decl.decls[0].init.as_ref().unwrap();

        let mut pool = TypePool::new();
        let mut syms = SymbolTable::new();
        let mut il = ILCode::new();
        let mut ctx = LowerCtx {
            pool: &mut pool,
            syms: &mut syms,
            il: &mut il,
            errors: &mut errors,
            break_label: None,
            continue_label: None,
            ret_ty: None,
        };
        eval(init, &mut ctx)
    }

    #[test]
    fn folds_arithmetic() {
        assert_eq!(eval_src("1 + 2 * 3"), Some(7));
        assert_eq!(eval_src("(10 - 4) / 3"), Some(2));
        assert_eq!(eval_src("7 % 4"), Some(3));
    }

    #[test]
    fn folds_bitwise_and_shifts() {
        assert_eq!(eval_src("1 << 4"), Some(16));
        assert_eq!(eval_src("0xff & 0x0f"), Some(15));
        assert_eq!(eval_src("~0"), Some(-1));
    }

    #[test]
    fn folds_comparisons_and_logic() {
        assert_eq!(eval_src("3 < 5"), Some(1));
        assert_eq!(eval_src("1 && 0"), Some(0));
        assert_eq!(eval_src("0 || 2"), Some(1));
        assert_eq!(eval_src("!5"), Some(0));
    }

    #[test]
    fn folds_conditional() {
        assert_eq!(eval_src("1 ? 10 : 20"), Some(10));
        assert_eq!(eval_src("0 ? 10 : 20"), Some(20));
    }

    #[test]
    fn folds_sizeof() {
        assert_eq!(eval_src("sizeof(int)"), Some(4));
        assert_eq!(eval_src("sizeof(long)"), Some(8));
        assert_eq!(eval_src("sizeof(char *)"), Some(8));
    }

    #[test]
    fn folds_casts_with_truncation() {
        assert_eq!(eval_src("(char)257"), Some(1));
        assert_eq!(eval_src("(unsigned char)-1"), Some(255));
    }

    #[test]
    fn division_by_zero_is_not_constant() {
        assert_eq!(eval_src("1 / 0"), None);
    }

    #[test]
    fn char_constant_is_constant() {
        assert_eq!(eval_src("'A'"), Some(65));
    }
}
