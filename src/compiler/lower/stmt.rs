//! Statement lowering.
//!
//! Statements lower to commands only, producing no value. Conditions are
//! lowered to a value and tested with a `JumpZero` against the relevant
//! branch target; loops record their break/continue labels in the
//! context for the duration of their body.

use crate::compiler::il::{ILCommand, ValueId};
use crate::compiler::lower::{expr, lower_declaration, LowerCtx};
use crate::compiler::parser::ast::*;
use crate::compiler::types::TypePool;

/// Lowers one statement.
pub fn lower_stmt(stmt: &Stmt, ctx: &mut LowerCtx<'_>) {
    match &stmt.kind {
        StmtKind::Empty => {}
        StmtKind::Expr(e) => {
            let _ = expr::lower_expr(e, ctx);
        }
        StmtKind::Compound(items) => {
            ctx.syms.push_scope();
            for item in items {
                match item {
                    BlockItem::Stmt(s) => lower_stmt(s, ctx),
                    BlockItem::Decl(d) => lower_declaration(d, ctx),
                }
            }
            ctx.syms.pop_scope();
        }
        StmtKind::If { cond, then_stmt, else_stmt } => {
            let c = lower_condition(cond, ctx);

            match else_stmt {
                None => {
                    let end = ctx.il.new_label();
                    ctx.il.add(ILCommand::JumpZero { cond: c, target: end });
                    lower_stmt(then_stmt, ctx);
                    ctx.il.add(ILCommand::Label(end));
                }
                Some(else_stmt) => {
                    let else_label = ctx.il.new_label();
                    let end = ctx.il.new_label();
                    ctx.il
                        .add(ILCommand::JumpZero { cond: c, target: else_label });
                    lower_stmt(then_stmt, ctx);
                    ctx.il.add(ILCommand::Jump(end));
                    ctx.il.add(ILCommand::Label(else_label));
                    lower_stmt(else_stmt, ctx);
                    ctx.il.add(ILCommand::Label(end));
                }
            }
        }
        StmtKind::While { cond, body } => {
            let start = ctx.il.new_label();
            let end = ctx.il.new_label();

            ctx.il.add(ILCommand::Label(start));
            let c = lower_condition(cond, ctx);
            ctx.il.add(ILCommand::JumpZero { cond: c, target: end });

            in_loop(ctx, end, start, |ctx| lower_stmt(body, ctx));

            ctx.il.add(ILCommand::Jump(start));
            ctx.il.add(ILCommand::Label(end));
        }
        StmtKind::DoWhile { body, cond } => {
            let start = ctx.il.new_label();
            // `continue` in a do/while jumps to the condition test, not
            // the body start.
            let cont = ctx.il.new_label();
            let end = ctx.il.new_label();

            ctx.il.add(ILCommand::Label(start));
            in_loop(ctx, end, cont, |ctx| lower_stmt(body, ctx));

            ctx.il.add(ILCommand::Label(cont));
            let c = lower_condition(cond, ctx);
            ctx.il.add(ILCommand::JumpNotZero { cond: c, target: start });
            ctx.il.add(ILCommand::Label(end));
        }
        StmtKind::For { init, cond, step, body } => {
            // A declaration in the init clause lives in its own scope
            // enclosing the loop.
            ctx.syms.push_scope();

            match init {
                Some(ForInit::Decl(d)) => lower_declaration(d, ctx),
                Some(ForInit::Expr(e)) => {
                    let _ = expr::lower_expr(e, ctx);
                }
                None => {}
            }

            let start = ctx.il.new_label();
            let cont = ctx.il.new_label();
            let end = ctx.il.new_label();

            ctx.il.add(ILCommand::Label(start));
            if let Some(cond) = cond {
                let c = lower_condition(cond, ctx);
                ctx.il.add(ILCommand::JumpZero { cond: c, target: end });
            }

            in_loop(ctx, end, cont, |ctx| lower_stmt(body, ctx));

            ctx.il.add(ILCommand::Label(cont));
            if let Some(step) = step {
                let _ = expr::lower_expr(step, ctx);
            }
            ctx.il.add(ILCommand::Jump(start));
            ctx.il.add(ILCommand::Label(end));

            ctx.syms.pop_scope();
        }
        StmtKind::Return(value) => {
            let ret_ty = ctx.ret_ty.expect("return outside of a function");

            match value {
                Some(e) => {
                    let v = expr::lower_expr(e, ctx);
                    if ctx.pool.is_void(ret_ty) {
                        ctx.errors.error(
                            "returning a value from a void function",
                            stmt.pos,
                        );
                        ctx.il.add(ILCommand::Return(None));
                    } else {
                        expr::check_cast(v, ret_ty, e.pos, ctx);
                        let converted =
                            expr::set_type(v, ret_ty.unqualified(), None, ctx);
                        ctx.il.add(ILCommand::Return(Some(converted)));
                    }
                }
                None => {
                    if !ctx.pool.is_void(ret_ty) {
                        ctx.errors.warn(
                            "returning without a value from a non-void function",
                            stmt.pos,
                        );
                    }
                    ctx.il.add(ILCommand::Return(None));
                }
            }
        }
        StmtKind::Break => match ctx.break_label {
            Some(target) => ctx.il.add(ILCommand::Jump(target)),
            None => {
                ctx.errors
                    .error("'break' statement not in a loop", stmt.pos);
            }
        },
        StmtKind::Continue => match ctx.continue_label {
            Some(target) => ctx.il.add(ILCommand::Jump(target)),
            None => {
                ctx.errors
                    .error("'continue' statement not in a loop", stmt.pos);
            }
        },
    }
}

/// Lowers a controlling expression, diagnosing non-scalar conditions.
fn lower_condition(cond: &Expr, ctx: &mut LowerCtx<'_>) -> ValueId {
    let c = expr::lower_expr(cond, ctx);
    let ty = ctx.ty_of(c);
    if !ctx.pool.is_scalar(ty) {
        ctx.errors
            .error("controlling expression must have scalar type", cond.pos);
        return ctx.poison(TypePool::INT);
    }
    c
}

/// Runs `body` with the given break/continue targets installed,
/// restoring the enclosing loop's targets afterwards.
fn in_loop(
    ctx: &mut LowerCtx<'_>,
    break_label: crate::compiler::il::LabelId,
    continue_label: crate::compiler::il::LabelId,
    body: impl FnOnce(&mut LowerCtx<'_>),
) {
    let saved_break = ctx.break_label;
    let saved_continue = ctx.continue_label;
    ctx.break_label = Some(break_label);
    ctx.continue_label = Some(continue_label);

    body(ctx);

    ctx.break_label = saved_break;
    ctx.continue_label = saved_continue;
}

#[cfg(test)]
mod tests {
    use crate::compiler::il::{ILCode, ILCommand};
    use crate::compiler::lexer::Lexer;
    use crate::compiler::lower::lower_unit;
    use crate::compiler::parser;
    use crate::compiler::symbols::SymbolTable;
    use crate::compiler::types::TypePool;
    use crate::error::ErrorCollector;

    fn lower_src(src: &[u8]) -> (ILCode, ErrorCollector) {
        let mut errors = ErrorCollector::new();
        let tokens = Lexer::new("test.c", src).lex(&mut errors);
        let unit = parser::parse(&tokens, &mut errors);
        let mut pool = TypePool::new();
        let mut syms = SymbolTable::new();
        let il = lower_unit(&unit, &mut pool, &mut syms, &mut errors);
        (il, errors)
    }

    fn count_matching(il: &ILCode, f: impl Fn(&ILCommand) -> bool) -> usize {
        il.funcs[0].commands.iter().filter(|c| f(c)).count()
    }

    #[test]
    fn while_loop_shape() {
        let (il, errors) = lower_src(
            b"int main(void) { int i = 0; while (i < 10) { i = i + 1; } return i; }",
        );
        assert!(errors.ok(), "{:?}", errors.messages());
        // One conditional exit, one back edge.
        assert_eq!(count_matching(&il, |c| matches!(c, ILCommand::JumpZero { .. })), 1);
        assert!(count_matching(&il, |c| matches!(c, ILCommand::Jump(_))) >= 1);
    }

    #[test]
    fn for_loop_with_break_and_continue() {
        let (il, errors) = lower_src(
            b"int main(void) {
                int n = 0;
                for (int i = 0; i < 10; i++) {
                    if (i == 2) continue;
                    if (i == 5) break;
                    n++;
                }
                return n;
            }",
        );
        assert!(errors.ok(), "{:?}", errors.messages());
        assert!(count_matching(&il, |c| matches!(c, ILCommand::Jump(_))) >= 3);
    }

    #[test]
    fn do_while_tests_condition_after_body() {
        let (il, errors) = lower_src(
            b"int main(void) { int i = 0; do { i++; } while (i < 3); return i; }",
        );
        assert!(errors.ok(), "{:?}", errors.messages());
        assert_eq!(
            count_matching(&il, |c| matches!(c, ILCommand::JumpNotZero { .. })),
            1
        );
    }

    #[test]
    fn break_outside_loop_rejected() {
        let (_, errors) = lower_src(b"int main(void) { break; return 0; }");
        assert!(!errors.ok());
        assert!(errors.messages().iter().any(|m| m.contains("break")));
    }

    #[test]
    fn return_converts_to_return_type() {
        let (il, errors) =
            lower_src(b"long f(void) { int x = 3; return x; }");
        assert!(errors.ok(), "{:?}", errors.messages());
        // A widening Set precedes the return.
        assert!(count_matching(&il, |c| matches!(c, ILCommand::Set { .. })) >= 1);
    }

    #[test]
    fn short_circuit_and_emits_control_flow() {
        let (il, errors) = lower_src(
            b"int main(void) { int a = 1; int b = 0; return a && b; }",
        );
        assert!(errors.ok(), "{:?}", errors.messages());
        assert_eq!(
            count_matching(&il, |c| matches!(c, ILCommand::JumpZero { .. })),
            2
        );
        assert_eq!(count_matching(&il, |c| matches!(c, ILCommand::Load { .. })), 2);
    }
}
