//! AST Lowering
//!
//! Compiler pass that walks the abstract syntax tree, performs semantic
//! analysis (type checking, scoping, linkage), and produces the flat IL.
//! Type checking is interleaved with lowering: when a subtree is found to
//! be ill-typed, a diagnostic is recorded and the subtree yields a poison
//! value of an approximate type so lowering can continue without
//! cascading errors.

mod const_eval;
mod expr;
mod stmt;

use crate::compiler::il::{ILCode, ILCommand, LabelId, StaticInit, ValueId};
use crate::compiler::parser::ast::*;
use crate::compiler::symbols::{Binding, DeclStorage, DefState, SymbolTable};
use crate::compiler::types::{RecordKind, Type, TypePool};
use crate::error::{ErrorCollector, Pos};

pub use expr::LValue;

/// Everything the lowering functions need, threaded by mutable reference
/// through the whole pass.
pub struct LowerCtx<'a> {
    /// Type arena.
    pub pool: &'a mut TypePool,
    /// Symbol environment.
    pub syms: &'a mut SymbolTable,
    /// IL under construction.
    pub il: &'a mut ILCode,
    /// Diagnostic sink.
    pub errors: &'a mut ErrorCollector,
    /// Jump target of a `break` at the current position.
    pub break_label: Option<LabelId>,
    /// Jump target of a `continue` at the current position.
    pub continue_label: Option<LabelId>,
    /// Return type of the enclosing function.
    pub ret_ty: Option<Type>,
}

impl LowerCtx<'_> {
    /// Creates a fresh temporary of the given type.
    pub fn new_value(&mut self, ty: Type) -> ValueId {
        let size = self.pool.size(ty).unwrap_or(0);
        let signed = self.pool.is_signed(ty);
        let is_bool = self.pool.is_bool(ty);
        self.il.new_value(ty, size, signed, is_bool)
    }

    /// Creates a literal of the given type.
    pub fn new_literal(&mut self, ty: Type, v: i64) -> ValueId {
        let size = self.pool.size(ty).unwrap_or(0);
        let signed = self.pool.is_signed(ty);
        self.il.new_literal(ty, size, signed, v)
    }

    /// Returns a poison value: a placeholder of the given type produced
    /// after an error, letting lowering continue without follow-on
    /// diagnostics.
    pub fn poison(&mut self, ty: Type) -> ValueId {
        self.new_value(ty)
    }

    /// The type of an existing IL value.
    pub fn ty_of(&self, v: ValueId) -> Type {
        self.il.value(v).ty
    }
}

/// Lowers a parsed translation unit, producing the unit's IL. Any
/// diagnostics are recorded in `errors`; the IL is meaningful only if no
/// error was recorded.
pub fn lower_unit(
    unit: &TranslationUnit,
    pool: &mut TypePool,
    syms: &mut SymbolTable,
    errors: &mut ErrorCollector,
) -> ILCode {
    let mut il = ILCode::new();
    let mut ctx = LowerCtx {
        pool,
        syms,
        il: &mut il,
        errors,
        break_label: None,
        continue_label: None,
        ret_ty: None,
    };

    for item in &unit.items {
        match item {
            ExternalDecl::Function { specs, decl, body, pos } => {
                lower_function(specs, decl, body, *pos, &mut ctx);
            }
            ExternalDecl::Declaration(decl) => {
                lower_declaration(decl, &mut ctx);
            }
        }
    }

    il
}

// ----------------------------------------------------------------------
// Types from specifiers and declarators.

/// Resolves declaration specifiers to a base type, processing any
/// struct/union/enum specifier they contain.
pub fn base_type(specs: &DeclSpecs, ctx: &mut LowerCtx<'_>) -> Type {
    let ty = match &specs.base {
        BaseType::Void => TypePool::VOID,
        BaseType::Bool => TypePool::BOOL,
        BaseType::Char => TypePool::CHAR,
        BaseType::UChar => TypePool::UCHAR,
        BaseType::Short => TypePool::SHORT,
        BaseType::UShort => TypePool::USHORT,
        BaseType::Int => TypePool::INT,
        BaseType::UInt => TypePool::UINT,
        BaseType::Long => TypePool::LONG,
        BaseType::ULong => TypePool::ULONG,
        BaseType::Named(name) => match ctx.syms.lookup(name) {
            Some(Binding::Typedef(ty)) => *ty,
            _ => {
                ctx.errors.error(
                    format!("use of undeclared type definition '{name}'"),
                    specs.pos,
                );
                TypePool::INT
            }
        },
        BaseType::Record(spec) => record_type(spec, specs.pos, ctx),
        BaseType::Enum(spec) => enum_type(spec, specs.pos, ctx),
    };

    if specs.is_const {
        ty.qualified_const()
    } else {
        ty
    }
}

fn record_type(spec: &RecordSpec, pos: Pos, ctx: &mut LowerCtx<'_>) -> Type {
    let kind = if spec.is_union {
        RecordKind::Union
    } else {
        RecordKind::Struct
    };

    let ty = match (&spec.tag, &spec.members) {
        // Reference to a possibly earlier tag: search all scopes, and
        // declare an incomplete tag here if nothing is found.
        (Some(tag), None) => {
            use crate::compiler::symbols::TagEntry;
            match ctx.syms.lookup_tag(tag) {
                Some(TagEntry::Record(ty))
                    if ctx.pool.record_kind(ty) == Some(kind) =>
                {
                    return ty;
                }
                Some(_) => {
                    ctx.errors.error(
                        format!("'{tag}' defined as wrong kind of tag"),
                        pos,
                    );
                    return TypePool::INT;
                }
                None => {
                    match ctx.syms.declare_record_tag(
                        kind, tag, pos, ctx.pool, ctx.errors,
                    ) {
                        Some(ty) => return ty,
                        None => return TypePool::INT,
                    }
                }
            }
        }
        // Definition: the tag (if any) lives in the current scope.
        (Some(tag), Some(_)) => {
            match ctx
                .syms
                .declare_record_tag(kind, tag, pos, ctx.pool, ctx.errors)
            {
                Some(ty) => ty,
                None => return TypePool::INT,
            }
        }
        (None, Some(_)) => ctx.pool.declare_record(kind, None),
        (None, None) => {
            ctx.errors.error("expected tag name or member list", pos);
            return TypePool::INT;
        }
    };

    let members = spec.members.as_ref().unwrap();

    if ctx.pool.members(ty).is_some() {
        ctx.errors.error(
            format!(
                "redefinition of '{} {}'",
                kind.keyword(),
                spec.tag.as_deref().unwrap_or("<anonymous>")
            ),
            pos,
        );
        return ty;
    }

    let mut laid_out: Vec<(String, Type)> = Vec::new();
    for member_decl in members {
        if member_decl.specs.storage != StorageSpec::None {
            ctx.errors.error(
                "storage class specified for record member",
                member_decl.pos,
            );
        }
        let base = base_type(&member_decl.specs, ctx);
        for init_decl in &member_decl.decls {
            if init_decl.init.is_some() {
                ctx.errors
                    .error("record member cannot have an initializer", init_decl.pos);
            }
            let (mty, name) = apply_declarator(&init_decl.decl, base, init_decl.pos, ctx);
            let Some(name) = name else {
                ctx.errors.error("expected member name", init_decl.pos);
                continue;
            };
            if !ctx.pool.is_complete(mty) || ctx.pool.is_function(mty) {
                ctx.errors.error(
                    format!("member '{name}' has incomplete type"),
                    init_decl.pos,
                );
                continue;
            }
            if laid_out.iter().any(|(n, _)| *n == name) {
                ctx.errors.error(
                    format!("duplicate member '{name}'"),
                    init_decl.pos,
                );
                continue;
            }
            laid_out.push((name, mty));
        }
    }

    ctx.pool.complete_record(ty, laid_out);
    ty
}

fn enum_type(spec: &EnumSpec, pos: Pos, ctx: &mut LowerCtx<'_>) -> Type {
    use crate::compiler::symbols::TagEntry;

    match (&spec.tag, &spec.enumerators) {
        (Some(tag), None) => {
            match ctx.syms.lookup_tag(tag) {
                Some(TagEntry::Enum(_)) => {}
                Some(TagEntry::Record(_)) => {
                    ctx.errors.error(
                        format!("'{tag}' defined as wrong kind of tag"),
                        pos,
                    );
                }
                None => {
                    ctx.errors.error(
                        format!("use of undeclared enum '{tag}'"),
                        pos,
                    );
                }
            }
        }
        (tag, Some(enumerators)) => {
            if let Some(tag) = tag {
                ctx.syms.declare_enum_tag(tag, true, pos, ctx.errors);
            }
            let mut next = 0i64;
            for (name, value, epos) in enumerators {
                if let Some(expr) = value {
                    match const_eval::eval(expr, ctx) {
                        Some(v) => next = v,
                        None => {
                            ctx.errors.error(
                                "enumerator value must be an integer constant expression",
                                *epos,
                            );
                        }
                    }
                }
                ctx.syms.declare_enum_const(name, next, *epos, ctx.errors);
                next += 1;
            }
        }
        (None, None) => {
            ctx.errors.error("expected tag name or enumerator list", pos);
        }
    }

    // Enumerated types have the representation of int.
    TypePool::INT
}

/// Applies a declarator to a base type, producing the declared type and
/// name. The declarator wraps the base inside out: in `char *names[10]`,
/// the pointer applies before the array.
pub fn apply_declarator(
    decl: &Declarator,
    base: Type,
    pos: Pos,
    ctx: &mut LowerCtx<'_>,
) -> (Type, Option<String>) {
    match decl {
        Declarator::Ident(name) => (base, name.clone()),
        Declarator::Pointer { inner, is_const } => {
            let mut ptr = ctx.pool.pointer_to(base);
            if *is_const {
                ptr = ptr.qualified_const();
            }
            apply_declarator(inner, ptr, pos, ctx)
        }
        Declarator::Array { inner, len } => {
            let len = match len {
                Some(expr) => match const_eval::eval(expr, ctx) {
                    Some(n) if n > 0 => Some(n as u64),
                    _ => {
                        ctx.errors.error(
                            "array size must be a positive integer constant",
                            expr.pos,
                        );
                        Some(1)
                    }
                },
                None => None,
            };
            if !ctx.pool.is_complete(base) {
                ctx.errors.error("array has incomplete element type", pos);
            }
            let arr = ctx.pool.array_of(base, len);
            apply_declarator(inner, arr, pos, ctx)
        }
        Declarator::Function { inner, params } => {
            let params = params.as_ref().map(|params| {
                params
                    .iter()
                    .map(|p| param_type(p, ctx))
                    .collect::<Vec<_>>()
            });
            let func = ctx.pool.function(base, params);
            apply_declarator(inner, func, pos, ctx)
        }
    }
}

/// The adjusted type of one function parameter: arrays decay to pointers
/// and function types to function pointers.
fn param_type(param: &ParamDecl, ctx: &mut LowerCtx<'_>) -> Type {
    let base = base_type(&param.specs, ctx);
    let (ty, _) = apply_declarator(&param.decl, base, param.pos, ctx);

    if let Some(elem) = ctx.pool.elem(ty) {
        ctx.pool.pointer_to(elem)
    } else if ctx.pool.is_function(ty) {
        ctx.pool.pointer_to(ty)
    } else {
        ty
    }
}

// ----------------------------------------------------------------------
// Declarations.

/// Lowers one declaration, at file or block scope.
pub fn lower_declaration(decl: &Declaration, ctx: &mut LowerCtx<'_>) {
    let base = base_type(&decl.specs, ctx);

    for init_decl in &decl.decls {
        let (ty, name) = apply_declarator(&init_decl.decl, base, init_decl.pos, ctx);
        let Some(name) = name else {
            ctx.errors
                .error("expected identifier in declaration", init_decl.pos);
            continue;
        };

        if decl.specs.storage == StorageSpec::Typedef {
            if init_decl.init.is_some() {
                ctx.errors
                    .error("typedef cannot have an initializer", init_decl.pos);
            }
            ctx.syms
                .declare_typedef(&name, ty, init_decl.pos, ctx.pool, ctx.errors);
            continue;
        }

        if ctx.pool.is_void(ty) {
            ctx.errors.error(
                format!("variable '{name}' declared with void type"),
                init_decl.pos,
            );
            continue;
        }

        let storage = match decl.specs.storage {
            StorageSpec::None => DeclStorage::Default,
            StorageSpec::Static => DeclStorage::Static,
            StorageSpec::Extern => DeclStorage::Extern,
            StorageSpec::Typedef => unreachable!(),
        };

        if ctx.pool.is_function(ty) {
            if init_decl.init.is_some() {
                ctx.errors.error(
                    format!("cannot initialize function '{name}'"),
                    init_decl.pos,
                );
            }
            ctx.syms.declare(
                &name,
                ty,
                storage,
                DefState::Declared,
                init_decl.pos,
                ctx.pool,
                ctx.il,
                ctx.errors,
            );
            continue;
        }

        // An object definition needs a complete type, except that a
        // string or later declaration may still complete `T x[]`.
        let defining = storage != DeclStorage::Extern;
        if defining
            && !ctx.pool.is_complete(ty)
            && !(ctx.pool.is_array(ty) && init_decl.init.is_some())
        {
            ctx.errors.error(
                format!("variable '{name}' has incomplete type"),
                init_decl.pos,
            );
            continue;
        }

        lower_object_decl(&name, ty, storage, init_decl, ctx);
    }
}

fn lower_object_decl(
    name: &str,
    mut ty: Type,
    storage: DeclStorage,
    init_decl: &InitDeclarator,
    ctx: &mut LowerCtx<'_>,
) {
    let pos = init_decl.pos;
    let file_scope = ctx.syms.at_file_scope();
    let static_storage = file_scope || storage == DeclStorage::Static;

    // `char s[] = "..."` completes the array from its initializer.
    if ctx.pool.is_array(ty) && ctx.pool.array_len(ty).is_none() {
        if let Some(Expr { kind: ExprKind::StrLit(bytes), .. }) = &init_decl.init {
            let elem = ctx.pool.elem(ty).unwrap();
            ty = ctx.pool.array_of(elem, Some(bytes.len() as u64 + 1));
        }
    }

    let def_state = if init_decl.init.is_some() {
        DefState::Defined
    } else {
        DefState::Declared
    };

    let Some(value) = ctx.syms.declare(
        name, ty, storage, def_state, pos, ctx.pool, ctx.il, ctx.errors,
    ) else {
        return;
    };

    let Some(init) = &init_decl.init else {
        return;
    };

    if static_storage {
        // Static-storage initializers must be constant expressions and
        // are emitted into the data section. A string literal
        // initializing a character array is stored as its padded bytes.
        if ctx.pool.is_array(ty) {
            if let ExprKind::StrLit(bytes) = &init.kind {
                let elem = ctx.pool.elem(ty).unwrap();
                let len = ctx.pool.array_len(ty).unwrap_or(0) as usize;
                if ctx.pool.size(elem) != Some(1) {
                    ctx.errors.error(
                        "string literal can only initialize a character array",
                        init.pos,
                    );
                } else {
                    if bytes.len() > len {
                        ctx.errors.warn(
                            "initializer-string for char array is too long",
                            init.pos,
                        );
                    }
                    let mut data = bytes.clone();
                    data.resize(len, 0);
                    ctx.il
                        .static_initialize(value, StaticInit::Bytes(data));
                }
                return;
            }
        }
        if let Some(target) = address_constant(init, ctx) {
            ctx.il.static_initialize(value, StaticInit::Addr(target));
            return;
        }
        match const_eval::eval(init, ctx) {
            Some(v) => {
                // Wrap the constant into the object's width so the data
                // directive is always in range.
                let wrapped = match ctx.pool.size(ty) {
                    Some(size) if size < 8 => {
                        let bits = size * 8;
                        let mask = (1i64 << bits) - 1;
                        let mut out = v & mask;
                        if ctx.pool.is_signed(ty) && out >= (1i64 << (bits - 1)) {
                            out -= 1i64 << bits;
                        }
                        out
                    }
                    _ => v,
                };
                ctx.il.static_initialize(value, StaticInit::Scalar(wrapped));
            }
            None => {
                ctx.errors.error(
                    "static-storage initializer must be a constant expression",
                    init.pos,
                );
            }
        }
        return;
    }

    // Automatic initializers lower to ordinary stores at the point of
    // declaration.
    if ctx.pool.is_array(ty) {
        expr::lower_char_array_init(value, ty, init, ctx);
    } else if ctx.pool.is_record(ty) {
        ctx.errors.error(
            "initializer lists are not supported",
            init.pos,
        );
    } else {
        let rhs = expr::lower_expr(init, ctx);
        expr::check_cast(rhs, ty, init.pos, ctx);
        expr::set_type(rhs, ty.unqualified(), Some(value), ctx);
    }
}

/// Recognizes an address-constant initializer: a function designator,
/// or `&` of an object with static storage. Returns the named value
/// whose label the emitter should reference.
fn address_constant(init: &Expr, ctx: &LowerCtx<'_>) -> Option<ValueId> {
    let named_static = |name: &str, ctx: &LowerCtx<'_>| -> Option<ValueId> {
        let Some(Binding::Var(v)) = ctx.syms.lookup(name) else {
            return None;
        };
        let meta = ctx.syms.var_meta(*v)?;
        (meta.storage != crate::compiler::symbols::StorageDur::Automatic)
            .then_some(*v)
    };

    match &init.kind {
        // A bare identifier is an address constant only when it names a
        // function.
        ExprKind::Ident(name) => {
            let v = named_static(name, ctx)?;
            ctx.pool.is_function(ctx.ty_of(v)).then_some(v)
        }
        ExprKind::Unary { op: UnaryOpKind::AddrOf, arg } => {
            if let ExprKind::Ident(name) = &arg.kind {
                named_static(name, ctx)
            } else {
                None
            }
        }
        _ => None,
    }
}

// ----------------------------------------------------------------------
// Function definitions.

fn lower_function(
    specs: &DeclSpecs,
    decl: &Declarator,
    body: &Stmt,
    pos: Pos,
    ctx: &mut LowerCtx<'_>,
) {
    let base = base_type(specs, ctx);
    let (fn_ty, name) = apply_declarator(decl, base, pos, ctx);
    let Some(name) = name else {
        ctx.errors.error("expected function name", pos);
        return;
    };

    if !ctx.pool.is_function(fn_ty) {
        ctx.errors
            .error(format!("'{name}' declared as non-function"), pos);
        return;
    }

    let storage = match specs.storage {
        StorageSpec::None => DeclStorage::Default,
        StorageSpec::Static => DeclStorage::Static,
        StorageSpec::Extern => DeclStorage::Extern,
        StorageSpec::Typedef => {
            ctx.errors
                .error("function definition declared 'typedef'", pos);
            DeclStorage::Default
        }
    };

    let fn_value = ctx.syms.declare(
        &name,
        fn_ty,
        storage,
        DefState::Defined,
        pos,
        ctx.pool,
        ctx.il,
        ctx.errors,
    );

    let ret_ty = ctx.pool.ret(fn_ty).unwrap();
    if !ctx.pool.is_void(ret_ty)
        && !ctx.pool.is_complete(ret_ty)
    {
        ctx.errors
            .error(format!("function '{name}' returns incomplete type"), pos);
    }

    // Parameters get their own scope enclosing the body.
    ctx.syms.push_scope();

    let mut param_values = Vec::new();
    let params = collect_param_decls(decl);
    match params {
        Some(params) => {
            for param in params {
                let p_base = base_type(&param.specs, ctx);
                let (p_ty_raw, p_name) =
                    apply_declarator(&param.decl, p_base, param.pos, ctx);
                // Void parameter lists were consumed by the parser; a
                // lone void type here is an error.
                if ctx.pool.is_void(p_ty_raw) {
                    ctx.errors
                        .error("parameter has void type", param.pos);
                    continue;
                }
                let p_ty = adjusted_param_type(p_ty_raw, ctx);
                let Some(p_name) = p_name else {
                    ctx.errors.error(
                        "expected identifier in function definition parameter",
                        param.pos,
                    );
                    continue;
                };
                let value = ctx.syms.declare(
                    &p_name,
                    p_ty,
                    DeclStorage::Default,
                    DefState::Defined,
                    param.pos,
                    ctx.pool,
                    ctx.il,
                    ctx.errors,
                );
                if let Some(value) = value {
                    param_values.push(value);
                }
            }
        }
        None => {
            // Unprototyped definition `f()`: no parameters to bind.
        }
    }

    let Some(fn_value) = fn_value else {
        // The conflicting declaration was already diagnosed.
        ctx.syms.pop_scope();
        return;
    };
    ctx.il.start_func(&name, fn_value, param_values);
    ctx.ret_ty = Some(ret_ty);

    // The body's braces open a second scope nested in the parameters'.
    let StmtKind::Compound(items) = &body.kind else {
        unreachable!("function body is always a compound statement");
    };
    ctx.syms.push_scope();
    for item in items {
        match item {
            BlockItem::Stmt(stmt) => stmt::lower_stmt(stmt, ctx),
            BlockItem::Decl(decl) => lower_declaration(decl, ctx),
        }
    }
    ctx.syms.pop_scope();

    if !ctx.il.always_returns() {
        // main implicitly returns 0; elsewhere the return value is
        // undefined if the caller uses it.
        if name == "main" {
            let zero = ctx.new_literal(TypePool::INT, 0);
            ctx.il.add(ILCommand::Return(Some(zero)));
        } else {
            ctx.il.add(ILCommand::Return(None));
        }
    }

    ctx.ret_ty = None;
    ctx.syms.pop_scope();
}

fn adjusted_param_type(ty: Type, ctx: &mut LowerCtx<'_>) -> Type {
    if let Some(elem) = ctx.pool.elem(ty) {
        ctx.pool.pointer_to(elem)
    } else if ctx.pool.is_function(ty) {
        ctx.pool.pointer_to(ty)
    } else {
        ty
    }
}

/// Finds the parameter list of the declarator that names the function.
fn collect_param_decls(decl: &Declarator) -> Option<&[ParamDecl]> {
    match decl {
        Declarator::Function { inner, params } => {
            if matches!(**inner, Declarator::Ident(_)) {
                params.as_deref()
            } else {
                collect_param_decls(inner)
            }
        }
        Declarator::Pointer { inner, .. } | Declarator::Array { inner, .. } => {
            collect_param_decls(inner)
        }
        Declarator::Ident(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::il::ILCommand;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::parser;

    fn lower_src(src: &[u8]) -> (ILCode, ErrorCollector) {
        let mut errors = ErrorCollector::new();
        let tokens = Lexer::new("test.c", src).lex(&mut errors);
        let unit = parser::parse(&tokens, &mut errors);
        let mut pool = TypePool::new();
        let mut syms = SymbolTable::new();
        let il = lower_unit(&unit, &mut pool, &mut syms, &mut errors);
        (il, errors)
    }

    fn lower_ok(src: &[u8]) -> ILCode {
        let (il, errors) = lower_src(src);
        assert!(errors.ok(), "unexpected errors: {:?}", errors.messages());
        il
    }

    #[test]
    fn lower_minimal_main() {
        let il = lower_ok(b"int main(void) { return 0; }");
        assert_eq!(il.funcs.len(), 1);
        assert_eq!(il.funcs[0].name, "main");
        assert!(matches!(
            il.funcs[0].commands.last(),
            Some(ILCommand::Return(Some(_)))
        ));
    }

    #[test]
    fn lower_implicit_return_zero_in_main() {
        let il = lower_ok(b"int main(void) { }");
        let last = il.funcs[0].commands.last().unwrap();
        let ILCommand::Return(Some(v)) = last else {
            panic!("expected return, got {last:?}");
        };
        assert_eq!(il.value(*v).literal(), Some(0));
    }

    #[test]
    fn lower_arith_uses_binary_commands() {
        let il = lower_ok(b"int main(void) { int a = 5; int b = 10; return a + b; }");
        let has_add = il.funcs[0]
            .commands
            .iter()
            .any(|c| matches!(c, ILCommand::Binary { op: crate::compiler::il::BinaryOp::Add, .. }));
        assert!(has_add);
    }

    #[test]
    fn lower_static_initializer_recorded() {
        let (il, errors) = lower_src(b"static int counter = 42; int main(void) { return counter; }");
        assert!(errors.ok());
        assert!(il
            .static_inits
            .values()
            .any(|v| *v == crate::compiler::il::StaticInit::Scalar(42)));
    }

    #[test]
    fn lower_nonconstant_static_initializer_rejected() {
        let (_, errors) =
            lower_src(b"int x = 1; int y = x; int main(void) { return 0; }");
        assert!(!errors.ok());
        assert!(errors.messages().iter().any(|m| m.contains("constant")));
    }

    #[test]
    fn lower_function_pointer_static_initializer() {
        let (il, errors) = lower_src(
            b"int isalpha(int c); int (*handler)(int) = isalpha; int main(void) { return 0; }",
        );
        assert!(errors.ok(), "{:?}", errors.messages());
        assert!(il
            .static_inits
            .values()
            .any(|v| matches!(v, crate::compiler::il::StaticInit::Addr(_))));
    }

    #[test]
    fn lower_undeclared_identifier_poisons() {
        let (_, errors) = lower_src(b"int main(void) { return missing; }");
        assert!(!errors.ok());
        assert!(errors
            .messages()
            .iter()
            .any(|m| m.contains("undeclared identifier")));
    }

    #[test]
    fn lower_void_variable_rejected() {
        let (_, errors) = lower_src(b"void x; int main(void) { return 0; }");
        assert!(!errors.ok());
    }

    #[test]
    fn lower_enum_constants_usable() {
        let il = lower_ok(
            b"enum color { RED, GREEN = 5, BLUE }; int main(void) { return BLUE; }",
        );
        // BLUE is GREEN + 1 = 6, loaded as a literal return.
        let ILCommand::Return(Some(v)) = il.funcs[0].commands.last().unwrap()
        else {
            panic!("expected return");
        };
        assert_eq!(il.value(*v).literal(), Some(6));
    }

    #[test]
    fn lower_array_size_must_be_positive() {
        let (_, errors) = lower_src(b"int a[0]; int main(void) { return 0; }");
        assert!(!errors.ok());
        assert!(errors
            .messages()
            .iter()
            .any(|m| m.contains("positive integer constant")));
    }

    #[test]
    fn lower_duplicate_member_rejected() {
        let (_, errors) = lower_src(
            b"struct s { int x; int x; }; int main(void) { return 0; }",
        );
        assert!(!errors.ok());
    }

    #[test]
    fn lower_addr_of_deref_is_identity() {
        // &*p lowers back to p: the only address materialization is the
        // one for &x itself.
        let il = lower_ok(
            b"int main(void) { int x = 7; int *p = &x; int *q = &*p; return *q; }",
        );
        let addr_ofs = il.funcs[0]
            .commands
            .iter()
            .filter(|c| matches!(c, ILCommand::AddrOf { .. }))
            .count();
        assert_eq!(addr_ofs, 1);
    }

    #[test]
    fn lower_char_array_from_string() {
        let il = lower_ok(
            b"int main(void) { char s[6] = \"hello\"; return s[0]; }",
        );
        assert!(!il.strings.is_empty());
        let has_copy = il.funcs[0]
            .commands
            .iter()
            .any(|c| matches!(c, ILCommand::StructCopy { .. }));
        assert!(has_copy);
    }
}
