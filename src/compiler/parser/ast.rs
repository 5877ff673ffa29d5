//! Abstract Syntax Tree
//!
//! The tree produced by the recursive-descent parser: declarations,
//! statements, and expressions, each carrying the source position of its
//! first token. The tree is a closed set of tagged variants; lowering
//! dispatches over it with exhaustive matches.

use crate::compiler::lexer::IntSuffix;
use crate::error::Pos;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    /// `+` (promotes its operand, otherwise a no-op).
    Plus,
    /// `-`.
    Neg,
    /// `~`.
    BitNot,
    /// `!`.
    LogicalNot,
    /// `&`.
    AddrOf,
    /// `*`.
    Deref,
    /// Prefix `++`.
    PreInc,
    /// Prefix `--`.
    PreDec,
}

/// Binary operators (excluding assignment forms).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    LogAnd,
    LogOr,
    Comma,
}

/// An expression with its source position.
#[derive(Debug, Clone)]
pub struct Expr {
    /// Expression variant.
    pub kind: ExprKind,
    /// Position of the expression's first token.
    pub pos: Pos,
}

/// Expression variants.
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Integer constant.
    IntLit {
        /// Value as written.
        value: i64,
        /// Literal suffix, deciding the constant's type.
        suffix: IntSuffix,
    },
    /// Character constant; has type `int`.
    CharLit(u8),
    /// String literal, without the terminating NUL.
    StrLit(Vec<u8>),
    /// Identifier reference.
    Ident(String),
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnaryOpKind,
        /// Operand.
        arg: Box<Expr>,
    },
    /// Postfix `++`.
    PostInc(Box<Expr>),
    /// Postfix `--`.
    PostDec(Box<Expr>),
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinOpKind,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Simple assignment `lhs = rhs`.
    Assign {
        /// Target lvalue.
        lhs: Box<Expr>,
        /// Assigned value.
        rhs: Box<Expr>,
    },
    /// Compound assignment `lhs op= rhs`.
    CompoundAssign {
        /// Underlying arithmetic operator.
        op: BinOpKind,
        /// Target lvalue.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Conditional operator `cond ? then_expr : else_expr`.
    Conditional {
        /// Condition.
        cond: Box<Expr>,
        /// Result when the condition is nonzero.
        then_expr: Box<Expr>,
        /// Result when the condition is zero.
        else_expr: Box<Expr>,
    },
    /// Function call.
    Call {
        /// Callee (function designator or function pointer).
        func: Box<Expr>,
        /// Arguments, left to right.
        args: Vec<Expr>,
    },
    /// Array subscription `base[index]`.
    Subscript {
        /// Subscripted expression.
        base: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
    /// Direct member access `base.member`.
    Member {
        /// Record-typed expression.
        base: Box<Expr>,
        /// Member name.
        member: String,
    },
    /// Indirect member access `base->member`.
    Arrow {
        /// Pointer-to-record expression.
        base: Box<Expr>,
        /// Member name.
        member: String,
    },
    /// `sizeof expr`; the operand is never evaluated.
    SizeofExpr(Box<Expr>),
    /// `sizeof(type-name)`.
    SizeofType(Box<TypeName>),
    /// Explicit cast `(type-name)expr`.
    Cast {
        /// Target type.
        to: Box<TypeName>,
        /// Operand.
        arg: Box<Expr>,
    },
}

/// Storage class written in a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageSpec {
    /// No storage class specifier.
    None,
    /// `static`.
    Static,
    /// `extern`.
    Extern,
    /// `typedef`.
    Typedef,
}

/// The base type written in a declaration's specifier list, before any
/// declarator is applied.
#[derive(Debug, Clone)]
pub enum BaseType {
    /// `void`.
    Void,
    /// `_Bool`.
    Bool,
    /// `char` / `signed char`.
    Char,
    /// `unsigned char`.
    UChar,
    /// `short` and spellings thereof.
    Short,
    /// `unsigned short`.
    UShort,
    /// `int`, `signed`, plain default.
    Int,
    /// `unsigned`, `unsigned int`.
    UInt,
    /// `long` and spellings thereof.
    Long,
    /// `unsigned long`.
    ULong,
    /// A typedef name.
    Named(String),
    /// A struct or union specifier, possibly with a member list.
    Record(RecordSpec),
    /// An enum specifier, possibly with an enumerator list.
    Enum(EnumSpec),
}

/// `struct`/`union` specifier contents.
#[derive(Debug, Clone)]
pub struct RecordSpec {
    /// `true` for `union`.
    pub is_union: bool,
    /// Tag name, if any.
    pub tag: Option<String>,
    /// Member declarations; `None` when only the tag is referenced.
    pub members: Option<Vec<Declaration>>,
}

/// `enum` specifier contents.
#[derive(Debug, Clone)]
pub struct EnumSpec {
    /// Tag name, if any.
    pub tag: Option<String>,
    /// Enumerators with optional explicit values; `None` when only the
    /// tag is referenced.
    pub enumerators: Option<Vec<(String, Option<Expr>, Pos)>>,
}

/// Parsed declaration specifiers.
#[derive(Debug, Clone)]
pub struct DeclSpecs {
    /// The base type.
    pub base: BaseType,
    /// Storage class.
    pub storage: StorageSpec,
    /// `const` qualifier on the base type.
    pub is_const: bool,
    /// Position of the first specifier token.
    pub pos: Pos,
}

/// A declarator, wrapping the base type inside out.
#[derive(Debug, Clone)]
pub enum Declarator {
    /// The declared identifier, or nothing for an abstract declarator.
    Ident(Option<String>),
    /// `* declarator`, with an optional `const` applying to the pointer.
    Pointer {
        /// Declarator the pointer wraps.
        inner: Box<Declarator>,
        /// `* const`.
        is_const: bool,
    },
    /// `declarator [len]`.
    Array {
        /// Declarator the array wraps.
        inner: Box<Declarator>,
        /// Length expression; `None` for `[]`.
        len: Option<Box<Expr>>,
    },
    /// `declarator (params)`.
    Function {
        /// Declarator the function wraps.
        inner: Box<Declarator>,
        /// Parameter declarations; `None` for an empty, unprototyped
        /// parameter list `()`.
        params: Option<Vec<ParamDecl>>,
    },
}

impl Declarator {
    /// The declared identifier, if this declarator names one.
    pub fn name(&self) -> Option<&str> {
        match self {
            Declarator::Ident(name) => name.as_deref(),
            Declarator::Pointer { inner, .. }
            | Declarator::Array { inner, .. }
            | Declarator::Function { inner, .. } => inner.name(),
        }
    }
}

/// One function parameter.
#[derive(Debug, Clone)]
pub struct ParamDecl {
    /// Parameter specifiers.
    pub specs: DeclSpecs,
    /// Parameter declarator (possibly abstract).
    pub decl: Declarator,
    /// Position of the parameter.
    pub pos: Pos,
}

/// A type name, as in casts and `sizeof`: specifiers plus an abstract
/// declarator.
#[derive(Debug, Clone)]
pub struct TypeName {
    /// Specifiers.
    pub specs: DeclSpecs,
    /// Abstract declarator.
    pub decl: Declarator,
}

/// One declarator of a declaration, with its optional initializer.
#[derive(Debug, Clone)]
pub struct InitDeclarator {
    /// Declarator.
    pub decl: Declarator,
    /// Scalar or string-literal initializer.
    pub init: Option<Expr>,
    /// Position of the declarator.
    pub pos: Pos,
}

/// A declaration: specifiers plus zero or more init-declarators.
#[derive(Debug, Clone)]
pub struct Declaration {
    /// Specifiers shared by all declarators.
    pub specs: DeclSpecs,
    /// Declared names.
    pub decls: Vec<InitDeclarator>,
    /// Position of the declaration.
    pub pos: Pos,
}

/// A statement with its source position.
#[derive(Debug, Clone)]
pub struct Stmt {
    /// Statement variant.
    pub kind: StmtKind,
    /// Position of the statement's first token.
    pub pos: Pos,
}

/// Statement variants.
#[derive(Debug, Clone)]
pub enum StmtKind {
    /// Expression statement.
    Expr(Expr),
    /// Null statement `;`.
    Empty,
    /// Brace-enclosed block, opening a new scope.
    Compound(Vec<BlockItem>),
    /// `if`, with an optional `else`.
    If {
        /// Controlling expression.
        cond: Expr,
        /// Taken branch.
        then_stmt: Box<Stmt>,
        /// `else` branch.
        else_stmt: Option<Box<Stmt>>,
    },
    /// `while` loop.
    While {
        /// Controlling expression.
        cond: Expr,
        /// Loop body.
        body: Box<Stmt>,
    },
    /// `do`/`while` loop.
    DoWhile {
        /// Loop body.
        body: Box<Stmt>,
        /// Controlling expression, tested after the body.
        cond: Expr,
    },
    /// `for` loop; the init clause opens a scope for a declaration.
    For {
        /// Init clause.
        init: Option<ForInit>,
        /// Controlling expression.
        cond: Option<Expr>,
        /// Step expression.
        step: Option<Expr>,
        /// Loop body.
        body: Box<Stmt>,
    },
    /// `return`, with an optional value.
    Return(Option<Expr>),
    /// `break`.
    Break,
    /// `continue`.
    Continue,
}

/// The init clause of a `for` statement.
#[derive(Debug, Clone)]
pub enum ForInit {
    /// A declaration scoped to the loop.
    Decl(Declaration),
    /// An ordinary expression.
    Expr(Expr),
}

/// An element of a compound statement.
#[derive(Debug, Clone)]
pub enum BlockItem {
    /// A nested statement.
    Stmt(Stmt),
    /// A local declaration.
    Decl(Declaration),
}

/// A top-level item of the translation unit.
#[derive(Debug, Clone)]
pub enum ExternalDecl {
    /// A function definition with its body.
    Function {
        /// Specifiers.
        specs: DeclSpecs,
        /// Declarator naming the function and its parameters.
        decl: Declarator,
        /// Function body (always a compound statement).
        body: Stmt,
        /// Position of the definition.
        pos: Pos,
    },
    /// An ordinary declaration (objects, prototypes, types).
    Declaration(Declaration),
}

/// A parsed translation unit.
#[derive(Debug, Clone, Default)]
pub struct TranslationUnit {
    /// Top-level items in source order.
    pub items: Vec<ExternalDecl>,
}
