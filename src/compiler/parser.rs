//! Syntax Analysis
//!
//! Compiler pass that parses the preprocessed token stream into an
//! abstract syntax tree by recursive descent, with precedence climbing
//! for expressions.
//!
//! The parser keeps its own scoped set of typedef names so it can tell a
//! declaration from an expression statement; the semantic analyzer
//! re-resolves the names properly during lowering. Syntax errors are
//! recorded and the parser re-synchronizes at the next `;` or `}`, so one
//! run reports every parse error it can.

pub mod ast;

use std::collections::HashSet;

use crate::compiler::lexer::{Keyword, Punct, Token, TokenKind};
use crate::error::{ErrorCollector, Pos};

use ast::*;

/// Parses a whole translation unit.
pub fn parse(tokens: &[Token], errors: &mut ErrorCollector) -> TranslationUnit {
    Parser::new(tokens, errors).translation_unit()
}

/// `true` if the declarator declares a function (rather than, say, a
/// pointer to one): the constructor applied innermost, next to the
/// identifier, must be the function suffix. `Node *load(...)` declares a
/// function; `int (*f)(int)` declares a pointer.
fn declares_function(decl: &Declarator) -> bool {
    match decl {
        Declarator::Ident(_) => false,
        Declarator::Function { inner, .. } => {
            matches!(**inner, Declarator::Ident(_)) || declares_function(inner)
        }
        Declarator::Pointer { inner, .. } | Declarator::Array { inner, .. } => {
            declares_function(inner)
        }
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    cur: usize,
    errors: &'a mut ErrorCollector,
    // Typedef names per scope, for declaration/expression disambiguation.
    typedefs: Vec<HashSet<String>>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], errors: &'a mut ErrorCollector) -> Self {
        Parser {
            tokens,
            cur: 0,
            errors,
            typedefs: vec![HashSet::new()],
        }
    }

    // ------------------------------------------------------------------
    // Token cursor helpers.

    fn peek(&self) -> &'a TokenKind {
        &self.tokens[self.cur.min(self.tokens.len() - 1)].kind
    }

    fn peek_ahead(&self, n: usize) -> &'a TokenKind {
        &self.tokens[(self.cur + n).min(self.tokens.len() - 1)].kind
    }

    fn pos(&self) -> Pos {
        self.tokens[self.cur.min(self.tokens.len() - 1)].pos
    }

    fn advance(&mut self) -> &'a TokenKind {
        let kind = self.peek();
        if self.cur < self.tokens.len() - 1 {
            self.cur += 1;
        }
        kind
    }

    fn at_punct(&self, p: Punct) -> bool {
        *self.peek() == TokenKind::Punct(p)
    }

    fn at_keyword(&self, k: Keyword) -> bool {
        *self.peek() == TokenKind::Keyword(k)
    }

    fn eat_punct(&mut self, p: Punct) -> bool {
        if self.at_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, k: Keyword) -> bool {
        if self.at_keyword(k) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: Punct, what: &str) -> bool {
        if self.eat_punct(p) {
            true
        } else {
            let found = self.peek().clone();
            self.errors
                .error(format!("expected {what}, found {found}"), self.pos());
            false
        }
    }

    fn expect_ident(&mut self) -> Option<String> {
        match self.peek() {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Some(name)
            }
            found => {
                self.errors.error(
                    format!("expected identifier, found {found}"),
                    self.pos(),
                );
                None
            }
        }
    }

    /// Panic-mode recovery: skips to just past the next `;`, or stops at
    /// a `}` or EOF.
    fn synchronize(&mut self) {
        loop {
            match self.peek() {
                TokenKind::Eof => return,
                TokenKind::Punct(Punct::Semicolon) => {
                    self.advance();
                    return;
                }
                TokenKind::Punct(Punct::BraceClose) => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn is_typedef_name(&self, name: &str) -> bool {
        self.typedefs.iter().rev().any(|s| s.contains(name))
    }

    /// `true` if the current token can begin a declaration.
    fn at_decl_start(&self) -> bool {
        match self.peek() {
            TokenKind::Keyword(
                Keyword::Void
                | Keyword::Bool
                | Keyword::Char
                | Keyword::Short
                | Keyword::Int
                | Keyword::Long
                | Keyword::Signed
                | Keyword::Unsigned
                | Keyword::Struct
                | Keyword::Union
                | Keyword::Enum
                | Keyword::Const
                | Keyword::Static
                | Keyword::Extern
                | Keyword::Typedef,
            ) => true,
            TokenKind::Ident(name) => self.is_typedef_name(name),
            _ => false,
        }
    }

    /// `true` if the token `n` ahead can begin a type name (used to
    /// disambiguate casts and `sizeof`).
    fn type_name_starts_at(&self, n: usize) -> bool {
        match self.peek_ahead(n) {
            TokenKind::Keyword(
                Keyword::Void
                | Keyword::Bool
                | Keyword::Char
                | Keyword::Short
                | Keyword::Int
                | Keyword::Long
                | Keyword::Signed
                | Keyword::Unsigned
                | Keyword::Struct
                | Keyword::Union
                | Keyword::Enum
                | Keyword::Const,
            ) => true,
            TokenKind::Ident(name) => self.is_typedef_name(name),
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // Translation unit and declarations.

    fn translation_unit(&mut self) -> TranslationUnit {
        let mut unit = TranslationUnit::default();

        while *self.peek() != TokenKind::Eof {
            let before = self.cur;
            if let Some(item) = self.external_decl() {
                unit.items.push(item);
            }
            // Ensure forward progress even on a hopeless parse.
            if self.cur == before {
                self.advance();
            }
        }

        unit
    }

    fn external_decl(&mut self) -> Option<ExternalDecl> {
        let pos = self.pos();

        if !self.at_decl_start() {
            let found = self.peek().clone();
            self.errors
                .error(format!("expected declaration, found {found}"), pos);
            self.synchronize();
            return None;
        }

        let specs = self.decl_specs()?;

        // A bare `struct S;` or `enum E { ... };` declares only the tag.
        if self.eat_punct(Punct::Semicolon) {
            return Some(ExternalDecl::Declaration(Declaration {
                specs,
                decls: vec![],
                pos,
            }));
        }

        let decl_pos = self.pos();
        let decl = self.declarator()?;

        // A function definition follows its declarator with `{`.
        if self.at_punct(Punct::BraceOpen) {
            if !declares_function(&decl) {
                self.errors
                    .error("expected ';' after declaration", self.pos());
                self.synchronize();
                return None;
            }
            let body = self.compound_stmt()?;
            return Some(ExternalDecl::Function { specs, decl, body, pos });
        }

        let declaration = self.finish_declaration(specs, decl, decl_pos, pos)?;
        Some(ExternalDecl::Declaration(declaration))
    }

    /// Parses the remainder of a declaration after its first declarator:
    /// optional initializers and further comma-separated declarators.
    fn finish_declaration(
        &mut self,
        specs: DeclSpecs,
        first: Declarator,
        first_pos: Pos,
        pos: Pos,
    ) -> Option<Declaration> {
        let mut decls = Vec::new();
        let mut decl = first;
        let mut decl_pos = first_pos;

        loop {
            let init = if self.eat_punct(Punct::Eq) {
                Some(self.assignment_expr()?)
            } else {
                None
            };

            if specs.storage == StorageSpec::Typedef {
                if let Some(name) = decl.name() {
                    self.typedefs
                        .last_mut()
                        .expect("typedef scope stack is never empty")
                        .insert(name.to_owned());
                }
            }

            decls.push(InitDeclarator { decl, init, pos: decl_pos });

            if !self.eat_punct(Punct::Comma) {
                break;
            }
            decl_pos = self.pos();
            decl = self.declarator()?;
        }

        if !self.expect_punct(Punct::Semicolon, "';' after declaration") {
            self.synchronize();
        }

        Some(Declaration { specs, decls, pos })
    }

    fn decl_specs(&mut self) -> Option<DeclSpecs> {
        let pos = self.pos();
        let mut storage = StorageSpec::None;
        let mut is_const = false;

        // Collected arithmetic specifier words.
        let mut base: Option<BaseType> = None;
        let mut signedness: Option<bool> = None;
        let mut longs = 0u32;
        let mut shorts = 0u32;
        let mut saw_int = false;

        let mut report = |errors: &mut ErrorCollector, msg: &str, pos: Pos| {
            errors.error(msg.to_owned(), pos);
        };

        loop {
            let spec_pos = self.pos();
            match self.peek() {
                TokenKind::Keyword(Keyword::Static) => {
                    self.advance();
                    if storage != StorageSpec::None {
                        report(self.errors, "multiple storage classes in declaration", spec_pos);
                    }
                    storage = StorageSpec::Static;
                }
                TokenKind::Keyword(Keyword::Extern) => {
                    self.advance();
                    if storage != StorageSpec::None {
                        report(self.errors, "multiple storage classes in declaration", spec_pos);
                    }
                    storage = StorageSpec::Extern;
                }
                TokenKind::Keyword(Keyword::Typedef) => {
                    self.advance();
                    if storage != StorageSpec::None {
                        report(self.errors, "multiple storage classes in declaration", spec_pos);
                    }
                    storage = StorageSpec::Typedef;
                }
                TokenKind::Keyword(Keyword::Const) => {
                    self.advance();
                    is_const = true;
                }
                TokenKind::Keyword(Keyword::Void) => {
                    self.advance();
                    if base.is_some() {
                        report(self.errors, "invalid type specifier combination", spec_pos);
                    }
                    base = Some(BaseType::Void);
                }
                TokenKind::Keyword(Keyword::Bool) => {
                    self.advance();
                    if base.is_some() {
                        report(self.errors, "invalid type specifier combination", spec_pos);
                    }
                    base = Some(BaseType::Bool);
                }
                TokenKind::Keyword(Keyword::Char) => {
                    self.advance();
                    if base.is_some() {
                        report(self.errors, "invalid type specifier combination", spec_pos);
                    }
                    base = Some(BaseType::Char);
                }
                TokenKind::Keyword(Keyword::Int) => {
                    self.advance();
                    if saw_int || base.is_some() {
                        report(self.errors, "invalid type specifier combination", spec_pos);
                    }
                    saw_int = true;
                }
                TokenKind::Keyword(Keyword::Short) => {
                    self.advance();
                    shorts += 1;
                }
                TokenKind::Keyword(Keyword::Long) => {
                    self.advance();
                    longs += 1;
                }
                TokenKind::Keyword(Keyword::Signed) => {
                    self.advance();
                    if signedness.is_some() {
                        report(self.errors, "invalid type specifier combination", spec_pos);
                    }
                    signedness = Some(true);
                }
                TokenKind::Keyword(Keyword::Unsigned) => {
                    self.advance();
                    if signedness.is_some() {
                        report(self.errors, "invalid type specifier combination", spec_pos);
                    }
                    signedness = Some(false);
                }
                TokenKind::Keyword(Keyword::Struct | Keyword::Union) => {
                    if base.is_some() {
                        report(self.errors, "invalid type specifier combination", spec_pos);
                    }
                    base = Some(BaseType::Record(self.record_spec()?));
                }
                TokenKind::Keyword(Keyword::Enum) => {
                    if base.is_some() {
                        report(self.errors, "invalid type specifier combination", spec_pos);
                    }
                    base = Some(BaseType::Enum(self.enum_spec()?));
                }
                TokenKind::Ident(name)
                    if base.is_none()
                        && !saw_int
                        && signedness.is_none()
                        && longs == 0
                        && shorts == 0
                        && self.is_typedef_name(name) =>
                {
                    base = Some(BaseType::Named(name.clone()));
                    self.advance();
                }
                _ => break,
            }
        }

        // Fold the arithmetic keyword soup into a single base type.
        let base = match base {
            Some(b) => {
                if longs > 0 || shorts > 0 || signedness.is_some() || saw_int {
                    // Only `char` combines with signedness.
                    match (&b, signedness) {
                        (BaseType::Char, Some(false)) => BaseType::UChar,
                        (BaseType::Char, Some(true)) => BaseType::Char,
                        _ => {
                            self.errors.error(
                                "invalid type specifier combination",
                                pos,
                            );
                            b
                        }
                    }
                } else {
                    b
                }
            }
            None => {
                if longs > 2 || (longs > 0 && shorts > 0) {
                    self.errors
                        .error("invalid type specifier combination", pos);
                }
                let unsigned = signedness == Some(false);
                if longs > 0 {
                    if unsigned { BaseType::ULong } else { BaseType::Long }
                } else if shorts > 0 {
                    if unsigned { BaseType::UShort } else { BaseType::Short }
                } else if saw_int || signedness.is_some() {
                    if unsigned { BaseType::UInt } else { BaseType::Int }
                } else {
                    self.errors.error("expected type specifier", pos);
                    BaseType::Int
                }
            }
        };

        Some(DeclSpecs { base, storage, is_const, pos })
    }

    fn record_spec(&mut self) -> Option<RecordSpec> {
        let is_union = matches!(self.peek(), TokenKind::Keyword(Keyword::Union));
        self.advance();

        let tag = match self.peek() {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Some(name)
            }
            _ => None,
        };

        let members = if self.eat_punct(Punct::BraceOpen) {
            let mut members = Vec::new();
            while !self.at_punct(Punct::BraceClose) && *self.peek() != TokenKind::Eof {
                let member_pos = self.pos();
                let Some(specs) = self.decl_specs() else {
                    self.synchronize();
                    continue;
                };
                let mut decls = Vec::new();
                loop {
                    let decl_pos = self.pos();
                    let Some(decl) = self.declarator() else {
                        self.synchronize();
                        break;
                    };
                    decls.push(InitDeclarator { decl, init: None, pos: decl_pos });
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
                if !self.expect_punct(Punct::Semicolon, "';' after member declaration") {
                    self.synchronize();
                }
                members.push(Declaration { specs, decls, pos: member_pos });
            }
            self.expect_punct(Punct::BraceClose, "'}' after member list");
            Some(members)
        } else {
            if tag.is_none() {
                self.errors
                    .error("expected tag name or member list", self.pos());
            }
            None
        };

        Some(RecordSpec { is_union, tag, members })
    }

    fn enum_spec(&mut self) -> Option<EnumSpec> {
        // Skip the `enum` keyword.
        self.advance();

        let tag = match self.peek() {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Some(name)
            }
            _ => None,
        };

        let enumerators = if self.eat_punct(Punct::BraceOpen) {
            let mut list = Vec::new();
            while !self.at_punct(Punct::BraceClose) && *self.peek() != TokenKind::Eof {
                let pos = self.pos();
                let Some(name) = self.expect_ident() else {
                    self.synchronize();
                    break;
                };
                let value = if self.eat_punct(Punct::Eq) {
                    Some(self.conditional_expr()?)
                } else {
                    None
                };
                list.push((name, value, pos));
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
            self.expect_punct(Punct::BraceClose, "'}' after enumerator list");
            Some(list)
        } else {
            if tag.is_none() {
                self.errors
                    .error("expected tag name or enumerator list", self.pos());
            }
            None
        };

        Some(EnumSpec { tag, enumerators })
    }

    // ------------------------------------------------------------------
    // Declarators.

    fn declarator(&mut self) -> Option<Declarator> {
        if self.eat_punct(Punct::Star) {
            let mut is_const = false;
            while self.eat_keyword(Keyword::Const) {
                is_const = true;
            }
            let inner = self.declarator()?;
            return Some(Declarator::Pointer { inner: Box::new(inner), is_const });
        }

        self.direct_declarator()
    }

    fn direct_declarator(&mut self) -> Option<Declarator> {
        let mut decl = match self.peek() {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Declarator::Ident(Some(name))
            }
            // `(` introduces a parenthesized declarator only when it is
            // not a parameter list of an abstract function declarator.
            TokenKind::Punct(Punct::ParenOpen)
                if !self.type_name_starts_at(1)
                    && *self.peek_ahead(1) != TokenKind::Punct(Punct::ParenClose) =>
            {
                self.advance();
                let inner = self.declarator()?;
                self.expect_punct(Punct::ParenClose, "')' in declarator");
                inner
            }
            // Abstract declarator: no identifier.
            _ => Declarator::Ident(None),
        };

        loop {
            if self.eat_punct(Punct::BrackOpen) {
                let len = if self.at_punct(Punct::BrackClose) {
                    None
                } else {
                    Some(Box::new(self.conditional_expr()?))
                };
                self.expect_punct(Punct::BrackClose, "']' in array declarator");
                decl = Declarator::Array { inner: Box::new(decl), len };
            } else if self.eat_punct(Punct::ParenOpen) {
                let params = self.param_list()?;
                decl = Declarator::Function { inner: Box::new(decl), params };
            } else {
                break;
            }
        }

        Some(decl)
    }

    /// Parses a parameter list after `(`. Returns `None` inside `Some`
    /// for an unprototyped empty list.
    fn param_list(&mut self) -> Option<Option<Vec<ParamDecl>>> {
        if self.eat_punct(Punct::ParenClose) {
            // `()` leaves the parameters unspecified.
            return Some(None);
        }

        // `(void)` is an explicit empty prototype.
        if self.at_keyword(Keyword::Void)
            && *self.peek_ahead(1) == TokenKind::Punct(Punct::ParenClose)
        {
            self.advance();
            self.advance();
            return Some(Some(vec![]));
        }

        let mut params = Vec::new();
        loop {
            let pos = self.pos();
            let specs = self.decl_specs()?;
            if specs.storage != StorageSpec::None {
                self.errors.error(
                    "storage class specified for function parameter",
                    pos,
                );
            }
            let decl = self.declarator()?;
            params.push(ParamDecl { specs, decl, pos });

            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::ParenClose, "')' after parameters");

        Some(Some(params))
    }

    fn type_name(&mut self) -> Option<TypeName> {
        let specs = self.decl_specs()?;
        let decl = self.declarator()?;
        if decl.name().is_some() {
            self.errors
                .error("type name cannot declare an identifier", specs.pos);
        }
        Some(TypeName { specs, decl })
    }

    // ------------------------------------------------------------------
    // Statements.

    fn compound_stmt(&mut self) -> Option<Stmt> {
        let pos = self.pos();
        if !self.expect_punct(Punct::BraceOpen, "'{'") {
            return None;
        }
        self.typedefs.push(HashSet::new());

        let mut items = Vec::new();
        while !self.at_punct(Punct::BraceClose) && *self.peek() != TokenKind::Eof {
            let before = self.cur;
            if self.at_decl_start() {
                if let Some(decl) = self.declaration() {
                    items.push(BlockItem::Decl(decl));
                }
            } else if let Some(stmt) = self.statement() {
                items.push(BlockItem::Stmt(stmt));
            }
            if self.cur == before {
                self.advance();
            }
        }

        self.typedefs.pop();
        self.expect_punct(Punct::BraceClose, "'}'");
        Some(Stmt { kind: StmtKind::Compound(items), pos })
    }

    fn declaration(&mut self) -> Option<Declaration> {
        let pos = self.pos();
        let specs = self.decl_specs()?;

        if self.eat_punct(Punct::Semicolon) {
            return Some(Declaration { specs, decls: vec![], pos });
        }

        let decl_pos = self.pos();
        let decl = self.declarator()?;
        self.finish_declaration(specs, decl, decl_pos, pos)
    }

    fn statement(&mut self) -> Option<Stmt> {
        let pos = self.pos();

        match self.peek() {
            TokenKind::Punct(Punct::Semicolon) => {
                self.advance();
                Some(Stmt { kind: StmtKind::Empty, pos })
            }
            TokenKind::Punct(Punct::BraceOpen) => self.compound_stmt(),
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.at_punct(Punct::Semicolon) {
                    None
                } else {
                    Some(self.expression()?)
                };
                if !self.expect_punct(Punct::Semicolon, "';' after return") {
                    self.synchronize();
                }
                Some(Stmt { kind: StmtKind::Return(value), pos })
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                self.expect_punct(Punct::Semicolon, "';' after 'break'");
                Some(Stmt { kind: StmtKind::Break, pos })
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                self.expect_punct(Punct::Semicolon, "';' after 'continue'");
                Some(Stmt { kind: StmtKind::Continue, pos })
            }
            TokenKind::Keyword(Keyword::If) => {
                self.advance();
                self.expect_punct(Punct::ParenOpen, "'(' after 'if'");
                let cond = self.expression()?;
                self.expect_punct(Punct::ParenClose, "')' after condition");
                let then_stmt = Box::new(self.statement()?);
                let else_stmt = if self.eat_keyword(Keyword::Else) {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Some(Stmt {
                    kind: StmtKind::If { cond, then_stmt, else_stmt },
                    pos,
                })
            }
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                self.expect_punct(Punct::ParenOpen, "'(' after 'while'");
                let cond = self.expression()?;
                self.expect_punct(Punct::ParenClose, "')' after condition");
                let body = Box::new(self.statement()?);
                Some(Stmt { kind: StmtKind::While { cond, body }, pos })
            }
            TokenKind::Keyword(Keyword::Do) => {
                self.advance();
                let body = Box::new(self.statement()?);
                if !self.eat_keyword(Keyword::While) {
                    self.errors
                        .error("expected 'while' after do body", self.pos());
                    self.synchronize();
                    return None;
                }
                self.expect_punct(Punct::ParenOpen, "'(' after 'while'");
                let cond = self.expression()?;
                self.expect_punct(Punct::ParenClose, "')' after condition");
                self.expect_punct(Punct::Semicolon, "';' after do/while");
                Some(Stmt { kind: StmtKind::DoWhile { body, cond }, pos })
            }
            TokenKind::Keyword(Keyword::For) => {
                self.advance();
                self.expect_punct(Punct::ParenOpen, "'(' after 'for'");

                let init = if self.eat_punct(Punct::Semicolon) {
                    None
                } else if self.at_decl_start() {
                    Some(ForInit::Decl(self.declaration()?))
                } else {
                    let e = self.expression()?;
                    self.expect_punct(Punct::Semicolon, "';' in for clause");
                    Some(ForInit::Expr(e))
                };

                let cond = if self.at_punct(Punct::Semicolon) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect_punct(Punct::Semicolon, "';' in for clause");

                let step = if self.at_punct(Punct::ParenClose) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect_punct(Punct::ParenClose, "')' after for clauses");

                let body = Box::new(self.statement()?);
                Some(Stmt {
                    kind: StmtKind::For { init, cond, step, body },
                    pos,
                })
            }
            _ => {
                let expr = self.expression()?;
                if !self.expect_punct(Punct::Semicolon, "';' after expression") {
                    self.synchronize();
                }
                Some(Stmt { kind: StmtKind::Expr(expr), pos })
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions, by precedence climbing.

    fn expression(&mut self) -> Option<Expr> {
        let mut lhs = self.assignment_expr()?;
        while self.at_punct(Punct::Comma) {
            let pos = self.pos();
            self.advance();
            let rhs = self.assignment_expr()?;
            lhs = Expr {
                kind: ExprKind::Binary {
                    op: BinOpKind::Comma,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            };
        }
        Some(lhs)
    }

    fn assignment_expr(&mut self) -> Option<Expr> {
        let lhs = self.conditional_expr()?;
        let pos = self.pos();

        let compound = |op| Some(op);
        let op = match self.peek() {
            TokenKind::Punct(Punct::Eq) => None,
            TokenKind::Punct(Punct::PlusEq) => compound(BinOpKind::Add),
            TokenKind::Punct(Punct::MinusEq) => compound(BinOpKind::Sub),
            TokenKind::Punct(Punct::StarEq) => compound(BinOpKind::Mul),
            TokenKind::Punct(Punct::SlashEq) => compound(BinOpKind::Div),
            TokenKind::Punct(Punct::PercentEq) => compound(BinOpKind::Mod),
            TokenKind::Punct(Punct::AmpEq) => compound(BinOpKind::BitAnd),
            TokenKind::Punct(Punct::PipeEq) => compound(BinOpKind::BitOr),
            TokenKind::Punct(Punct::CaretEq) => compound(BinOpKind::BitXor),
            TokenKind::Punct(Punct::LShiftEq) => compound(BinOpKind::Shl),
            TokenKind::Punct(Punct::RShiftEq) => compound(BinOpKind::Shr),
            _ => return Some(lhs),
        };
        self.advance();

        let rhs = Box::new(self.assignment_expr()?);
        let lhs = Box::new(lhs);
        let kind = match op {
            None => ExprKind::Assign { lhs, rhs },
            Some(op) => ExprKind::CompoundAssign { op, lhs, rhs },
        };
        Some(Expr { kind, pos })
    }

    fn conditional_expr(&mut self) -> Option<Expr> {
        let cond = self.binary_expr(0)?;
        if !self.at_punct(Punct::Question) {
            return Some(cond);
        }
        let pos = self.pos();
        self.advance();
        let then_expr = Box::new(self.expression()?);
        self.expect_punct(Punct::Colon, "':' in conditional expression");
        let else_expr = Box::new(self.conditional_expr()?);
        Some(Expr {
            kind: ExprKind::Conditional {
                cond: Box::new(cond),
                then_expr,
                else_expr,
            },
            pos,
        })
    }

    /// Binds the binary operator at the cursor, if its precedence is at
    /// least `min_prec`. Precedence 0 is `||`; higher binds tighter.
    fn binary_op(&self, min_prec: u8) -> Option<(BinOpKind, u8)> {
        let (op, prec) = match self.peek() {
            TokenKind::Punct(Punct::PipePipe) => (BinOpKind::LogOr, 0),
            TokenKind::Punct(Punct::AmpAmp) => (BinOpKind::LogAnd, 1),
            TokenKind::Punct(Punct::Pipe) => (BinOpKind::BitOr, 2),
            TokenKind::Punct(Punct::Caret) => (BinOpKind::BitXor, 3),
            TokenKind::Punct(Punct::Amp) => (BinOpKind::BitAnd, 4),
            TokenKind::Punct(Punct::EqEq) => (BinOpKind::Eq, 5),
            TokenKind::Punct(Punct::BangEq) => (BinOpKind::Ne, 5),
            TokenKind::Punct(Punct::Lt) => (BinOpKind::Lt, 6),
            TokenKind::Punct(Punct::Gt) => (BinOpKind::Gt, 6),
            TokenKind::Punct(Punct::Le) => (BinOpKind::Le, 6),
            TokenKind::Punct(Punct::Ge) => (BinOpKind::Ge, 6),
            TokenKind::Punct(Punct::LShift) => (BinOpKind::Shl, 7),
            TokenKind::Punct(Punct::RShift) => (BinOpKind::Shr, 7),
            TokenKind::Punct(Punct::Plus) => (BinOpKind::Add, 8),
            TokenKind::Punct(Punct::Minus) => (BinOpKind::Sub, 8),
            TokenKind::Punct(Punct::Star) => (BinOpKind::Mul, 9),
            TokenKind::Punct(Punct::Slash) => (BinOpKind::Div, 9),
            TokenKind::Punct(Punct::Percent) => (BinOpKind::Mod, 9),
            _ => return None,
        };
        (prec >= min_prec).then_some((op, prec))
    }

    fn binary_expr(&mut self, min_prec: u8) -> Option<Expr> {
        let mut lhs = self.cast_expr()?;

        while let Some((op, prec)) = self.binary_op(min_prec) {
            let pos = self.pos();
            self.advance();
            let rhs = self.binary_expr(prec + 1)?;
            lhs = Expr {
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                pos,
            };
        }

        Some(lhs)
    }

    fn cast_expr(&mut self) -> Option<Expr> {
        if self.at_punct(Punct::ParenOpen) && self.type_name_starts_at(1) {
            let pos = self.pos();
            self.advance();
            let to = self.type_name()?;
            self.expect_punct(Punct::ParenClose, "')' after type name");
            let arg = self.cast_expr()?;
            return Some(Expr {
                kind: ExprKind::Cast { to: Box::new(to), arg: Box::new(arg) },
                pos,
            });
        }
        self.unary_expr()
    }

    fn unary_expr(&mut self) -> Option<Expr> {
        let pos = self.pos();

        let op = match self.peek() {
            TokenKind::Punct(Punct::Plus) => Some(UnaryOpKind::Plus),
            TokenKind::Punct(Punct::Minus) => Some(UnaryOpKind::Neg),
            TokenKind::Punct(Punct::Tilde) => Some(UnaryOpKind::BitNot),
            TokenKind::Punct(Punct::Bang) => Some(UnaryOpKind::LogicalNot),
            TokenKind::Punct(Punct::Amp) => Some(UnaryOpKind::AddrOf),
            TokenKind::Punct(Punct::Star) => Some(UnaryOpKind::Deref),
            TokenKind::Punct(Punct::PlusPlus) => Some(UnaryOpKind::PreInc),
            TokenKind::Punct(Punct::MinusMinus) => Some(UnaryOpKind::PreDec),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let arg = Box::new(self.cast_expr()?);
            return Some(Expr { kind: ExprKind::Unary { op, arg }, pos });
        }

        if self.eat_keyword(Keyword::Sizeof) {
            // `sizeof(type-name)` vs. `sizeof expr`; a parenthesized
            // expression is the operand of the latter.
            if self.at_punct(Punct::ParenOpen) && self.type_name_starts_at(1) {
                self.advance();
                let ty = self.type_name()?;
                self.expect_punct(Punct::ParenClose, "')' after type name");
                return Some(Expr {
                    kind: ExprKind::SizeofType(Box::new(ty)),
                    pos,
                });
            }
            let arg = Box::new(self.unary_expr()?);
            return Some(Expr { kind: ExprKind::SizeofExpr(arg), pos });
        }

        self.postfix_expr()
    }

    fn postfix_expr(&mut self) -> Option<Expr> {
        let mut expr = self.primary_expr()?;

        loop {
            let pos = self.pos();
            match self.peek() {
                TokenKind::Punct(Punct::ParenOpen) => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.at_punct(Punct::ParenClose) {
                        loop {
                            args.push(self.assignment_expr()?);
                            if !self.eat_punct(Punct::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect_punct(Punct::ParenClose, "')' after arguments");
                    expr = Expr {
                        kind: ExprKind::Call { func: Box::new(expr), args },
                        pos,
                    };
                }
                TokenKind::Punct(Punct::BrackOpen) => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect_punct(Punct::BrackClose, "']' after subscript");
                    expr = Expr {
                        kind: ExprKind::Subscript {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                        pos,
                    };
                }
                TokenKind::Punct(Punct::Dot) => {
                    self.advance();
                    let member = self.expect_ident()?;
                    expr = Expr {
                        kind: ExprKind::Member { base: Box::new(expr), member },
                        pos,
                    };
                }
                TokenKind::Punct(Punct::Arrow) => {
                    self.advance();
                    let member = self.expect_ident()?;
                    expr = Expr {
                        kind: ExprKind::Arrow { base: Box::new(expr), member },
                        pos,
                    };
                }
                TokenKind::Punct(Punct::PlusPlus) => {
                    self.advance();
                    expr = Expr { kind: ExprKind::PostInc(Box::new(expr)), pos };
                }
                TokenKind::Punct(Punct::MinusMinus) => {
                    self.advance();
                    expr = Expr { kind: ExprKind::PostDec(Box::new(expr)), pos };
                }
                _ => break,
            }
        }

        Some(expr)
    }

    fn primary_expr(&mut self) -> Option<Expr> {
        let pos = self.pos();

        match self.peek().clone() {
            TokenKind::IntLit { value, suffix } => {
                self.advance();
                Some(Expr { kind: ExprKind::IntLit { value, suffix }, pos })
            }
            TokenKind::CharLit(c) => {
                self.advance();
                Some(Expr { kind: ExprKind::CharLit(c), pos })
            }
            TokenKind::StrLit(bytes) => {
                self.advance();
                Some(Expr { kind: ExprKind::StrLit(bytes), pos })
            }
            TokenKind::Ident(name) => {
                self.advance();
                Some(Expr { kind: ExprKind::Ident(name), pos })
            }
            TokenKind::Punct(Punct::ParenOpen) => {
                self.advance();
                let expr = self.expression()?;
                self.expect_punct(Punct::ParenClose, "')'");
                Some(expr)
            }
            found => {
                self.errors
                    .error(format!("expected expression, found {found}"), pos);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;

    fn parse_ok(src: &[u8]) -> TranslationUnit {
        let mut errors = ErrorCollector::new();
        let tokens = Lexer::new("test.c", src).lex(&mut errors);
        let unit = parse(&tokens, &mut errors);
        assert!(errors.ok(), "unexpected errors: {:?}", errors.messages());
        unit
    }

    fn parse_err(src: &[u8]) -> ErrorCollector {
        let mut errors = ErrorCollector::new();
        let tokens = Lexer::new("test.c", src).lex(&mut errors);
        let _ = parse(&tokens, &mut errors);
        errors
    }

    #[test]
    fn parser_valid_minimal_main() {
        let unit = parse_ok(b"int main(void) { return 0; }");
        assert_eq!(unit.items.len(), 1);
        let ExternalDecl::Function { decl, body, .. } = &unit.items[0] else {
            panic!("expected function definition");
        };
        assert_eq!(decl.name(), Some("main"));
        let StmtKind::Compound(items) = &body.kind else {
            panic!("expected compound body");
        };
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn parser_valid_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3).
        let unit = parse_ok(b"int x = 1 + 2 * 3;");
        let ExternalDecl::Declaration(decl) = &unit.items[0] else {
            panic!("expected declaration");
        };
        let Some(Expr { kind: ExprKind::Binary { op, rhs, .. }, .. }) =
            &decl.decls[0].init
        else {
            panic!("expected binary initializer");
        };
        assert_eq!(*op, BinOpKind::Add);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary { op: BinOpKind::Mul, .. }
        ));
    }

    #[test]
    fn parser_valid_function_pointer_declarator() {
        // int (*f)(int): pointer to function taking int returning int.
        let unit = parse_ok(b"int (*f)(int) = 0;");
        let ExternalDecl::Declaration(decl) = &unit.items[0] else {
            panic!("expected declaration");
        };
        let Declarator::Function { inner, params } = &decl.decls[0].decl else {
            panic!("expected function declarator, got {:?}", decl.decls[0].decl);
        };
        assert!(matches!(**inner, Declarator::Pointer { .. }));
        assert_eq!(params.as_ref().unwrap().len(), 1);
        assert_eq!(decl.decls[0].decl.name(), Some("f"));
    }

    #[test]
    fn parser_valid_array_of_pointers() {
        let unit = parse_ok(b"char *names[10];");
        let ExternalDecl::Declaration(decl) = &unit.items[0] else {
            panic!("expected declaration");
        };
        // The declarator binds [] before *: array of pointers.
        assert!(matches!(
            decl.decls[0].decl,
            Declarator::Pointer { .. }
        ));
    }

    #[test]
    fn parser_valid_struct_definition() {
        let unit = parse_ok(b"struct point { int x; int y; } p;");
        let ExternalDecl::Declaration(decl) = &unit.items[0] else {
            panic!("expected declaration");
        };
        let BaseType::Record(spec) = &decl.specs.base else {
            panic!("expected record specifier");
        };
        assert_eq!(spec.tag.as_deref(), Some("point"));
        assert_eq!(spec.members.as_ref().unwrap().len(), 2);
        assert_eq!(decl.decls[0].decl.name(), Some("p"));
    }

    #[test]
    fn parser_valid_typedef_disambiguation() {
        // After the typedef, `vec v;` is a declaration, not an
        // expression statement.
        let unit = parse_ok(b"typedef int vec; int main(void) { vec v = 1; return v; }");
        let ExternalDecl::Function { body, .. } = &unit.items[1] else {
            panic!("expected function definition");
        };
        let StmtKind::Compound(items) = &body.kind else {
            panic!("expected compound body");
        };
        assert!(matches!(items[0], BlockItem::Decl(_)));
    }

    #[test]
    fn parser_valid_sizeof_forms() {
        let unit = parse_ok(b"int a = sizeof(int); int b = sizeof a;");
        let ExternalDecl::Declaration(da) = &unit.items[0] else {
            panic!("expected declaration");
        };
        assert!(matches!(
            da.decls[0].init.as_ref().unwrap().kind,
            ExprKind::SizeofType(_)
        ));
        let ExternalDecl::Declaration(db) = &unit.items[1] else {
            panic!("expected declaration");
        };
        assert!(matches!(
            db.decls[0].init.as_ref().unwrap().kind,
            ExprKind::SizeofExpr(_)
        ));
    }

    #[test]
    fn parser_valid_conditional_and_logical() {
        let unit = parse_ok(b"int x = a && b ? c : d || e;");
        let ExternalDecl::Declaration(decl) = &unit.items[0] else {
            panic!("expected declaration");
        };
        assert!(matches!(
            decl.decls[0].init.as_ref().unwrap().kind,
            ExprKind::Conditional { .. }
        ));
    }

    #[test]
    fn parser_valid_for_loop_with_declaration() {
        let unit = parse_ok(
            b"int main(void) { for (int i = 0; i < 10; i++) ; return 0; }",
        );
        let ExternalDecl::Function { body, .. } = &unit.items[0] else {
            panic!("expected function definition");
        };
        let StmtKind::Compound(items) = &body.kind else {
            panic!("expected compound body");
        };
        let BlockItem::Stmt(Stmt { kind: StmtKind::For { init, .. }, .. }) =
            &items[0]
        else {
            panic!("expected for statement");
        };
        assert!(matches!(init, Some(ForInit::Decl(_))));
    }

    #[test]
    fn parser_valid_arrow_chain() {
        let unit = parse_ok(b"int main(void) { p->next->value = 3; return 0; }");
        assert_eq!(unit.items.len(), 1);
    }

    #[test]
    fn parser_valid_cast() {
        let unit = parse_ok(b"long x = (long)1;");
        let ExternalDecl::Declaration(decl) = &unit.items[0] else {
            panic!("expected declaration");
        };
        assert!(matches!(
            decl.decls[0].init.as_ref().unwrap().kind,
            ExprKind::Cast { .. }
        ));
    }

    #[test]
    fn parser_valid_pointer_returning_definition() {
        let unit = parse_ok(
            b"typedef struct node { int v; } Node; Node *make(int v) { return 0; }",
        );
        let ExternalDecl::Function { decl, .. } = &unit.items[1] else {
            panic!("expected function definition, got {:?}", unit.items[1]);
        };
        assert_eq!(decl.name(), Some("make"));
    }

    #[test]
    fn parser_invalid_missing_semicolon() {
        let errors = parse_err(b"int x = 1\nint y = 2;");
        assert!(!errors.ok());
    }

    #[test]
    fn parser_invalid_bad_specifier_combo() {
        let errors = parse_err(b"unsigned void x;");
        assert!(!errors.ok());
    }

    #[test]
    fn parser_recovers_and_reports_both_errors() {
        let errors = parse_err(b"int x = ;\nint y = @;\n");
        assert!(errors.error_count() >= 2);
    }
}
