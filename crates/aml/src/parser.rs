//! Recursive-descent parser producing [`Program`] from a token stream.
//!
//! Precedence ladder (lowest to highest) follows spec §4.2 exactly: range,
//! logical or, logical and, equality, comparison, term, factor, unary, call.
//! Each level below is its own function, grounded on the reference
//! `aml/parser.py`'s one-function-per-precedence-level shape.

use std::sync::atomic::{AtomicI32, AtomicUsize};
use std::sync::Arc;

use crate::ast::*;
use crate::error::{AmlError, ParseResult};
use crate::token::{Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        // Blank lines / stray newlines are structurally insignificant once we
        // know where statements start; we still consume them explicitly below
        // so parse errors report the real line rather than collapsing them.
        Self { tokens, pos: 0 }
    }

    pub fn parse(mut self) -> ParseResult<Program> {
        let mut statements = Vec::new();
        self.skip_newlines();
        while !self.check(&TokenKind::Eof) {
            statements.push(self.statement()?);
            self.skip_newlines();
        }
        Ok(Program { statements })
    }

    // ---- token stream helpers ----

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn span(&self) -> Span {
        Span::new(self.peek().line, self.peek().column)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let got = self.peek().clone();
            Err(AmlError::syntax(got.line, got.column, format!("expected {what}, got {:?}", got.kind)))
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn end_of_statement(&mut self) -> ParseResult<()> {
        // Statements end at a newline, `}`, or EOF; we don't require a
        // terminator before closing braces so `{ foo() }` is valid on one line.
        if self.check(&TokenKind::Newline) {
            self.skip_newlines();
        }
        Ok(())
    }

    fn ident_name(&mut self, what: &str) -> ParseResult<String> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => {
                let got = self.peek().clone();
                Err(AmlError::syntax(got.line, got.column, format!("expected {what}, got {:?}", got.kind)))
            }
        }
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(&TokenKind::LBrace, "'{'")?;
        self.skip_newlines();
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            stmts.push(self.statement()?);
            self.skip_newlines();
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(stmts)
    }

    // ---- statements ----

    fn statement(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        match self.peek_kind().clone() {
            TokenKind::Var => self.var_decl(span, false),
            TokenKind::Const => self.var_decl(span, true),
            TokenKind::Func => self.function_decl(span),
            TokenKind::Namespace => self.namespace_decl(span),
            TokenKind::Meta => self.meta_decl(span),
            TokenKind::ImportPy => self.import_py(span),
            TokenKind::ImportAml => self.import_aml(span),
            TokenKind::If => self.if_stmt(span),
            TokenKind::While => self.while_stmt(span),
            TokenKind::For => self.for_stmt(span),
            TokenKind::Return => self.return_stmt(span),
            TokenKind::Raise => self.raise_stmt(span),
            TokenKind::Break => {
                self.advance();
                self.end_of_statement()?;
                Ok(Stmt::Break(span))
            }
            TokenKind::Continue => {
                self.advance();
                self.end_of_statement()?;
                Ok(Stmt::Continue(span))
            }
            TokenKind::Try => self.try_catch(span),
            TokenKind::Parallel => self.parallel_block(span),
            _ => self.expr_or_assignment(span),
        }
    }

    fn var_decl(&mut self, span: Span, is_const: bool) -> ParseResult<Stmt> {
        self.advance();
        let name = self.ident_name("variable name")?;
        self.expect(&TokenKind::Assign, "'='")?;
        let value = self.expression()?;
        self.end_of_statement()?;
        Ok(if is_const {
            Stmt::ConstDecl { name, value, index: Arc::new(AtomicI32::new(UNRESOLVED)), span }
        } else {
            Stmt::VarDecl { name, value, index: Arc::new(AtomicI32::new(UNRESOLVED)), span }
        })
    }

    fn params(&mut self) -> ParseResult<Vec<Param>> {
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let name = self.ident_name("parameter name")?;
                if self.matches(&TokenKind::Assign) {
                    let default = self.expression()?;
                    params.push(Param::Default(name, Box::new(default)));
                } else {
                    params.push(Param::Required(name));
                }
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok(params)
    }

    fn function_decl(&mut self, span: Span) -> ParseResult<Stmt> {
        self.advance();
        let mut path = vec![self.ident_name("function name")?];
        while self.matches(&TokenKind::Dot) {
            path.push(self.ident_name("function name segment")?);
        }
        let name = path.pop().unwrap();
        let params = self.params()?;
        let body = self.block()?;
        Ok(Stmt::FunctionDecl(Arc::new(FunctionDecl {
            name,
            params,
            body,
            ns_path: path,
            locals_count: AtomicUsize::new(0),
            span,
        })))
    }

    fn namespace_decl(&mut self, span: Span) -> ParseResult<Stmt> {
        self.advance();
        let name = self.ident_name("namespace name")?;
        let body = self.block()?;
        Ok(Stmt::NamespaceDecl { name, body, span })
    }

    fn meta_key(&mut self) -> ParseResult<String> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(s)
            }
            _ => {
                let got = self.peek().clone();
                Err(AmlError::syntax(got.line, got.column, "expected meta key"))
            }
        }
    }

    fn meta_decl(&mut self, span: Span) -> ParseResult<Stmt> {
        self.advance();
        self.expect(&TokenKind::LBrace, "'{'")?;
        self.skip_newlines();
        let mut entries = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let key = self.meta_key()?;
            self.expect(&TokenKind::Colon, "':'")?;
            let value = self.expression()?;
            entries.push((key, value));
            self.skip_newlines();
            if self.matches(&TokenKind::Comma) {
                self.skip_newlines();
            }
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Stmt::MetadataDecl { entries, span })
    }

    fn import_spec_list(&mut self) -> ParseResult<Vec<ImportSpec>> {
        let mut specs = Vec::new();
        loop {
            let name = self.dotted_name()?;
            if self.matches(&TokenKind::As) {
                let alias = self.ident_name("import alias")?;
                specs.push(ImportSpec::Aliased(name, alias));
            } else {
                specs.push(ImportSpec::Plain(name));
            }
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        Ok(specs)
    }

    fn dotted_name(&mut self) -> ParseResult<String> {
        let mut parts = vec![self.ident_name("module name")?];
        while self.matches(&TokenKind::Dot) {
            parts.push(self.ident_name("module name segment")?);
        }
        Ok(parts.join("."))
    }

    fn import_py(&mut self, span: Span) -> ParseResult<Stmt> {
        self.advance();
        let specs = self.import_spec_list()?;
        self.end_of_statement()?;
        Ok(Stmt::ImportPy { specs, span })
    }

    fn import_aml(&mut self, span: Span) -> ParseResult<Stmt> {
        self.advance();
        let mut names = Vec::new();
        loop {
            names.push(self.dotted_name()?);
            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        self.end_of_statement()?;
        Ok(Stmt::ImportAml { names, span })
    }

    fn if_stmt(&mut self, span: Span) -> ParseResult<Stmt> {
        self.advance();
        self.expect(&TokenKind::LParen, "'('")?;
        let cond = self.expression()?;
        self.expect(&TokenKind::RParen, "')'")?;
        let then_body = self.block()?;
        self.skip_newlines();
        let else_body = if self.matches(&TokenKind::Else) {
            self.skip_newlines();
            if self.check(&TokenKind::If) {
                let inner_span = self.span();
                Some(vec![self.if_stmt(inner_span)?])
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(Stmt::If { cond, then_body, else_body, span })
    }

    fn while_stmt(&mut self, span: Span) -> ParseResult<Stmt> {
        self.advance();
        self.expect(&TokenKind::LParen, "'('")?;
        let cond = self.expression()?;
        self.expect(&TokenKind::RParen, "')'")?;
        let body = self.block()?;
        Ok(Stmt::While { cond, body, span })
    }

    fn for_stmt(&mut self, span: Span) -> ParseResult<Stmt> {
        self.advance();
        self.expect(&TokenKind::LParen, "'('")?;
        let var_name = self.ident_name("loop variable")?;
        self.expect(&TokenKind::In, "'in'")?;
        let iterable = self.expression()?;
        self.expect(&TokenKind::RParen, "')'")?;
        let body = self.block()?;
        Ok(Stmt::For { var_name, iterable, body, span })
    }

    fn return_stmt(&mut self, span: Span) -> ParseResult<Stmt> {
        self.advance();
        let value = if self.check(&TokenKind::Newline) || self.check(&TokenKind::RBrace) || self.check(&TokenKind::Eof) {
            None
        } else {
            Some(self.expression()?)
        };
        self.end_of_statement()?;
        Ok(Stmt::Return { value, span })
    }

    fn raise_stmt(&mut self, span: Span) -> ParseResult<Stmt> {
        self.advance();
        let value = self.expression()?;
        self.end_of_statement()?;
        Ok(Stmt::Raise { value, span })
    }

    fn try_catch(&mut self, span: Span) -> ParseResult<Stmt> {
        self.advance();
        let try_body = self.block()?;
        self.skip_newlines();
        self.expect(&TokenKind::Catch, "'catch'")?;
        let error_var = if self.matches(&TokenKind::LParen) {
            let name = self.ident_name("catch variable")?;
            self.expect(&TokenKind::RParen, "')'")?;
            Some(name)
        } else {
            None
        };
        let catch_body = self.block()?;
        Ok(Stmt::TryCatch { try_body, catch_body, error_var, span })
    }

    fn parallel_block(&mut self, span: Span) -> ParseResult<Stmt> {
        self.advance();
        self.expect(&TokenKind::LBrace, "'{'")?;
        self.skip_newlines();
        let mut calls = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            // Any statement is accepted syntactically; only call-shaped
            // expression-statements are kept for launching (spec §4.2).
            let stmt_span = self.span();
            let stmt = self.statement()?;
            if let Stmt::ExprStmt(e) = stmt {
                if e.is_call_shaped() {
                    calls.push(e);
                }
            }
            let _ = stmt_span;
            self.skip_newlines();
        }
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Stmt::Parallel { calls, span })
    }

    /// Disambiguates plain expression statements from assignments, including
    /// augmented-assignment desugaring (`+=`, `-=`, ..., and the two-token
    /// `//` `=` pair for `//=`) into `target = target <op> rhs`.
    fn expr_or_assignment(&mut self, span: Span) -> ParseResult<Stmt> {
        let expr = self.expression()?;
        if self.matches(&TokenKind::Assign) {
            let value = self.expression()?;
            self.end_of_statement()?;
            return Ok(Stmt::Assign(Assignment { target: expr_to_target(expr)?, value: Box::new(value), span }));
        }
        if let Some(op) = self.augmented_op() {
            let rhs = self.expression()?;
            self.end_of_statement()?;
            let desugared = Expr::Binary { left: Box::new(expr.clone()), op, right: Box::new(rhs), span };
            return Ok(Stmt::Assign(Assignment { target: expr_to_target(expr)?, value: Box::new(desugared), span }));
        }
        self.end_of_statement()?;
        Ok(Stmt::ExprStmt(expr))
    }

    /// Consumes a compound-assignment operator token if present and returns
    /// the underlying binary operator for desugaring. Handles the `//=` case
    /// which the lexer produced as two separate tokens (`SlashSlash`, `Assign`).
    fn augmented_op(&mut self) -> Option<BinOp> {
        let op = match self.peek_kind() {
            TokenKind::PlusEq => BinOp::Add,
            TokenKind::MinusEq => BinOp::Sub,
            TokenKind::StarEq => BinOp::Mul,
            TokenKind::SlashEq => BinOp::Div,
            TokenKind::PercentEq => BinOp::Mod,
            TokenKind::StarStarEq => BinOp::Pow,
            TokenKind::AndAndEq => BinOp::And,
            TokenKind::OrOrEq => BinOp::Or,
            TokenKind::SlashSlash => {
                if matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Assign)) {
                    self.advance();
                    self.advance();
                    return Some(BinOp::FloorDiv);
                }
                return None;
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    // ---- expressions, precedence low to high ----

    fn expression(&mut self) -> ParseResult<Expr> {
        self.range_expr()
    }

    fn range_expr(&mut self) -> ParseResult<Expr> {
        let start = self.logic_or()?;
        if self.matches(&TokenKind::DotDot) {
            let span = start.span();
            let end = self.logic_or()?;
            return Ok(Expr::Range { start: Box::new(start), end: Box::new(end), span });
        }
        Ok(start)
    }

    fn logic_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.logic_and()?;
        while self.matches(&TokenKind::OrOr) {
            let span = left.span();
            let right = self.logic_and()?;
            left = fold_binary(Expr::Binary { left: Box::new(left), op: BinOp::Or, right: Box::new(right), span });
        }
        Ok(left)
    }

    fn logic_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.equality()?;
        while self.matches(&TokenKind::AndAnd) {
            let span = left.span();
            let right = self.equality()?;
            left = fold_binary(Expr::Binary { left: Box::new(left), op: BinOp::And, right: Box::new(right), span });
        }
        Ok(left)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        let mut left = self.comparison()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Ne,
                _ => break,
            };
            self.advance();
            let span = left.span();
            let right = self.comparison()?;
            left = fold_binary(Expr::Binary { left: Box::new(left), op, right: Box::new(right), span });
        }
        Ok(left)
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Ge => BinOp::Ge,
                _ => break,
            };
            self.advance();
            let span = left.span();
            let right = self.term()?;
            left = fold_binary(Expr::Binary { left: Box::new(left), op, right: Box::new(right), span });
        }
        Ok(left)
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let span = left.span();
            let right = self.factor()?;
            left = fold_binary(Expr::Binary { left: Box::new(left), op, right: Box::new(right), span });
        }
        Ok(left)
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                TokenKind::SlashSlash => BinOp::FloorDiv,
                TokenKind::StarStar => BinOp::Pow,
                _ => break,
            };
            self.advance();
            let span = left.span();
            let right = self.unary()?;
            left = fold_binary(Expr::Binary { left: Box::new(left), op, right: Box::new(right), span });
        }
        Ok(left)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        match self.peek_kind() {
            TokenKind::Minus => {
                self.advance();
                let inner = self.unary()?;
                Ok(fold_unary(Expr::Unary { op: UnOp::Neg, expr: Box::new(inner), span }))
            }
            TokenKind::Plus => {
                self.advance();
                let inner = self.unary()?;
                Ok(fold_unary(Expr::Unary { op: UnOp::Pos, expr: Box::new(inner), span }))
            }
            TokenKind::Bang => {
                self.advance();
                let inner = self.unary()?;
                Ok(fold_unary(Expr::Unary { op: UnOp::Not, expr: Box::new(inner), span }))
            }
            TokenKind::At => {
                self.advance();
                let inner = self.unary()?;
                Ok(Expr::Pointer { target: Box::new(inner), span })
            }
            TokenKind::Spawn => {
                self.advance();
                let call = self.unary()?;
                Ok(Expr::Spawn { call: Box::new(call), span })
            }
            _ => self.call_expr(),
        }
    }

    fn call_expr(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            let span = expr.span();
            if self.matches(&TokenKind::LParen) {
                let (args, kwargs) = self.call_args()?;
                expr = Expr::Call { callee: Box::new(expr), args, kwargs, span };
            } else if self.check(&TokenKind::Dot) {
                self.advance();
                let name = self.ident_name("attribute name")?;
                if self.matches(&TokenKind::LParen) {
                    let (args, kwargs) = self.call_args()?;
                    expr = Expr::MethodCall { object: Box::new(expr), method: name, args, kwargs, span };
                } else {
                    expr = Expr::Attribute { target: Box::new(expr), attr: name, span };
                }
            } else if self.matches(&TokenKind::LBracket) {
                let index = self.expression()?;
                self.expect(&TokenKind::RBracket, "']'")?;
                expr = Expr::Index { target: Box::new(expr), index: Box::new(index), span };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn call_args(&mut self) -> ParseResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                if let TokenKind::Identifier(name) = self.peek_kind().clone() {
                    if matches!(self.tokens.get(self.pos + 1).map(|t| &t.kind), Some(TokenKind::Assign)) {
                        self.advance();
                        self.advance();
                        let value = self.expression()?;
                        kwargs.push((name, value));
                        if !self.matches(&TokenKind::Comma) {
                            break;
                        }
                        continue;
                    }
                }
                args.push(self.expression()?);
                if !self.matches(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        Ok((args, kwargs))
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        match self.peek_kind().clone() {
            TokenKind::Integer(v) => {
                self.advance();
                Ok(Expr::Literal(Literal::Int(v), span))
            }
            TokenKind::Float(v) => {
                self.advance();
                Ok(Expr::Literal(Literal::Float(v), span))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::Str(s), span))
            }
            TokenKind::Boolean(b) => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(b), span))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal(Literal::Null, span))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if name == "Python" && self.check(&TokenKind::Dot) {
                    self.advance();
                    let class_name = self.ident_name("host class name")?;
                    self.expect(&TokenKind::LParen, "'('")?;
                    let (args, kwargs) = self.call_args()?;
                    return Ok(Expr::PyClassInstance { class_name, args, kwargs, span });
                }
                Ok(Expr::Identifier(Arc::new(Addr::new(name)), span))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LBracket => self.list_literal_or_comprehension(span),
            TokenKind::LBrace => self.dict_literal_or_comprehension(span),
            _ => {
                let got = self.peek().clone();
                Err(AmlError::syntax(got.line, got.column, format!("unexpected token {:?}", got.kind)))
            }
        }
    }

    fn list_literal_or_comprehension(&mut self, span: Span) -> ParseResult<Expr> {
        self.advance();
        self.skip_newlines();
        if self.matches(&TokenKind::RBracket) {
            return Ok(Expr::ListLiteral(Vec::new(), span));
        }
        let first = self.expression()?;
        self.skip_newlines();
        if self.matches(&TokenKind::For) {
            let var_name = self.ident_name("comprehension variable")?;
            self.expect(&TokenKind::In, "'in'")?;
            let iterable = self.expression()?;
            let cond = if self.matches(&TokenKind::If) { Some(Box::new(self.expression()?)) } else { None };
            self.skip_newlines();
            self.expect(&TokenKind::RBracket, "']'")?;
            return Ok(Expr::ListComprehension { expr: Box::new(first), var_name, iterable: Box::new(iterable), cond, span });
        }
        let mut items = vec![first];
        while self.matches(&TokenKind::Comma) {
            self.skip_newlines();
            if self.check(&TokenKind::RBracket) {
                break;
            }
            items.push(self.expression()?);
            self.skip_newlines();
        }
        self.skip_newlines();
        self.expect(&TokenKind::RBracket, "']'")?;
        Ok(Expr::ListLiteral(items, span))
    }

    fn dict_literal_or_comprehension(&mut self, span: Span) -> ParseResult<Expr> {
        self.advance();
        self.skip_newlines();
        if self.matches(&TokenKind::RBrace) {
            return Ok(Expr::DictLiteral(Vec::new(), span));
        }
        let first_key = self.expression()?;
        self.expect(&TokenKind::Colon, "':'")?;
        let first_val = self.expression()?;
        self.skip_newlines();
        if self.matches(&TokenKind::For) {
            let var_name = self.ident_name("comprehension variable")?;
            self.expect(&TokenKind::In, "'in'")?;
            let iterable = self.expression()?;
            let cond = if self.matches(&TokenKind::If) { Some(Box::new(self.expression()?)) } else { None };
            self.skip_newlines();
            self.expect(&TokenKind::RBrace, "'}'")?;
            return Ok(Expr::DictComprehension {
                key: Box::new(first_key),
                value: Box::new(first_val),
                var_name,
                iterable: Box::new(iterable),
                cond,
                span,
            });
        }
        let mut pairs = vec![(first_key, first_val)];
        while self.matches(&TokenKind::Comma) {
            self.skip_newlines();
            if self.check(&TokenKind::RBrace) {
                break;
            }
            let key = self.expression()?;
            self.expect(&TokenKind::Colon, "':'")?;
            let value = self.expression()?;
            pairs.push((key, value));
            self.skip_newlines();
        }
        self.skip_newlines();
        self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(Expr::DictLiteral(pairs, span))
    }
}

/// Converts an already-parsed expression into an assignment target. Used for
/// both `=` and desugared augmented assignments, since both accept the same
/// left-hand-side shapes (name, attribute, index).
fn expr_to_target(expr: Expr) -> ParseResult<AssignTarget> {
    match expr {
        Expr::Identifier(addr, _) => Ok(AssignTarget::Name(Arc::try_unwrap(addr).unwrap_or_else(|rc| (*rc).clone()))),
        Expr::Attribute { target, attr, .. } => Ok(AssignTarget::Attribute { object: target, attr }),
        Expr::Index { target, index, .. } => Ok(AssignTarget::Index { object: target, index }),
        other => {
            let span = other.span();
            Err(AmlError::syntax(span.line, span.column, "invalid assignment target"))
        }
    }
}

/// Inline constant folding (spec §4.2): a `BinaryOperation`/`UnaryOperation`
/// whose operands are fully literal is evaluated eagerly at parse time and
/// replaced by the literal result. Division/modulo by a literal zero is left
/// unfolded so the error surfaces at runtime, per spec.
fn fold_binary(expr: Expr) -> Expr {
    let Expr::Binary { left, op, right, span } = &expr else { return expr };
    let (Expr::Literal(l, _), Expr::Literal(r, _)) = (left.as_ref(), right.as_ref()) else {
        return expr;
    };
    match fold_binary_literals(l, *op, r) {
        Some(lit) => Expr::Literal(lit, *span),
        None => expr,
    }
}

fn fold_binary_literals(l: &Literal, op: BinOp, r: &Literal) -> Option<Literal> {
    use Literal::*;
    // String/bool concatenation and comparisons fold too, but arithmetic is
    // restricted to numeric literals; anything not foldable returns None and
    // is deferred to the evaluator (where zero-divisor errors also live).
    let as_f64 = |lit: &Literal| -> Option<f64> {
        match lit {
            Int(i) => Some(*i as f64),
            Float(f) => Some(*f),
            _ => None,
        }
    };
    let both_int = matches!((l, r), (Int(_), Int(_)));
    match op {
        BinOp::Add => match (l, r) {
            (Int(a), Int(b)) => Some(Int(a.checked_add(*b)?)),
            (Str(a), Str(b)) => Some(Str(format!("{a}{b}"))),
            _ => {
                let (a, b) = (as_f64(l)?, as_f64(r)?);
                Some(Float(a + b))
            }
        },
        BinOp::Sub => {
            if both_int {
                let (Int(a), Int(b)) = (l, r) else { unreachable!() };
                Some(Int(a.checked_sub(*b)?))
            } else {
                let (a, b) = (as_f64(l)?, as_f64(r)?);
                Some(Float(a - b))
            }
        }
        BinOp::Mul => {
            if both_int {
                let (Int(a), Int(b)) = (l, r) else { unreachable!() };
                Some(Int(a.checked_mul(*b)?))
            } else {
                let (a, b) = (as_f64(l)?, as_f64(r)?);
                Some(Float(a * b))
            }
        }
        BinOp::Div => {
            let (a, b) = (as_f64(l)?, as_f64(r)?);
            if b == 0.0 {
                None
            } else {
                Some(Float(a / b))
            }
        }
        BinOp::Mod => {
            if both_int {
                let (Int(a), Int(b)) = (l, r) else { unreachable!() };
                if *b == 0 { None } else { Some(Int(crate::numeric::mod_i64(*a, *b))) }
            } else {
                let (a, b) = (as_f64(l)?, as_f64(r)?);
                if b == 0.0 { None } else { Some(Float(crate::numeric::mod_f64(a, b))) }
            }
        }
        BinOp::FloorDiv => {
            if both_int {
                let (Int(a), Int(b)) = (l, r) else { unreachable!() };
                if *b == 0 { None } else { Some(Int(crate::numeric::floor_div_i64(*a, *b))) }
            } else {
                let (a, b) = (as_f64(l)?, as_f64(r)?);
                if b == 0.0 { None } else { Some(Float(crate::numeric::floor_div_f64(a, b))) }
            }
        }
        BinOp::Pow => {
            if both_int {
                let (Int(a), Int(b)) = (l, r) else { unreachable!() };
                if *b >= 0 { Some(Int(a.checked_pow(u32::try_from(*b).ok()?)?)) } else { Some(Float((*a as f64).powi(*b as i32))) }
            } else {
                let (a, b) = (as_f64(l)?, as_f64(r)?);
                Some(Float(a.powf(b)))
            }
        }
        BinOp::Eq => Some(Bool(literal_eq(l, r))),
        BinOp::Ne => Some(Bool(!literal_eq(l, r))),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            let ordering = match (l, r) {
                (Str(a), Str(b)) => a.partial_cmp(b)?,
                _ => as_f64(l)?.partial_cmp(&as_f64(r)?)?,
            };
            Some(Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            }))
        }
        BinOp::And => Some(Bool(literal_truthy(l) && literal_truthy(r))),
        BinOp::Or => Some(Bool(literal_truthy(l) || literal_truthy(r))),
    }
}

fn literal_eq(l: &Literal, r: &Literal) -> bool {
    use Literal::*;
    match (l, r) {
        (Int(a), Int(b)) => a == b,
        (Float(a), Float(b)) => a == b,
        (Int(a), Float(b)) | (Float(b), Int(a)) => (*a as f64) == *b,
        (Str(a), Str(b)) => a == b,
        (Bool(a), Bool(b)) => a == b,
        (Null, Null) => true,
        _ => false,
    }
}

fn literal_truthy(l: &Literal) -> bool {
    match l {
        Literal::Int(i) => *i != 0,
        Literal::Float(f) => *f != 0.0,
        Literal::Str(s) => !s.is_empty(),
        Literal::Bool(b) => *b,
        Literal::Null => false,
    }
}

fn fold_unary(expr: Expr) -> Expr {
    let Expr::Unary { op, expr: inner, span } = &expr else { return expr };
    let Expr::Literal(lit, _) = inner.as_ref() else { return expr };
    let folded = match (op, lit) {
        (UnOp::Neg, Literal::Int(i)) => Some(Literal::Int(-i)),
        (UnOp::Neg, Literal::Float(f)) => Some(Literal::Float(-f)),
        (UnOp::Pos, Literal::Int(i)) => Some(Literal::Int(*i)),
        (UnOp::Pos, Literal::Float(f)) => Some(Literal::Float(*f)),
        (UnOp::Not, other) => Some(Literal::Bool(!literal_truthy(other))),
        _ => None,
    };
    match folded {
        Some(lit) => Expr::Literal(lit, *span),
        None => expr,
    }
}

pub fn parse(src: &str) -> ParseResult<Program> {
    let tokens = crate::lexer::tokenize(src)?;
    Parser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_literal_arithmetic() {
        let program = parse("var x = 1 + 2").unwrap();
        match &program.statements[0] {
            Stmt::VarDecl { value, .. } => assert!(matches!(value, Expr::Literal(Literal::Int(3), _))),
            _ => panic!("expected var decl"),
        }
    }

    #[test]
    fn folds_floor_division_and_modulo_with_python_semantics_for_negative_operands() {
        let program = parse("var x = -7 // -2\nvar y = 7 % -2").unwrap();
        match &program.statements[0] {
            Stmt::VarDecl { value, .. } => assert!(matches!(value, Expr::Literal(Literal::Int(3), _))),
            _ => panic!("expected var decl"),
        }
        match &program.statements[1] {
            Stmt::VarDecl { value, .. } => assert!(matches!(value, Expr::Literal(Literal::Int(-1), _))),
            _ => panic!("expected var decl"),
        }
    }

    #[test]
    fn does_not_fold_literal_division_by_zero() {
        let program = parse("var x = 1 / 0").unwrap();
        match &program.statements[0] {
            Stmt::VarDecl { value, .. } => assert!(matches!(value, Expr::Binary { .. })),
            _ => panic!("expected var decl"),
        }
    }

    #[test]
    fn dotted_function_decl_splits_name_and_path() {
        let program = parse("func ns.inc() { return 1 }").unwrap();
        match &program.statements[0] {
            Stmt::FunctionDecl(f) => {
                assert_eq!(f.name, "inc");
                assert_eq!(f.ns_path, vec!["ns".to_owned()]);
            }
            _ => panic!("expected function decl"),
        }
    }

    #[test]
    fn augmented_floor_divide_assign_desugars() {
        let program = parse("x //= 2").unwrap();
        match &program.statements[0] {
            Stmt::Assign(a) => match &*a.value {
                Expr::Binary { op, .. } => assert_eq!(*op, BinOp::FloorDiv),
                _ => panic!("expected desugared binary"),
            },
            _ => panic!("expected assignment"),
        }
    }

    #[test]
    fn parallel_block_keeps_only_call_shaped_statements() {
        let program = parse("parallel { foo() \n var x = 1 \n bar.baz() }").unwrap();
        match &program.statements[0] {
            Stmt::Parallel { calls, .. } => assert_eq!(calls.len(), 2),
            _ => panic!("expected parallel block"),
        }
    }

    #[test]
    fn range_in_list_literal_parses_as_element() {
        let program = parse("var x = [1, 2..4, 9]").unwrap();
        match &program.statements[0] {
            Stmt::VarDecl { value: Expr::ListLiteral(items, _), .. } => {
                assert_eq!(items.len(), 3);
                assert!(matches!(items[1], Expr::Range { .. }));
            }
            _ => panic!("expected list literal"),
        }
    }
}
