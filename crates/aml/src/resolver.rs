//! Static scope resolution (spec §4.3): walks the parsed [`Program`] once,
//! mirroring the block/function nesting the evaluator will later create as
//! real [`crate::environment::Environment`] scopes, and writes a
//! `(depth, index)` address into every [`crate::ast::Addr`] it can find a
//! declaration for. Anything left unresolved (forward references to
//! module-level names introduced by a sibling module, or truly dynamic
//! globals) falls back to [`crate::environment::Environment::try_get`] at
//! run time — this pass never fails, it only narrows the common case.

use std::sync::atomic::Ordering;

use crate::ast::*;

/// A non-fatal diagnostic surfaced through [`crate::tracer::Tracer::warning`]
/// rather than returned as an error (spec §4.3: the resolver never aborts).
#[derive(Debug, Clone)]
pub struct Warning {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

struct Scope {
    names: indexmap::IndexMap<String, usize>,
    constants: std::collections::HashSet<usize>,
}

impl Scope {
    fn new() -> Self {
        Self { names: indexmap::IndexMap::new(), constants: std::collections::HashSet::new() }
    }
}

pub struct Resolver {
    scopes: Vec<Scope>,
    warnings: Vec<Warning>,
}

impl Resolver {
    pub fn new() -> Self {
        Self { scopes: vec![Scope::new()], warnings: Vec::new() }
    }

    pub fn analyze(mut self, program: &Program) -> Vec<Warning> {
        for stmt in &program.statements {
            self.resolve_stmt(stmt);
        }
        self.warnings
    }

    fn push_scope(&mut self) {
        self.scopes.push(Scope::new());
    }

    fn pop_scope(&mut self) -> usize {
        self.scopes.pop().expect("scope stack underflow").names.len()
    }

    fn declare(&mut self, name: &str, is_const: bool, span: Span) -> usize {
        let scope = self.scopes.last_mut().expect("no active scope");
        if let Some(&existing) = scope.names.get(name) {
            self.warnings.push(Warning {
                message: format!("redeclaration of '{name}' in the same scope"),
                line: span.line,
                column: span.column,
            });
            if is_const {
                scope.constants.insert(existing);
            }
            return existing;
        }
        let index = scope.names.len();
        scope.names.insert(name.to_owned(), index);
        if is_const {
            scope.constants.insert(index);
        }
        index
    }

    /// Looks `addr.name` up starting from the innermost scope; writes the
    /// found `(depth, index)` pair, or leaves it `UNRESOLVED` if no
    /// enclosing scope declares the name.
    fn resolve_addr(&self, addr: &Addr) {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if let Some(&index) = scope.names.get(&addr.name) {
                addr.set(depth as i32, index as i32);
                return;
            }
        }
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl { name, value, index, span } => {
                self.resolve_expr(value);
                let i = self.declare(name, false, *span);
                index.store(i as i32, Ordering::Relaxed);
            }
            Stmt::ConstDecl { name, value, index, span } => {
                self.resolve_expr(value);
                let i = self.declare(name, true, *span);
                index.store(i as i32, Ordering::Relaxed);
            }
            Stmt::FunctionDecl(decl) => self.resolve_function(decl),
            Stmt::NamespaceDecl { name, body, span } => {
                self.declare(name, false, *span);
                self.push_scope();
                for s in body {
                    self.resolve_stmt(s);
                }
                self.pop_scope();
            }
            Stmt::MetadataDecl { entries, .. } => {
                for (_, value) in entries {
                    self.resolve_expr(value);
                }
            }
            Stmt::ImportPy { specs, span } => {
                for spec in specs {
                    let bound = match spec {
                        ImportSpec::Plain(n) => n.split('.').next().unwrap_or(n).to_owned(),
                        ImportSpec::Aliased(_, alias) => alias.clone(),
                    };
                    self.declare(&bound, false, *span);
                }
            }
            Stmt::ImportAml { names, span } => {
                for n in names {
                    let bound = n.rsplit('.').next().unwrap_or(n).to_owned();
                    self.declare(&bound, false, *span);
                }
            }
            Stmt::Assign(assignment) => {
                self.resolve_expr(&assignment.value);
                match &assignment.target {
                    AssignTarget::Name(addr) => self.resolve_addr(addr),
                    AssignTarget::Attribute { object, .. } => self.resolve_expr(object),
                    AssignTarget::Index { object, index } => {
                        self.resolve_expr(object);
                        self.resolve_expr(index);
                    }
                }
            }
            Stmt::If { cond, then_body, else_body, .. } => {
                // Spec §4.5.3: "No implicit scoping" — an if-body runs in the
                // same scope as its surrounding statements, so a `var`
                // declared inside is visible after the `if` too. No
                // push_scope here, matching the evaluator not creating a
                // child environment for If.
                self.resolve_expr(cond);
                for s in then_body {
                    self.resolve_stmt(s);
                }
                if let Some(else_body) = else_body {
                    for s in else_body {
                        self.resolve_stmt(s);
                    }
                }
            }
            Stmt::While { cond, body, .. } => {
                self.resolve_expr(cond);
                self.push_scope();
                for s in body {
                    self.resolve_stmt(s);
                }
                self.pop_scope();
            }
            Stmt::For { var_name, iterable, body, span } => {
                // Spec §4.5.3: the iterator name is defined in the current
                // scope and stays visible after the loop ends, same as an
                // `if`-body's declarations — no push_scope here, matching
                // the evaluator reusing the surrounding environment.
                self.resolve_expr(iterable);
                self.declare(var_name, false, *span);
                for s in body {
                    self.resolve_stmt(s);
                }
            }
            Stmt::Return { value, .. } => {
                if let Some(value) = value {
                    self.resolve_expr(value);
                }
            }
            Stmt::Raise { value, .. } => self.resolve_expr(value),
            Stmt::Break(_) | Stmt::Continue(_) => {}
            Stmt::TryCatch { try_body, catch_body, error_var, span } => {
                self.push_scope();
                for s in try_body {
                    self.resolve_stmt(s);
                }
                self.pop_scope();
                self.push_scope();
                if let Some(name) = error_var {
                    self.declare(name, false, *span);
                }
                for s in catch_body {
                    self.resolve_stmt(s);
                }
                self.pop_scope();
            }
            Stmt::Parallel { calls, .. } => {
                for call in calls {
                    self.resolve_expr(call);
                }
            }
            Stmt::ExprStmt(expr) => self.resolve_expr(expr),
        }
    }

    /// Dotted `func a.b.c(...)` (non-empty `ns_path`) attaches to an
    /// existing namespace by dynamic name lookup at call-binding time rather
    /// than declaring a new identifier, so only a bare `func c(...)` binds a
    /// name in the current scope.
    fn resolve_function(&mut self, decl: &FunctionDecl) {
        if decl.ns_path.is_empty() {
            self.declare(&decl.name, false, decl.span);
        }
        for p in &decl.params {
            if let Param::Default(_, expr) = p {
                self.resolve_expr(expr);
            }
        }
        self.push_scope();
        for p in &decl.params {
            self.declare(p.name(), false, decl.span);
        }
        for s in &decl.body {
            self.resolve_stmt(s);
        }
        let locals = self.pop_scope();
        decl.locals_count.store(locals, Ordering::Relaxed);
    }

    fn resolve_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Literal(..) => {}
            Expr::Identifier(addr, _) => self.resolve_addr(addr),
            Expr::ListLiteral(items, _) => {
                for i in items {
                    self.resolve_expr(i);
                }
            }
            Expr::DictLiteral(pairs, _) => {
                for (k, v) in pairs {
                    self.resolve_expr(k);
                    self.resolve_expr(v);
                }
            }
            Expr::ListComprehension { expr: body, var_name, iterable, cond, span } => {
                self.resolve_expr(iterable);
                self.push_scope();
                self.declare(var_name, false, *span);
                self.resolve_expr(body);
                if let Some(cond) = cond {
                    self.resolve_expr(cond);
                }
                self.pop_scope();
            }
            Expr::DictComprehension { key, value, var_name, iterable, cond, span } => {
                self.resolve_expr(iterable);
                self.push_scope();
                self.declare(var_name, false, *span);
                self.resolve_expr(key);
                self.resolve_expr(value);
                if let Some(cond) = cond {
                    self.resolve_expr(cond);
                }
                self.pop_scope();
            }
            Expr::Index { target, index, .. } => {
                self.resolve_expr(target);
                self.resolve_expr(index);
            }
            Expr::Attribute { target, .. } => self.resolve_expr(target),
            Expr::Binary { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }
            Expr::Unary { expr, .. } => self.resolve_expr(expr),
            Expr::Range { start, end, .. } => {
                self.resolve_expr(start);
                self.resolve_expr(end);
            }
            Expr::Pointer { target, .. } => self.resolve_expr(target),
            Expr::Call { callee, args, kwargs, .. } => {
                self.resolve_expr(callee);
                for a in args {
                    self.resolve_expr(a);
                }
                for (_, v) in kwargs {
                    self.resolve_expr(v);
                }
            }
            Expr::MethodCall { object, args, kwargs, .. } => {
                self.resolve_expr(object);
                for a in args {
                    self.resolve_expr(a);
                }
                for (_, v) in kwargs {
                    self.resolve_expr(v);
                }
            }
            Expr::Spawn { call, .. } => self.resolve_expr(call),
            Expr::PyClassInstance { args, kwargs, .. } => {
                for a in args {
                    self.resolve_expr(a);
                }
                for (_, v) in kwargs {
                    self.resolve_expr(v);
                }
            }
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

pub fn analyze(program: &Program) -> Vec<Warning> {
    Resolver::new().analyze(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn resolves_a_simple_local_read() {
        let program = parse("var x = 1\nvar y = x").unwrap();
        analyze(&program);
        let Stmt::VarDecl { value: Expr::Identifier(addr, _), .. } = &program.statements[1] else {
            panic!("expected identifier read");
        };
        assert_eq!(addr.get(), (0, 0));
    }

    #[test]
    fn if_body_shares_the_enclosing_scope() {
        // spec §4.5.3: "No implicit scoping" for `if` — `y` resolves in the
        // *same* scope as `x`, at depth 0, not a freshly pushed child scope.
        let program = parse("var x = 1\nif (true) { var y = x }").unwrap();
        analyze(&program);
        let Stmt::If { then_body, .. } = &program.statements[1] else { panic!("expected if") };
        let Stmt::VarDecl { value: Expr::Identifier(addr, _), .. } = &then_body[0] else {
            panic!("expected identifier read");
        };
        assert_eq!(addr.get(), (0, 0));
    }

    #[test]
    fn warns_on_redeclaration_in_the_same_scope() {
        let program = parse("var x = 1\nvar x = 2").unwrap();
        let warnings = analyze(&program);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn function_params_resolve_at_depth_zero_inside_body() {
        let program = parse("func f(a) { return a }").unwrap();
        analyze(&program);
        let Stmt::FunctionDecl(decl) = &program.statements[0] else { panic!("expected function") };
        let Stmt::Return { value: Some(Expr::Identifier(addr, _)), .. } = &decl.body[0] else {
            panic!("expected return of identifier");
        };
        assert_eq!(addr.get(), (0, 0));
        assert_eq!(decl.locals_count.load(Ordering::Relaxed), 1);
    }
}
