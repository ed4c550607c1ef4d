//! Abstract syntax tree produced by [`crate::parser::Parser`] and mutated in
//! place by [`crate::resolver::Resolver`].
//!
//! Resolved addresses (`depth`/`index`) live in atomics rather than `Cell` so
//! that `spawn`/`parallel` (spec §4.7, §5) can move function bodies onto a
//! worker thread: the resolver writes them once, single-threaded, before any
//! task starts, and every thread thereafter only reads them, but the AST
//! still has to be `Send + Sync` to cross the `thread::spawn` boundary at
//! all. `-1` is the "no static address, fall back to dynamic lookup" marker
//! from spec §4.4.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub const UNRESOLVED: i32 = -1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A resolvable name reference: shared by `Identifier` expressions and the
/// `name` form of `Assignment`.
#[derive(Debug)]
pub struct Addr {
    pub name: String,
    pub depth: AtomicI32,
    pub index: AtomicI32,
}

impl Addr {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), depth: AtomicI32::new(UNRESOLVED), index: AtomicI32::new(UNRESOLVED) }
    }

    pub fn set(&self, depth: i32, index: i32) {
        self.depth.store(depth, Ordering::Relaxed);
        self.index.store(index, Ordering::Relaxed);
    }

    pub fn get(&self) -> (i32, i32) {
        (self.depth.load(Ordering::Relaxed), self.index.load(Ordering::Relaxed))
    }

    pub fn is_resolved(&self) -> bool {
        let (d, i) = self.get();
        d >= 0 && i >= 0
    }
}

impl Clone for Addr {
    fn clone(&self) -> Self {
        let (d, i) = self.get();
        Self { name: self.name.clone(), depth: AtomicI32::new(d), index: AtomicI32::new(i) }
    }
}

/// Serialized as the resolved `(name, depth, index)` triple — the bundle
/// compiler (spec §4.8) carries resolved addresses across the wire rather
/// than re-resolving after deserialization, so the resolver pass is skipped
/// entirely for bundled modules (see `loader::load_bundled_program`).
impl Serialize for Addr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (depth, index) = self.get();
        (&self.name, depth, index).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Addr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (name, depth, index): (String, i32, i32) = Deserialize::deserialize(deserializer)?;
        let addr = Addr::new(name);
        addr.set(depth, index);
        Ok(addr)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    FloorDiv,
    Pow,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::FloorDiv => "//",
            Self::Pow => "**",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Param {
    Required(String),
    Default(String, Box<Expr>),
}

impl Param {
    pub fn name(&self) -> &str {
        match self {
            Self::Required(n) | Self::Default(n, _) => n,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub ns_path: Vec<String>,
    #[serde(with = "atomic_serde::usize_atomic")]
    pub locals_count: AtomicUsize,
    pub span: Span,
}

impl Clone for FunctionDecl {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            params: self.params.clone(),
            body: self.body.clone(),
            ns_path: self.ns_path.clone(),
            locals_count: AtomicUsize::new(self.locals_count.load(Ordering::Relaxed)),
            span: self.span,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ImportSpec {
    Plain(String),
    Aliased(String, String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssignTarget {
    Name(Addr),
    Attribute { object: Box<Expr>, attr: String },
    Index { object: Box<Expr>, index: Box<Expr> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub target: AssignTarget,
    pub value: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    VarDecl {
        name: String,
        value: Expr,
        #[serde(with = "atomic_serde::arc_i32")]
        index: Arc<AtomicI32>,
        span: Span,
    },
    ConstDecl {
        name: String,
        value: Expr,
        #[serde(with = "atomic_serde::arc_i32")]
        index: Arc<AtomicI32>,
        span: Span,
    },
    FunctionDecl(Arc<FunctionDecl>),
    NamespaceDecl { name: String, body: Vec<Stmt>, span: Span },
    MetadataDecl { entries: Vec<(String, Expr)>, span: Span },
    ImportPy { specs: Vec<ImportSpec>, span: Span },
    ImportAml { names: Vec<String>, span: Span },
    Assign(Assignment),
    If { cond: Expr, then_body: Vec<Stmt>, else_body: Option<Vec<Stmt>>, span: Span },
    While { cond: Expr, body: Vec<Stmt>, span: Span },
    For { var_name: String, iterable: Expr, body: Vec<Stmt>, span: Span },
    Return { value: Option<Expr>, span: Span },
    Raise { value: Expr, span: Span },
    Break(Span),
    Continue(Span),
    TryCatch { try_body: Vec<Stmt>, catch_body: Vec<Stmt>, error_var: Option<String>, span: Span },
    Parallel { calls: Vec<Expr>, span: Span },
    ExprStmt(Expr),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Self::VarDecl { span, .. }
            | Self::ConstDecl { span, .. }
            | Self::NamespaceDecl { span, .. }
            | Self::MetadataDecl { span, .. }
            | Self::ImportPy { span, .. }
            | Self::ImportAml { span, .. }
            | Self::If { span, .. }
            | Self::While { span, .. }
            | Self::For { span, .. }
            | Self::Return { span, .. }
            | Self::Raise { span, .. }
            | Self::Break(span)
            | Self::Continue(span)
            | Self::TryCatch { span, .. }
            | Self::Parallel { span, .. } => *span,
            Self::FunctionDecl(f) => f.span,
            Self::Assign(a) => a.span,
            Self::ExprStmt(e) => e.span(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal, Span),
    Identifier(Arc<Addr>, Span),
    ListLiteral(Vec<Expr>, Span),
    DictLiteral(Vec<(Expr, Expr)>, Span),
    ListComprehension { expr: Box<Expr>, var_name: String, iterable: Box<Expr>, cond: Option<Box<Expr>>, span: Span },
    DictComprehension { key: Box<Expr>, value: Box<Expr>, var_name: String, iterable: Box<Expr>, cond: Option<Box<Expr>>, span: Span },
    Index { target: Box<Expr>, index: Box<Expr>, span: Span },
    Attribute { target: Box<Expr>, attr: String, span: Span },
    Binary { left: Box<Expr>, op: BinOp, right: Box<Expr>, span: Span },
    Unary { op: UnOp, expr: Box<Expr>, span: Span },
    Range { start: Box<Expr>, end: Box<Expr>, span: Span },
    Pointer { target: Box<Expr>, span: Span },
    Call { callee: Box<Expr>, args: Vec<Expr>, kwargs: Vec<(String, Expr)>, span: Span },
    MethodCall { object: Box<Expr>, method: String, args: Vec<Expr>, kwargs: Vec<(String, Expr)>, span: Span },
    Spawn { call: Box<Expr>, span: Span },
    PyClassInstance { class_name: String, args: Vec<Expr>, kwargs: Vec<(String, Expr)>, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Self::Literal(_, s)
            | Self::Identifier(_, s)
            | Self::ListLiteral(_, s)
            | Self::DictLiteral(_, s)
            | Self::ListComprehension { span: s, .. }
            | Self::DictComprehension { span: s, .. }
            | Self::Index { span: s, .. }
            | Self::Attribute { span: s, .. }
            | Self::Binary { span: s, .. }
            | Self::Unary { span: s, .. }
            | Self::Range { span: s, .. }
            | Self::Pointer { span: s, .. }
            | Self::Call { span: s, .. }
            | Self::MethodCall { span: s, .. }
            | Self::Spawn { span: s, .. }
            | Self::PyClassInstance { span: s, .. } => *s,
        }
    }

    /// `true` for nodes the parser's constant folder and the `parallel`
    /// block's call-shape filter both need to recognize as "just a literal".
    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(..))
    }

    /// `parallel { ... }` only launches statements shaped like a call
    /// (spec §4.2): a plain call, a method call, or `spawn <call>`.
    pub fn is_call_shaped(&self) -> bool {
        matches!(self, Self::Call { .. } | Self::MethodCall { .. } | Self::Spawn { .. })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

/// `serde(with = ...)` shims for the atomics scattered through the AST.
/// Resolved addresses ride along in the serialized form (bundle modules skip
/// re-resolving, per spec §4.8 / SPEC_FULL §5) rather than being reset to
/// [`UNRESOLVED`] on deserialize.
mod atomic_serde {
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
    use std::sync::Arc;

    pub mod arc_i32 {
        use super::*;

        pub fn serialize<S: serde::Serializer>(v: &Arc<AtomicI32>, s: S) -> Result<S::Ok, S::Error> {
            v.load(Ordering::Relaxed).serialize(s)
        }

        pub fn deserialize<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Arc<AtomicI32>, D::Error> {
            let n = i32::deserialize(d)?;
            Ok(Arc::new(AtomicI32::new(n)))
        }
    }

    pub mod usize_atomic {
        use super::*;

        pub fn serialize<S: serde::Serializer>(v: &AtomicUsize, s: S) -> Result<S::Ok, S::Error> {
            v.load(Ordering::Relaxed).serialize(s)
        }

        pub fn deserialize<'de, D: serde::Deserializer<'de>>(d: D) -> Result<AtomicUsize, D::Error> {
            let n = usize::deserialize(d)?;
            Ok(AtomicUsize::new(n))
        }
    }
}
