//! Error taxonomy (spec §7) and the control-flow/error split recommended by
//! spec §9: `return`/`break`/`continue` are ordinary values threaded through
//! [`ControlFlow`], never unwinding through the error channel, while
//! everything raisable/catchable lives in [`AmlError`].
//!
//! Grounded on `ouros::exception_private::ExcType` (a `strum`-derived enum of
//! exception kinds) and its constructor-function style for building errors
//! with a consistent message shape.

use std::fmt;

use strum::{Display as StrumDisplay, EnumString};

pub type LexResult<T> = Result<T, AmlError>;
pub type ParseResult<T> = Result<T, AmlError>;

/// Outcome of evaluating a statement or expression: either a value, a
/// non-local control transfer (`return`/`break`/`continue`), or a catchable
/// (or, for `Cancelled`, uncatchable) runtime error.
pub type EvalOutcome<T> = Result<T, Signal>;

#[derive(Debug, Clone)]
pub enum Signal {
    Control(ControlFlow),
    Error(AmlError),
}

impl From<AmlError> for Signal {
    fn from(e: AmlError) -> Self {
        Self::Error(e)
    }
}

impl From<ControlFlow> for Signal {
    fn from(c: ControlFlow) -> Self {
        Self::Control(c)
    }
}

#[derive(Debug, Clone)]
pub enum ControlFlow {
    Return(crate::value::Value),
    Break,
    Continue,
    /// `exit`/`exit_now` (SPEC_FULL §6): unwinds all the way to `run_source`,
    /// distinct from `Return` so a bare `func` body calling `exit()` doesn't
    /// look like it returned a value to its caller.
    Exit(i32),
}

/// Discriminant for [`AmlError`], used for `isinstance`-style matching inside
/// `catch` blocks and for diagnostics. Mirrors the kind names from spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString)]
pub enum ErrorKind {
    SyntaxError,
    UndefinedVariable,
    ConstantReassignment,
    AttributeError,
    IndexError,
    KeyError,
    TypeMismatch,
    DivisionByZero,
    ModuloByZero,
    FloorDivisionByZero,
    MissingArgument,
    UnknownKeyword,
    DuplicateKeyword,
    NotCallable,
    NotIterable,
    NotIndexable,
    ImportNotFound,
    ModuleLoadError,
    UserError,
    /// Call-stack depth guard for a tree-walking evaluator (ambient concern,
    /// SPEC_FULL §4.3 — not itself a spec-named error kind, but needed so a
    /// runaway recursive `func` fails predictably instead of overflowing the
    /// host stack).
    RecursionLimitExceeded,
    /// Cooperative cancellation. Never caught by `try`/`catch` (spec §7).
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct AmlError {
    pub kind: ErrorKind,
    pub message: String,
    pub line: u32,
    pub column: u32,
    /// File path the error occurred in, if known (used by `raise` per spec §7
    /// `UserError(message, line, column, file)`).
    pub file: Option<String>,
}

impl fmt::Display for AmlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (line {}, column {})", self.kind, self.message, self.line, self.column)
    }
}

impl std::error::Error for AmlError {}

impl AmlError {
    pub fn new(kind: ErrorKind, line: u32, column: u32, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), line, column, file: None }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn syntax(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SyntaxError, line, column, message)
    }

    pub fn undefined_variable(name: &str, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::UndefinedVariable, line, column, format!("undefined variable '{name}'"))
    }

    pub fn constant_reassignment(name: &str, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::ConstantReassignment, line, column, format!("cannot reassign constant '{name}'"))
    }

    pub fn attribute_error(attr: &str, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::AttributeError, line, column, format!("no attribute '{attr}'"))
    }

    pub fn index_error(detail: impl Into<String>, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::IndexError, line, column, detail.into())
    }

    pub fn key_error(key: impl fmt::Debug, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::KeyError, line, column, format!("{key:?}"))
    }

    pub fn type_mismatch(op: &str, left: &str, right: &str, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::TypeMismatch, line, column, format!("unsupported operand types for {op}: '{left}' and '{right}'"))
    }

    pub fn division_by_zero(line: u32, column: u32) -> Self {
        Self::new(ErrorKind::DivisionByZero, line, column, "division by zero")
    }

    pub fn modulo_by_zero(line: u32, column: u32) -> Self {
        Self::new(ErrorKind::ModuloByZero, line, column, "modulo by zero")
    }

    pub fn floor_division_by_zero(line: u32, column: u32) -> Self {
        Self::new(ErrorKind::FloorDivisionByZero, line, column, "floor division by zero")
    }

    pub fn missing_argument(func: &str, param: &str, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::MissingArgument, line, column, format!("missing required argument '{param}' for function '{func}'"))
    }

    pub fn unknown_keyword(func: &str, key: &str, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::UnknownKeyword, line, column, format!("unknown argument '{key}' for function '{func}'"))
    }

    pub fn duplicate_keyword(func: &str, key: &str, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::DuplicateKeyword, line, column, format!("multiple values for argument '{key}' of function '{func}'"))
    }

    pub fn not_callable(type_name: &str, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::NotCallable, line, column, format!("'{type_name}' object is not callable"))
    }

    pub fn not_iterable(type_name: &str, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::NotIterable, line, column, format!("'{type_name}' object is not iterable"))
    }

    pub fn not_indexable(type_name: &str, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::NotIndexable, line, column, format!("'{type_name}' object is not indexable"))
    }

    pub fn import_not_found(name: &str, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::ImportNotFound, line, column, format!("module '{name}' not found"))
    }

    pub fn module_load_error(name: &str, cause: impl fmt::Display, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::ModuleLoadError, line, column, format!("failed to load module '{name}': {cause}"))
    }

    pub fn user_error(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::UserError, line, column, message)
    }

    pub fn recursion_limit_exceeded(function: &str, limit: usize, line: u32, column: u32) -> Self {
        Self::new(ErrorKind::RecursionLimitExceeded, line, column, format!("maximum recursion depth ({limit}) exceeded in '{function}'"))
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, 0, 0, "execution cancelled")
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}
