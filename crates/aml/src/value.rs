//! Runtime values (spec §3).
//!
//! Mutable containers (`List`, `Dict`, `Namespace`) use `Arc<Mutex<_>>`
//! rather than `Rc<RefCell<_>>`: `spawn`/`parallel` (spec §4.7, §5) run
//! function bodies on real OS threads, so any value that can be captured by
//! a closure and handed to another thread has to be `Send + Sync`. This also
//! means aliasing assignment (`var b = a; b.push(1)` mutating `a` too)
//! matches the reference interpreter's Python-object-reference semantics,
//! grounded on `ouros::value::Value`'s heap-cell representation but with
//! thread-safe interior mutability instead of single-threaded `Rc`.

use std::fmt;
use std::sync::{Arc, Mutex};

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::ast::FunctionDecl;
use crate::environment::Environment;
use crate::host::HostObject;

pub type List = Arc<Mutex<Vec<Value>>>;
pub type Dict = Arc<Mutex<IndexMap<DictKey, Value>>>;

#[derive(Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(Arc<String>),
    Bool(bool),
    Null,
    List(List),
    Dict(Dict),
    Function(Arc<AmlFunction>),
    Namespace(Arc<Namespace>),
    TaskHandle(Arc<crate::task::TaskHandle>),
    Signal(Arc<crate::reactive::Signal>),
    Effect(Arc<crate::reactive::Effect>),
    Host(Arc<dyn HostObject + Send + Sync>),
    /// Sentinel used internally during argument binding (spec §4.5.5's
    /// `MISSING_ARG`); never observable from Aml source.
    MissingArg,
}

// SAFETY-free by construction: every variant is itself `Send + Sync`
// (`Arc<Mutex<_>>`, `Arc<T>` for plain data, or a primitive), so this falls
// out automatically — no unsafe impls needed anywhere in this module.

/// A user-defined function plus the lexical environment it closed over.
/// `bound_self` is populated for a dotted declaration (`func ns.inc()`):
/// calling the function defines `self` in its call environment in addition
/// to its ordinary closure chain (spec §3 Runtime Values, §4.5.3).
#[derive(Debug, Clone)]
pub struct AmlFunction {
    pub decl: Arc<FunctionDecl>,
    pub closure: Arc<Environment>,
    pub bound_self: Option<Box<Value>>,
}

impl AmlFunction {
    pub fn new(decl: Arc<FunctionDecl>, closure: Arc<Environment>) -> Self {
        Self { decl, closure, bound_self: None }
    }

    pub fn with_self(mut self, target: Value) -> Self {
        self.bound_self = Some(Box::new(target));
        self
    }
}

/// A `namespace` block's bound members: dotted functions register themselves
/// here by their final path segment, in declaration order. `constants`
/// mirrors `Environment`'s: a name inserted here can never be reassigned
/// through `namespace.attr = value` (spec §3 invariant).
pub struct Namespace {
    pub name: String,
    pub members: Mutex<IndexMap<String, Value>>,
    pub constants: Mutex<AHashSet<String>>,
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({})", self.name)
    }
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), members: Mutex::new(IndexMap::new()), constants: Mutex::new(AHashSet::default()) }
    }

    pub fn get(&self, attr: &str) -> Option<Value> {
        self.members.lock().unwrap().get(attr).cloned()
    }

    pub fn set(&self, attr: &str, value: Value, is_const: bool) -> Result<(), ()> {
        if self.constants.lock().unwrap().contains(attr) {
            return Err(());
        }
        self.members.lock().unwrap().insert(attr.to_owned(), value);
        if is_const {
            self.constants.lock().unwrap().insert(attr.to_owned());
        }
        Ok(())
    }
}

/// `Dict` keys need `Hash`/`Eq`, which floats don't have; spec §3 only
/// requires int/str/bool keys to be hashable in practice, so floats are
/// keyed by their bit pattern (matching IEEE-754 total-order-ish behavior
/// for the common case of whole-valued float keys).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DictKey {
    Int(i64),
    FloatBits(u64),
    Str(Arc<String>),
    Bool(bool),
    Null,
}

impl DictKey {
    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Int(i) => Some(Self::Int(*i)),
            Value::Float(f) => Some(Self::FloatBits(f.to_bits())),
            Value::Str(s) => Some(Self::Str(s.clone())),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Null => Some(Self::Null),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Self::Int(i) => Value::Int(i),
            Self::FloatBits(bits) => Value::Float(f64::from_bits(bits)),
            Self::Str(s) => Value::Str(s),
            Self::Bool(b) => Value::Bool(b),
            Self::Null => Value::Null,
        }
    }
}

impl fmt::Display for DictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::FloatBits(bits) => write!(f, "{}", f64::from_bits(*bits)),
            Self::Str(s) => write!(f, "{s}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Null => write!(f, "null"),
        }
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(Arc::new(s.into()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Arc::new(Mutex::new(items)))
    }

    pub fn dict(entries: IndexMap<DictKey, Value>) -> Self {
        Self::Dict(Arc::new(Mutex::new(entries)))
    }

    /// Truthiness (spec §3): `0`, `0.0`, `""`, `null`, `false`, empty list,
    /// and empty dict are falsy; everything else (including functions,
    /// namespaces, and non-empty containers) is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Bool(b) => *b,
            Self::Null => false,
            Self::List(l) => !l.lock().unwrap().is_empty(),
            Self::Dict(d) => !d.lock().unwrap().is_empty(),
            Self::MissingArg => false,
            _ => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bool(_) => "bool",
            Self::Null => "null",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Function(_) => "function",
            Self::Namespace(_) => "namespace",
            Self::TaskHandle(_) => "task",
            Self::Signal(_) => "signal",
            Self::Effect(_) => "effect",
            Self::Host(_) => "host_object",
            Self::MissingArg => "missing",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Python-`repr`-ish debug rendering used by the `str()` builtin's
    /// fallback for non-primitive values.
    pub fn display_string(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            Self::Str(s) => s.as_str().to_owned(),
            Self::Bool(b) => b.to_string(),
            Self::Null => "null".to_owned(),
            Self::List(l) => {
                let items: Vec<String> = l.lock().unwrap().iter().map(Value::repr_string).collect();
                format!("[{}]", items.join(", "))
            }
            Self::Dict(d) => {
                let items: Vec<String> =
                    d.lock().unwrap().iter().map(|(k, v)| format!("{k}: {}", v.repr_string())).collect();
                format!("{{{}}}", items.join(", "))
            }
            Self::Function(func) => format!("<function {}>", func.decl.name),
            Self::Namespace(ns) => format!("<namespace {}>", ns.name),
            Self::TaskHandle(_) => "<task>".to_owned(),
            Self::Signal(_) => "<signal>".to_owned(),
            Self::Effect(_) => "<effect>".to_owned(),
            Self::Host(h) => format!("<host_object {}>", h.type_name()),
            Self::MissingArg => "<missing>".to_owned(),
        }
    }

    /// Like [`Self::display_string`] but quotes strings, used for elements
    /// nested inside list/dict rendering.
    pub fn repr_string(&self) -> String {
        match self {
            Self::Str(s) => format!("\"{s}\""),
            other => other.display_string(),
        }
    }

    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Null, Self::Null) => true,
            (Self::List(a), Self::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.lock().unwrap(), b.lock().unwrap());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Self::Dict(a), Self::Dict(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.lock().unwrap(), b.lock().unwrap());
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k).is_some_and(|bv| bv.equals(v)))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_list_aliased_with_itself_equals_without_deadlocking() {
        let a = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let b = a.clone();
        assert!(a.equals(&b));
    }

    #[test]
    fn a_dict_aliased_with_itself_equals_without_deadlocking() {
        let a = Value::dict(IndexMap::from([(DictKey::Str(Arc::new("x".to_owned())), Value::Int(1))]));
        let b = a.clone();
        assert!(a.equals(&b));
    }
}
