//! Host interop surface (spec §3, §4.5.6).
//!
//! `HostObject` is a trait-object contract only: this crate ships no bundled
//! plugin implementations (host plugin libraries are explicitly out of
//! scope), but `import_py` needs *something* concrete to bind names to, and
//! `RuntimeProxy` needs a way to call back into a loaded host module. Tests
//! exercise this with an in-test fake host module. `Send + Sync` because a
//! host object reachable from a `spawn`ed task's closure has to cross the
//! thread boundary (spec §4.7).

use std::fmt;
use std::sync::Arc;

use crate::error::AmlError;
use crate::value::Value;

/// A value provided by the embedding host (an `import_py`-loaded module, a
/// class, or an instance thereof). Mirrors the three operations the
/// evaluator needs to perform on any Aml value: call, get attribute, set
/// attribute.
pub trait HostObject: fmt::Debug + Send + Sync {
    fn type_name(&self) -> &str;

    fn call(&self, _args: Vec<Value>, _kwargs: Vec<(String, Value)>) -> Result<Value, AmlError> {
        Err(AmlError::not_callable(self.type_name(), 0, 0))
    }

    fn get_attr(&self, attr: &str) -> Result<Value, AmlError> {
        Err(AmlError::attribute_error(attr, 0, 0))
    }

    fn set_attr(&self, attr: &str, _value: Value) -> Result<(), AmlError> {
        Err(AmlError::attribute_error(attr, 0, 0))
    }
}

/// The embedding-facing access point exposed to host modules loaded via
/// `import_py`, giving them a narrow window back into the running
/// interpreter: read/write globals and invoke Aml-defined functions.
/// Grounded on the reference's `aml_runtime_access.py` proxy object.
pub struct RuntimeProxy {
    pub(crate) get_var: Box<dyn Fn(&str) -> Option<Value> + Send + Sync>,
    pub(crate) set_var: Box<dyn Fn(&str, Value) + Send + Sync>,
    pub(crate) call: Box<dyn Fn(&str, Vec<Value>, Vec<(String, Value)>) -> Result<Value, AmlError> + Send + Sync>,
}

impl RuntimeProxy {
    pub fn new(
        get_var: impl Fn(&str) -> Option<Value> + Send + Sync + 'static,
        set_var: impl Fn(&str, Value) + Send + Sync + 'static,
        call: impl Fn(&str, Vec<Value>, Vec<(String, Value)>) -> Result<Value, AmlError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self { get_var: Box::new(get_var), set_var: Box::new(set_var), call: Box::new(call) })
    }

    pub fn get_var(&self, name: &str) -> Option<Value> {
        (self.get_var)(name)
    }

    pub fn set_var(&self, name: &str, value: Value) {
        (self.set_var)(name, value)
    }

    pub fn call(&self, name: &str, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Value, AmlError> {
        (self.call)(name, args, kwargs)
    }
}

impl fmt::Debug for RuntimeProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RuntimeProxy")
    }
}

impl HostObject for RuntimeProxy {
    fn type_name(&self) -> &str {
        "runtime"
    }

    fn call(&self, mut args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Result<Value, AmlError> {
        if args.is_empty() {
            return Err(AmlError::missing_argument("runtime.call", "name", 0, 0));
        }
        let name_val = args.remove(0);
        let Value::Str(name) = name_val else {
            return Err(AmlError::type_mismatch("runtime.call", "str", name_val.type_name(), 0, 0));
        };
        self.call(&name, args, kwargs)
    }

    fn get_attr(&self, attr: &str) -> Result<Value, AmlError> {
        match attr {
            "get_var" | "set_var" | "call" => Err(AmlError::attribute_error(
                "runtime methods are invoked via method-call syntax, not read as values",
                0,
                0,
            )),
            other => self.get_var(other).ok_or_else(|| AmlError::attribute_error(other, 0, 0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn runtime_proxy_round_trips_a_variable() {
        let store: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let read_store = store.clone();
        let write_store = store.clone();
        let proxy = RuntimeProxy::new(
            move |_name| read_store.lock().unwrap().clone(),
            move |_name, v| *write_store.lock().unwrap() = Some(v),
            |_name, _args, _kwargs| Ok(Value::Null),
        );
        proxy.set_var("x", Value::Int(5));
        assert!(matches!(proxy.get_var("x"), Some(Value::Int(5))));
    }
}
