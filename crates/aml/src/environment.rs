//! Lexical scopes (spec §4.4).
//!
//! Each `Environment` is a flat slot array plus a name→index map, behind a
//! `Mutex` rather than a `RefCell`: a closure's environment can be captured
//! by a `spawn`ed task running on another OS thread (spec §4.7), so the
//! scope chain has to be `Send + Sync`. Statically resolved identifiers
//! (`Addr::depth`/`Addr::index`, set once by [`crate::resolver::Resolver`])
//! index straight into `slots`, walking `enclosing` links `depth` times;
//! anything left unresolved (module-level forward references, dynamically
//! introduced globals) falls back to the name map via
//! [`Environment::try_get`]/[`Environment::try_assign`].

use std::fmt;
use std::sync::{Arc, Mutex};

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::error::AmlError;
use crate::value::Value;

pub struct Environment {
    enclosing: Option<Arc<Environment>>,
    slots: Mutex<Vec<Value>>,
    names: Mutex<IndexMap<String, usize>>,
    constants: Mutex<AHashSet<usize>>,
}

impl Environment {
    pub fn global() -> Arc<Self> {
        Arc::new(Self {
            enclosing: None,
            slots: Mutex::new(Vec::new()),
            names: Mutex::new(IndexMap::new()),
            constants: Mutex::new(AHashSet::default()),
        })
    }

    pub fn child(enclosing: &Arc<Environment>) -> Arc<Self> {
        Arc::new(Self {
            enclosing: Some(enclosing.clone()),
            slots: Mutex::new(Vec::new()),
            names: Mutex::new(IndexMap::new()),
            constants: Mutex::new(AHashSet::default()),
        })
    }

    pub fn enclosing(&self) -> Option<&Arc<Environment>> {
        self.enclosing.as_ref()
    }

    /// Defines a new binding in this scope, returning its slot index.
    /// Redeclaring an existing name in the same scope reuses its slot
    /// (the resolver already warns about this; we don't re-validate here).
    pub fn define(&self, name: &str, value: Value, is_const: bool) -> usize {
        let mut slots = self.slots.lock().unwrap();
        let mut names = self.names.lock().unwrap();
        let index = if let Some(&existing) = names.get(name) {
            slots[existing] = value;
            existing
        } else {
            let index = slots.len();
            slots.push(value);
            names.insert(name.to_owned(), index);
            index
        };
        if is_const {
            self.constants.lock().unwrap().insert(index);
        }
        index
    }

    fn ancestor(self: &Arc<Self>, depth: i32) -> Arc<Environment> {
        let mut env = self.clone();
        for _ in 0..depth {
            env = env.enclosing.clone().expect("resolver produced an out-of-range depth");
        }
        env
    }

    pub fn get_at(self: &Arc<Self>, depth: i32, index: i32) -> Value {
        let env = self.ancestor(depth);
        env.slots.lock().unwrap()[index as usize].clone()
    }

    pub fn assign_at(self: &Arc<Self>, depth: i32, index: i32, value: Value, line: u32, column: u32) -> Result<(), AmlError> {
        let env = self.ancestor(depth);
        let idx = index as usize;
        if env.constants.lock().unwrap().contains(&idx) {
            let name = env.names.lock().unwrap().iter().find(|(_, &i)| i == idx).map(|(n, _)| n.clone()).unwrap_or_default();
            return Err(AmlError::constant_reassignment(&name, line, column));
        }
        env.slots.lock().unwrap()[idx] = value;
        Ok(())
    }

    /// Dynamic fallback lookup by name, walking the enclosing chain. Used
    /// when an identifier's static address never got resolved (spec §4.4).
    pub fn try_get(self: &Arc<Self>, name: &str) -> Option<Value> {
        if let Some(&index) = self.names.lock().unwrap().get(name) {
            return Some(self.slots.lock().unwrap()[index].clone());
        }
        self.enclosing.as_ref().and_then(|e| e.try_get(name))
    }

    pub fn try_assign(self: &Arc<Self>, name: &str, value: Value, line: u32, column: u32) -> Result<bool, AmlError> {
        if let Some(&index) = self.names.lock().unwrap().get(name) {
            if self.constants.lock().unwrap().contains(&index) {
                return Err(AmlError::constant_reassignment(name, line, column));
            }
            self.slots.lock().unwrap()[index] = value;
            return Ok(true);
        }
        match &self.enclosing {
            Some(e) => e.try_assign(name, value, line, column),
            None => Ok(false),
        }
    }

    /// Names declared directly in this scope (not an enclosing one), with
    /// their current value and constant-ness. Used by `NamespaceDecl`
    /// evaluation to turn a freshly executed block into a [`crate::value::Namespace`]'s
    /// member map (spec §4.5.3).
    pub fn local_bindings(&self) -> Vec<(String, Value, bool)> {
        let names = self.names.lock().unwrap();
        let slots = self.slots.lock().unwrap();
        let constants = self.constants.lock().unwrap();
        names.iter().map(|(name, &index)| (name.clone(), slots[index].clone(), constants.contains(&index))).collect()
    }

    pub fn is_const_name(&self, name: &str) -> bool {
        match self.names.lock().unwrap().get(name) {
            Some(&index) => self.constants.lock().unwrap().contains(&index),
            None => self.enclosing.as_ref().is_some_and(|e| e.is_const_name(name)),
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment({} slots)", self.slots.lock().unwrap().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_scope_resolves_through_depth() {
        let global = Environment::global();
        global.define("x", Value::Int(1), false);
        let child = Environment::child(&global);
        assert_eq!(child.get_at(1, 0).type_name(), "int");
    }

    #[test]
    fn assigning_a_constant_slot_errors() {
        let global = Environment::global();
        global.define("pi", Value::Float(3.14), true);
        let err = global.assign_at(0, 0, Value::Int(0), 1, 1).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ConstantReassignment);
    }

    #[test]
    fn dynamic_fallback_finds_name_in_enclosing_scope() {
        let global = Environment::global();
        global.define("y", Value::Int(42), false);
        let child = Environment::child(&global);
        let found = child.try_get("y").unwrap();
        assert!(matches!(found, Value::Int(42)));
    }
}
