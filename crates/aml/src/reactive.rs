//! Reactive signals and effects (spec §4.5.7): a `signal(initial)` builtin
//! returns a cell whose `.get()`/`.set(value)` methods are tracked by
//! `effect(fn)` callbacks, so writing to a signal automatically re-runs every
//! effect that last read it — the dependency graph is rebuilt on every run,
//! matching the common "fine-grained reactive" design (no separate
//! subscribe/unsubscribe step; `Effect::run` re-subscribes from scratch).
//!
//! Dependency tracking uses a thread-local stack of "currently running
//! effect": `Signal::get` only registers a dependency when called from
//! inside an `Effect::run`, so reading a signal from ordinary script code
//! (outside any effect) is a plain read with no bookkeeping.

use std::cell::RefCell;
use std::sync::{Arc, Mutex};

use crate::value::Value;

thread_local! {
    static ACTIVE_EFFECT: RefCell<Vec<Arc<Effect>>> = RefCell::new(Vec::new());
}

pub struct Signal {
    value: Mutex<Value>,
    subscribers: Mutex<Vec<Arc<Effect>>>,
}

impl Signal {
    pub fn new(initial: Value) -> Arc<Self> {
        Arc::new(Self { value: Mutex::new(initial), subscribers: Mutex::new(Vec::new()) })
    }

    /// Reads the current value, registering the active effect (if any) as a
    /// dependent so a later `set` re-runs it.
    pub fn get(&self) -> Value {
        if let Some(effect) = ACTIVE_EFFECT.with(|stack| stack.borrow().last().cloned()) {
            let mut subs = self.subscribers.lock().unwrap();
            if !subs.iter().any(|e| Arc::ptr_eq(e, &effect)) {
                subs.push(effect);
            }
        }
        self.value.lock().unwrap().clone()
    }

    /// Writes a new value and synchronously re-runs every subscribed effect,
    /// unless `new` equals the previous value (spec §8: "`Signal.set(v)`
    /// invoked with `v == old` does not run any subscriber"). The effect
    /// currently running (if any) is skipped even if it's subscribed, so an
    /// effect that writes a signal it just read does not recurse into
    /// itself.
    pub fn set(&self, new: Value) {
        let mut current = self.value.lock().unwrap();
        if current.equals(&new) {
            return;
        }
        *current = new;
        drop(current);
        let running = ACTIVE_EFFECT.with(|stack| stack.borrow().last().cloned());
        let subs = self.subscribers.lock().unwrap().clone();
        for effect in subs {
            if running.as_ref().is_some_and(|r| Arc::ptr_eq(r, &effect)) {
                continue;
            }
            effect.run();
        }
    }
}

/// A reactive computation: a host-provided closure (the evaluator wires this
/// to an Aml function call in `builtins.rs`) that is re-invoked whenever a
/// signal it read during its last run changes.
pub struct Effect {
    body: Mutex<Box<dyn FnMut() + Send>>,
}

impl Effect {
    /// Creates an effect and runs it once immediately, establishing its
    /// initial dependency set.
    pub fn new(body: impl FnMut() + Send + 'static) -> Arc<Self> {
        let effect = Arc::new(Self { body: Mutex::new(Box::new(body)) });
        effect.run();
        effect
    }

    pub fn run(self: &Arc<Self>) {
        ACTIVE_EFFECT.with(|stack| stack.borrow_mut().push(self.clone()));
        (self.body.lock().unwrap())();
        ACTIVE_EFFECT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn setting_a_signal_reruns_its_subscribed_effect() {
        let signal = Signal::new(Value::Int(1));
        let runs = Arc::new(AtomicI64::new(0));
        let seen = Arc::new(Mutex::new(Value::Null));
        let sig = signal.clone();
        let runs_clone = runs.clone();
        let seen_clone = seen.clone();
        let _effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            *seen_clone.lock().unwrap() = sig.get();
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        signal.set(Value::Int(42));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(matches!(*seen.lock().unwrap(), Value::Int(42)));
    }

    #[test]
    fn setting_a_signal_to_its_current_value_does_not_rerun_subscribers() {
        let signal = Signal::new(Value::Int(1));
        let runs = Arc::new(AtomicI64::new(0));
        let runs_clone = runs.clone();
        let sig = signal.clone();
        let _effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            sig.get();
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        signal.set(Value::Int(1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        signal.set(Value::Int(2));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reading_a_signal_outside_an_effect_does_not_subscribe_anything() {
        let signal = Signal::new(Value::Int(1));
        assert!(matches!(signal.get(), Value::Int(1)));
        signal.set(Value::Int(2));
        assert!(matches!(signal.get(), Value::Int(2)));
    }

    #[test]
    fn an_effect_writing_the_signal_it_reads_does_not_recurse_into_itself() {
        let signal = Signal::new(Value::Int(0));
        let runs = Arc::new(AtomicI64::new(0));
        let runs_clone = runs.clone();
        let sig = signal.clone();
        let _effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            let Value::Int(n) = sig.get() else { unreachable!() };
            if n < 5 {
                sig.set(Value::Int(n + 1));
            }
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(matches!(signal.get(), Value::Int(1)));
    }
}
