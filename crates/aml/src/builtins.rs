//! The global builtin functions every interpreter instance gets:
//! `print`, `len`, `str`, `int`, `float`, `bool`, `type`, `abs`, `min`, `max`,
//! `range`, `signal`, `effect`, `import`, and `tick`. None of these are
//! parsed as keywords — they're ordinary globals defined in the
//! interpreter's root environment, so `func len(x) { ... }` at top level
//! legitimately shadows the builtin, same as any other redeclaration.
//!
//! Each one is a [`Value::Host`] wrapping a [`NativeFn`] rather than a
//! dedicated AST/evaluator special case, keeping the evaluator's dispatch
//! table limited to language constructs.

use std::fmt;
use std::sync::Arc;

use crate::error::AmlError;
use crate::evaluator::{inclusive_range, to_number, Interpreter};
use crate::host::HostObject;
use crate::reactive::{Effect, Signal as ReactiveSignal};
use crate::value::Value;

type Args = Vec<Value>;
type Kwargs = Vec<(String, Value)>;

struct NativeFn {
    name: &'static str,
    func: Box<dyn Fn(Args, Kwargs) -> Result<Value, AmlError> + Send + Sync>,
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<builtin {}>", self.name)
    }
}

impl HostObject for NativeFn {
    fn type_name(&self) -> &str {
        self.name
    }

    fn call(&self, args: Args, kwargs: Kwargs) -> Result<Value, AmlError> {
        (self.func)(args, kwargs)
    }
}

fn register(interp: &Arc<Interpreter>, name: &'static str, func: impl Fn(Args, Kwargs) -> Result<Value, AmlError> + Send + Sync + 'static) {
    interp.define(name, Value::Host(Arc::new(NativeFn { name, func: Box::new(func) })));
}

fn one_arg(name: &str, args: &[Value]) -> Result<Value, AmlError> {
    args.first().cloned().ok_or_else(|| AmlError::missing_argument(name, "value", 0, 0))
}

/// Registers every builtin in `interp`'s global environment. Call this once
/// per fresh [`Interpreter`] before running any source — embedders that want
/// a bare interpreter with no builtins simply skip calling it.
pub fn install_builtins(interp: &Arc<Interpreter>) {
    register(interp, "print", |args, _kwargs| {
        let line = args.iter().map(Value::display_string).collect::<Vec<_>>().join(" ");
        println!("{line}");
        Ok(Value::Null)
    });

    register(interp, "len", |args, _kwargs| {
        let v = one_arg("len", &args)?;
        match &v {
            Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::List(l) => Ok(Value::Int(l.lock().unwrap().len() as i64)),
            Value::Dict(d) => Ok(Value::Int(d.lock().unwrap().len() as i64)),
            other => Err(AmlError::type_mismatch("len", "str, list, or dict", other.type_name(), 0, 0)),
        }
    });

    register(interp, "str", |args, _kwargs| Ok(Value::str(one_arg("str", &args)?.display_string())));

    register(interp, "int", |args, _kwargs| {
        let v = one_arg("int", &args)?;
        match &v {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            other => match to_number(other) {
                Some(n) => Ok(Value::Int(n as i64)),
                None => Err(AmlError::type_mismatch("int", "a number or numeric string", other.type_name(), 0, 0)),
            },
        }
    });

    register(interp, "float", |args, _kwargs| {
        let v = one_arg("float", &args)?;
        match &v {
            Value::Bool(b) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
            other => match to_number(other) {
                Some(n) => Ok(Value::Float(n)),
                None => Err(AmlError::type_mismatch("float", "a number or numeric string", other.type_name(), 0, 0)),
            },
        }
    });

    register(interp, "bool", |args, _kwargs| Ok(Value::Bool(one_arg("bool", &args)?.is_truthy())));

    register(interp, "type", |args, _kwargs| Ok(Value::str(one_arg("type", &args)?.type_name())));

    register(interp, "abs", |args, _kwargs| match one_arg("abs", &args)? {
        Value::Int(i) => Ok(Value::Int(i.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(AmlError::type_mismatch("abs", "int or float", other.type_name(), 0, 0)),
    });

    register(interp, "min", |args, _kwargs| min_max(&args, "min", true));
    register(interp, "max", |args, _kwargs| min_max(&args, "max", false));

    register(interp, "range", |args, _kwargs| {
        let (start, end) = match args.as_slice() {
            [Value::Int(b)] => (0, *b),
            [Value::Int(a), Value::Int(b)] => (*a, *b),
            [a] | [a, _] => return Err(AmlError::type_mismatch("range", "int", a.type_name(), 0, 0)),
            _ => return Err(AmlError::missing_argument("range", "end", 0, 0)),
        };
        Ok(Value::list(inclusive_range(start, end)))
    });

    register(interp, "signal", |args, _kwargs| Ok(Value::Signal(ReactiveSignal::new(args.into_iter().next().unwrap_or(Value::Null)))));

    let effect_interp = interp.clone();
    register(interp, "effect", move |args, _kwargs| {
        let Some(callback) = args.into_iter().next() else {
            return Err(AmlError::missing_argument("effect", "callback", 0, 0));
        };
        let interp = effect_interp.clone();
        let effect = Effect::new(move || {
            // Errors raised from inside a reactive effect have no try/catch
            // frame to land in (there's no source-level call site once a
            // signal write re-triggers it), so they're swallowed here the
            // same way `parallel` swallows task errors.
            let _ = interp.invoke(&callback, Vec::new(), Vec::new(), 0, 0);
        });
        Ok(Value::Effect(effect))
    });

    let import_interp = interp.clone();
    register(interp, "import", move |args, _kwargs| {
        let Some(Value::Str(name)) = args.into_iter().next() else {
            return Err(AmlError::missing_argument("import", "name", 0, 0));
        };
        import_interp.import_module(&name)
    });

    let tick_interp = interp.clone();
    register(interp, "tick", move |args, _kwargs| {
        let mut args = args.into_iter();
        let Some(callback) = args.next() else {
            return Err(AmlError::missing_argument("tick", "func", 0, 0));
        };
        let rate = match args.next() {
            None => 20.0,
            Some(v) => to_number(&v).ok_or_else(|| AmlError::type_mismatch("tick", "number", v.type_name(), 0, 0))?,
        };
        if rate <= 0.0 {
            return Err(AmlError::type_mismatch("tick", "a positive rate", "a non-positive rate", 0, 0));
        }
        let interp = tick_interp.clone();
        let cancelled = interp.resources.cancellation_flag();
        let period = std::time::Duration::from_secs_f64(1.0 / rate);
        std::thread::spawn(move || {
            while !cancelled.load(std::sync::atomic::Ordering::SeqCst) {
                let _ = interp.invoke(&callback, Vec::new(), Vec::new(), 0, 0);
                std::thread::sleep(period);
            }
        });
        Ok(Value::Null)
    });
}

fn min_max(args: &[Value], name: &str, is_min: bool) -> Result<Value, AmlError> {
    let items: Vec<Value> = match args {
        [Value::List(list)] => list.lock().unwrap().clone(),
        [] => return Err(AmlError::missing_argument(name, "values", 0, 0)),
        many => many.to_vec(),
    };
    let mut best: Option<Value> = None;
    for item in items {
        best = Some(match best {
            None => item,
            Some(current) => {
                let better = compare(&item, &current, name)?;
                if (is_min && better) || (!is_min && !better) { item } else { current }
            }
        });
    }
    best.ok_or_else(|| AmlError::new(crate::error::ErrorKind::TypeMismatch, 0, 0, format!("{name}() arg is an empty sequence")))
}

/// `true` if `a` sorts strictly before `b`; numeric comparison if both are
/// numbers, lexicographic if both are strings.
fn compare(a: &Value, b: &Value, context: &str) -> Result<bool, AmlError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x < y),
        _ => match (to_number(a), to_number(b)) {
            (Some(x), Some(y)) => Ok(x < y),
            _ => Err(AmlError::type_mismatch(context, a.type_name(), b.type_name(), 0, 0)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::InterpreterConfig;

    fn interp() -> Arc<Interpreter> {
        let interp = Interpreter::new(InterpreterConfig::default());
        install_builtins(&interp);
        interp
    }

    #[test]
    fn len_counts_list_elements() {
        let interp = interp();
        interp.run_source("var n = len([1, 2, 3])").unwrap();
        assert!(matches!(interp.get("n"), Some(Value::Int(3))));
    }

    #[test]
    fn int_parses_a_numeric_string() {
        let interp = interp();
        interp.run_source("var n = int(\"42\")").unwrap();
        assert!(matches!(interp.get("n"), Some(Value::Int(42))));
    }

    #[test]
    fn min_and_max_accept_either_a_list_or_varargs() {
        let interp = interp();
        interp.run_source("var a = min([3, 1, 2])\nvar b = max(3, 1, 2)").unwrap();
        assert!(matches!(interp.get("a"), Some(Value::Int(1))));
        assert!(matches!(interp.get("b"), Some(Value::Int(3))));
    }

    #[test]
    fn range_builtin_matches_the_splice_operator() {
        let interp = interp();
        interp.run_source("var r = range(1, 3)").unwrap();
        let Some(Value::List(list)) = interp.get("r") else { panic!("expected list") };
        let items = list.lock().unwrap();
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn effect_reruns_when_its_signal_changes() {
        let interp = interp();
        let src = "var c = signal(0)\nvar seen = 0\nfunc track() { seen = c.get() }\neffect(@track)\nc.set(1)";
        interp.run_source(src).unwrap();
        assert!(matches!(interp.get("seen"), Some(Value::Int(1))));
    }

    #[test]
    fn import_wraps_a_modules_bindings_in_a_namespace_without_a_return() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("util.aml"), "var answer = 42").unwrap();
        let mut config = InterpreterConfig::default();
        config.search_paths.push(dir.path().to_path_buf());
        let interp = Interpreter::new(config);
        install_builtins(&interp);
        interp.run_source("var u = import(\"util\")").unwrap();
        let Some(Value::Namespace(ns)) = interp.get("u") else { panic!("expected namespace") };
        assert!(matches!(ns.get("answer"), Some(Value::Int(42))));
    }

    #[test]
    fn tick_reinvokes_its_callback_until_the_interpreter_is_cancelled() {
        let interp = interp();
        interp.run_source("var n = 0\nfunc bump() { n = n + 1 }\ntick(@bump, 200)").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(30));
        interp.cancel();
        let Some(Value::Int(seen)) = interp.get("n") else { panic!("expected int") };
        assert!(seen >= 1, "tick should have invoked its callback at least once, saw {seen}");
    }
}
