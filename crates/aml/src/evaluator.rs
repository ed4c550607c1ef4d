//! The tree-walking evaluator (spec §4.5): executes a resolved [`Program`]
//! against an [`Environment`] tree.
//!
//! `Interpreter` methods take `self: &Arc<Self>` throughout, mirroring
//! [`Environment`]'s own convention, because `spawn`/`parallel` (spec §4.7)
//! need to clone an `Arc<Interpreter>` into a `'static` closure handed to
//! `std::thread::spawn` — a plain `&self` receiver can't survive that move.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use crate::ast::*;
use crate::builtins;
use crate::environment::Environment;
use crate::error::{AmlError, ControlFlow, ErrorKind, EvalOutcome, Signal};
use crate::host::HostObject;
use crate::loader::{self, FileStamp, ModuleEntry, ModuleTable};
use crate::reactive::{Effect, Signal as ReactiveSignal};
use crate::resolver;
use crate::resource::{InterpreterConfig, ResourceTracker};
use crate::task::{self, TaskHandle};
use crate::tracer::{NoopTracer, Tracer};
use crate::value::{DictKey, Namespace, Value};

pub type EvalResult<T> = EvalOutcome<T>;

/// What a top-level `run_source`/`run_file` call produced: either the value
/// of its last expression statement (informational only; scripts are mostly
/// run for effect) or the exit code passed to `exit`/`exit_now`.
#[derive(Debug, Clone)]
pub enum Completion {
    Value(Value),
    Exit(i32),
}

/// The interpreter instance: global environment, resource limits, module
/// tables, and the registries an embedder populates (spec §3's "Module
/// Tables", §6.4's embedding API).
pub struct Interpreter {
    pub globals: Arc<Environment>,
    pub tracer: Arc<dyn Tracer + Send + Sync>,
    pub resources: ResourceTracker,
    pub modules: ModuleTable,
    pub python_modules: Mutex<IndexMap<String, Arc<dyn HostObject + Send + Sync>>>,
    pub metadata: Mutex<IndexMap<String, Value>>,
    pub entrypoint: Mutex<Option<String>>,
    /// Populated by `run_file` on a `.caml` bundle (spec §4.6: "`load_caml(path)`
    /// ... populates the bundle map; subsequent AST lookups prefer the bundle").
    /// Keyed by the absolute-path string the bundle compiler recorded, so
    /// imports encountered while running the entry module resolve against the
    /// bundle before ever touching the filesystem.
    pub bundle_modules: Mutex<Option<std::collections::BTreeMap<String, Program>>>,
}

impl Interpreter {
    pub fn new(config: InterpreterConfig) -> Arc<Self> {
        Arc::new(Self {
            globals: Environment::global(),
            tracer: Arc::new(NoopTracer),
            resources: ResourceTracker::new(config),
            modules: ModuleTable::default(),
            python_modules: Mutex::new(IndexMap::new()),
            metadata: Mutex::new(IndexMap::new()),
            entrypoint: Mutex::new(None),
            bundle_modules: Mutex::new(None),
        })
    }

    pub fn with_tracer(config: InterpreterConfig, tracer: Arc<dyn Tracer + Send + Sync>) -> Arc<Self> {
        Arc::new(Self {
            globals: Environment::global(),
            tracer,
            resources: ResourceTracker::new(config),
            modules: ModuleTable::default(),
            python_modules: Mutex::new(IndexMap::new()),
            metadata: Mutex::new(IndexMap::new()),
            entrypoint: Mutex::new(None),
            bundle_modules: Mutex::new(None),
        })
    }

    pub fn cancel(&self) {
        self.resources.cancel();
    }

    pub fn reset_cancel(&self) {
        self.resources.reset_cancel();
    }

    // ---- embedding API (spec §6.4) ----

    pub fn define(&self, name: &str, value: Value) {
        self.globals.define(name, value, false);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.globals.try_get(name)
    }

    pub fn call_function(self: &Arc<Self>, dotted_name: &str, args: Vec<Value>) -> Result<Value, AmlError> {
        let callee = self.resolve_dotted(dotted_name)?;
        match self.invoke(&callee, args, Vec::new(), 0, 0) {
            Ok(v) => Ok(v),
            Err(Signal::Error(e)) => Err(e),
            Err(Signal::Control(_)) => Ok(Value::Null),
        }
    }

    /// Resolves a dotted name (`"a.b.c"`) by chaining attribute lookups off
    /// the global environment, used by `call_function` and entrypoint
    /// invocation (spec §4.5.8).
    fn resolve_dotted(&self, dotted: &str) -> Result<Value, AmlError> {
        let mut parts = dotted.split('.');
        let first = parts.next().unwrap_or(dotted);
        let mut current = self.globals.try_get(first).ok_or_else(|| AmlError::undefined_variable(first, 0, 0))?;
        for part in parts {
            current = self.attribute_get(&current, part, 0, 0).map_err(|s| match s {
                Signal::Error(e) => e,
                Signal::Control(_) => AmlError::attribute_error(part, 0, 0),
            })?;
        }
        Ok(current)
    }

    pub fn add_aml_search_path(&self, dir: std::path::PathBuf) {
        self.resources.add_search_path(dir);
    }

    pub fn register_python_module(&self, name: impl Into<String>, module: Arc<dyn HostObject + Send + Sync>) {
        self.python_modules.lock().unwrap().insert(name.into(), module);
    }

    pub fn create_namespace(&self, name: &str) -> Arc<Namespace> {
        let ns = Arc::new(Namespace::new(name));
        self.globals.define(name, Value::Namespace(ns.clone()), false);
        ns
    }

    pub fn invoke_entrypoint(self: &Arc<Self>) -> Result<Option<Value>, AmlError> {
        let name = self.entrypoint.lock().unwrap().clone();
        match name {
            Some(name) => self.call_function(&name, Vec::new()).map(Some),
            None => Ok(None),
        }
    }

    // ---- top-level execution ----

    pub fn run_source(self: &Arc<Self>, source: &str) -> Result<Completion, AmlError> {
        let mut program = crate::parser::parse(source)?;
        for warning in resolver::Resolver::new().analyze(&program) {
            self.tracer.warning(&warning);
        }
        self.run_program(&mut program, &self.globals.clone())
    }

    pub fn run_file(self: &Arc<Self>, path: &std::path::Path) -> Result<Completion, AmlError> {
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if ext == "caml" {
                return self.run_bundle_file(path);
            }
        }
        let source = std::fs::read_to_string(path).map_err(|e| loader::module_load_error(&path.display().to_string(), e))?;
        let stamp = FileStamp::read(path).unwrap_or_else(|_| FileStamp::sentinel());
        let cache_dir = std::path::Path::new(&self.resources.config().cache_dir_name);
        let mut program = match loader::read_cached_program(cache_dir, path, stamp) {
            Some(p) => {
                self.tracer.cache_hit(&path.display().to_string());
                p
            }
            None => {
                self.tracer.cache_miss(&path.display().to_string());
                let p = crate::parser::parse(&source)?;
                loader::write_cached_program(cache_dir, path, stamp, &p);
                p
            }
        };
        for warning in resolver::Resolver::new().analyze(&program) {
            self.tracer.warning(&warning);
        }
        self.run_program(&mut program, &self.globals.clone())
    }

    fn run_bundle_file(self: &Arc<Self>, path: &std::path::Path) -> Result<Completion, AmlError> {
        let text = std::fs::read_to_string(path).map_err(|e| loader::module_load_error(&path.display().to_string(), e))?;
        let bundle = crate::bundle::Bundle::decode(&text).map_err(|e| loader::module_load_error(&path.display().to_string(), e))?;
        let mut entry = bundle.modules.get(&bundle.entry).cloned().ok_or_else(|| loader::module_load_error(&bundle.entry, "entry module missing from bundle"))?;
        *self.bundle_modules.lock().unwrap() = Some(bundle.modules);
        self.run_program(&mut entry, &self.globals.clone())
    }

    /// Looks up `name` against the loaded bundle's module map (if any),
    /// matching the same dots-to-separator, `.aml`-suffixed relative path
    /// [`loader::resolve_module_path`] computes, but against the bundle's
    /// absolute-path keys by suffix instead of a search-path directory
    /// (spec §4.6: "search in (bundle map keys, if any; then each configured
    /// search path)").
    fn resolve_bundle_module(&self, name: &str) -> Option<(std::path::PathBuf, Program)> {
        let bundles = self.bundle_modules.lock().unwrap();
        let modules = bundles.as_ref()?;
        let rel: std::path::PathBuf = name.replace(['.', '/', '\\'], &std::path::MAIN_SEPARATOR.to_string()).into();
        let rel = rel.with_extension("aml");
        modules.iter().find(|(key, _)| std::path::Path::new(key).ends_with(&rel)).map(|(key, program)| (std::path::PathBuf::from(key), program.clone()))
    }

    fn run_program(self: &Arc<Self>, program: &mut Program, env: &Arc<Environment>) -> Result<Completion, AmlError> {
        let mut last = Value::Null;
        for stmt in &program.statements {
            match self.execute_stmt(env, stmt) {
                Ok(()) => {}
                Err(Signal::Control(ControlFlow::Exit(code))) => return Ok(Completion::Exit(code)),
                Err(Signal::Control(_)) => {}
                Err(Signal::Error(e)) => {
                    self.tracer.raised(&e);
                    return Err(e);
                }
            }
            let _ = &mut last;
        }
        if let Some(entry) = self.entrypoint.lock().unwrap().clone() {
            match self.call_function(&entry, Vec::new()) {
                Ok(v) => last = v,
                Err(e) => {
                    self.tracer.raised(&e);
                    return Err(e);
                }
            }
        }
        Ok(Completion::Value(last))
    }

    // ---- statements ----

    fn execute_block(self: &Arc<Self>, env: &Arc<Environment>, body: &[Stmt]) -> EvalResult<()> {
        for stmt in body {
            self.execute_stmt(env, stmt)?;
        }
        Ok(())
    }

    fn execute_stmt(self: &Arc<Self>, env: &Arc<Environment>, stmt: &Stmt) -> EvalResult<()> {
        self.resources.check_statement().map_err(Signal::Error)?;
        self.tracer.statement(stmt.span().line);
        match stmt {
            Stmt::VarDecl { name, value, index, span } => {
                let v = self.eval_expr(env, value)?;
                let i = env.define(name, v, false);
                index.store(i as i32, Ordering::Relaxed);
                let _ = span;
                Ok(())
            }
            Stmt::ConstDecl { name, value, index, span } => {
                let v = self.eval_expr(env, value)?;
                let i = env.define(name, v, true);
                index.store(i as i32, Ordering::Relaxed);
                let _ = span;
                Ok(())
            }
            Stmt::FunctionDecl(decl) => self.execute_function_decl(env, decl),
            Stmt::NamespaceDecl { name, body, .. } => self.execute_namespace_decl(env, name, body),
            Stmt::MetadataDecl { entries, .. } => self.execute_metadata_decl(env, entries),
            Stmt::ImportPy { specs, span } => self.execute_import_py(env, specs, *span),
            Stmt::ImportAml { names, span } => self.execute_import_aml(env, names, *span),
            Stmt::Assign(assignment) => self.execute_assign(env, assignment),
            Stmt::If { cond, then_body, else_body, .. } => {
                if self.eval_expr(env, cond)?.is_truthy() {
                    self.execute_block(env, then_body)
                } else if let Some(else_body) = else_body {
                    self.execute_block(env, else_body)
                } else {
                    Ok(())
                }
            }
            Stmt::While { cond, body, .. } => self.execute_while(env, cond, body),
            Stmt::For { var_name, iterable, body, span } => self.execute_for(env, var_name, iterable, body, *span),
            Stmt::Return { value, .. } => {
                let v = match value {
                    Some(e) => self.eval_expr(env, e)?,
                    None => Value::Null,
                };
                Err(Signal::Control(ControlFlow::Return(v)))
            }
            Stmt::Raise { value, span } => {
                let v = self.eval_expr(env, value)?;
                Err(Signal::Error(AmlError::user_error(v.display_string(), span.line, span.column)))
            }
            Stmt::Break(_) => Err(Signal::Control(ControlFlow::Break)),
            Stmt::Continue(_) => Err(Signal::Control(ControlFlow::Continue)),
            Stmt::TryCatch { try_body, catch_body, error_var, .. } => self.execute_try_catch(env, try_body, catch_body, error_var),
            Stmt::Parallel { calls, .. } => self.execute_parallel(env, calls),
            Stmt::ExprStmt(expr) => {
                self.eval_expr(env, expr)?;
                Ok(())
            }
        }
    }

    fn execute_function_decl(self: &Arc<Self>, env: &Arc<Environment>, decl: &Arc<FunctionDecl>) -> EvalResult<()> {
        if decl.ns_path.is_empty() {
            let func = Value::Function(Arc::new(crate::value::AmlFunction::new(decl.clone(), env.clone())));
            env.define(&decl.name, func, false);
            return Ok(());
        }
        let span = decl.span;
        let mut target = env
            .try_get(&decl.ns_path[0])
            .ok_or_else(|| Signal::Error(AmlError::undefined_variable(&decl.ns_path[0], span.line, span.column)))?;
        for segment in &decl.ns_path[1..] {
            target = self.attribute_get(&target, segment, span.line, span.column)?;
        }
        let func = crate::value::AmlFunction::new(decl.clone(), env.clone()).with_self(target.clone());
        match &target {
            Value::Namespace(ns) => {
                ns.set(&decl.name, Value::Function(Arc::new(func)), false)
                    .map_err(|()| Signal::Error(AmlError::constant_reassignment(&decl.name, span.line, span.column)))?;
            }
            Value::Dict(d) => {
                d.lock().unwrap().insert(DictKey::Str(Arc::new(decl.name.clone())), Value::Function(Arc::new(func)));
            }
            other => return Err(Signal::Error(AmlError::attribute_error(&decl.name, span.line, span.column).with_kind_hint(other.type_name()))),
        }
        Ok(())
    }

    fn execute_namespace_decl(self: &Arc<Self>, env: &Arc<Environment>, name: &str, body: &[Stmt]) -> EvalResult<()> {
        let ns_env = Environment::child(env);
        self.execute_block(&ns_env, body)?;
        let ns = Namespace::new(name);
        for (member_name, value, is_const) in ns_env.local_bindings() {
            let _ = ns.set(&member_name, value, is_const);
        }
        env.define(name, Value::Namespace(Arc::new(ns)), false);
        Ok(())
    }

    fn execute_metadata_decl(self: &Arc<Self>, env: &Arc<Environment>, entries: &[(String, Expr)]) -> EvalResult<()> {
        let mut meta = self.metadata.lock().unwrap();
        for (key, expr) in entries {
            let v = self.eval_expr(env, expr)?;
            if (key == "entry" || key == "entrypoint") {
                if let Value::Str(s) = &v {
                    *self.entrypoint.lock().unwrap() = Some(s.as_str().to_owned());
                }
            }
            meta.insert(key.clone(), v);
        }
        let snapshot: IndexMap<DictKey, Value> = meta.iter().map(|(k, v)| (DictKey::Str(Arc::new(k.clone())), v.clone())).collect();
        drop(meta);
        env.define("meta", Value::dict(snapshot), false);
        Ok(())
    }

    fn execute_import_py(self: &Arc<Self>, env: &Arc<Environment>, specs: &[ImportSpec], span: Span) -> EvalResult<()> {
        for spec in specs {
            let (dotted, bound) = match spec {
                ImportSpec::Plain(n) => (n.clone(), n.split('.').next().unwrap_or(n).to_owned()),
                ImportSpec::Aliased(n, alias) => (n.clone(), alias.clone()),
            };
            let modules = self.python_modules.lock().unwrap();
            let base = dotted.split('.').next().unwrap_or(&dotted);
            let module = modules.get(base).cloned().ok_or_else(|| Signal::Error(AmlError::import_not_found(&dotted, span.line, span.column)))?;
            drop(modules);
            env.define(&bound, Value::Host(module), false);
        }
        Ok(())
    }

    fn execute_import_aml(self: &Arc<Self>, env: &Arc<Environment>, names: &[String], span: Span) -> EvalResult<()> {
        for name in names {
            let module_env = self.load_aml_module(name, span.line, span.column)?;
            for (binding_name, value, is_const) in module_env.local_bindings() {
                env.define(&binding_name, value, is_const);
            }
        }
        Ok(())
    }

    /// Loads (or fetches from cache) an Aml module's executed environment,
    /// used both by `import_aml` (merging bindings) and the `import(name)`
    /// builtin (wrapping them in a `Namespace`).
    pub fn load_aml_module(self: &Arc<Self>, name: &str, line: u32, column: u32) -> EvalResult<Arc<Environment>> {
        if let Some((path, mut program)) = self.resolve_bundle_module(name) {
            if let Some(entry) = self.modules.get(&path) {
                self.tracer.cache_hit(&path.display().to_string());
                return Ok(entry.environment.clone());
            }
            // Bundled modules already carry resolved (depth, index)
            // addresses (spec §4.8), so no re-resolution pass runs here.
            let module_env = Environment::child(&self.globals);
            let mut return_value = None;
            for stmt in &mut program.statements {
                match self.execute_stmt(&module_env, stmt) {
                    Ok(()) => {}
                    Err(Signal::Control(ControlFlow::Return(v))) => {
                        return_value = Some(v);
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }
            self.tracer.module_loaded(&path.display().to_string());
            self.modules.insert(path, ModuleEntry { environment: module_env.clone(), stamp: FileStamp::sentinel(), return_value });
            return Ok(module_env);
        }
        let search_paths = self.resources.search_paths();
        let path = loader::resolve_module_path(name, &search_paths)
            .ok_or_else(|| Signal::Error(AmlError::import_not_found(name, line, column)))?;
        let path = path.canonicalize().unwrap_or(path);
        if let Some(entry) = self.modules.get(&path) {
            self.tracer.cache_hit(&path.display().to_string());
            return Ok(entry.environment.clone());
        }
        let source = std::fs::read_to_string(&path).map_err(|e| Signal::Error(loader::module_load_error(name, e)))?;
        let stamp = FileStamp::read(&path).unwrap_or_else(|_| FileStamp::sentinel());
        let cache_dir = std::path::Path::new(&self.resources.config().cache_dir_name);
        let mut program = match loader::read_cached_program(cache_dir, &path, stamp) {
            Some(p) => {
                self.tracer.cache_hit(&path.display().to_string());
                p
            }
            None => {
                self.tracer.cache_miss(&path.display().to_string());
                let p = crate::parser::parse(&source).map_err(Signal::Error)?;
                loader::write_cached_program(cache_dir, &path, stamp, &p);
                p
            }
        };
        for warning in resolver::Resolver::new().analyze(&program) {
            self.tracer.warning(&warning);
        }
        let module_env = Environment::child(&self.globals);
        let mut return_value = None;
        for stmt in &mut program.statements {
            match self.execute_stmt(&module_env, stmt) {
                Ok(()) => {}
                Err(Signal::Control(ControlFlow::Return(v))) => {
                    return_value = Some(v);
                    break;
                }
                Err(other) => return Err(other),
            }
        }
        self.tracer.module_loaded(&path.display().to_string());
        self.modules.insert(path, ModuleEntry { environment: module_env.clone(), stamp, return_value });
        Ok(module_env)
    }

    /// The `import(name)` builtin: returns the module's explicit top-level
    /// return value if it has one, else a [`Namespace`] named `name`
    /// populated from its environment.
    pub fn import_module(self: &Arc<Self>, name: &str) -> Result<Value, AmlError> {
        let env = self.load_aml_module(name, 0, 0).map_err(|s| match s {
            Signal::Error(e) => e,
            Signal::Control(_) => AmlError::import_not_found(name, 0, 0),
        })?;
        let resolved_path = match self.resolve_bundle_module(name) {
            Some((path, _)) => Some(path),
            None => {
                let search_paths = self.resources.search_paths();
                loader::resolve_module_path(name, &search_paths).map(|p| p.canonicalize().unwrap_or(p))
            }
        };
        if let Some(path) = resolved_path {
            if let Some(entry) = self.modules.get(&path) {
                if let Some(v) = &entry.return_value {
                    return Ok(v.clone());
                }
            }
        }
        let ns = Namespace::new(name);
        for (binding_name, value, is_const) in env.local_bindings() {
            let _ = ns.set(&binding_name, value, is_const);
        }
        Ok(Value::Namespace(Arc::new(ns)))
    }

    fn execute_while(self: &Arc<Self>, env: &Arc<Environment>, cond: &Expr, body: &[Stmt]) -> EvalResult<()> {
        let loop_env = Environment::child(env);
        loop {
            self.resources.check_statement().map_err(Signal::Error)?;
            if !self.eval_expr(env, cond)?.is_truthy() {
                break;
            }
            match self.execute_block(&loop_env, body) {
                Ok(()) => {}
                Err(Signal::Control(ControlFlow::Break)) => break,
                Err(Signal::Control(ControlFlow::Continue)) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    fn execute_for(self: &Arc<Self>, env: &Arc<Environment>, var_name: &str, iterable: &Expr, body: &[Stmt], span: Span) -> EvalResult<()> {
        let seq = self.eval_expr(env, iterable)?;
        let items = self.iterate_value(&seq, span.line, span.column)?;
        for item in items {
            self.resources.check_statement().map_err(Signal::Error)?;
            // No child environment: the iterator name (and anything the body
            // declares) lives in the surrounding scope and stays bound after
            // the loop ends, matching `if`'s no-implicit-scoping behavior.
            env.define(var_name, item, false);
            match self.execute_block(env, body) {
                Ok(()) => {}
                Err(Signal::Control(ControlFlow::Break)) => break,
                Err(Signal::Control(ControlFlow::Continue)) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    fn execute_try_catch(self: &Arc<Self>, env: &Arc<Environment>, try_body: &[Stmt], catch_body: &[Stmt], error_var: &Option<String>) -> EvalResult<()> {
        let try_env = Environment::child(env);
        match self.execute_block(&try_env, try_body) {
            Ok(()) => Ok(()),
            Err(Signal::Control(c)) => Err(Signal::Control(c)),
            Err(Signal::Error(e)) if e.is_cancelled() => Err(Signal::Error(e)),
            Err(Signal::Error(e)) => {
                let catch_env = Environment::child(env);
                let name = error_var.clone().unwrap_or_else(|| "error".to_owned());
                catch_env.define(&name, Value::str(e.to_string()), false);
                self.execute_block(&catch_env, catch_body)
            }
        }
    }

    fn execute_parallel(self: &Arc<Self>, env: &Arc<Environment>, calls: &[Expr]) -> EvalResult<()> {
        let mut jobs = Vec::with_capacity(calls.len());
        for call in calls {
            jobs.push(self.prepare_call_job(env, call)?);
        }
        task::run_parallel(jobs);
        Ok(())
    }

    fn execute_assign(self: &Arc<Self>, env: &Arc<Environment>, assignment: &Assignment) -> EvalResult<()> {
        let value = self.eval_expr(env, &assignment.value)?;
        let span = assignment.span;
        match &assignment.target {
            AssignTarget::Name(addr) => {
                let (depth, index) = addr.get();
                if depth >= 0 && index >= 0 {
                    let existing = env.get_at(depth, index);
                    if let Value::Signal(signal) = existing {
                        signal.set(value);
                        return Ok(());
                    }
                    env.assign_at(depth, index, value, span.line, span.column).map_err(Signal::Error)
                } else {
                    if let Some(existing) = env.try_get(&addr.name) {
                        if let Value::Signal(signal) = existing {
                            signal.set(value);
                            return Ok(());
                        }
                    }
                    let assigned = env.try_assign(&addr.name, value, span.line, span.column).map_err(Signal::Error)?;
                    if assigned {
                        Ok(())
                    } else {
                        Err(Signal::Error(AmlError::undefined_variable(&addr.name, span.line, span.column)))
                    }
                }
            }
            AssignTarget::Attribute { object, attr } => {
                let target = self.eval_expr(env, object)?;
                self.assign_attribute(&target, attr, value, span.line, span.column)
            }
            AssignTarget::Index { object, index } => {
                let target = self.eval_expr(env, object)?;
                let index_value = self.eval_expr(env, index)?;
                self.assign_index(&target, &index_value, value, span.line, span.column)
            }
        }
    }

    fn assign_attribute(&self, target: &Value, attr: &str, value: Value, line: u32, column: u32) -> EvalResult<()> {
        match target {
            Value::Namespace(ns) => ns.set(attr, value, false).map_err(|()| Signal::Error(AmlError::constant_reassignment(attr, line, column))),
            Value::Dict(d) => {
                d.lock().unwrap().insert(DictKey::Str(Arc::new(attr.to_owned())), value);
                Ok(())
            }
            Value::Host(h) => h.set_attr(attr, value).map_err(Signal::Error),
            other => Err(Signal::Error(AmlError::attribute_error(attr, line, column).with_kind_hint(other.type_name()))),
        }
    }

    fn assign_index(&self, target: &Value, index: &Value, value: Value, line: u32, column: u32) -> EvalResult<()> {
        match target {
            Value::List(l) => {
                let Value::Int(i) = index else {
                    return Err(Signal::Error(AmlError::type_mismatch("index assignment", "int", index.type_name(), line, column)));
                };
                let mut list = l.lock().unwrap();
                let len = list.len() as i64;
                let actual = if *i < 0 { i + len } else { *i };
                if actual < 0 || actual >= len {
                    return Err(Signal::Error(AmlError::index_error(format!("list assignment index {i} out of range"), line, column)));
                }
                list[actual as usize] = value;
                Ok(())
            }
            Value::Dict(d) => {
                let key = DictKey::from_value(index)
                    .ok_or_else(|| Signal::Error(AmlError::type_mismatch("dict key", "hashable", index.type_name(), line, column)))?;
                d.lock().unwrap().insert(key, value);
                Ok(())
            }
            other => Err(Signal::Error(AmlError::not_indexable(other.type_name(), line, column))),
        }
    }

    fn iterate_value(&self, v: &Value, line: u32, column: u32) -> EvalResult<Vec<Value>> {
        match v {
            Value::List(l) => Ok(l.lock().unwrap().clone()),
            Value::Dict(d) => Ok(d.lock().unwrap().keys().cloned().map(DictKey::into_value).collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
            other => Err(Signal::Error(AmlError::not_iterable(other.type_name(), line, column))),
        }
    }

    // ---- expressions ----

    fn eval_expr(self: &Arc<Self>, env: &Arc<Environment>, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::Literal(lit, _) => Ok(literal_value(lit)),
            Expr::Identifier(addr, span) => self.eval_identifier(env, addr, *span),
            Expr::ListLiteral(items, span) => self.eval_list_literal(env, items, *span),
            Expr::DictLiteral(pairs, span) => self.eval_dict_literal(env, pairs, *span),
            Expr::ListComprehension { expr: body, var_name, iterable, cond, span } => {
                self.eval_list_comprehension(env, body, var_name, iterable, cond, *span)
            }
            Expr::DictComprehension { key, value, var_name, iterable, cond, span } => {
                self.eval_dict_comprehension(env, key, value, var_name, iterable, cond, *span)
            }
            Expr::Index { target, index, span } => {
                let t = self.eval_expr(env, target)?;
                let i = self.eval_expr(env, index)?;
                self.index_get(&t, &i, span.line, span.column)
            }
            Expr::Attribute { target, attr, span } => {
                let t = self.eval_expr(env, target)?;
                self.attribute_get(&t, attr, span.line, span.column)
            }
            Expr::Binary { left, op, right, span } => self.eval_binary(env, left, *op, right, *span),
            Expr::Unary { op, expr, span } => self.eval_unary(env, *op, expr, *span),
            Expr::Range { start, end, span } => {
                let items = self.eval_range(env, start, end, *span)?;
                Ok(Value::list(items))
            }
            Expr::Pointer { target, .. } => self.eval_expr(env, target),
            Expr::Call { callee, args, kwargs, span } => self.eval_call(env, callee, args, kwargs, *span),
            Expr::MethodCall { object, method, args, kwargs, span } => {
                let obj = self.eval_expr(env, object)?;
                let arg_values = self.eval_args(env, args)?;
                let kwarg_values = self.eval_kwargs(env, kwargs)?;
                self.dispatch_method(&obj, method, arg_values, kwarg_values, span.line, span.column)
            }
            Expr::Spawn { call, span } => {
                let job = self.prepare_call_job(env, call)?;
                let _ = span;
                Ok(Value::TaskHandle(Arc::new(TaskHandle::spawn(job))))
            }
            Expr::PyClassInstance { class_name, args, kwargs, span } => self.eval_py_class_instance(env, class_name, args, kwargs, *span),
        }
    }

    fn eval_identifier(self: &Arc<Self>, env: &Arc<Environment>, addr: &Addr, span: Span) -> EvalResult<Value> {
        let (depth, index) = addr.get();
        if depth >= 0 && index >= 0 {
            return Ok(env.get_at(depth, index));
        }
        env.try_get(&addr.name)
            .or_else(|| self.globals.try_get(&addr.name))
            .ok_or_else(|| Signal::Error(AmlError::undefined_variable(&addr.name, span.line, span.column)))
    }

    fn eval_list_literal(self: &Arc<Self>, env: &Arc<Environment>, items: &[Expr], _span: Span) -> EvalResult<Value> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if let Expr::Range { start, end, span } = item {
                out.extend(self.eval_range(env, start, end, *span)?);
            } else {
                out.push(self.eval_expr(env, item)?);
            }
        }
        Ok(Value::list(out))
    }

    fn eval_dict_literal(self: &Arc<Self>, env: &Arc<Environment>, pairs: &[(Expr, Expr)], span: Span) -> EvalResult<Value> {
        let mut out = IndexMap::new();
        for (k, v) in pairs {
            let key = self.eval_expr(env, k)?;
            let value = self.eval_expr(env, v)?;
            let key = DictKey::from_value(&key).ok_or_else(|| Signal::Error(AmlError::type_mismatch("dict key", "hashable", key.type_name(), span.line, span.column)))?;
            out.insert(key, value);
        }
        Ok(Value::dict(out))
    }

    fn eval_list_comprehension(
        self: &Arc<Self>,
        env: &Arc<Environment>,
        body: &Expr,
        var_name: &str,
        iterable: &Expr,
        cond: &Option<Box<Expr>>,
        span: Span,
    ) -> EvalResult<Value> {
        let seq = self.eval_expr(env, iterable)?;
        let items = self.iterate_value(&seq, span.line, span.column)?;
        let comp_env = Environment::child(env);
        let mut out = Vec::new();
        for item in items {
            comp_env.define(var_name, item, false);
            if let Some(cond) = cond {
                if !self.eval_expr(&comp_env, cond)?.is_truthy() {
                    continue;
                }
            }
            out.push(self.eval_expr(&comp_env, body)?);
        }
        Ok(Value::list(out))
    }

    fn eval_dict_comprehension(
        self: &Arc<Self>,
        env: &Arc<Environment>,
        key_expr: &Expr,
        value_expr: &Expr,
        var_name: &str,
        iterable: &Expr,
        cond: &Option<Box<Expr>>,
        span: Span,
    ) -> EvalResult<Value> {
        let seq = self.eval_expr(env, iterable)?;
        let items = self.iterate_value(&seq, span.line, span.column)?;
        let comp_env = Environment::child(env);
        let mut out = IndexMap::new();
        for item in items {
            comp_env.define(var_name, item, false);
            if let Some(cond) = cond {
                if !self.eval_expr(&comp_env, cond)?.is_truthy() {
                    continue;
                }
            }
            let k = self.eval_expr(&comp_env, key_expr)?;
            let v = self.eval_expr(&comp_env, value_expr)?;
            let key = DictKey::from_value(&k).ok_or_else(|| Signal::Error(AmlError::type_mismatch("dict key", "hashable", k.type_name(), span.line, span.column)))?;
            out.insert(key, v);
        }
        Ok(Value::dict(out))
    }

    fn eval_range(self: &Arc<Self>, env: &Arc<Environment>, start: &Expr, end: &Expr, span: Span) -> EvalResult<Vec<Value>> {
        let start_v = self.eval_expr(env, start)?;
        let end_v = self.eval_expr(env, end)?;
        let (Value::Int(a), Value::Int(b)) = (&start_v, &end_v) else {
            return Err(Signal::Error(AmlError::type_mismatch("..", start_v.type_name(), end_v.type_name(), span.line, span.column)));
        };
        Ok(inclusive_range(*a, *b))
    }

    fn index_get(&self, target: &Value, index: &Value, line: u32, column: u32) -> EvalResult<Value> {
        match target {
            Value::List(l) => {
                let Value::Int(i) = index else {
                    return Err(Signal::Error(AmlError::type_mismatch("index", "int", index.type_name(), line, column)));
                };
                let list = l.lock().unwrap();
                let len = list.len() as i64;
                let actual = if *i < 0 { i + len } else { *i };
                if actual < 0 || actual >= len {
                    return Err(Signal::Error(AmlError::index_error(format!("list index {i} out of range"), line, column)));
                }
                Ok(list[actual as usize].clone())
            }
            Value::Dict(d) => {
                let key = DictKey::from_value(index).ok_or_else(|| Signal::Error(AmlError::type_mismatch("dict key", "hashable", index.type_name(), line, column)))?;
                d.lock().unwrap().get(&key).cloned().ok_or_else(|| Signal::Error(AmlError::key_error(&key, line, column)))
            }
            Value::Str(s) => {
                let Value::Int(i) = index else {
                    return Err(Signal::Error(AmlError::type_mismatch("index", "int", index.type_name(), line, column)));
                };
                let chars: Vec<char> = s.chars().collect();
                let len = chars.len() as i64;
                let actual = if *i < 0 { i + len } else { *i };
                if actual < 0 || actual >= len {
                    return Err(Signal::Error(AmlError::index_error(format!("string index {i} out of range"), line, column)));
                }
                Ok(Value::str(chars[actual as usize].to_string()))
            }
            other => Err(Signal::Error(AmlError::not_indexable(other.type_name(), line, column))),
        }
    }

    fn attribute_get(&self, target: &Value, attr: &str, line: u32, column: u32) -> EvalResult<Value> {
        match target {
            Value::Namespace(ns) => ns.get(attr).ok_or_else(|| Signal::Error(AmlError::attribute_error(attr, line, column))),
            Value::Dict(d) => {
                let key = DictKey::Str(Arc::new(attr.to_owned()));
                d.lock().unwrap().get(&key).cloned().ok_or_else(|| Signal::Error(AmlError::attribute_error(attr, line, column)))
            }
            Value::TaskHandle(handle) => match attr {
                "done" => Ok(Value::Bool(handle.is_done())),
                "result" => Ok(handle.result()),
                "error" => Ok(handle.error()),
                other => Err(Signal::Error(AmlError::attribute_error(other, line, column))),
            },
            Value::Host(h) => h.get_attr(attr).map_err(Signal::Error),
            other => Err(Signal::Error(AmlError::attribute_error(attr, line, column).with_kind_hint(other.type_name()))),
        }
    }

    fn eval_binary(self: &Arc<Self>, env: &Arc<Environment>, left: &Expr, op: BinOp, right: &Expr, span: Span) -> EvalResult<Value> {
        // Short-circuit before evaluating the right operand (spec §5 ordering guarantee).
        if op == BinOp::And {
            let l = self.eval_expr(env, left)?;
            if !l.is_truthy() {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(self.eval_expr(env, right)?.is_truthy()));
        }
        if op == BinOp::Or {
            let l = self.eval_expr(env, left)?;
            if l.is_truthy() {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(self.eval_expr(env, right)?.is_truthy()));
        }
        let l = self.eval_expr(env, left)?;
        let r = self.eval_expr(env, right)?;
        binary_op(op, &l, &r, span.line, span.column)
    }

    fn eval_unary(self: &Arc<Self>, env: &Arc<Environment>, op: UnOp, expr: &Expr, span: Span) -> EvalResult<Value> {
        let v = self.eval_expr(env, expr)?;
        match (op, &v) {
            (UnOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
            (UnOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnOp::Pos, Value::Int(i)) => Ok(Value::Int(*i)),
            (UnOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
            (UnOp::Not, other) => Ok(Value::Bool(!other.is_truthy())),
            (UnOp::Neg | UnOp::Pos, other) => Err(Signal::Error(AmlError::type_mismatch("unary", other.type_name(), "", span.line, span.column))),
        }
    }

    fn eval_args(self: &Arc<Self>, env: &Arc<Environment>, args: &[Expr]) -> EvalResult<Vec<Value>> {
        args.iter().map(|a| self.eval_expr(env, a)).collect()
    }

    fn eval_kwargs(self: &Arc<Self>, env: &Arc<Environment>, kwargs: &[(String, Expr)]) -> EvalResult<Vec<(String, Value)>> {
        kwargs.iter().map(|(k, v)| Ok((k.clone(), self.eval_expr(env, v)?))).collect()
    }

    fn eval_call(self: &Arc<Self>, env: &Arc<Environment>, callee: &Expr, args: &[Expr], kwargs: &[(String, Expr)], span: Span) -> EvalResult<Value> {
        if let Expr::Identifier(addr, _) = callee {
            if addr.name == "exit" || addr.name == "exit_now" {
                let code = match args.first() {
                    Some(e) => match self.eval_expr(env, e)? {
                        Value::Int(i) => i as i32,
                        other => return Err(Signal::Error(AmlError::type_mismatch(&addr.name, "int", other.type_name(), span.line, span.column))),
                    },
                    None => 0,
                };
                return Err(Signal::Control(ControlFlow::Exit(code)));
            }
        }
        let func = self.eval_expr(env, callee)?;
        let arg_values = self.eval_args(env, args)?;
        let kwarg_values = self.eval_kwargs(env, kwargs)?;
        self.invoke(&func, arg_values, kwarg_values, span.line, span.column)
    }

    fn eval_py_class_instance(self: &Arc<Self>, env: &Arc<Environment>, class_name: &str, args: &[Expr], kwargs: &[(String, Expr)], span: Span) -> EvalResult<Value> {
        let arg_values = self.eval_args(env, args)?;
        let kwarg_values = self.eval_kwargs(env, kwargs)?;
        let modules = self.python_modules.lock().unwrap();
        for module in modules.values() {
            if let Ok(class) = module.get_attr(class_name) {
                drop(modules);
                return self.invoke(&class, arg_values, kwarg_values, span.line, span.column);
            }
        }
        Err(Signal::Error(AmlError::attribute_error(class_name, span.line, span.column)))
    }

    /// Unified call dispatch, shared by ordinary `Call` evaluation and
    /// `spawn`/`parallel`'s deferred worker-thread closures.
    pub fn invoke(self: &Arc<Self>, callee: &Value, args: Vec<Value>, kwargs: Vec<(String, Value)>, line: u32, column: u32) -> EvalResult<Value> {
        match callee {
            Value::Function(func) => self.call_aml_function(func, args, kwargs, line, column),
            Value::Host(h) => h.call(args, kwargs).map_err(Signal::Error),
            other => Err(Signal::Error(AmlError::not_callable(other.type_name(), line, column))),
        }
    }

    fn dispatch_method(
        self: &Arc<Self>,
        obj: &Value,
        method: &str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        line: u32,
        column: u32,
    ) -> EvalResult<Value> {
        if let Value::TaskHandle(handle) = obj {
            return match method {
                "join" => {
                    let timeout = match args.first() {
                        None | Some(Value::Null) => None,
                        Some(v) => match to_number(v) {
                            Some(secs) if secs >= 0.0 => Some(std::time::Duration::from_secs_f64(secs)),
                            _ => return Err(Signal::Error(AmlError::type_mismatch("join", "a non-negative number of seconds", v.type_name(), line, column))),
                        },
                    };
                    Ok(handle.join(timeout))
                }
                "result" => Ok(handle.result()),
                "error" => Ok(handle.error()),
                "done" => Ok(Value::Bool(handle.is_done())),
                other => Err(Signal::Error(AmlError::attribute_error(other, line, column))),
            };
        }
        if let Value::Signal(signal) = obj {
            return match method {
                "get" => Ok(signal.get()),
                "set" => {
                    let v = args.into_iter().next().unwrap_or(Value::Null);
                    signal.set(v);
                    Ok(Value::Null)
                }
                other => Err(Signal::Error(AmlError::attribute_error(other, line, column))),
            };
        }
        if let Value::Dict(d) = obj {
            if let Some(value) = d.lock().unwrap().get(&DictKey::Str(Arc::new(method.to_owned()))).cloned() {
                return self.invoke(&value, args, kwargs, line, column);
            }
        }
        let attr = self.attribute_get(obj, method, line, column)?;
        self.invoke(&attr, args, kwargs, line, column)
    }

    /// Evaluates a call-shaped expression's callee and arguments eagerly in
    /// `env`, returning a boxed closure that performs the actual invocation
    /// later — on a worker thread for `spawn`/`parallel` (spec §4.7: "Resolves
    /// the callee and arguments in the caller's environment").
    fn prepare_call_job(self: &Arc<Self>, env: &Arc<Environment>, call: &Expr) -> EvalResult<Box<dyn FnOnce() -> Result<Value, AmlError> + Send>> {
        let (callee, args, kwargs, line, column) = match call {
            Expr::Call { callee, args, kwargs, span } => {
                let func = self.eval_expr(env, callee)?;
                (func, self.eval_args(env, args)?, self.eval_kwargs(env, kwargs)?, span.line, span.column)
            }
            Expr::MethodCall { object, method, args, kwargs, span } => {
                let obj = self.eval_expr(env, object)?;
                let arg_values = self.eval_args(env, args)?;
                let kwarg_values = self.eval_kwargs(env, kwargs)?;
                let bound = self.attribute_get(&obj, method, span.line, span.column)?;
                (bound, arg_values, kwarg_values, span.line, span.column)
            }
            Expr::Spawn { call, .. } => return self.prepare_call_job(env, call),
            other => {
                let span = other.span();
                return Err(Signal::Error(AmlError::not_callable("non-call expression", span.line, span.column)));
            }
        };
        let interp = self.clone();
        Ok(Box::new(move || match interp.invoke(&callee, args, kwargs, line, column) {
            Ok(v) => Ok(v),
            Err(Signal::Error(e)) => Err(e),
            Err(Signal::Control(ControlFlow::Return(v))) => Ok(v),
            Err(Signal::Control(_)) => Ok(Value::Null),
        }))
    }

    /// The 7-step invocation contract (spec §4.5.4).
    fn call_aml_function(
        self: &Arc<Self>,
        func: &Arc<crate::value::AmlFunction>,
        mut args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
        line: u32,
        column: u32,
    ) -> EvalResult<Value> {
        let _guard = self.resources.enter_call(&func.decl.name, line, column).map_err(Signal::Error)?;
        self.tracer.enter_call(&func.decl.name);
        let call_env = Environment::child(&func.closure);
        if let Some(bound) = &func.bound_self {
            call_env.define("self", (**bound).clone(), false);
        }
        let all_args = args.clone();
        let positional_count = args.len().min(func.decl.params.len());
        for (i, param) in func.decl.params.iter().enumerate() {
            let value = if i < positional_count { std::mem::replace(&mut args[i], Value::MissingArg) } else { Value::MissingArg };
            call_env.define(param.name(), value, false);
        }
        let mut seen_kwargs = HashSet::new();
        for (key, value) in kwargs {
            let Some(param) = func.decl.params.iter().find(|p| p.name() == key) else {
                return Err(Signal::Error(AmlError::unknown_keyword(&func.decl.name, &key, line, column)));
            };
            let slot_index = call_env
                .local_bindings()
                .iter()
                .position(|(name, ..)| name == param.name())
                .expect("parameter was just defined in this scope");
            if !seen_kwargs.insert(key.clone()) {
                return Err(Signal::Error(AmlError::duplicate_keyword(&func.decl.name, &key, line, column)));
            }
            let already_positional = slot_index < positional_count;
            if already_positional {
                return Err(Signal::Error(AmlError::duplicate_keyword(&func.decl.name, &key, line, column)));
            }
            call_env.define(param.name(), value, false);
        }
        call_env.define("args", Value::list(all_args), false);
        for param in &func.decl.params {
            let current = call_env.try_get(param.name()).expect("parameter was just defined in this scope");
            if matches!(current, Value::MissingArg) {
                match param {
                    Param::Required(name) => return Err(Signal::Error(AmlError::missing_argument(&func.decl.name, name, line, column))),
                    // Default expressions resolve against the function's *closure*
                    // (its defining environment), not `call_env`: the resolver
                    // analyzes default expressions before pushing the function's
                    // own parameter scope (see resolver::resolve_function).
                    Param::Default(name, expr) => {
                        let default = self.eval_expr(&func.closure, expr)?;
                        call_env.define(name, default, false);
                    }
                }
            }
        }
        let result = self.execute_block(&call_env, &func.decl.body);
        self.tracer.leave_call(&func.decl.name);
        match result {
            Ok(()) => Ok(Value::Null),
            Err(Signal::Control(ControlFlow::Return(v))) => Ok(v),
            Err(Signal::Control(ControlFlow::Break | ControlFlow::Continue)) => {
                Err(Signal::Error(AmlError::new(ErrorKind::UserError, line, column, "break/continue escaped a function body")))
            }
            Err(other) => Err(other),
        }
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::str(s.clone()),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
    }
}

/// Numeric coercion and operator semantics (spec §4.5.2): mixed int/float
/// operations widen to float; `+` with a string operand stringifies both
/// sides; `+` on two lists concatenates; integer `*` with a string or list
/// repeats it.
fn binary_op(op: BinOp, l: &Value, r: &Value, line: u32, column: u32) -> EvalResult<Value> {
    use BinOp::*;
    match op {
        Eq => return Ok(Value::Bool(l.equals(r))),
        Ne => return Ok(Value::Bool(!l.equals(r))),
        _ => {}
    }
    if op == Add {
        match (l, r) {
            (Value::Str(_), _) | (_, Value::Str(_)) => return Ok(Value::str(format!("{}{}", l.display_string(), r.display_string()))),
            (Value::List(a), Value::List(b)) => {
                let mut out = a.lock().unwrap().clone();
                out.extend(b.lock().unwrap().clone());
                return Ok(Value::list(out));
            }
            _ => {}
        }
    }
    if op == Mul {
        match (l, r) {
            (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) => {
                return Ok(Value::str(s.repeat((*n).max(0) as usize)));
            }
            (Value::List(list), Value::Int(n)) | (Value::Int(n), Value::List(list)) => {
                let items = list.lock().unwrap().clone();
                let mut out = Vec::with_capacity(items.len() * (*n).max(0) as usize);
                for _ in 0..(*n).max(0) {
                    out.extend(items.clone());
                }
                return Ok(Value::list(out));
            }
            _ => {}
        }
    }
    if let (Value::Str(a), Value::Str(b)) = (l, r) {
        return match op {
            Lt => Ok(Value::Bool(a < b)),
            Gt => Ok(Value::Bool(a > b)),
            Le => Ok(Value::Bool(a <= b)),
            Ge => Ok(Value::Bool(a >= b)),
            _ => Err(Signal::Error(AmlError::type_mismatch(op.symbol(), l.type_name(), r.type_name(), line, column))),
        };
    }
    let (a, b) = match (to_number(l), to_number(r)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(Signal::Error(AmlError::type_mismatch(op.symbol(), l.type_name(), r.type_name(), line, column))),
    };
    let both_int = matches!((l, r), (Value::Int(_), Value::Int(_)));
    match op {
        Add => Ok(numeric_result(both_int, a + b)),
        Sub => Ok(numeric_result(both_int, a - b)),
        Mul => Ok(numeric_result(both_int, a * b)),
        Div => {
            if b == 0.0 {
                Err(Signal::Error(AmlError::division_by_zero(line, column)))
            } else {
                Ok(Value::Float(a / b))
            }
        }
        Mod => {
            if b == 0.0 {
                Err(Signal::Error(AmlError::modulo_by_zero(line, column)))
            } else {
                Ok(numeric_result(both_int, crate::numeric::mod_f64(a, b)))
            }
        }
        FloorDiv => {
            if b == 0.0 {
                Err(Signal::Error(AmlError::floor_division_by_zero(line, column)))
            } else {
                Ok(numeric_result(both_int, crate::numeric::floor_div_f64(a, b)))
            }
        }
        Pow => Ok(numeric_result(both_int, a.powf(b))),
        Lt => Ok(Value::Bool(a < b)),
        Gt => Ok(Value::Bool(a > b)),
        Le => Ok(Value::Bool(a <= b)),
        Ge => Ok(Value::Bool(a >= b)),
        Eq | Ne | And | Or => unreachable!("handled above"),
    }
}

fn numeric_result(both_int: bool, v: f64) -> Value {
    if both_int { Value::Int(v as i64) } else { Value::Float(v) }
}

/// Coerces a value to a number for arithmetic that isn't one of the special
/// string/list cases above: numbers pass through; strings are parsed
/// (`"3" - 1` works the same as `3 - 1`); anything else fails the caller's
/// `TypeMismatch`.
/// Inclusive range enumeration shared by the `..` operator and the `range()`
/// builtin: counts up from `a` to `b`, or down if `a > b`.
pub(crate) fn inclusive_range(a: i64, b: i64) -> Vec<Value> {
    let mut out = Vec::new();
    if a <= b {
        let mut i = a;
        while i <= b {
            out.push(Value::Int(i));
            i += 1;
        }
    } else {
        let mut i = a;
        while i >= b {
            out.push(Value::Int(i));
            i -= 1;
        }
    }
    out
}

pub(crate) fn to_number(v: &Value) -> Option<f64> {
    match v {
        Value::Str(s) => s.trim().parse::<f64>().ok(),
        other => other.as_f64(),
    }
}

impl AmlError {
    /// Narrows a generic `AttributeError` with the offending value's type
    /// name, used by call sites that only know the type after the error is
    /// constructed.
    fn with_kind_hint(mut self, type_name: &str) -> Self {
        self.message = format!("{} (on a value of type '{type_name}')", self.message);
        self
    }
}

pub use builtins::install_builtins;

#[cfg(test)]
mod tests {
    use super::*;

    fn run(src: &str) -> Value {
        let interp = Interpreter::new(InterpreterConfig::default());
        builtins::install_builtins(&interp);
        match interp.run_source(src) {
            Ok(Completion::Value(v)) => v,
            Ok(Completion::Exit(code)) => Value::Int(code as i64),
            Err(e) => panic!("evaluation failed: {e}"),
        }
    }

    #[test]
    fn fibonacci_recurses_correctly() {
        let v = run("func fib(n) { if (n < 2) { return n } return fib(n-1) + fib(n-2) } fib(10)");
        assert!(matches!(v, Value::Null));
        let interp = Interpreter::new(InterpreterConfig::default());
        builtins::install_builtins(&interp);
        interp.run_source("func fib(n) { if (n < 2) { return n } return fib(n-1) + fib(n-2) }").unwrap();
        let result = interp.call_function("fib", vec![Value::Int(10)]).unwrap();
        assert!(matches!(result, Value::Int(55)));
    }

    #[test]
    fn defaults_kwargs_and_extras_via_args() {
        let interp = Interpreter::new(InterpreterConfig::default());
        builtins::install_builtins(&interp);
        interp.run_source("func f(a, b = 10) { return a + b + len(args) }").unwrap();
        assert!(matches!(interp.call_function("f", vec![Value::Int(1)]).unwrap(), Value::Int(11)));
    }

    #[test]
    fn args_list_keeps_the_original_values_of_consumed_positional_parameters() {
        let interp = Interpreter::new(InterpreterConfig::default());
        builtins::install_builtins(&interp);
        interp.run_source("func f(a) { return args[0] }\nvar x = f(5)").unwrap();
        assert!(matches!(interp.get("x"), Some(Value::Int(5))));
    }

    #[test]
    fn floor_division_and_modulo_agree_between_folded_literals_and_runtime_values() {
        let interp = Interpreter::new(InterpreterConfig::default());
        builtins::install_builtins(&interp);
        let src = "var a = -7\nvar b = -2\nvar folded_div = -7 // -2\nvar runtime_div = a // b\nvar folded_mod = 7 % -2\nvar c = 7\nvar d = -2\nvar runtime_mod = c % d";
        interp.run_source(src).unwrap();
        assert!(matches!(interp.get("folded_div"), Some(Value::Int(3))));
        assert!(matches!(interp.get("runtime_div"), Some(Value::Int(3))));
        assert!(matches!(interp.get("folded_mod"), Some(Value::Int(-1))));
        assert!(matches!(interp.get("runtime_mod"), Some(Value::Int(-1))));
    }

    #[test]
    fn namespace_dotted_function_self_binding_mutates_member() {
        let src = "namespace ns { var n = 0 }\nfunc ns.inc() { self.n = self.n + 1\nreturn self.n }\nvar a = ns.inc()\nvar b = ns.inc()";
        let interp = Interpreter::new(InterpreterConfig::default());
        builtins::install_builtins(&interp);
        interp.run_source(src).unwrap();
        assert!(matches!(interp.get("a"), Some(Value::Int(1))));
        assert!(matches!(interp.get("b"), Some(Value::Int(2))));
    }

    #[test]
    fn spawn_join_returns_the_task_result() {
        let src = "func slow(x) { return x * 2 }\nvar h = spawn slow(21)\nvar r = h.join()";
        let interp = Interpreter::new(InterpreterConfig::default());
        builtins::install_builtins(&interp);
        interp.run_source(src).unwrap();
        assert!(matches!(interp.get("r"), Some(Value::Int(42))));
    }

    #[test]
    fn const_reassignment_fails() {
        let interp = Interpreter::new(InterpreterConfig::default());
        builtins::install_builtins(&interp);
        let err = interp.run_source("const PI = 3.14\nPI = 3").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConstantReassignment);
    }

    #[test]
    fn range_splices_into_a_list_literal() {
        let interp = Interpreter::new(InterpreterConfig::default());
        builtins::install_builtins(&interp);
        interp.run_source("var x = [1, 2..4, 9]").unwrap();
        let Some(Value::List(list)) = interp.get("x") else { panic!("expected list") };
        let items = list.lock().unwrap();
        assert_eq!(items.len(), 5);
    }

    #[test]
    fn if_body_var_is_visible_after_the_if() {
        let interp = Interpreter::new(InterpreterConfig::default());
        builtins::install_builtins(&interp);
        interp.run_source("var x = 1\nif (true) { var y = x + 1 }\nvar z = y").unwrap();
        assert!(matches!(interp.get("z"), Some(Value::Int(2))));
    }

    #[test]
    fn for_loop_variable_stays_bound_after_the_loop_ends() {
        let interp = Interpreter::new(InterpreterConfig::default());
        builtins::install_builtins(&interp);
        interp.run_source("for (i in [1, 2, 3]) { }\nvar x = i").unwrap();
        assert!(matches!(interp.get("x"), Some(Value::Int(3))));
    }

    #[test]
    fn running_a_bundle_resolves_imports_against_the_bundle_map_not_disk() {
        let lib = crate::parser::parse("var answer = 42").unwrap();
        let entry = crate::parser::parse("var u = import(\"lib\")\nvar x = u.answer").unwrap();
        let mut modules = std::collections::BTreeMap::new();
        modules.insert("/bundle/entry.aml".to_owned(), entry);
        modules.insert("/bundle/lib.aml".to_owned(), lib);
        let bundle = crate::bundle::Bundle::new("/bundle/entry.aml", modules, false);
        let dir = tempfile::tempdir().unwrap();
        let caml_path = dir.path().join("app.caml");
        std::fs::write(&caml_path, bundle.encode().unwrap()).unwrap();

        let interp = Interpreter::new(InterpreterConfig::default());
        builtins::install_builtins(&interp);
        interp.run_file(&caml_path).unwrap();
        assert!(matches!(interp.get("x"), Some(Value::Int(42))));
    }
}
