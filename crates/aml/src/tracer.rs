//! Hand-rolled diagnostics hooks, grounded on `ouros::tracer::VmTracer`: no
//! example repo in the retrieval pack depends on `log`/`tracing`, so instead
//! of bolting one on, Aml's evaluator calls into a small `Tracer` trait with
//! one method per event worth observing. `NoopTracer` compiles away to
//! nothing in the hot path; `StderrTracer` is what `aml-cli` installs.

use crate::error::AmlError;
use crate::resolver::Warning;

pub trait Tracer {
    fn enter_call(&self, _function: &str) {}
    fn leave_call(&self, _function: &str) {}
    fn statement(&self, _line: u32) {}
    fn cache_hit(&self, _path: &str) {}
    fn cache_miss(&self, _path: &str) {}
    fn module_loaded(&self, _path: &str) {}
    fn warning(&self, _warning: &Warning) {}
    fn raised(&self, _error: &AmlError) {}
}

#[derive(Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}

#[derive(Default)]
pub struct StderrTracer;

impl Tracer for StderrTracer {
    fn module_loaded(&self, path: &str) {
        eprintln!("[aml] loaded module {path}");
    }

    fn warning(&self, warning: &Warning) {
        eprintln!("[aml] warning: {} (line {}, column {})", warning.message, warning.line, warning.column);
    }

    fn raised(&self, error: &AmlError) {
        eprintln!("[aml] {error}");
    }
}

/// Collects every event instead of printing them, used by tests that assert
/// on tracer output rather than stdout/stderr.
#[derive(Default)]
pub struct RecordingTracer {
    pub warnings: std::sync::Mutex<Vec<String>>,
    pub raised: std::sync::Mutex<Vec<String>>,
    pub modules_loaded: std::sync::Mutex<Vec<String>>,
}

impl Tracer for RecordingTracer {
    fn module_loaded(&self, path: &str) {
        self.modules_loaded.lock().unwrap().push(path.to_owned());
    }

    fn warning(&self, warning: &Warning) {
        self.warnings.lock().unwrap().push(warning.message.clone());
    }

    fn raised(&self, error: &AmlError) {
        self.raised.lock().unwrap().push(error.to_string());
    }
}
