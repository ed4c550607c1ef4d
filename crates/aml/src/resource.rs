//! Interpreter configuration and cooperative resource limits (SPEC_FULL
//! §4.3), grounded on `ouros::resource::ResourceLimits` but re-aimed at a
//! tree-walking evaluator: a statement counter driving an optional
//! micro-yield (recovered from the reference's `configure_micro_yield`/
//! `disable_micro_yield`), a call-stack depth guard, and a single shared
//! cancellation flag (recovered from the reference's `cancel`/
//! `reset_cancel`). Cancellation is checked at statement and loop
//! boundaries only — it never preempts an in-flight host call.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::AmlError;

pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 512;
pub const DEFAULT_MICRO_YIELD_EVERY: u64 = 1024;
pub const MODULE_CACHE_CLEAR_THRESHOLD: usize = 256;

#[derive(Debug, Clone)]
pub struct InterpreterConfig {
    /// Statements between cooperative micro-yields. `0` disables yielding
    /// entirely (`disable_micro_yield` in the reference).
    pub micro_yield_every: u64,
    /// How long to sleep at each micro-yield point; `Duration::ZERO` yields
    /// the OS scheduler (`thread::yield_now`) instead of sleeping.
    pub micro_yield_sleep: Duration,
    pub max_recursion_depth: usize,
    pub search_paths: Vec<PathBuf>,
    pub cache_dir_name: String,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            micro_yield_every: DEFAULT_MICRO_YIELD_EVERY,
            micro_yield_sleep: Duration::ZERO,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            search_paths: Vec::new(),
            cache_dir_name: ".aml_cache".to_owned(),
        }
    }
}

/// Per-interpreter-instance mutable resource state: the statement counter,
/// the call-depth counter, and the cancellation flag. Shared across
/// `spawn`ed task threads via `Arc` so cancelling the embedder's handle
/// stops every in-flight task too.
pub struct ResourceTracker {
    config: InterpreterConfig,
    extra_search_paths: Mutex<Vec<PathBuf>>,
    cancelled: Arc<AtomicBool>,
    statement_count: AtomicU64,
    call_depth: AtomicUsize,
}

impl ResourceTracker {
    pub fn new(config: InterpreterConfig) -> Self {
        Self {
            config,
            extra_search_paths: Mutex::new(Vec::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
            statement_count: AtomicU64::new(0),
            call_depth: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Every configured search path plus any added at runtime via
    /// `Interpreter::add_aml_search_path`, in the order they should be tried.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        let mut paths = self.config.search_paths.clone();
        paths.extend(self.extra_search_paths.lock().unwrap().iter().cloned());
        paths
    }

    pub fn add_search_path(&self, dir: PathBuf) {
        self.extra_search_paths.lock().unwrap().push(dir);
    }

    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Called once per executed statement. Returns `Cancelled` if the
    /// embedder cancelled execution since the last check; otherwise may
    /// block briefly for the configured micro-yield.
    pub fn check_statement(&self) -> Result<(), AmlError> {
        if self.is_cancelled() {
            return Err(AmlError::cancelled());
        }
        if self.config.micro_yield_every > 0 {
            let n = self.statement_count.fetch_add(1, Ordering::Relaxed) + 1;
            if n % self.config.micro_yield_every == 0 {
                if self.config.micro_yield_sleep.is_zero() {
                    std::thread::yield_now();
                } else {
                    std::thread::sleep(self.config.micro_yield_sleep);
                }
            }
        }
        Ok(())
    }

    /// Increments the call-depth counter for the duration of a function
    /// call, erroring instead of letting a runaway recursive `func`
    /// overflow the host stack.
    pub fn enter_call(&self, function: &str, line: u32, column: u32) -> Result<CallGuard<'_>, AmlError> {
        let depth = self.call_depth.fetch_add(1, Ordering::SeqCst) + 1;
        if depth > self.config.max_recursion_depth {
            self.call_depth.fetch_sub(1, Ordering::SeqCst);
            return Err(AmlError::recursion_limit_exceeded(function, self.config.max_recursion_depth, line, column));
        }
        Ok(CallGuard { tracker: self })
    }
}

pub struct CallGuard<'a> {
    tracker: &'a ResourceTracker,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.tracker.call_depth.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_flag_is_observed_by_check_statement() {
        let tracker = ResourceTracker::new(InterpreterConfig::default());
        tracker.cancel();
        assert!(tracker.check_statement().is_err());
        tracker.reset_cancel();
        assert!(tracker.check_statement().is_ok());
    }

    #[test]
    fn recursion_past_the_limit_errors_and_unwinds_the_depth_counter() {
        let mut config = InterpreterConfig::default();
        config.max_recursion_depth = 2;
        let tracker = ResourceTracker::new(config);
        let _g1 = tracker.enter_call("f", 1, 1).unwrap();
        let _g2 = tracker.enter_call("f", 1, 1).unwrap();
        assert!(tracker.enter_call("f", 1, 1).is_err());
    }
}
