//! Minimal host driver: runs `.aml` source or `.caml` bundles through the
//! `aml` interpreter. Proves the embedding API is callable; it is not a REPL
//! or a debugger.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use aml::tracer::StderrTracer;
use aml::{Completion, Interpreter, InterpreterConfig};
use clap::Parser;

/// Run an Aml script or compiled bundle.
#[derive(Parser)]
#[command(name = "aml", version, about)]
struct Cli {
    /// Path to a .aml source file or a .caml bundle.
    script: PathBuf,

    /// Additional directories to search for imported Aml modules.
    #[arg(short = 'I', long = "search-path")]
    search_paths: Vec<PathBuf>,

    /// Statements between cooperative micro-yields; 0 disables yielding.
    #[arg(long, default_value_t = aml::resource::DEFAULT_MICRO_YIELD_EVERY)]
    micro_yield_every: u64,

    /// Maximum call-stack recursion depth before failing with RecursionLimitExceeded.
    #[arg(long, default_value_t = aml::resource::DEFAULT_MAX_RECURSION_DEPTH)]
    max_recursion_depth: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = InterpreterConfig {
        micro_yield_every: cli.micro_yield_every,
        micro_yield_sleep: Duration::ZERO,
        max_recursion_depth: cli.max_recursion_depth,
        search_paths: cli.search_paths,
        ..InterpreterConfig::default()
    };

    let interp: Arc<Interpreter> = Interpreter::with_tracer(config, Arc::new(StderrTracer));
    aml::install_builtins(&interp);

    match interp.run_file(&cli.script) {
        Ok(Completion::Value(_)) => ExitCode::SUCCESS,
        Ok(Completion::Exit(code)) => ExitCode::from(code.rem_euclid(256) as u8),
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
