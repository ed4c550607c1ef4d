//! Aml: lexer, parser, resolver, tree-walking evaluator, module loader, task
//! runtime, reactive layer, and compiled-bundle format for the Aml
//! automation scripting language.
//!
//! A minimal embedding looks like:
//!
//! ```
//! let interp = aml::Interpreter::new(aml::InterpreterConfig::default());
//! aml::install_builtins(&interp);
//! interp.run_source("print(\"hello\")").unwrap();
//! ```

pub mod ast;
pub mod bundle;
pub mod builtins;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod host;
pub mod lexer;
pub mod loader;
pub mod numeric;
pub mod parser;
pub mod reactive;
pub mod resolver;
pub mod resource;
pub mod task;
pub mod token;
pub mod tracer;
pub mod value;

pub use bundle::Bundle;
pub use builtins::install_builtins;
pub use error::{AmlError, ErrorKind, Signal};
pub use evaluator::{Completion, Interpreter};
pub use resource::InterpreterConfig;
pub use value::Value;
