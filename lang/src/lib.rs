//! # QScript Language
//!
//! Front-end and stepping execution engine for QScript, a small imperative
//! language that drives a state-vector quantum simulator.
//!
//! ## Pipeline
//!
//! - **Lexer**: per-line state machine producing Id / Expression /
//!   Separator tokens
//! - **Compiler**: token streams to a tree of functions holding flat
//!   opcode programs with resolved branch targets
//! - **Expression evaluator**: typed ASTs over a flat, scoped variable
//!   store with per-step undo recording
//! - **Engine**: opcode interpreter with call stack, breakpoints and a
//!   reversible history; quantum builtins act on [`qscript_sim::QState`]
//!
//! ## Example
//!
//! ```rust
//! use qscript_lang::{compile, Engine, NullHost};
//!
//! let program = compile("VectorSize 6\nHadamard 0\nCNot 0, 1\nMeasure");
//! let mut engine = Engine::new(program, Box::new(NullHost)).unwrap();
//! while engine.run_step() {}
//!
//! let outcome = engine.measured_value();
//! assert!(outcome == 0 || outcome == 3);
//! ```

pub mod builtins;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod expr;
pub mod lexer;
pub mod token;

pub use builtins::{Builtin, Reverse};
pub use compiler::{compile, Command, Func, FuncId, Opcode, Program};
pub use engine::{Engine, Frame, Host, NullHost};
pub use error::{EvalError, LangError, ParseError, Result};
pub use expr::{Env, Expr, Value};
pub use lexer::tokenize_line;
pub use token::{Token, TokenKind};
