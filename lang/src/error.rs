//! Error types for the language crate

use thiserror::Error;

/// Errors surfaced by the engine API itself. Script-level problems
/// (syntax errors, runtime faults) are accumulated as messages instead,
/// because compilation and execution must keep going past them.
#[derive(Error, Debug, Clone)]
pub enum LangError {
    #[error("program has {0} compile error(s) and cannot be executed")]
    CompileErrors(usize),

    #[error("program has no code")]
    EmptyProgram,
}

/// Expression parse failures, reported as syntax errors on the line that
/// contained the expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("invalid assignment target")]
    InvalidAssignment,

    #[error("invalid number `{0}`")]
    InvalidNumber(String),
}

/// Faults raised while evaluating a classical expression. Caught by the
/// engine and appended to the step's error list; the step still counts as
/// executed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("invalid operand: {0}")]
    InvalidOperand(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, LangError>;
