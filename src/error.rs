// ABOUTME: Error types for every stage of the pipeline, lexing through execution

use crate::value::Value;
use std::path::PathBuf;
use thiserror::Error;

/// Lexing failure. The lexer stops at the first one.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("LexError: {message} at {line}:{column}")]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl LexError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        LexError {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Parsing failure. The parser synchronises and keeps going; these are
/// collected rather than aborting the parse.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("ParseError: {message} at {line}:{column}")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        ParseError {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Name-binding failure found by the resolver. Collected; compilation aborts
/// if at least one exists.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("SemanticError: {message} at {line}:{column}")]
pub struct SemanticError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl SemanticError {
    pub fn new(message: impl Into<String>, line: u32, column: u32) -> Self {
        SemanticError {
            message: message.into(),
            line,
            column,
        }
    }
}

/// Module resolution failure. Not recoverable; aborts the compile.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ImportError {
    #[error("ImportError: module '{module}' not found in paths: {searched:?}")]
    NotFound {
        module: String,
        searched: Vec<PathBuf>,
    },
    #[error("ImportError: circular dependency detected: {chain}")]
    Cycle { chain: String },
    #[error("ImportError: cannot read module '{module}': {message}")]
    Unreadable { module: String, message: String },
    #[error("ImportError: module '{module}' failed to parse: {message}")]
    Malformed { module: String, message: String },
}

/// The subkind of a runtime error. `Thrown` carries a user `throw` payload;
/// `Exit` is the uncatchable unwind used by the `exit` native.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    Type,
    Name,
    Index,
    Key,
    DivisionByZero,
    Assertion,
    Cancelled,
    Thrown(Value),
    Exit(i32),
}

impl RuntimeErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            RuntimeErrorKind::Type => "TypeError",
            RuntimeErrorKind::Name => "NameError",
            RuntimeErrorKind::Index => "IndexError",
            RuntimeErrorKind::Key => "KeyError",
            RuntimeErrorKind::DivisionByZero => "DivisionByZero",
            RuntimeErrorKind::Assertion => "AssertionError",
            RuntimeErrorKind::Cancelled => "Cancelled",
            RuntimeErrorKind::Thrown(_) => "RuntimeError",
            RuntimeErrorKind::Exit(_) => "Exit",
        }
    }
}

/// A runtime error, catchable via `try`/`catch` (except `Exit`). The source
/// position is attached by the VM from the faulting instruction.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{}: {message} at {line}:{column}", kind.name())]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, message: impl Into<String>) -> Self {
        RuntimeError {
            kind,
            message: message.into(),
            line: 0,
            column: 0,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Type, message)
    }

    pub fn name_error(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Name, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Index, message)
    }

    pub fn key_error(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Key, message)
    }

    pub fn division_by_zero() -> Self {
        Self::new(RuntimeErrorKind::DivisionByZero, "division by zero")
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Assertion, message)
    }

    pub fn cancelled() -> Self {
        Self::new(RuntimeErrorKind::Cancelled, "execution cancelled")
    }

    pub fn thrown(value: Value, message: impl Into<String>) -> Self {
        Self::new(RuntimeErrorKind::Thrown(value), message)
    }

    pub fn exit(code: i32) -> Self {
        Self::new(RuntimeErrorKind::Exit(code), format!("exit({code})"))
    }

    /// Attach a source position, keeping the first one set.
    pub fn at(mut self, line: u32, column: u32) -> Self {
        if self.line == 0 {
            self.line = line;
            self.column = column;
        }
        self
    }

    /// Whether a user `catch` clause may intercept this error.
    pub fn is_catchable(&self) -> bool {
        !matches!(self.kind, RuntimeErrorKind::Exit(_))
    }
}

/// Everything that can stop `compile` from producing an IR module.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("{}", format_list(.0))]
    Parse(Vec<ParseError>),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error("{}", format_list(.0))]
    Semantic(Vec<SemanticError>),
}

/// Top-level error for `run`: either the compile failed or execution did.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProxError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("IoError: {0}")]
    Io(String),
}

fn format_list<E: std::fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_visible_format() {
        let err = RuntimeError::division_by_zero().at(3, 7);
        assert_eq!(err.to_string(), "DivisionByZero: division by zero at 3:7");

        let err = LexError::new("Unterminated string literal", 2, 5);
        assert_eq!(
            err.to_string(),
            "LexError: Unterminated string literal at 2:5"
        );
    }

    #[test]
    fn test_position_is_attached_once() {
        let err = RuntimeError::type_error("bad operand").at(1, 1).at(9, 9);
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 1);
    }

    #[test]
    fn test_exit_is_not_catchable() {
        assert!(!RuntimeError::exit(2).is_catchable());
        assert!(RuntimeError::cancelled().is_catchable());
    }
}
