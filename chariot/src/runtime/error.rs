// Error handling for the Chariot runtime

use crate::parser::ParseError;
use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Runtime errors that can occur during Chariot execution
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Undefined symbol/variable
    #[error("Undefined symbol: {0}")]
    UndefinedSymbol(String),

    /// Arity mismatch (wrong number of arguments)
    #[error("Arity mismatch in {function}: expected {expected}, got {actual}")]
    ArityMismatch {
        function: String,
        expected: String,
        actual: usize,
    },

    /// Type errors (wrong type for operation)
    #[error("Type error in {operation}: expected {expected}, got {actual}")]
    TypeError {
        expected: String,
        actual: String,
        operation: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Value is not callable
    #[error("Not callable: {0}")]
    NotCallable(String),

    #[error("Division by zero")]
    DivisionByZero,

    /// Failure reported by a host-provided builtin
    #[error("{function} failed: {message}")]
    HostError { function: String, message: String },

    #[error("Runtime error: {0}")]
    Generic(String),
}

impl RuntimeError {
    pub fn new(message: &str) -> RuntimeError {
        RuntimeError::Generic(message.to_string())
    }

    pub fn type_error(operation: &str, expected: &str, actual: &str) -> RuntimeError {
        RuntimeError::TypeError {
            expected: expected.to_string(),
            actual: actual.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn host(function: &str, message: impl ToString) -> RuntimeError {
        RuntimeError::HostError {
            function: function.to_string(),
            message: message.to_string(),
        }
    }
}
