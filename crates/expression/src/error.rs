//! Errors the sandboxed evaluator can raise.

use thiserror::Error;

/// Everything that can go wrong parsing or evaluating an expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    /// The source text does not form a valid expression.
    #[error("expression syntax error: {0}")]
    Syntax(String),
    /// A `$name` or `$name.path` reference did not resolve.
    #[error("variable not found: {0}")]
    VariableNotFound(String),
    /// An operator was applied to a value of the wrong type.
    #[error("type error: expected {expected}, found {actual}")]
    Type {
        /// The type the operator required.
        expected: &'static str,
        /// The type actually produced.
        actual: &'static str,
    },
    /// Division or modulo by zero.
    #[error("division by zero")]
    DivideByZero,
    /// Nested expression exceeded the evaluator's recursion ceiling.
    #[error("expression nesting exceeds the evaluator's recursion limit")]
    RecursionLimit,
}
