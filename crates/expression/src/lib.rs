//! # Loomflow Expression
//!
//! The sandboxed expression language used by `Value::Expression` and
//! expression-kind [`loomflow_ir`]-style conditions: arithmetic,
//! comparisons, boolean combinators, and dotted `$name.path` variable
//! access. Deliberately excludes string concatenation, function calls, and
//! any host I/O — there is no way to express either in this grammar.

pub mod ast;
pub mod error;
pub mod eval;
pub mod parser;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use error::ExpressionError;
pub use eval::{Evaluator, VariableResolver};
pub use parser::parse;

/// Parse and evaluate `src` in one call.
pub fn evaluate(src: &str, resolver: &dyn VariableResolver) -> Result<serde_json::Value, ExpressionError> {
    let expr = parser::parse(src)?;
    Evaluator::new().eval(&expr, resolver)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Empty;
    impl VariableResolver for Empty {
        fn resolve_variable(&self, _name: &str, _path: Option<&str>) -> Option<serde_json::Value> {
            None
        }
    }

    #[test]
    fn evaluate_parses_and_runs_in_one_step() {
        assert_eq!(evaluate("2 + 2", &Empty).unwrap(), serde_json::json!(4.0));
    }

    #[test]
    fn evaluate_surfaces_parse_errors() {
        assert!(evaluate("2 +", &Empty).is_err());
    }
}
