//! AST evaluation.

use serde_json::Value;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::ExpressionError;

/// Maximum nesting depth the evaluator will descend into. Expressions this
/// deep only arise from pathological input, not hand- or LLM-authored
/// flows; this bounds the worst case rather than serving real programs.
const MAX_RECURSION_DEPTH: usize = 64;

/// Supplies the values `$name`/`$name.path` references resolve to.
/// `loomflow-scheduler` implements this over the variable store.
pub trait VariableResolver {
    /// Resolve a variable, optionally projected by a dotted path. Returns
    /// `None` if the name is not bound.
    fn resolve_variable(&self, name: &str, path: Option<&str>) -> Option<Value>;
}

/// Evaluates a parsed [`Expr`] against a [`VariableResolver`].
#[derive(Debug, Default)]
pub struct Evaluator;

impl Evaluator {
    /// A fresh evaluator. Stateless: the same instance can evaluate any
    /// number of expressions against any number of resolvers.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Evaluate `expr` to a JSON value.
    pub fn eval(&self, expr: &Expr, resolver: &dyn VariableResolver) -> Result<Value, ExpressionError> {
        self.eval_depth(expr, resolver, 0)
    }

    fn eval_depth(&self, expr: &Expr, resolver: &dyn VariableResolver, depth: usize) -> Result<Value, ExpressionError> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(ExpressionError::RecursionLimit);
        }
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Variable { name, path } => resolver
                .resolve_variable(name, path.as_deref())
                .ok_or_else(|| ExpressionError::VariableNotFound(variable_display(name, path.as_deref()))),
            Expr::Unary(op, inner) => {
                let value = self.eval_depth(inner, resolver, depth + 1)?;
                eval_unary(*op, &value)
            }
            Expr::Binary(op, left, right) => {
                // Short-circuit boolean combinators without evaluating the
                // unused side.
                match op {
                    BinaryOp::And => {
                        let left = to_bool(&self.eval_depth(left, resolver, depth + 1)?);
                        if !left {
                            return Ok(Value::Bool(false));
                        }
                        Ok(Value::Bool(to_bool(&self.eval_depth(right, resolver, depth + 1)?)))
                    }
                    BinaryOp::Or => {
                        let left = to_bool(&self.eval_depth(left, resolver, depth + 1)?);
                        if left {
                            return Ok(Value::Bool(true));
                        }
                        Ok(Value::Bool(to_bool(&self.eval_depth(right, resolver, depth + 1)?)))
                    }
                    _ => {
                        let left = self.eval_depth(left, resolver, depth + 1)?;
                        let right = self.eval_depth(right, resolver, depth + 1)?;
                        eval_binary(*op, &left, &right)
                    }
                }
            }
        }
    }
}

fn variable_display(name: &str, path: Option<&str>) -> String {
    match path {
        Some(path) => format!("${name}.{path}"),
        None => format!("${name}"),
    }
}

fn eval_unary(op: UnaryOp, value: &Value) -> Result<Value, ExpressionError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!to_bool(value))),
        UnaryOp::Neg => as_number(value).map(|n| serde_json::json!(-n)),
    }
}

fn eval_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    match op {
        BinaryOp::Add => Ok(serde_json::json!(as_number(left)? + as_number(right)?)),
        BinaryOp::Sub => Ok(serde_json::json!(as_number(left)? - as_number(right)?)),
        BinaryOp::Mul => Ok(serde_json::json!(as_number(left)? * as_number(right)?)),
        BinaryOp::Div => {
            let divisor = as_number(right)?;
            if divisor == 0.0 {
                return Err(ExpressionError::DivideByZero);
            }
            Ok(serde_json::json!(as_number(left)? / divisor))
        }
        BinaryOp::Rem => {
            let divisor = as_number(right)?;
            if divisor == 0.0 {
                return Err(ExpressionError::DivideByZero);
            }
            Ok(serde_json::json!(as_number(left)? % divisor))
        }
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::Neq => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt => Ok(Value::Bool(as_number(left)? < as_number(right)?)),
        BinaryOp::Lte => Ok(Value::Bool(as_number(left)? <= as_number(right)?)),
        BinaryOp::Gt => Ok(Value::Bool(as_number(left)? > as_number(right)?)),
        BinaryOp::Gte => Ok(Value::Bool(as_number(left)? >= as_number(right)?)),
        BinaryOp::And | BinaryOp::Or => unreachable!("short-circuited in eval_depth"),
    }
}

fn as_number(value: &Value) -> Result<f64, ExpressionError> {
    value.as_f64().ok_or(ExpressionError::Type { expected: "number", actual: type_name(value) })
}

fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    left == right
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use std::collections::HashMap;

    struct MapResolver(HashMap<&'static str, Value>);

    impl VariableResolver for MapResolver {
        fn resolve_variable(&self, name: &str, path: Option<&str>) -> Option<Value> {
            let value = self.0.get(name)?;
            match path {
                Some(path) => {
                    let mut current = value;
                    for segment in path.split('.') {
                        current = current.get(segment)?;
                    }
                    Some(current.clone())
                }
                None => Some(value.clone()),
            }
        }
    }

    fn eval(src: &str, resolver: &dyn VariableResolver) -> Result<Value, ExpressionError> {
        let expr = parse(src).unwrap();
        Evaluator::new().eval(&expr, resolver)
    }

    #[test]
    fn arithmetic_respects_precedence() {
        let resolver = MapResolver(HashMap::new());
        assert_eq!(eval("1 + 2 * 3", &resolver).unwrap(), serde_json::json!(7.0));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let resolver = MapResolver(HashMap::new());
        assert_eq!(eval("1 / 0", &resolver).unwrap_err(), ExpressionError::DivideByZero);
    }

    #[test]
    fn variable_and_dotted_path_resolve() {
        let mut map = HashMap::new();
        map.insert("user", serde_json::json!({"age": 30}));
        let resolver = MapResolver(map);
        assert_eq!(eval("$user.age >= 18", &resolver).unwrap(), serde_json::json!(true));
    }

    #[test]
    fn unresolved_variable_is_an_error() {
        let resolver = MapResolver(HashMap::new());
        assert!(matches!(eval("$missing", &resolver), Err(ExpressionError::VariableNotFound(_))));
    }

    #[test]
    fn boolean_and_short_circuits() {
        let resolver = MapResolver(HashMap::new());
        // `$missing` is never resolved because the left side of `&&` is false.
        assert_eq!(eval("false && $missing", &resolver).unwrap(), serde_json::json!(false));
    }

    #[test]
    fn boolean_or_short_circuits() {
        let resolver = MapResolver(HashMap::new());
        assert_eq!(eval("true || $missing", &resolver).unwrap(), serde_json::json!(true));
    }

    #[test]
    fn negation_and_not_apply() {
        let resolver = MapResolver(HashMap::new());
        assert_eq!(eval("-5 + 2", &resolver).unwrap(), serde_json::json!(-3.0));
        assert_eq!(eval("!false", &resolver).unwrap(), serde_json::json!(true));
    }

    #[test]
    fn string_equality_does_not_coerce() {
        let mut map = HashMap::new();
        map.insert("name", serde_json::json!("Ada"));
        let resolver = MapResolver(map);
        assert_eq!(eval("$name == $name", &resolver).unwrap(), serde_json::json!(true));
    }
}
