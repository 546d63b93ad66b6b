//! [`Condition`]: the predicate evaluated by conditional nodes, loop
//! `while` conditions, and edge annotations.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// What shape a [`Condition`] takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionKind {
    /// `value` holds expression source, evaluated directly to a boolean.
    Expression,
    /// `value` holds a [`Value::Variable`] compared against `operands` via
    /// `operator`.
    Variable,
    /// `value` holds a literal boolean.
    Literal,
}

/// The usual comparison and set-membership operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operator {
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// Set membership: the left operand appears in the right operand
    /// (array, or substring of a string).
    In,
    /// Negated [`Self::In`].
    NotIn,
}

/// A predicate, resolved and evaluated by the scheduler before branching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Which evaluation path applies.
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    /// The primary operand. For [`ConditionKind::Literal`] this is a
    /// `Value::Literal` wrapping a JSON boolean.
    pub value: Value,
    /// The comparison operator, required for [`ConditionKind::Variable`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<Operator>,
    /// The right-hand operand(s) to compare `value` against. A single
    /// operand for most operators; `in`/`not-in` compare against a single
    /// operand that resolves to a collection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operands: Option<Vec<Value>>,
}

impl Condition {
    /// An always-true / always-false literal condition.
    #[must_use]
    pub fn literal(value: bool) -> Self {
        Self {
            kind: ConditionKind::Literal,
            value: Value::literal(serde_json::Value::Bool(value)),
            operator: None,
            operands: None,
        }
    }

    /// An expression-evaluated condition.
    pub fn expression(src: impl Into<String>) -> Self {
        Self {
            kind: ConditionKind::Expression,
            value: Value::expression(src),
            operator: None,
            operands: None,
        }
    }

    /// A variable comparison: `variable <operator> operand`.
    pub fn variable(variable: Value, operator: Operator, operand: Value) -> Self {
        Self {
            kind: ConditionKind::Variable,
            value: variable,
            operator: Some(operator),
            operands: Some(vec![operand]),
        }
    }
}
