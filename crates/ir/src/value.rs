//! [`Value`]: the tagged union every node input and condition operand is
//! built from.

use loomflow_core::NodeId;
use serde::{Deserialize, Serialize};

/// A value that a node input, condition operand, or loop collection
/// resolves to at run time.
///
/// Resolution is the Join/Resolver's job (`loomflow-scheduler`); this type
/// only carries the unevaluated shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Value {
    /// A constant, used as-is.
    Literal {
        /// The constant payload.
        value: serde_json::Value,
    },
    /// A named variable in the state store, optionally projected by a
    /// dotted path (`user.address.city`).
    Variable {
        /// The variable's name in the state store.
        name: String,
        /// Optional dotted path into the variable's value.
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Source text for the sandboxed expression evaluator.
    Expression {
        /// Expression source (arithmetic, comparisons, booleans, `$name.path`).
        src: String,
    },
    /// A previously executed node's recorded output, optionally projected.
    Reference {
        /// The producing node.
        node_id: NodeId,
        /// Optional dotted path into that node's output.
        #[serde(skip_serializing_if = "Option::is_none")]
        output_field: Option<String>,
    },
}

impl Value {
    /// Construct a [`Self::Literal`].
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal { value: value.into() }
    }

    /// Construct a [`Self::Variable`] with no path projection.
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable { name: name.into(), path: None }
    }

    /// Construct a [`Self::Variable`] with a dotted path projection.
    pub fn variable_path(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Variable { name: name.into(), path: Some(path.into()) }
    }

    /// Construct an [`Self::Expression`].
    pub fn expression(src: impl Into<String>) -> Self {
        Self::Expression { src: src.into() }
    }

    /// Construct a [`Self::Reference`] to a whole node output.
    pub fn reference(node_id: impl Into<NodeId>) -> Self {
        Self::Reference { node_id: node_id.into(), output_field: None }
    }

    /// Construct a [`Self::Reference`] projected by a dotted path.
    pub fn reference_field(node_id: impl Into<NodeId>, output_field: impl Into<String>) -> Self {
        Self::Reference { node_id: node_id.into(), output_field: Some(output_field.into()) }
    }

    /// Parse an authoring-time string form (used by static-flow compilation
    /// and flow-JSON decoding):
    ///
    /// - `$name` or `$name.a.b` → [`Self::Variable`]
    /// - a string containing whitespace and an operator character
    ///   (`+ - * / = < > ! & |`) → [`Self::Expression`]
    /// - anything else → [`Self::Literal`] (the raw JSON string)
    #[must_use]
    pub fn from_authoring_str(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix('$') {
            return match rest.split_once('.') {
                Some((name, path)) => Self::variable_path(name, path),
                None => Self::variable(rest),
            };
        }
        if looks_like_expression(raw) {
            return Self::expression(raw);
        }
        Self::literal(serde_json::Value::String(raw.to_owned()))
    }

    /// Parse an arbitrary authoring-time JSON value: strings go through
    /// [`Self::from_authoring_str`], everything else becomes a literal.
    #[must_use]
    pub fn from_authoring_json(raw: &serde_json::Value) -> Self {
        match raw {
            serde_json::Value::String(s) => Self::from_authoring_str(s),
            other => Self::literal(other.clone()),
        }
    }
}

/// A string "looks like" a sandboxed expression when it contains whitespace
/// and at least one operator character — distinguishing `"2 + 2"` from a
/// plain literal string like `"hello world"`. This is a syntactic heuristic
/// only; the expression evaluator is the final authority on validity.
fn looks_like_expression(raw: &str) -> bool {
    const OPERATOR_CHARS: &[char] = &['+', '-', '*', '/', '=', '<', '>', '!', '&', '|'];
    raw.chars().any(char::is_whitespace) && raw.chars().any(|c| OPERATOR_CHARS.contains(&c))
}
