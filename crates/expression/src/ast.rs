//! The expression AST. Deliberately small: arithmetic, comparison, boolean
//! logic, and dotted variable access — nothing that could read or write
//! outside the evaluation context (no function calls, no string
//! concatenation, no property access into arbitrary host objects).

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation (`-x`).
    Neg,
    /// Boolean negation (`!x`).
    Not,
}

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `==`
    Eq,
    /// `!=`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `&&`
    And,
    /// `||`
    Or,
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal number, string, boolean, or null.
    Literal(serde_json::Value),
    /// `$name` or `$name.a.b`.
    Variable {
        /// The variable's name in the evaluation context.
        name: String,
        /// Optional dotted path into the variable's value.
        path: Option<String>,
    },
    /// A unary operator applied to an operand.
    Unary(UnaryOp, Box<Expr>),
    /// A binary operator applied to two operands.
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}
