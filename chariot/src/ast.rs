// AST for Chariot source programs

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Literal values as written in source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    Nil,
}

/// A function literal: `func(a, b) { ... }`.
///
/// The body is shared so closures created from the same literal do not copy it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub params: Vec<String>,
    pub body: Arc<Vec<Expression>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Literal(Literal),
    Identifier(String),
    Call { name: String, args: Vec<Expression> },
    Function(FunctionDef),
}

impl Expression {
    pub fn call(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Call {
            name: name.into(),
            args,
        }
    }

    pub fn identifier(name: impl Into<String>) -> Self {
        Expression::Identifier(name.into())
    }

    /// Name of the identifier, if this expression is a bare identifier.
    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Expression::Identifier(name) => Some(name),
            _ => None,
        }
    }
}

/// A parsed program: top-level expressions evaluated in order.
pub type Program = Vec<Expression>;
