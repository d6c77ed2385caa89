//! Whitelisted arithmetic interpreter for `${eval:...}` interpolations.
//!
//! The language is deliberately tiny: numeric literals, the operators
//! `+ - * / // % **`, parentheses, a fixed set of functions and references.
//! References are handed back to the caller through [`Resolve`], so this
//! crate never sees the configuration tree itself.

mod error;
mod eval;
mod lexer;
mod parser;

pub use error::ExprError;
pub use eval::{evaluate, evaluate_expr};
pub use lexer::{tokenize, Token};
pub use parser::{parse, BinaryOp, Expr, Function, UnaryOp};

use std::fmt;

/// A numeric value produced by the interpreter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    /// Value as a float, converting integers.
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn is_int(self) -> bool {
        matches!(self, Number::Int(_))
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Int(value)
    }
}

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Number::Float(value)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{}", i),
            // Keep a trailing ".0" so floats stay recognisable when spliced.
            Number::Float(x) if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 => {
                write!(f, "{:.1}", x)
            }
            Number::Float(x) => write!(f, "{}", x),
        }
    }
}

/// A reference appearing inside an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Bare dotted path, e.g. `trainer.max_epochs`.
    Path(String),
    /// Nested interpolation body, e.g. the `trainer.max_epochs` of
    /// `${trainer.max_epochs}`.
    Interpolation(String),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Path(p) => write!(f, "{}", p),
            Reference::Interpolation(body) => write!(f, "${{{}}}", body),
        }
    }
}

/// Supplies numeric values for references during evaluation.
pub trait Resolve {
    /// Look up a reference. The error string is wrapped into
    /// [`ExprError::Reference`].
    fn resolve(&mut self, reference: &Reference) -> Result<Number, String>;
}

impl<F> Resolve for F
where
    F: FnMut(&Reference) -> Result<Number, String>,
{
    fn resolve(&mut self, reference: &Reference) -> Result<Number, String> {
        self(reference)
    }
}

/// Resolver for expressions that must not contain references.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReferences;

impl Resolve for NoReferences {
    fn resolve(&mut self, reference: &Reference) -> Result<Number, String> {
        Err(format!("references are not available here: {}", reference))
    }
}
