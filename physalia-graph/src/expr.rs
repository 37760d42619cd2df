//! Immutable, structurally shared expression trees.
//!
//! Expressions are the surface syntax for building computed terms: constants,
//! references to named parameters or existing formula terms, dummy variables
//! bound by lambdas, and operator applications. Subtrees are shared through
//! `Arc`, and substitution returns a fresh tree only along the spine that
//! actually changed.

use std::fmt;
use std::sync::Arc;

use physalia_core::{PhysaliaError, Result, Value};

use crate::ops::Operation;

/// An expression node.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A literal value.
    Constant(Value),
    /// A reference to a named parameter, resolved at lowering time.
    Param(String),
    /// A reference to an existing formula term by index.
    Term(usize),
    /// A dummy (bound) variable.
    Dummy(u32),
    /// A lambda binding one dummy in its body.
    Lambda(u32, Arc<Expr>),
    /// An operation applied to argument expressions.
    Apply(&'static Operation, Vec<Arc<Expr>>),
    /// A handle into a caller-maintained table of child models.
    ModelRef(usize),
}

impl Expr {
    /// Wrap a value as a constant expression.
    pub fn constant(v: impl Into<Value>) -> Arc<Expr> {
        Arc::new(Expr::Constant(v.into()))
    }

    /// Reference a named parameter.
    pub fn param(name: &str) -> Arc<Expr> {
        Arc::new(Expr::Param(name.to_string()))
    }

    /// Apply an operation to arguments, checking arity.
    pub fn apply(op: &'static Operation, args: Vec<Arc<Expr>>) -> Result<Arc<Expr>> {
        if args.len() != op.arity {
            return Err(PhysaliaError::InvalidInput(format!(
                "operation '{}' takes {} arguments, got {}",
                op.name,
                op.arity,
                args.len()
            )));
        }
        Ok(Arc::new(Expr::Apply(op, args)))
    }

    /// The least dummy id not used anywhere in this expression.
    ///
    /// New lambdas bind ids at or above this, which keeps substitution
    /// hygienic without renaming.
    pub fn highest_unused_dummy(&self) -> u32 {
        match self {
            Expr::Constant(_) | Expr::Param(_) | Expr::Term(_) | Expr::ModelRef(_) => 0,
            Expr::Dummy(i) => i + 1,
            Expr::Lambda(d, body) => (d + 1).max(body.highest_unused_dummy()),
            Expr::Apply(_, args) => args
                .iter()
                .map(|a| a.highest_unused_dummy())
                .max()
                .unwrap_or(0),
        }
    }

    /// Substitute `replacement` for `Dummy(dummy)`.
    ///
    /// Returns `None` when the expression does not contain the dummy, so
    /// unchanged subtrees keep being shared.
    pub fn substitute(&self, dummy: u32, replacement: &Arc<Expr>) -> Option<Arc<Expr>> {
        match self {
            Expr::Dummy(i) if *i == dummy => Some(Arc::clone(replacement)),
            Expr::Lambda(d, body) => {
                if *d == dummy {
                    // Shadowed: the inner binding wins.
                    None
                } else {
                    body.substitute(dummy, replacement)
                        .map(|new_body| Arc::new(Expr::Lambda(*d, new_body)))
                }
            }
            Expr::Apply(op, args) => {
                let mut changed = false;
                let new_args: Vec<Arc<Expr>> = args
                    .iter()
                    .map(|a| match a.substitute(dummy, replacement) {
                        Some(n) => {
                            changed = true;
                            n
                        }
                        None => Arc::clone(a),
                    })
                    .collect();
                changed.then(|| Arc::new(Expr::Apply(op, new_args)))
            }
            _ => None,
        }
    }

    /// Beta-reduce a lambda against an argument.
    ///
    /// `(lambda d. body) arg` becomes `body[d := arg]`. Applying anything
    /// that is not a lambda is an error.
    pub fn beta_reduce(&self, arg: &Arc<Expr>) -> Result<Arc<Expr>> {
        match self {
            Expr::Lambda(d, body) => Ok(body
                .substitute(*d, arg)
                .unwrap_or_else(|| Arc::clone(body))),
            _ => Err(PhysaliaError::InvalidInput(format!(
                "cannot apply non-lambda expression '{self}'"
            ))),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Constant(v) => write!(f, "{v}"),
            Expr::Param(name) => write!(f, "{name}"),
            Expr::Term(i) => write!(f, "%{i}"),
            Expr::Dummy(i) => write!(f, "#{i}"),
            Expr::Lambda(d, body) => write!(f, "(lambda #{d})({body})"),
            Expr::Apply(op, args) => {
                let printed: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}", (op.pretty)(op.name, &printed))
            }
            Expr::ModelRef(i) => write!(f, "@model{i}"),
        }
    }
}
