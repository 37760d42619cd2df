//! Dynamically typed parameter payloads with three-valued comparison.
//!
//! [`Value`] is the closed set of payload types a model parameter or graph
//! term can carry. Comparison returns a [`Comparison`] verdict rather than a
//! `bool`: scalar payloads compare exactly, while matrix and vector payloads
//! only compare their shapes and answer [`Comparison::Maybe`] when a deep
//! elementwise scan was not attempted. The evaluation cache uses this to
//! skip recomputation without ever trusting a stale value.

use ndarray::Array2;
use std::fmt;

use crate::{ExtReal, PhysaliaError, Result};

/// Verdict of a [`Value::compare`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Definitely equal.
    Yes,
    /// Definitely different.
    No,
    /// Deep equality was not attempted; treat as possibly different.
    Maybe,
}

impl Comparison {
    pub fn is_yes(self) -> bool {
        self == Comparison::Yes
    }

    pub fn is_no(self) -> bool {
        self == Comparison::No
    }
}

/// A dynamically typed, cloneable payload.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    UInt(u64),
    Double(f64),
    Ext(ExtReal),
    Matrix(Array2<f64>),
    Vector(Vec<f64>),
    Bool(bool),
    String(String),
}

impl Value {
    /// The variant name, used in [`PhysaliaError::TypeMismatch`] diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::UInt(_) => "UInt",
            Value::Double(_) => "Double",
            Value::Ext(_) => "Ext",
            Value::Matrix(_) => "Matrix",
            Value::Vector(_) => "Vector",
            Value::Bool(_) => "Bool",
            Value::String(_) => "String",
        }
    }

    /// Compare two values, conservatively.
    ///
    /// Scalars and strings compare exactly. Matrices and vectors compare
    /// their shapes only: a shape mismatch is a definite `No`, matching
    /// shapes answer `Maybe`. Different variants are definitely unequal.
    pub fn compare(&self, other: &Value) -> Comparison {
        use Value::*;
        match (self, other) {
            (Int(a), Int(b)) => yes_no(a == b),
            (UInt(a), UInt(b)) => yes_no(a == b),
            (Double(a), Double(b)) => yes_no(a == b),
            (Ext(a), Ext(b)) => yes_no(a == b),
            (Bool(a), Bool(b)) => yes_no(a == b),
            (String(a), String(b)) => yes_no(a == b),
            (Matrix(a), Matrix(b)) => {
                if a.dim() != b.dim() {
                    Comparison::No
                } else {
                    Comparison::Maybe
                }
            }
            (Vector(a), Vector(b)) => {
                if a.len() != b.len() {
                    Comparison::No
                } else {
                    Comparison::Maybe
                }
            }
            _ => Comparison::No,
        }
    }

    /// Read as a real number. Integer variants widen.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Double(x) => Ok(*x),
            Value::Int(i) => Ok(*i as f64),
            Value::UInt(u) => Ok(*u as f64),
            _ => Err(self.mismatch("Double")),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            _ => Err(self.mismatch("Int")),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            _ => Err(self.mismatch("Bool")),
        }
    }

    pub fn as_ext(&self) -> Result<ExtReal> {
        match self {
            Value::Ext(e) => Ok(*e),
            _ => Err(self.mismatch("Ext")),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::String(s) => Ok(s),
            _ => Err(self.mismatch("String")),
        }
    }

    pub fn as_vector(&self) -> Result<&[f64]> {
        match self {
            Value::Vector(v) => Ok(v),
            _ => Err(self.mismatch("Vector")),
        }
    }

    pub fn as_matrix(&self) -> Result<&Array2<f64>> {
        match self {
            Value::Matrix(m) => Ok(m),
            _ => Err(self.mismatch("Matrix")),
        }
    }

    fn mismatch(&self, expected: &'static str) -> PhysaliaError {
        PhysaliaError::TypeMismatch {
            expected,
            found: self.type_name(),
        }
    }
}

fn yes_no(eq: bool) -> Comparison {
    if eq {
        Comparison::Yes
    } else {
        Comparison::No
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Double(x)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Double(x) => write!(f, "{x}"),
            Value::Ext(e) => write!(f, "{e}"),
            Value::Matrix(m) => write!(f, "[matrix {}x{}]", m.nrows(), m.ncols()),
            Value::Vector(v) => write!(f, "[vector {}]", v.len()),
            Value::Bool(b) => write!(f, "{b}"),
            Value::String(s) => write!(f, "{s}"),
        }
    }
}
