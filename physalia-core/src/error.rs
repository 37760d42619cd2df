//! Structured error types for the Physalia workspace.

use thiserror::Error;

/// Unified error type for all Physalia operations.
#[derive(Debug, Error)]
pub enum PhysaliaError {
    /// A term, parameter or branch index outside the valid range.
    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    /// A [`crate::Value`] read as an incompatible concrete type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A state term or parameter evaluated before any value was assigned.
    #[error("'{0}' has no value assigned")]
    UnsetState(String),

    /// A parameter or term name that duplicates an existing one.
    #[error("a parameter named '{0}' already exists")]
    NameCollision(String),

    /// A broken structural invariant: cycles, inconsistent adjacency lists,
    /// tokens with dangling cache mappings.
    #[error("structure violation: {0}")]
    Structure(String),

    /// Invalid input (bad arguments, out-of-range values).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience alias used throughout the Physalia workspace.
pub type Result<T> = std::result::Result<T, PhysaliaError>;

impl PhysaliaError {
    /// Shorthand for an [`PhysaliaError::IndexOutOfRange`] with the standard
    /// fields filled in.
    pub fn index(what: &'static str, index: usize, len: usize) -> Self {
        PhysaliaError::IndexOutOfRange { what, index, len }
    }
}
