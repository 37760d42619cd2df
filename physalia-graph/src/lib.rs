//! Reactive parameter/expression graph for the Physalia workspace.
//!
//! The graph layer separates *structure* from *state*:
//!
//! - [`Formula`] is the structure — an append-only, topologically ordered
//!   DAG of terms (constants, mutable state, computed terms), with
//!   affects-adjacency kept in both directions.
//! - [`Context`] is one valuation of a formula — per-term cached results
//!   with change-tracking, so that after a parameter write only the terms
//!   that might actually have changed are re-evaluated.
//! - [`Expr`] is the immutable surface syntax from which computed terms are
//!   lowered into a formula.
//! - [`Operation`]s are plain data records (name, arity, evaluator), not an
//!   open class hierarchy; the built-in registry covers the arithmetic the
//!   model layer needs.

pub mod context;
pub mod expr;
pub mod formula;
pub mod ops;

pub use context::{Computation, Context};
pub use expr::Expr;
pub use formula::{Formula, TermKind};
pub use ops::{Operation, OperationArgs};
