//! Shared primitives for the Physalia Bayesian phylogenetics workspace.
//!
//! `physalia-core` provides the foundation that all other Physalia crates
//! build on:
//!
//! - **Error types** — [`PhysaliaError`] and [`Result`] for structured error
//!   handling
//! - **Values** — [`Value`], the dynamically typed parameter payload, with
//!   three-valued comparison via [`Comparison`]
//! - **Extended-range reals** — [`ExtReal`] for products of thousands of
//!   probabilities without underflow
//! - **Copy-on-write handles** — [`CowPtr`] for O(1) state snapshots during
//!   proposal/reject cycles
//! - **Randomness** — [`Xorshift64`], a seedable PRNG that is passed
//!   explicitly wherever sampling happens

pub mod cow;
pub mod error;
pub mod extreal;
pub mod rng;
pub mod special;
pub mod value;

pub use cow::CowPtr;
pub use error::{PhysaliaError, Result};
pub use extreal::ExtReal;
pub use rng::Xorshift64;
pub use value::{Comparison, Value};
