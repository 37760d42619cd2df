//! Pair-HMM dynamic programming for probabilistic sequence alignment.
//!
//! The engine computes forward tables over two sequences under a pair hidden
//! Markov model whose states are classified by an emission bit pattern
//! (silent, emit-in-1, emit-in-2, emit-in-both), mixed over per-site
//! substitution rate classes, at a sampling temperature `beta`:
//!
//! - [`DpMatrix`] — the full forward table, with per-cell power-of-two
//!   scaling so the probabilities of long alignments never underflow
//! - [`DpMatrix::forward_band`] — a banded scan that only fills cells near
//!   the diagonal
//! - [`DpMatrixConstrained`] — per-column allowed-state sets, for pinning
//!   parts of an alignment
//! - [`DpMatrix::sample_path`] — backward stochastic traceback, drawing an
//!   alignment path in proportion to its posterior probability
//! - [`DpMatrix::path_p`] — re-scoring of a given path under the same model

pub mod constrained;
pub mod dp_matrix;
pub mod emission;
pub mod hmm;
pub mod table;

pub use constrained::DpMatrixConstrained;
pub use dp_matrix::{bandwidth, DpMatrix};
pub use emission::{letter_dists, EmissionParams};
pub use hmm::{PairHmm, EMIT_1, EMIT_2, EMIT_BOTH, EMIT_NONE};
pub use table::StateTable;
