//! Markov-chain Monte Carlo drivers for the Physalia workspace.
//!
//! - [`proposals`] — elementary proposal kernels on parameter vectors
//!   (scaling, shifting, Dirichlet, indicator flips) and the combinators
//!   that wrap them (boundary reflection, log and log-odds
//!   reparameterization, sorting), every one returning its log Hastings
//!   ratio
//! - [`metropolis`] — the accept test and the propose/accept/restore step
//!   over cloneable probability models
//! - [`ais`] — annealed importance sampling along a temperature ladder

pub mod ais;
pub mod metropolis;
pub mod proposals;

pub use ais::AisSampler;
pub use metropolis::{accept_mh, metropolis_step};
pub use proposals::{
    bit_flip, dirichlet_proposal, scale_gaussian, shift_cauchy, shift_delta, shift_epsilon,
    shift_gaussian, shift_laplace, Between, FnProposal, LessThan, LodScaled, LogScaled, MoreThan,
    Proposal, Proposal2, ProposalFn, Sorted,
};
