//! Phylogenetic state for the Physalia workspace.
//!
//! This crate owns the tree-shaped side of the MCMC state:
//!
//! - [`Tree`] — an unrooted tree over directed-branch indices, where branch
//!   `b` and its reversal `b ^ 1` share an undirected edge
//! - [`SubstitutionModel`] / [`IndelModel`] — the interfaces through which
//!   rate mixtures and branch pair-HMMs are consumed
//! - [`MultiLikelihoodCache`] — a pool of per-branch conditional-likelihood
//!   tables shared between MCMC snapshots through reference-counted tokens
//! - [`DataPartition`] and [`Parameters`] — the aggregate probability model
//!   the samplers drive

pub mod alignment;
pub mod cache;
pub mod indel;
pub mod partition;
pub mod subst;
pub mod tree;

pub use alignment::Alignment;
pub use cache::{BranchCache, LikelihoodCache, MultiLikelihoodCache};
pub use indel::{GeometricIndel, IndelModel};
pub use partition::{DataPartition, Parameters};
pub use subst::{Alphabet, Dna, JukesCantorMixture, SubstitutionModel};
pub use tree::{NodeSet, Tree};
