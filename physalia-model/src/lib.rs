//! Parameterized computable models for the Physalia workspace.
//!
//! A [`Model`] owns named parameters (value, bounds, fixity) and keeps a
//! validity flag: writes mark parameters dirty and invalidate the model,
//! [`Model::update`] recomputes lazily from exactly the dirty set. Composite
//! models route parameter writes into child models through slot bindings:
//!
//! - [`SuperModel`] — children are whole models whose lifted parameters
//!   become `prefix::name` parameters of the parent
//! - [`OpModel`] — the root is an [`physalia_graph::Operation`] whose
//!   argument slots bind to parameters, constants, or child models
//!
//! The crate also carries the probability densities used as priors (all
//! returning [`physalia_core::ExtReal`]) and the `::`-path utilities for
//! parameter lookup and display.

pub mod bounds;
pub mod densities;
pub mod model;
pub mod names;
pub mod op_model;
pub mod probability_model;
pub mod super_model;

pub use bounds::Bounds;
pub use model::{Model, ParamTable, Parameter};
pub use names::{parameters_with_extension, short_parameter_names};
pub use op_model::OpModel;
pub use probability_model::{AnnealedModel, ProbabilityModel};
pub use super_model::{ArgBinding, ModelSlot, SuperModel};
