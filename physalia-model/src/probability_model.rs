//! The contract between models and the sampling drivers.

use physalia_core::{ExtReal, Result};

use crate::model::Model;

/// A model with a prior and a likelihood: everything the
/// Metropolis-Hastings driver needs.
///
/// `likelihood` takes `&mut self` because it must bring the model up to
/// date first: no likelihood is ever read before every pending parameter
/// mutation has propagated.
pub trait ProbabilityModel: Model {
    /// The data likelihood, updating first if necessary.
    fn likelihood(&mut self) -> Result<ExtReal>;

    /// The likelihood raised to the chain's temperature. Defaults to the
    /// cold likelihood.
    fn heated_likelihood(&mut self) -> Result<ExtReal> {
        self.likelihood()
    }

    /// `prior × likelihood`.
    fn probability(&mut self) -> Result<ExtReal> {
        self.update()?;
        let like = self.likelihood()?;
        Ok(self.prior() * like)
    }

    /// `prior × heated_likelihood`.
    fn heated_probability(&mut self) -> Result<ExtReal> {
        self.update()?;
        let like = self.heated_likelihood()?;
        Ok(self.prior() * like)
    }
}

/// A probability model whose likelihood can be raised to a chain
/// temperature, as the annealed-importance and coupled-chain drivers
/// require.
pub trait AnnealedModel: ProbabilityModel {
    /// Set the temperature in `[0, 1]`.
    fn set_beta(&mut self, beta: f64) -> Result<()>;

    fn get_beta(&self) -> f64;
}
