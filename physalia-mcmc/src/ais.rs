//! Annealed importance sampling.
//!
//! One chain walks a temperature ladder `0 = b_0 < b_1 < ... < b_n = 1`,
//! taking a few Metropolis sweeps at each level and accumulating the log
//! importance weight `sum_k (b_{k+1} - b_k) * ln L(x_k)`. Averaging
//! `exp(log_weight)` over independent runs estimates the ratio of
//! normalizing constants between the hot and cold ends of the ladder.

use physalia_core::{PhysaliaError, Result, Xorshift64};
use physalia_model::AnnealedModel;

use crate::metropolis::metropolis_step;
use crate::proposals::Proposal;

/// An annealed-importance-sampling driver.
#[derive(Debug, Clone)]
pub struct AisSampler {
    schedule: Vec<f64>,
    sweeps_per_level: usize,
}

impl AisSampler {
    /// Build from an ascending temperature schedule running from 0 to 1.
    pub fn new(schedule: Vec<f64>, sweeps_per_level: usize) -> Result<Self> {
        if schedule.len() < 2 {
            return Err(PhysaliaError::InvalidInput(
                "a temperature schedule needs at least two levels".into(),
            ));
        }
        if schedule[0] != 0.0 || *schedule.last().unwrap_or(&0.0) != 1.0 {
            return Err(PhysaliaError::InvalidInput(
                "the schedule must start at 0 and end at 1".into(),
            ));
        }
        if schedule.windows(2).any(|w| w[1] <= w[0]) {
            return Err(PhysaliaError::InvalidInput(
                "the schedule must increase strictly".into(),
            ));
        }
        if sweeps_per_level == 0 {
            return Err(PhysaliaError::InvalidInput(
                "at least one sweep per level is required".into(),
            ));
        }
        Ok(AisSampler {
            schedule,
            sweeps_per_level,
        })
    }

    /// An evenly spaced ladder with `n` increments.
    pub fn uniform(n: usize, sweeps_per_level: usize) -> Result<Self> {
        if n == 0 {
            return Err(PhysaliaError::InvalidInput(
                "the ladder needs at least one increment".into(),
            ));
        }
        let schedule = (0..=n).map(|k| k as f64 / n as f64).collect();
        AisSampler::new(schedule, sweeps_per_level)
    }

    pub fn schedule(&self) -> &[f64] {
        &self.schedule
    }

    /// Run one annealing pass, returning the log importance weight. The
    /// model is left at temperature 1.
    pub fn run<M>(
        &self,
        model: &mut M,
        proposals: &[Box<dyn Proposal>],
        rng: &mut Xorshift64,
    ) -> Result<f64>
    where
        M: AnnealedModel + Clone,
    {
        let mut log_weight = 0.0;

        for k in 0..self.schedule.len() - 1 {
            model.set_beta(self.schedule[k])?;
            for _ in 0..self.sweeps_per_level {
                for proposal in proposals {
                    metropolis_step(model, proposal.as_ref(), rng)?;
                }
            }
            let ln_like = model.likelihood()?.ln();
            log_weight += (self.schedule[k + 1] - self.schedule[k]) * ln_like;
        }

        model.set_beta(1.0)?;
        Ok(log_weight)
    }
}
