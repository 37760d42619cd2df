//! The Metropolis-Hastings acceptance discipline.
//!
//! A proposal produces a second model snapshot plus a log Hastings ratio;
//! acceptance compares heated posterior masses. Snapshots share their
//! likelihood caches copy-on-write, so rejection is a drop, not a rollback.

use physalia_core::{ExtReal, Result, Xorshift64};
use physalia_model::ProbabilityModel;

use crate::proposals::Proposal;

/// Accept the proposed snapshot with probability
/// `min(1, P2 / P1 * exp(rho))` where `P` is `prior x heated_likelihood`.
///
/// A zero proposed mass rejects outright, even against an infinite
/// Hastings factor (`0 * inf = 0`); a zero current mass accepts any
/// possible proposal.
pub fn accept_mh(
    current: &mut dyn ProbabilityModel,
    proposed: &mut dyn ProbabilityModel,
    log_hastings: f64,
    rng: &mut Xorshift64,
) -> Result<bool> {
    let p2 = proposed.heated_probability()?;
    if p2.is_zero() {
        return Ok(false);
    }
    let p1 = current.heated_probability()?;
    if p1.is_zero() {
        return Ok(true);
    }

    let ratio = (p2 / p1) * ExtReal::from_ln(log_hastings);
    if ratio >= ExtReal::one() {
        return Ok(true);
    }
    Ok(ExtReal::from_f64(rng.next_f64()) < ratio)
}

/// One propose/accept step over a cloneable model: clone, mutate the
/// clone, accept by replacing or reject by dropping.
pub fn metropolis_step<M>(
    model: &mut M,
    proposal: &dyn Proposal,
    rng: &mut Xorshift64,
) -> Result<bool>
where
    M: ProbabilityModel + Clone,
{
    let mut proposed = model.clone();
    let log_hastings = proposal.propose(&mut proposed, rng)?;
    let accept = accept_mh(model, &mut proposed, log_hastings, rng)?;
    if accept {
        *model = proposed;
    }
    Ok(accept)
}
