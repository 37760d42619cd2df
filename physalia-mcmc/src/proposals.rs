//! Proposal kernels and their combinators.
//!
//! An elementary proposal mutates a vector of real parameter values in
//! place, reads its tuning constants from a parallel slice, draws from an
//! injected [`Xorshift64`], and returns the *log* Hastings ratio of the
//! move. Combinators wrap an inner proposal and adjust both the mutation
//! and the ratio; [`Proposal2`] binds a kernel to concrete parameter
//! indices of a model.

use physalia_core::{PhysaliaError, Result, Value, Xorshift64};
use physalia_model::densities::dirichlet_pdf;
use physalia_model::names::names_with_extension;
use physalia_model::ProbabilityModel;

/// A proposal kernel over a parameter vector.
pub trait ProposalFn {
    /// Mutate `x` in place and return the log Hastings ratio.
    fn propose(&self, x: &mut Vec<f64>, tuning: &[f64], rng: &mut Xorshift64) -> f64;
}

/// Kernel signature for the elementary proposals below.
pub type ProposalFnPtr = fn(&mut Vec<f64>, &[f64], &mut Xorshift64) -> f64;

/// Wrap a plain function as a [`ProposalFn`].
pub struct FnProposal(pub ProposalFnPtr);

impl ProposalFn for FnProposal {
    fn propose(&self, x: &mut Vec<f64>, tuning: &[f64], rng: &mut Xorshift64) -> f64 {
        (self.0)(x, tuning, rng)
    }
}

fn sigma(tuning: &[f64]) -> f64 {
    tuning.first().copied().unwrap_or(1.0)
}

/// Multiply each coordinate by `exp(sigma * Z)`. The log ratio is the sum
/// of the log scale factors.
pub fn scale_gaussian(x: &mut Vec<f64>, tuning: &[f64], rng: &mut Xorshift64) -> f64 {
    let s = sigma(tuning);
    let mut ratio = 0.0;
    for xi in x.iter_mut() {
        let factor = (s * rng.normal()).exp();
        *xi *= factor;
        ratio += factor.ln();
    }
    ratio
}

/// Add `sigma * Z` to each coordinate. Symmetric: ratio zero.
pub fn shift_gaussian(x: &mut Vec<f64>, tuning: &[f64], rng: &mut Xorshift64) -> f64 {
    let s = sigma(tuning);
    for xi in x.iter_mut() {
        *xi += s * rng.normal();
    }
    0.0
}

/// Add a Laplace step of scale `tuning[0]`. Symmetric.
pub fn shift_laplace(x: &mut Vec<f64>, tuning: &[f64], rng: &mut Xorshift64) -> f64 {
    let s = sigma(tuning);
    for xi in x.iter_mut() {
        *xi += rng.laplace(0.0, s);
    }
    0.0
}

/// Add a Cauchy step of scale `tuning[0]`. Symmetric.
pub fn shift_cauchy(x: &mut Vec<f64>, tuning: &[f64], rng: &mut Xorshift64) -> f64 {
    let s = sigma(tuning);
    for xi in x.iter_mut() {
        *xi += rng.cauchy(0.0, s);
    }
    0.0
}

/// Step each coordinate by a whole multiple of `tuning[0]`, up or down
/// with equal probability. Symmetric.
pub fn shift_delta(x: &mut Vec<f64>, tuning: &[f64], rng: &mut Xorshift64) -> f64 {
    let delta = sigma(tuning);
    for xi in x.iter_mut() {
        if rng.next_f64() < 0.5 {
            *xi += delta;
        } else {
            *xi -= delta;
        }
    }
    0.0
}

/// Add a uniform step from `[-tuning[0], tuning[0]]`. Symmetric.
pub fn shift_epsilon(x: &mut Vec<f64>, tuning: &[f64], rng: &mut Xorshift64) -> f64 {
    let eps = sigma(tuning);
    for xi in x.iter_mut() {
        *xi += rng.uniform(-eps, eps);
    }
    0.0
}

/// Flip each 0/1 indicator. Symmetric.
pub fn bit_flip(x: &mut Vec<f64>, _tuning: &[f64], _rng: &mut Xorshift64) -> f64 {
    for xi in x.iter_mut() {
        *xi = 1.0 - *xi;
    }
    0.0
}

/// Propose a new simplex point from a Dirichlet centred at the current
/// one, with concentration `tuning[0]`. Returns the log ratio of the
/// backward and forward Dirichlet densities.
pub fn dirichlet_proposal(x: &mut Vec<f64>, tuning: &[f64], rng: &mut Xorshift64) -> f64 {
    let n = tuning.first().copied().unwrap_or(10.0);
    let total: f64 = x.iter().sum();
    if total <= 0.0 || x.iter().any(|&xi| xi <= 0.0) {
        return 0.0; // degenerate point: leave it and let the prior reject
    }

    let current: Vec<f64> = x.iter().map(|&xi| xi / total).collect();
    let forward_alpha: Vec<f64> = current.iter().map(|&p| n * p).collect();
    let proposed = rng.dirichlet(&forward_alpha);
    let backward_alpha: Vec<f64> = proposed.iter().map(|&p| n * p).collect();

    let forward = dirichlet_pdf(&proposed, &forward_alpha);
    let backward = dirichlet_pdf(&current, &backward_alpha);
    let ratio = match (forward, backward) {
        (Ok(f), Ok(b)) if !f.is_zero() && !b.is_zero() => b.ln() - f.ln(),
        _ => f64::NEG_INFINITY,
    };

    // Restore the original total mass.
    for (xi, &p) in x.iter_mut().zip(&proposed) {
        *xi = p * total;
    }
    ratio
}

// ── Combinators ─────────────────────────────────────────────────────────

fn reflect_below(x: f64, max: f64) -> f64 {
    if x > max {
        2.0 * max - x
    } else {
        x
    }
}

fn reflect_above(x: f64, min: f64) -> f64 {
    if x < min {
        2.0 * min - x
    } else {
        x
    }
}

fn reflect_between(mut x: f64, lo: f64, hi: f64) -> f64 {
    while x < lo || x > hi {
        if x < lo {
            x = 2.0 * lo - x;
        }
        if x > hi {
            x = 2.0 * hi - x;
        }
    }
    x
}

/// Reflect the inner proposal at both boundaries. Reflection preserves
/// volume, so the ratio passes through.
pub struct Between {
    pub lo: f64,
    pub hi: f64,
    pub inner: Box<dyn ProposalFn>,
}

impl ProposalFn for Between {
    fn propose(&self, x: &mut Vec<f64>, tuning: &[f64], rng: &mut Xorshift64) -> f64 {
        let ratio = self.inner.propose(x, tuning, rng);
        for xi in x.iter_mut() {
            *xi = reflect_between(*xi, self.lo, self.hi);
        }
        ratio
    }
}

/// Reflect at an upper boundary.
pub struct LessThan {
    pub max: f64,
    pub inner: Box<dyn ProposalFn>,
}

impl ProposalFn for LessThan {
    fn propose(&self, x: &mut Vec<f64>, tuning: &[f64], rng: &mut Xorshift64) -> f64 {
        let ratio = self.inner.propose(x, tuning, rng);
        for xi in x.iter_mut() {
            *xi = reflect_below(*xi, self.max);
        }
        ratio
    }
}

/// Reflect at a lower boundary.
pub struct MoreThan {
    pub min: f64,
    pub inner: Box<dyn ProposalFn>,
}

impl ProposalFn for MoreThan {
    fn propose(&self, x: &mut Vec<f64>, tuning: &[f64], rng: &mut Xorshift64) -> f64 {
        let ratio = self.inner.propose(x, tuning, rng);
        for xi in x.iter_mut() {
            *xi = reflect_above(*xi, self.min);
        }
        ratio
    }
}

/// Run the inner proposal in log space: `y = ln x`. The change of
/// variables contributes `y' - y` per coordinate to the log ratio.
pub struct LogScaled {
    pub inner: Box<dyn ProposalFn>,
}

impl ProposalFn for LogScaled {
    fn propose(&self, x: &mut Vec<f64>, tuning: &[f64], rng: &mut Xorshift64) -> f64 {
        let mut y: Vec<f64> = x.iter().map(|&xi| xi.ln()).collect();
        let old_y = y.clone();
        let mut ratio = self.inner.propose(&mut y, tuning, rng);
        for ((xi, &yi), &old) in x.iter_mut().zip(&y).zip(&old_y) {
            *xi = yi.exp();
            ratio += yi - old;
        }
        ratio
    }
}

/// Run the inner proposal in log-odds space: `y = ln(x / (1 - x))`.
pub struct LodScaled {
    pub inner: Box<dyn ProposalFn>,
}

impl ProposalFn for LodScaled {
    fn propose(&self, x: &mut Vec<f64>, tuning: &[f64], rng: &mut Xorshift64) -> f64 {
        let mut y: Vec<f64> = x.iter().map(|&xi| (xi / (1.0 - xi)).ln()).collect();
        let old_x = x.clone();
        let mut ratio = self.inner.propose(&mut y, tuning, rng);
        for ((xi, &yi), &old) in x.iter_mut().zip(&y).zip(&old_x) {
            let new = 1.0 / (1.0 + (-yi).exp());
            *xi = new;
            ratio += (new * (1.0 - new)).ln() - (old * (1.0 - old)).ln();
        }
        ratio
    }
}

/// Run the inner proposal on the tuple, then sort ascending. The tuple is
/// unordered, so sorting leaves the ratio unchanged.
pub struct Sorted {
    pub inner: Box<dyn ProposalFn>,
}

impl ProposalFn for Sorted {
    fn propose(&self, x: &mut Vec<f64>, tuning: &[f64], rng: &mut Xorshift64) -> f64 {
        let ratio = self.inner.propose(x, tuning, rng);
        x.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        ratio
    }
}

// ── Binding to models ───────────────────────────────────────────────────

/// A proposal executable against a probability model.
pub trait Proposal {
    fn propose(&self, model: &mut dyn ProbabilityModel, rng: &mut Xorshift64) -> Result<f64>;
}

/// A kernel bound to specific model parameters plus tuning constants.
///
/// Executing it reads the bound parameter values, runs the kernel, writes
/// the results back (fixed parameters keep their old values), and returns
/// the log Hastings ratio. Kernels cannot see fixity, so they
/// must not be relied on to honour it.
pub struct Proposal2 {
    proposal: Box<dyn ProposalFn>,
    indices: Vec<usize>,
    tuning: Vec<f64>,
}

impl Proposal2 {
    pub fn new(proposal: Box<dyn ProposalFn>, indices: Vec<usize>, tuning: Vec<f64>) -> Self {
        Proposal2 {
            proposal,
            indices,
            tuning,
        }
    }

    /// Resolve parameter name patterns against a model.
    pub fn by_names(
        proposal: Box<dyn ProposalFn>,
        names: &[&str],
        tuning: Vec<f64>,
        model: &dyn ProbabilityModel,
    ) -> Result<Self> {
        let all_names: Vec<String> = model.table().iter().map(|p| p.name.clone()).collect();
        let mut indices = Vec::new();
        for name in names {
            let found = names_with_extension(&all_names, name)?;
            if found.is_empty() {
                return Err(PhysaliaError::InvalidInput(format!(
                    "no parameter matches '{name}'"
                )));
            }
            indices.extend(found);
        }
        Ok(Proposal2::new(proposal, indices, tuning))
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl Proposal for Proposal2 {
    fn propose(&self, model: &mut dyn ProbabilityModel, rng: &mut Xorshift64) -> Result<f64> {
        let mut x = Vec::with_capacity(self.indices.len());
        for &i in &self.indices {
            x.push(model.table().value_f64(i)?);
        }
        let old = x.clone();

        let ratio = self.proposal.propose(&mut x, &self.tuning, rng);

        let mut values = Vec::with_capacity(x.len());
        for ((&i, &new), &prev) in self.indices.iter().zip(&x).zip(&old) {
            let keep_old = model.table().is_fixed(i)?;
            values.push(Value::Double(if keep_old { prev } else { new }));
        }
        model.set_parameter_values(&self.indices, &values)?;
        Ok(ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rng() -> Xorshift64 {
        Xorshift64::new(2024)
    }

    // ── Elementary kernels ──────────────────────────────────────────────

    #[test]
    fn scale_gaussian_ratio_is_log_scale_change() {
        let mut r = rng();
        let mut x = vec![2.0];
        let ratio = scale_gaussian(&mut x, &[0.5], &mut r);
        assert!((ratio - (x[0] / 2.0).ln()).abs() < 1e-12);
    }

    #[test]
    fn symmetric_shifts_return_zero() {
        let mut r = rng();
        for kernel in [
            shift_gaussian as ProposalFnPtr,
            shift_laplace,
            shift_cauchy,
            shift_delta,
            shift_epsilon,
        ] {
            let mut x = vec![1.0, -2.0];
            assert_eq!(kernel(&mut x, &[0.3], &mut r), 0.0);
        }
    }

    #[test]
    fn shift_delta_steps_by_whole_deltas() {
        let mut r = rng();
        let mut x = vec![4.0];
        shift_delta(&mut x, &[1.5], &mut r);
        assert!((x[0] - 5.5).abs() < 1e-12 || (x[0] - 2.5).abs() < 1e-12);
    }

    #[test]
    fn bit_flip_flips() {
        let mut r = rng();
        let mut x = vec![0.0, 1.0];
        assert_eq!(bit_flip(&mut x, &[], &mut r), 0.0);
        assert_eq!(x, vec![1.0, 0.0]);
    }

    #[test]
    fn dirichlet_proposal_stays_on_the_simplex() {
        let mut r = rng();
        for _ in 0..100 {
            let mut x = vec![0.2, 0.3, 0.5];
            let ratio = dirichlet_proposal(&mut x, &[50.0], &mut r);
            let total: f64 = x.iter().sum();
            assert!((total - 1.0).abs() < 1e-9, "total {total}");
            assert!(x.iter().all(|&xi| xi >= 0.0));
            assert!(ratio.is_finite() || ratio == f64::NEG_INFINITY);
        }
    }

    #[test]
    fn dirichlet_proposal_preserves_total_mass() {
        let mut r = rng();
        let mut x = vec![2.0, 3.0, 5.0];
        dirichlet_proposal(&mut x, &[50.0], &mut r);
        let total: f64 = x.iter().sum();
        assert!((total - 10.0).abs() < 1e-9);
    }

    // ── Combinators ─────────────────────────────────────────────────────

    #[test]
    fn between_reflects_into_the_interval() {
        let mut r = rng();
        let p = Between {
            lo: 0.0,
            hi: 1.0,
            inner: Box::new(FnProposal(shift_gaussian)),
        };
        for _ in 0..500 {
            let mut x = vec![0.5];
            let ratio = p.propose(&mut x, &[3.0], &mut r);
            assert!((0.0..=1.0).contains(&x[0]), "escaped: {}", x[0]);
            assert_eq!(ratio, 0.0);
        }
    }

    #[test]
    fn one_sided_reflections() {
        let mut r = rng();
        let less = LessThan {
            max: 1.0,
            inner: Box::new(FnProposal(shift_gaussian)),
        };
        let more = MoreThan {
            min: 0.0,
            inner: Box::new(FnProposal(shift_gaussian)),
        };
        for _ in 0..200 {
            let mut x = vec![0.9];
            less.propose(&mut x, &[0.5], &mut r);
            assert!(x[0] <= 1.0);

            let mut y = vec![0.1];
            more.propose(&mut y, &[0.5], &mut r);
            assert!(y[0] >= 0.0);
        }
    }

    #[test]
    fn log_scaled_ratio_is_the_jacobian() {
        // With a symmetric inner kernel, the combined ratio must be
        // exactly ln(x') - ln(x).
        let mut r = rng();
        let p = LogScaled {
            inner: Box::new(FnProposal(shift_gaussian)),
        };
        for _ in 0..100 {
            let x0 = 2.5;
            let mut x = vec![x0];
            let ratio = p.propose(&mut x, &[1.0], &mut r);
            assert!(
                (ratio - (x[0].ln() - x0.ln())).abs() < 1e-12,
                "ratio {ratio} vs jacobian {}",
                x[0].ln() - x0.ln()
            );
            assert!(x[0] > 0.0, "log-scaled proposals stay positive");
        }
    }

    #[test]
    fn lod_scaled_stays_in_unit_interval() {
        let mut r = rng();
        let p = LodScaled {
            inner: Box::new(FnProposal(shift_gaussian)),
        };
        for _ in 0..200 {
            let x0 = 0.3;
            let mut x = vec![x0];
            let ratio = p.propose(&mut x, &[2.0], &mut r);
            assert!((0.0..1.0).contains(&x[0]));
            let expected =
                (x[0] * (1.0 - x[0])).ln() - (x0 * (1.0 - x0)).ln();
            assert!((ratio - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn sorted_returns_ascending() {
        let mut r = rng();
        let p = Sorted {
            inner: Box::new(FnProposal(shift_gaussian)),
        };
        let mut x = vec![3.0, 1.0, 2.0];
        let ratio = p.propose(&mut x, &[0.1], &mut r);
        assert_eq!(ratio, 0.0);
        assert!(x.windows(2).all(|w| w[0] <= w[1]), "{x:?}");
    }

    #[test]
    fn reflection_helpers() {
        assert_eq!(reflect_below(1.5, 1.0), 0.5);
        assert_eq!(reflect_below(0.5, 1.0), 0.5);
        assert_eq!(reflect_above(-0.5, 0.0), 0.5);
        assert!((reflect_between(1.3, 0.0, 1.0) - 0.7).abs() < 1e-12);
        assert!((reflect_between(-2.3, 0.0, 1.0) - 0.3).abs() < 1e-12);
    }
}
