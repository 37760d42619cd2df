//! Probability densities used as priors.
//!
//! Every density returns an [`ExtReal`] so that products over many
//! parameters stay representable. Points outside a density's support give
//! [`ExtReal::zero`] rather than an error: an impossible prior is a
//! rejected proposal, not a failure.

use std::f64::consts::PI;

use physalia_core::special::ln_gamma;
use physalia_core::{ExtReal, PhysaliaError, Result};

/// Dirichlet density over a simplex point `p` with concentration `n`.
///
/// # Errors
///
/// `InvalidInput` when the slices disagree in length or are empty.
pub fn dirichlet_pdf(p: &[f64], n: &[f64]) -> Result<ExtReal> {
    if p.is_empty() || p.len() != n.len() {
        return Err(PhysaliaError::InvalidInput(format!(
            "dirichlet_pdf: {} probabilities vs {} counts",
            p.len(),
            n.len()
        )));
    }
    if p.iter().any(|&x| x <= 0.0) || n.iter().any(|&a| a <= 0.0) {
        return Ok(ExtReal::zero());
    }

    let mut ln_pdf = ln_gamma(n.iter().sum());
    for (&pi, &ni) in p.iter().zip(n) {
        ln_pdf += (ni - 1.0) * pi.ln() - ln_gamma(ni);
    }
    Ok(ExtReal::from_ln(ln_pdf))
}

/// Dirichlet density parameterized by a total concentration `total` and a
/// mean simplex point `q`.
pub fn dirichlet_pdf_scaled(p: &[f64], total: f64, q: &[f64]) -> Result<ExtReal> {
    let n: Vec<f64> = q.iter().map(|&qi| total * qi).collect();
    dirichlet_pdf(p, &n)
}

/// Clamp concentrations below 1 up to 1, guarding against spikes at the
/// simplex boundary.
pub fn safe_count(n: &[f64]) -> Vec<f64> {
    n.iter().map(|&x| x.max(1.0)).collect()
}

/// Dirichlet density with boundary-safe concentrations.
pub fn dirichlet_safe_pdf(p: &[f64], n: &[f64]) -> Result<ExtReal> {
    dirichlet_pdf(p, &safe_count(n))
}

/// Exponential density with mean `mu`.
pub fn exponential_pdf(x: f64, mu: f64) -> ExtReal {
    if x < 0.0 || mu <= 0.0 {
        return ExtReal::zero();
    }
    ExtReal::from_ln(-x / mu - mu.ln())
}

/// Density of `y = ln(x + delta)` where `x` is exponential with mean `mu`.
pub fn exp_exponential_pdf(y: f64, mu: f64, delta: f64) -> ExtReal {
    let x = y.exp() - delta;
    if x < 0.0 || mu <= 0.0 {
        return ExtReal::zero();
    }
    ExtReal::from_ln(y - mu.ln() - x / mu)
}

/// Laplace density with location `mu` and scale `sigma`.
pub fn laplace_pdf(x: f64, mu: f64, sigma: f64) -> ExtReal {
    if sigma <= 0.0 {
        return ExtReal::zero();
    }
    ExtReal::from_ln(-(x - mu).abs() / sigma - (2.0 * sigma).ln())
}

/// Cauchy density with location `l` and scale `s`.
pub fn cauchy_pdf(x: f64, l: f64, s: f64) -> ExtReal {
    if s <= 0.0 {
        return ExtReal::zero();
    }
    let z = (x - l) / s;
    ExtReal::from_ln(-(PI * s * (1.0 + z * z)).ln())
}

/// Beta density on `(0, 1)`.
pub fn beta_pdf(p: f64, a: f64, b: f64) -> ExtReal {
    if !(0.0..=1.0).contains(&p) || p == 0.0 || p == 1.0 || a <= 0.0 || b <= 0.0 {
        return ExtReal::zero();
    }
    let ln_norm = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b);
    ExtReal::from_ln(ln_norm + (a - 1.0) * p.ln() + (b - 1.0) * (1.0 - p).ln())
}

/// Gamma density with shape `a` and scale `b`.
pub fn gamma_pdf(y: f64, a: f64, b: f64) -> ExtReal {
    if y < 0.0 || a <= 0.0 || b <= 0.0 {
        return ExtReal::zero();
    }
    if y == 0.0 {
        // Density at zero is finite only for shape >= 1.
        return if a > 1.0 {
            ExtReal::zero()
        } else if a == 1.0 {
            ExtReal::from_ln(-b.ln())
        } else {
            ExtReal::from_ln(f64::INFINITY)
        };
    }
    ExtReal::from_ln((a - 1.0) * y.ln() - y / b - ln_gamma(a) - a * b.ln())
}

/// Normal density with mean `mu` and standard deviation `sigma`.
pub fn normal_pdf(x: f64, mu: f64, sigma: f64) -> ExtReal {
    if sigma <= 0.0 {
        return ExtReal::zero();
    }
    let z = (x - mu) / sigma;
    ExtReal::from_ln(-0.5 * z * z - sigma.ln() - 0.5 * (2.0 * PI).ln())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    #[test]
    fn uniform_dirichlet_is_flat() {
        // Dirichlet(1,1,1) is the uniform density on the 2-simplex, whose
        // area is 1/2, so the density is Gamma(3) = 2 everywhere.
        let d1 = dirichlet_pdf(&[0.2, 0.3, 0.5], &[1.0, 1.0, 1.0]).unwrap();
        let d2 = dirichlet_pdf(&[0.6, 0.2, 0.2], &[1.0, 1.0, 1.0]).unwrap();
        assert!((d1.to_f64() - 2.0).abs() < TOL);
        assert!((d2.to_f64() - 2.0).abs() < TOL);
    }

    #[test]
    fn dirichlet_peaks_at_mean() {
        let n = [10.0, 20.0, 30.0];
        let at_mean = dirichlet_pdf(&[1.0 / 6.0, 2.0 / 6.0, 3.0 / 6.0], &n).unwrap();
        let away = dirichlet_pdf(&[0.5, 0.3, 0.2], &n).unwrap();
        assert!(at_mean > away);
    }

    #[test]
    fn dirichlet_rejects_length_mismatch() {
        assert!(dirichlet_pdf(&[0.5, 0.5], &[1.0]).is_err());
        assert!(dirichlet_pdf(&[], &[]).is_err());
    }

    #[test]
    fn dirichlet_boundary_is_impossible() {
        let d = dirichlet_pdf(&[0.0, 1.0], &[2.0, 2.0]).unwrap();
        assert!(d.is_zero());
    }

    #[test]
    fn safe_count_clamps_up() {
        assert_eq!(safe_count(&[0.2, 1.0, 3.0]), vec![1.0, 1.0, 3.0]);
    }

    #[test]
    fn exponential_matches_closed_form() {
        // f(x) = (1/mu) exp(-x/mu)
        let d = exponential_pdf(2.0, 4.0);
        assert!((d.ln() - (-(2.0 / 4.0) - 4.0_f64.ln())).abs() < TOL);
        assert!(exponential_pdf(-1.0, 4.0).is_zero());
    }

    #[test]
    fn beta_uniform_case() {
        assert!((beta_pdf(0.3, 1.0, 1.0).to_f64() - 1.0).abs() < TOL);
        assert!(beta_pdf(0.0, 2.0, 2.0).is_zero());
        assert!(beta_pdf(1.5, 2.0, 2.0).is_zero());
    }

    #[test]
    fn beta_symmetric_mode() {
        // Beta(2,2) has density 6 p (1-p); mode at 1/2 with value 1.5.
        assert!((beta_pdf(0.5, 2.0, 2.0).to_f64() - 1.5).abs() < TOL);
    }

    #[test]
    fn gamma_shape_one_is_exponential() {
        let g = gamma_pdf(2.0, 1.0, 4.0);
        let e = exponential_pdf(2.0, 4.0);
        assert!((g.ln() - e.ln()).abs() < TOL);
    }

    #[test]
    fn normal_standard_at_zero() {
        // 1/sqrt(2 pi)
        let d = normal_pdf(0.0, 0.0, 1.0);
        assert!((d.to_f64() - 1.0 / (2.0 * PI).sqrt()).abs() < TOL);
    }

    #[test]
    fn laplace_and_cauchy_symmetry() {
        assert_eq!(laplace_pdf(1.0, 0.0, 1.0), laplace_pdf(-1.0, 0.0, 1.0));
        assert_eq!(cauchy_pdf(2.0, 0.0, 1.0), cauchy_pdf(-2.0, 0.0, 1.0));
    }

    #[test]
    fn exp_exponential_change_of_variables() {
        // With delta = 0, y = ln x: f_Y(y) = e^y f_X(e^y).
        let y: f64 = 0.7;
        let expected = exponential_pdf(y.exp(), 2.0).ln() + y;
        assert!((exp_exponential_pdf(y, 2.0, 0.0).ln() - expected).abs() < TOL);
    }
}
