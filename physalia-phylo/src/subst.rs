//! Substitution-side interfaces consumed by the likelihood machinery.
//!
//! The concrete model zoo lives outside this workspace; the cache and the
//! partitions only need mixture weights, equilibria and transition
//! probability matrices.

use ndarray::Array2;
use physalia_core::{PhysaliaError, Result};

/// A character alphabet.
pub trait Alphabet {
    fn size(&self) -> usize;

    fn letter_name(&self, i: usize) -> String;

    /// Default equilibrium frequencies.
    fn frequency_default(&self) -> Vec<f64> {
        vec![1.0 / self.size() as f64; self.size()]
    }
}

/// The four nucleotides.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dna;

impl Alphabet for Dna {
    fn size(&self) -> usize {
        4
    }

    fn letter_name(&self, i: usize) -> String {
        ["A", "C", "G", "T"].get(i).unwrap_or(&"?").to_string()
    }
}

/// A mixture of continuous-time substitution processes.
pub trait SubstitutionModel {
    /// Alphabet size.
    fn n_states(&self) -> usize;

    /// Number of mixture components (rate classes).
    fn n_models(&self) -> usize;

    /// Mixture weights, summing to one.
    fn weights(&self) -> Vec<f64>;

    /// Equilibrium frequencies of component `m`.
    fn equilibrium(&self, m: usize) -> Vec<f64>;

    /// Transition probabilities over branch length `t` for component `m`.
    fn transition_p(&self, t: f64, m: usize) -> Array2<f64>;
}

/// An equal-frequency model with per-component rate multipliers: the
/// Jukes-Cantor process generalized to any alphabet size, mixed over
/// rates.
#[derive(Debug, Clone)]
pub struct JukesCantorMixture {
    n_states: usize,
    rates: Vec<f64>,
}

impl JukesCantorMixture {
    pub fn new(n_states: usize, rates: Vec<f64>) -> Result<Self> {
        if n_states < 2 {
            return Err(PhysaliaError::InvalidInput(
                "an alphabet needs at least two letters".into(),
            ));
        }
        if rates.is_empty() || rates.iter().any(|&r| r < 0.0) {
            return Err(PhysaliaError::InvalidInput(
                "rate multipliers must be non-negative and non-empty".into(),
            ));
        }
        Ok(JukesCantorMixture { n_states, rates })
    }

    /// A single-component model with rate one.
    pub fn uniform(n_states: usize) -> Result<Self> {
        JukesCantorMixture::new(n_states, vec![1.0])
    }
}

impl SubstitutionModel for JukesCantorMixture {
    fn n_states(&self) -> usize {
        self.n_states
    }

    fn n_models(&self) -> usize {
        self.rates.len()
    }

    fn weights(&self) -> Vec<f64> {
        vec![1.0 / self.rates.len() as f64; self.rates.len()]
    }

    fn equilibrium(&self, _m: usize) -> Vec<f64> {
        vec![1.0 / self.n_states as f64; self.n_states]
    }

    fn transition_p(&self, t: f64, m: usize) -> Array2<f64> {
        let n = self.n_states as f64;
        // Jukes-Cantor with mean substitution rate one, scaled by the
        // component's multiplier.
        let decay = (-n / (n - 1.0) * self.rates[m] * t).exp();
        let same = 1.0 / n + (n - 1.0) / n * decay;
        let diff = 1.0 / n - decay / n;
        Array2::from_shape_fn((self.n_states, self.n_states), |(a, b)| {
            if a == b {
                same
            } else {
                diff
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dna_basics() {
        assert_eq!(Dna.size(), 4);
        assert_eq!(Dna.letter_name(2), "G");
        assert_eq!(Dna.frequency_default(), vec![0.25; 4]);
    }

    #[test]
    fn transition_rows_are_distributions() {
        let m = JukesCantorMixture::new(4, vec![0.5, 2.0]).unwrap();
        for comp in 0..m.n_models() {
            let p = m.transition_p(0.3, comp);
            for a in 0..4 {
                let row: f64 = (0..4).map(|b| p[(a, b)]).sum();
                assert!((row - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn zero_length_is_identity() {
        let m = JukesCantorMixture::uniform(4).unwrap();
        let p = m.transition_p(0.0, 0);
        for a in 0..4 {
            for b in 0..4 {
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((p[(a, b)] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn long_branches_approach_equilibrium() {
        let m = JukesCantorMixture::uniform(4).unwrap();
        let p = m.transition_p(100.0, 0);
        for a in 0..4 {
            for b in 0..4 {
                assert!((p[(a, b)] - 0.25).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn faster_components_mix_sooner() {
        let m = JukesCantorMixture::new(4, vec![0.1, 10.0]).unwrap();
        let slow = m.transition_p(0.1, 0)[(0, 0)];
        let fast = m.transition_p(0.1, 1)[(0, 0)];
        assert!(slow > fast);
    }

    #[test]
    fn construction_is_validated() {
        assert!(JukesCantorMixture::new(1, vec![1.0]).is_err());
        assert!(JukesCantorMixture::new(4, vec![]).is_err());
        assert!(JukesCantorMixture::new(4, vec![-1.0]).is_err());
    }
}
