//! Per-cell emission probabilities under a substitution-rate mixture.
//!
//! For each sequence position the caller supplies a conditional-likelihood
//! matrix `(n_rates x n_letters)`: the probability of the data observed at
//! that position given the ancestral letter and rate class. Together with
//! the root equilibrium frequencies and the rate-class weights this yields
//! the match emission
//!
//! `emit_mm(i, j) = sum_r w_r * sum_a freq[r,a] * d1[i][r,a] * d2[j][r,a]`
//!
//! and the single-sequence emissions `emit_m_` / `emit__m` in which the
//! gapped side contributes a neutral factor of one. The single-sequence
//! sums are precomputed once per construction.

use ndarray::Array2;
use physalia_core::{PhysaliaError, Result};

/// Rate-mixture emission parameters for one sequence pair.
#[derive(Debug, Clone)]
pub struct EmissionParams {
    weights: Vec<f64>,
    dists1: Vec<Array2<f64>>,
    dists2: Vec<Array2<f64>>,
    freq: Array2<f64>,
    /// Precomputed `emit_m_(i)` for every position of sequence 1.
    s1_sub: Vec<f64>,
    /// Precomputed `emit__m(j)` for every position of sequence 2.
    s2_sub: Vec<f64>,
}

impl EmissionParams {
    pub fn new(
        weights: Vec<f64>,
        dists1: Vec<Array2<f64>>,
        dists2: Vec<Array2<f64>>,
        freq: Array2<f64>,
    ) -> Result<Self> {
        let shape = freq.dim();
        if shape.0 != weights.len() {
            return Err(PhysaliaError::InvalidInput(format!(
                "{} rate weights but frequency matrix has {} rate rows",
                weights.len(),
                shape.0
            )));
        }
        for d in dists1.iter().chain(dists2.iter()) {
            if d.dim() != shape {
                return Err(PhysaliaError::InvalidInput(format!(
                    "emission matrix shape {:?} does not match frequencies {:?}",
                    d.dim(),
                    shape
                )));
            }
        }

        let single = |d: &Array2<f64>| -> f64 {
            let mut total = 0.0;
            for (r, &w) in weights.iter().enumerate() {
                let mut inner = 0.0;
                for a in 0..shape.1 {
                    inner += freq[(r, a)] * d[(r, a)];
                }
                total += w * inner;
            }
            total
        };
        let s1_sub: Vec<f64> = dists1.iter().map(single).collect();
        let s2_sub: Vec<f64> = dists2.iter().map(single).collect();

        Ok(EmissionParams {
            weights,
            dists1,
            dists2,
            freq,
            s1_sub,
            s2_sub,
        })
    }

    pub fn len1(&self) -> usize {
        self.dists1.len()
    }

    pub fn len2(&self) -> usize {
        self.dists2.len()
    }

    pub fn n_rates(&self) -> usize {
        self.weights.len()
    }

    /// Both sequences emit: positions `i`, `j` are 1-based.
    pub fn emit_mm(&self, i: usize, j: usize) -> f64 {
        let d1 = &self.dists1[i - 1];
        let d2 = &self.dists2[j - 1];
        let (n_rates, n_letters) = self.freq.dim();
        let mut total = 0.0;
        for r in 0..n_rates {
            let mut inner = 0.0;
            for a in 0..n_letters {
                inner += self.freq[(r, a)] * d1[(r, a)] * d2[(r, a)];
            }
            total += self.weights[r] * inner;
        }
        total
    }

    /// Only sequence 1 emits at position `i` (1-based).
    pub fn emit_m_(&self, i: usize) -> f64 {
        self.s1_sub[i - 1]
    }

    /// Only sequence 2 emits at position `j` (1-based).
    pub fn emit__m(&self, j: usize) -> f64 {
        self.s2_sub[j - 1]
    }

    /// Neither sequence emits.
    pub fn emit__(&self) -> f64 {
        1.0
    }
}

/// Emission matrices for a plain observed letter: likelihood one for the
/// matching letter under every rate class, `mismatch` for the rest.
pub fn letter_dists(letters: &[usize], n_rates: usize, n_letters: usize, mismatch: f64) -> Vec<Array2<f64>> {
    letters
        .iter()
        .map(|&l| {
            Array2::from_shape_fn((n_rates, n_letters), |(_, a)| {
                if a == l {
                    1.0
                } else {
                    mismatch
                }
            })
        })
        .collect()
}
