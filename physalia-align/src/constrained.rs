//! Forward DP with per-column state constraints.
//!
//! Each column `j` (a position of sequence 2) carries the subset of HMM
//! states allowed to appear there, which pins parts of an alignment while
//! the rest is marginalized. Disallowed cells are simply never filled, so
//! they contribute zero mass; sampling through the restricted table then
//! respects the constraints automatically.

use physalia_core::{ExtReal, PhysaliaError, Result, Xorshift64};

use crate::dp_matrix::DpMatrix;

/// A [`DpMatrix`] whose columns restrict which states may appear.
#[derive(Debug, Clone)]
pub struct DpMatrixConstrained {
    base: DpMatrix,
    /// `allowed[j]` holds the states allowed in column `j`, scan-ordered.
    allowed: Vec<Vec<usize>>,
}

impl DpMatrixConstrained {
    /// Wrap a matrix with no constraints yet: every state allowed in every
    /// column.
    pub fn new(base: DpMatrix) -> Self {
        let all = base.hmm().scan_order();
        let allowed = vec![all; base.len2() + 1];
        DpMatrixConstrained { base, allowed }
    }

    pub fn matrix(&self) -> &DpMatrix {
        &self.base
    }

    /// The states allowed in column `j`.
    pub fn states(&self, j: usize) -> &[usize] {
        &self.allowed[j]
    }

    /// Restrict column `j` to `states`.
    pub fn set_states(&mut self, j: usize, states: &[usize]) -> Result<()> {
        let n = self.base.hmm().n_states();
        if j >= self.allowed.len() {
            return Err(PhysaliaError::index("column", j, self.allowed.len()));
        }
        for &s in states {
            if s >= n {
                return Err(PhysaliaError::index("state", s, n));
            }
        }
        // Keep the scan order: emitting states first, silent after.
        let mut ordered: Vec<usize> = self
            .base
            .hmm()
            .scan_order()
            .into_iter()
            .filter(|s| states.contains(s))
            .collect();
        ordered.dedup();
        self.allowed[j] = ordered;
        Ok(())
    }

    /// Drop allowed states that no allowed predecessor can reach.
    ///
    /// A state consuming a position of sequence 2 must be reachable from
    /// some allowed state of the previous column (or from the start, in
    /// column one); a state that does not consume sequence 2 looks at its
    /// own column. One left-to-right pass propagates emptiness rightward.
    pub fn prune(&mut self) {
        let hmm = self.base.hmm().clone();
        for j in 0..self.allowed.len() {
            let prev: Option<Vec<usize>> = if j > 0 {
                Some(self.allowed[j - 1].clone())
            } else {
                None
            };
            let same = self.allowed[j].clone();
            self.allowed[j].retain(|&s| {
                let sources: &[usize] = if hmm.dj(s) == 1 {
                    match &prev {
                        Some(p) => p,
                        None => return false, // consumes sequence 2 in column 0
                    }
                } else {
                    &same
                };
                let from_start = (j == hmm.dj(s)) && hmm.start[s] > 0.0;
                from_start
                    || sources
                        .iter()
                        .any(|&sp| sp != s && hmm.trans[(sp, s)] > 0.0)
                    || (hmm.trans[(s, s)] > 0.0 && sources.contains(&s))
            });
        }
    }

    /// The topological fill schedule: columns left to right, rows top to
    /// bottom within a column, allowed states in scan order within a cell.
    pub fn order_of_computation(&self) -> Vec<(usize, usize)> {
        let mut order = Vec::with_capacity((self.base.len1() + 1) * (self.base.len2() + 1));
        for j in 0..=self.base.len2() {
            for i in 0..=self.base.len1() {
                order.push((i, j));
            }
        }
        order
    }

    /// Fill the table under the column constraints.
    pub fn forward(&mut self) {
        for (i, j) in self.order_of_computation() {
            let states = self.allowed[j].clone();
            self.base.forward_cell_states(i, j, &states);
        }
    }

    pub fn forward_total(&self) -> ExtReal {
        self.base.forward_total()
    }

    /// Sample a path through the constrained table.
    pub fn sample_path(&self, rng: &mut Xorshift64) -> Result<Vec<usize>> {
        self.base.sample_path(rng)
    }

    /// Re-score a path under the unconstrained model.
    pub fn path_p(&self, path: &[usize]) -> Result<ExtReal> {
        self.base.path_p(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emission::{letter_dists, EmissionParams};
    use crate::hmm::PairHmm;
    use ndarray::Array2;

    fn mid_hmm() -> PairHmm {
        PairHmm::mid(
            [0.8, 0.1, 0.1],
            [[0.7, 0.1, 0.1], [0.1, 0.8, 0.0], [0.1, 0.0, 0.8]],
        )
        .unwrap()
    }

    fn uniform_emission(seq1: &[usize], seq2: &[usize]) -> EmissionParams {
        let freq = Array2::from_elem((1, 2), 0.5);
        EmissionParams::new(
            vec![1.0],
            letter_dists(seq1, 1, 2, 0.25),
            letter_dists(seq2, 1, 2, 0.25),
            freq,
        )
        .unwrap()
    }

    fn base_matrix(seq1: &[usize], seq2: &[usize]) -> DpMatrix {
        DpMatrix::with_emission(
            seq1.len(),
            seq2.len(),
            mid_hmm(),
            1.0,
            uniform_emission(seq1, seq2),
        )
        .unwrap()
    }

    #[test]
    fn unconstrained_equals_full_forward() {
        let (s1, s2) = (vec![0, 1, 0], vec![0, 1]);
        let mut full = base_matrix(&s1, &s2);
        full.forward_square();

        let mut constrained = DpMatrixConstrained::new(base_matrix(&s1, &s2));
        constrained.forward();

        assert!(
            (full.forward_total().ln() - constrained.forward_total().ln()).abs() < 1e-12
        );
    }

    #[test]
    fn match_only_constraint_leaves_one_path() {
        let (s1, s2) = (vec![0, 1], vec![0, 1]);
        let mut c = DpMatrixConstrained::new(base_matrix(&s1, &s2));
        for j in 0..=2 {
            c.set_states(j, &[0]).unwrap();
        }
        c.forward();

        let only_path = c.path_p(&[0, 0]).unwrap();
        assert!(
            (c.forward_total().ln() - only_path.ln()).abs() < 1e-12,
            "total {} vs single path {}",
            c.forward_total().ln(),
            only_path.ln()
        );
    }

    #[test]
    fn constrained_total_never_exceeds_full() {
        let (s1, s2) = (vec![0, 1, 1], vec![1, 0]);
        let mut full = base_matrix(&s1, &s2);
        full.forward_square();

        let mut c = DpMatrixConstrained::new(base_matrix(&s1, &s2));
        c.set_states(1, &[0, 2]).unwrap();
        c.forward();

        assert!(c.forward_total() <= full.forward_total());
    }

    #[test]
    fn sampling_respects_constraints() {
        let (s1, s2) = (vec![0, 1], vec![0, 1]);
        let mut c = DpMatrixConstrained::new(base_matrix(&s1, &s2));
        c.set_states(1, &[0]).unwrap();
        c.forward();

        let mut rng = Xorshift64::new(21);
        for _ in 0..100 {
            let path = c.sample_path(&mut rng).unwrap();
            // The state consuming the first position of sequence 2 must be
            // the match state.
            let mut j = 0;
            for &s in &path {
                j += c.matrix().hmm().dj(s);
                if j == 1 && c.matrix().hmm().dj(s) == 1 {
                    assert_eq!(s, 0, "path {path:?} broke the column constraint");
                    break;
                }
            }
        }
    }

    #[test]
    fn prune_drops_unreachable_states() {
        // I->D and M->D transitions removed: D is unreachable anywhere.
        let hmm = PairHmm::mid(
            [0.8, 0.2, 0.0],
            [[0.7, 0.2, 0.0], [0.2, 0.7, 0.0], [0.1, 0.1, 0.7]],
        )
        .unwrap();
        let (s1, s2) = (vec![0, 1], vec![0, 1]);
        let em = uniform_emission(&s1, &s2);
        let base = DpMatrix::with_emission(2, 2, hmm, 1.0, em).unwrap();
        let mut c = DpMatrixConstrained::new(base);

        c.prune();
        for j in 1..=2 {
            assert!(
                !c.states(j).contains(&2),
                "column {j} still allows the unreachable delete state"
            );
            assert!(c.states(j).contains(&0));
        }
    }

    #[test]
    fn emptied_column_kills_the_total() {
        let (s1, s2) = (vec![0, 1], vec![0, 1]);
        let mut c = DpMatrixConstrained::new(base_matrix(&s1, &s2));
        // Column 2 allows only the insert state, which never consumes
        // sequence 2: nothing can complete.
        c.set_states(2, &[1]).unwrap();
        c.forward();
        assert!(c.forward_total().is_zero());
    }

    #[test]
    fn set_states_validates() {
        let (s1, s2) = (vec![0], vec![0]);
        let mut c = DpMatrixConstrained::new(base_matrix(&s1, &s2));
        assert!(c.set_states(9, &[0]).is_err());
        assert!(c.set_states(0, &[7]).is_err());
    }
}
