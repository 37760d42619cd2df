//! Flat DP storage with per-cell power-of-two scaling.
//!
//! The table holds `s1 * s2 * n_states` probabilities plus one base-2
//! exponent per `(i, j)` cell: the true value of an entry is
//! `data[i,j,s] * 2^scale[i,j]`. All `n_states` entries of a cell share one
//! exponent and are rescaled together, so sums within a cell never mix
//! exponents.

use physalia_core::ExtReal;

/// Rescale threshold: after rescaling, the largest entry of a non-empty
/// cell lies in `[2^-RESCALE_BITS, 1]`.
pub const RESCALE_BITS: i32 = 256;

const MIN_NORM: f64 = 8.636168555094445e-78; // 2^-256

/// A dense `(s1, s2, n_states)` table of scaled probabilities.
#[derive(Debug, Clone)]
pub struct StateTable {
    s1: usize,
    s2: usize,
    n_states: usize,
    data: Vec<f64>,
    scale: Vec<i32>,
}

impl StateTable {
    pub fn new(s1: usize, s2: usize, n_states: usize) -> Self {
        StateTable {
            s1,
            s2,
            n_states,
            data: vec![0.0; s1 * s2 * n_states],
            scale: vec![0; s1 * s2],
        }
    }

    pub fn size1(&self) -> usize {
        self.s1
    }

    pub fn size2(&self) -> usize {
        self.s2
    }

    pub fn n_states(&self) -> usize {
        self.n_states
    }

    #[inline]
    fn index(&self, i: usize, j: usize, s: usize) -> usize {
        debug_assert!(i < self.s1 && j < self.s2 && s < self.n_states);
        (i * self.s2 + j) * self.n_states + s
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize, s: usize) -> f64 {
        self.data[self.index(i, j, s)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, s: usize, v: f64) {
        let idx = self.index(i, j, s);
        self.data[idx] = v;
    }

    #[inline]
    pub fn scale(&self, i: usize, j: usize) -> i32 {
        self.scale[i * self.s2 + j]
    }

    pub fn set_scale(&mut self, i: usize, j: usize, s: i32) {
        self.scale[i * self.s2 + j] = s;
    }

    /// Zero every entry of a cell and reset its exponent.
    pub fn clear_cell(&mut self, i: usize, j: usize) {
        for s in 0..self.n_states {
            self.set(i, j, s, 0.0);
        }
        self.set_scale(i, j, 0);
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
        self.scale.fill(0);
    }

    /// The true value of an entry, exponent applied.
    pub fn actual(&self, i: usize, j: usize, s: usize) -> ExtReal {
        let v = self.get(i, j, s);
        if v <= 0.0 {
            return ExtReal::zero();
        }
        ExtReal::from_ln(v.ln() + self.scale(i, j) as f64 * std::f64::consts::LN_2)
    }

    /// Step the cell's base-2 exponent until its largest entry lies in
    /// `[2^-RESCALE_BITS, 1]`. Empty cells are left alone; entries whose
    /// exponent falls off the representable range clamp to zero.
    pub fn rescale_cell(&mut self, i: usize, j: usize) {
        let mut max = 0.0f64;
        for s in 0..self.n_states {
            max = max.max(self.get(i, j, s));
        }
        if max <= 0.0 || !max.is_finite() {
            return;
        }
        if max <= 1.0 && max >= MIN_NORM {
            return;
        }

        // Number of exponent steps that brings max into (1/2, 1].
        let steps = max.log2().floor() as i32 + 1;
        let factor = (-steps as f64).exp2();
        for s in 0..self.n_states {
            let idx = self.index(i, j, s);
            self.data[idx] *= factor;
        }
        let cell = i * self.s2 + j;
        self.scale[cell] = self.scale[cell].saturating_add(steps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_values() {
        let mut t = StateTable::new(3, 4, 2);
        t.set(2, 3, 1, 0.5);
        assert_eq!(t.get(2, 3, 1), 0.5);
        assert_eq!(t.get(0, 0, 0), 0.0);
    }

    #[test]
    fn rescaling_preserves_actual_value() {
        let mut t = StateTable::new(1, 1, 3);
        t.set(0, 0, 0, 1e-120);
        t.set(0, 0, 1, 3e-121);
        let before = t.actual(0, 0, 0);

        t.rescale_cell(0, 0);
        let after = t.actual(0, 0, 0);
        assert!((before.ln() - after.ln()).abs() < 1e-9);

        // Largest entry now lies inside the scaled range.
        let max = t.get(0, 0, 0).max(t.get(0, 0, 1)).max(t.get(0, 0, 2));
        assert!(max <= 1.0 && max >= MIN_NORM, "max {max}");
        assert!(t.scale(0, 0) < 0);
    }

    #[test]
    fn rescaling_handles_large_values() {
        let mut t = StateTable::new(1, 1, 1);
        t.set(0, 0, 0, 1e30);
        let before = t.actual(0, 0, 0);
        t.rescale_cell(0, 0);
        assert!((t.actual(0, 0, 0).ln() - before.ln()).abs() < 1e-9);
        assert!(t.get(0, 0, 0) <= 1.0);
        assert!(t.scale(0, 0) > 0);
    }

    #[test]
    fn empty_cells_are_untouched() {
        let mut t = StateTable::new(1, 1, 2);
        t.rescale_cell(0, 0);
        assert_eq!(t.scale(0, 0), 0);
        assert!(t.actual(0, 0, 0).is_zero());
    }

    #[test]
    fn in_range_cells_are_untouched() {
        let mut t = StateTable::new(1, 1, 1);
        t.set(0, 0, 0, 0.25);
        t.rescale_cell(0, 0);
        assert_eq!(t.get(0, 0, 0), 0.25);
        assert_eq!(t.scale(0, 0), 0);
    }

    #[test]
    fn clear_cell_resets_scale() {
        let mut t = StateTable::new(2, 2, 1);
        t.set(1, 1, 0, 1e-300);
        t.rescale_cell(1, 1);
        t.clear_cell(1, 1);
        assert_eq!(t.get(1, 1, 0), 0.0);
        assert_eq!(t.scale(1, 1), 0);
    }
}
