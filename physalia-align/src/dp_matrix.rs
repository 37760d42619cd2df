//! The pair-HMM forward table.
//!
//! Cell `(i, j)` holds, per state, the probability of having consumed the
//! first `i` positions of sequence 1 and `j` of sequence 2, ending in that
//! state. The recurrence enters through a virtual start distribution at the
//! origin, raises emissions to the sampling temperature `beta`, and carries
//! a per-cell base-2 exponent so long alignments never underflow. The total
//! over all alignments aggregates the far corner against the end-transition
//! vector.

use physalia_core::{ExtReal, PhysaliaError, Result, Xorshift64};

use crate::emission::EmissionParams;
use crate::hmm::PairHmm;
use crate::table::StateTable;

/// A 2-D forward dynamic-programming matrix.
#[derive(Debug, Clone)]
pub struct DpMatrix {
    table: StateTable,
    hmm: PairHmm,
    beta: f64,
    emission: Option<EmissionParams>,
    l1: usize,
    l2: usize,
    /// Scan order: emitting states before silent ones.
    order: Vec<usize>,
}

impl DpMatrix {
    /// A matrix without emission terms: only start, transition and end
    /// probabilities contribute.
    pub fn new(l1: usize, l2: usize, hmm: PairHmm, beta: f64) -> Result<Self> {
        Self::build(l1, l2, hmm, beta, None)
    }

    /// A matrix whose emitting states score positions through a
    /// rate-mixture emission model.
    pub fn with_emission(
        l1: usize,
        l2: usize,
        hmm: PairHmm,
        beta: f64,
        emission: EmissionParams,
    ) -> Result<Self> {
        if emission.len1() != l1 || emission.len2() != l2 {
            return Err(PhysaliaError::InvalidInput(format!(
                "emission tables cover {}x{} positions but sequences are {}x{}",
                emission.len1(),
                emission.len2(),
                l1,
                l2
            )));
        }
        Self::build(l1, l2, hmm, beta, Some(emission))
    }

    fn build(
        l1: usize,
        l2: usize,
        hmm: PairHmm,
        beta: f64,
        emission: Option<EmissionParams>,
    ) -> Result<Self> {
        if !(beta > 0.0 && beta <= 1.0) {
            return Err(PhysaliaError::InvalidInput(format!(
                "temperature beta must lie in (0, 1], got {beta}"
            )));
        }
        let order = hmm.scan_order();
        Ok(DpMatrix {
            table: StateTable::new(l1 + 1, l2 + 1, hmm.n_states()),
            hmm,
            beta,
            emission,
            l1,
            l2,
            order,
        })
    }

    pub fn len1(&self) -> usize {
        self.l1
    }

    pub fn len2(&self) -> usize {
        self.l2
    }

    pub fn hmm(&self) -> &PairHmm {
        &self.hmm
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn table(&self) -> &StateTable {
        &self.table
    }

    /// The emission probability of state `s` entering cell `(i, j)`,
    /// before heating.
    pub fn emit_value(&self, s: usize, i: usize, j: usize) -> f64 {
        let Some(em) = &self.emission else {
            return 1.0;
        };
        match (self.hmm.di(s), self.hmm.dj(s)) {
            (1, 1) => em.emit_mm(i, j),
            (1, 0) => em.emit_m_(i),
            (0, 1) => em.emit__m(j),
            _ => em.emit__(),
        }
    }

    /// Fill one cell considering only the given states.
    pub(crate) fn forward_cell_states(&mut self, i: usize, j: usize, states: &[usize]) {
        self.table.clear_cell(i, j);

        // The cell's exponent: the largest exponent among predecessor
        // cells, so every contribution is shifted down, never up.
        let mut s_max: Option<i32> = None;
        for &s in states {
            let (di, dj) = (self.hmm.di(s), self.hmm.dj(s));
            if di > i || dj > j || (di == 0 && dj == 0) {
                continue;
            }
            let sc = self.table.scale(i - di, j - dj);
            s_max = Some(s_max.map_or(sc, |m| m.max(sc)));
        }
        let s_max = s_max.unwrap_or(0);
        self.table.set_scale(i, j, s_max);

        let n = self.hmm.n_states();
        let origin = i == 0 && j == 0;
        for &s in states {
            let (di, dj) = (self.hmm.di(s), self.hmm.dj(s));
            if di > i || dj > j {
                continue;
            }
            if origin && (di != 0 || dj != 0) {
                continue;
            }
            let (ip, jp) = (i - di, j - dj);

            let mut sum = 0.0;
            for sp in 0..n {
                sum += self.table.get(ip, jp, sp) * self.hmm.trans[(sp, s)];
            }
            sum *= ((self.table.scale(ip, jp) - s_max) as f64).exp2();

            // Direct entry from the start state, which carries exponent 0.
            if ip == 0 && jp == 0 {
                sum += self.hmm.start[s] * (-(s_max as f64)).exp2();
            }

            let e = self.emit_value(s, i, j).powf(self.beta);
            self.table.set(i, j, s, sum * e);
        }
        self.table.rescale_cell(i, j);
    }

    /// Fill one cell over all states.
    pub fn forward_cell(&mut self, i: usize, j: usize) {
        let order = self.order.clone();
        self.forward_cell_states(i, j, &order);
    }

    /// Fill the whole table.
    pub fn forward_square(&mut self) {
        let order = self.order.clone();
        for i in 0..=self.l1 {
            for j in 0..=self.l2 {
                self.forward_cell_states(i, j, &order);
            }
        }
    }

    /// Fill the sub-rectangle `[x1, x2] x [y1, y2]` (inclusive).
    pub fn forward_square_region(&mut self, x1: usize, y1: usize, x2: usize, y2: usize) {
        let order = self.order.clone();
        for i in x1..=x2.min(self.l1) {
            for j in y1..=y2.min(self.l2) {
                self.forward_cell_states(i, j, &order);
            }
        }
    }

    /// Fill only the cells within `width` columns of the straight diagonal
    /// between the corners. Cells outside the band stay zero, so the total
    /// is a lower bound on the full forward probability.
    pub fn forward_band(&mut self, width: usize) {
        self.table.clear();
        let order = self.order.clone();

        if self.l1 == 0 {
            for j in 0..=self.l2 {
                self.forward_cell_states(0, j, &order);
            }
            return;
        }

        for i in 0..=self.l1 {
            let center = i * self.l2;
            let lo = center.saturating_sub(width * self.l1) / self.l1;
            let hi = ((center + width * self.l1) / self.l1).min(self.l2);
            for j in lo..=hi {
                self.forward_cell_states(i, j, &order);
            }
        }
    }

    /// The probability of all alignments: the far corner against the
    /// end-transition vector. Underflow clamps to zero, never NaN.
    pub fn forward_total(&self) -> ExtReal {
        let mut sum = 0.0;
        for s in 0..self.hmm.n_states() {
            sum += self.table.get(self.l1, self.l2, s) * self.hmm.end[s];
        }
        if sum <= 0.0 {
            return ExtReal::zero();
        }
        ExtReal::from_ln(sum.ln() + self.table.scale(self.l1, self.l2) as f64 * std::f64::consts::LN_2)
    }

    /// Draw a state path in proportion to its contribution to the forward
    /// total. The table must have been filled first.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the forward mass at the far corner is zero.
    pub fn sample_path(&self, rng: &mut Xorshift64) -> Result<Vec<usize>> {
        let n = self.hmm.n_states();

        let end_weights: Vec<f64> = (0..n)
            .map(|s| self.table.get(self.l1, self.l2, s) * self.hmm.end[s])
            .collect();
        let mut state = pick(&end_weights, rng).ok_or_else(|| {
            PhysaliaError::InvalidInput("cannot sample a path from zero forward mass".into())
        })?;

        let mut path = vec![state];
        let (mut i, mut j) = (self.l1, self.l2);
        // Each step either consumes a position or ends at the start state.
        let mut guard = (self.l1 + 1) * (self.l2 + 1) * n + n;

        loop {
            guard = guard.checked_sub(1).ok_or_else(|| {
                PhysaliaError::Structure("path sampling failed to reach the start state".into())
            })?;

            let (di, dj) = (self.hmm.di(state), self.hmm.dj(state));
            let (ip, jp) = (i - di, j - dj);

            // Weights over predecessor states, plus one extra slot for the
            // direct entry from the start state. Scales within the
            // predecessor cell cancel; the start entry carries exponent 0.
            let mut weights: Vec<f64> = (0..n)
                .map(|sp| self.table.get(ip, jp, sp) * self.hmm.trans[(sp, state)])
                .collect();
            if ip == 0 && jp == 0 {
                weights.push(self.hmm.start[state] * (-(self.table.scale(0, 0) as f64)).exp2());
            }

            let choice = pick(&weights, rng).ok_or_else(|| {
                PhysaliaError::Structure(format!(
                    "no predecessor mass for state {state} at cell ({ip}, {jp})"
                ))
            })?;

            if choice == n {
                break; // entered directly from the start state
            }
            state = choice;
            i = ip;
            j = jp;
            path.push(state);
        }

        path.reverse();
        Ok(path)
    }

    /// Re-score a complete path: start entry, heated emissions,
    /// transitions, and the final end transition.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the path does not consume exactly both
    /// sequences.
    pub fn path_p(&self, path: &[usize]) -> Result<ExtReal> {
        let (mut i, mut j) = (0usize, 0usize);
        let mut p = ExtReal::one();
        let mut prev: Option<usize> = None;

        for &s in path {
            if s >= self.hmm.n_states() {
                return Err(PhysaliaError::index("state", s, self.hmm.n_states()));
            }
            i += self.hmm.di(s);
            j += self.hmm.dj(s);
            if i > self.l1 || j > self.l2 {
                return Err(PhysaliaError::InvalidInput(format!(
                    "path overruns the sequences at ({i}, {j})"
                )));
            }

            let step = match prev {
                None => self.hmm.start[s],
                Some(sp) => self.hmm.trans[(sp, s)],
            };
            p *= ExtReal::from_f64(step);
            p *= ExtReal::from_f64(self.emit_value(s, i, j)).pow(self.beta);
            prev = Some(s);
        }

        if i != self.l1 || j != self.l2 {
            return Err(PhysaliaError::InvalidInput(format!(
                "path consumes ({i}, {j}) of ({}, {})",
                self.l1, self.l2
            )));
        }

        match prev {
            Some(last) => Ok(p * ExtReal::from_f64(self.hmm.end[last])),
            // An empty path has no end transition to pay; it only exists
            // for empty sequences and carries no probability mass here.
            None => Ok(ExtReal::zero()),
        }
    }
}

/// Sample an index in proportion to non-negative weights. `None` when all
/// weights vanish.
fn pick(weights: &[f64], rng: &mut Xorshift64) -> Option<usize> {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    let mut u = rng.next_f64() * total;
    for (k, &w) in weights.iter().enumerate() {
        u -= w;
        if u <= 0.0 && w > 0.0 {
            return Some(k);
        }
    }
    weights.iter().rposition(|&w| w > 0.0)
}

/// How wide a diagonal band must be (in columns) to contain the path.
pub fn bandwidth(hmm: &PairHmm, l1: usize, l2: usize, path: &[usize]) -> usize {
    if l1 == 0 {
        return l2;
    }
    let (mut i, mut j) = (0usize, 0usize);
    let mut max_dev = 0usize;
    for &s in path {
        i += hmm.di(s);
        j += hmm.dj(s);
        max_dev = max_dev.max((j * l1).abs_diff(i * l2));
    }
    max_dev.div_ceil(l1)
}
