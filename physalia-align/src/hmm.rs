//! The pair hidden Markov model consumed by the DP engine.

use ndarray::Array2;
use physalia_core::{PhysaliaError, Result};

/// Silent state: consumes nothing.
pub const EMIT_NONE: u8 = 0b00;
/// Consumes one position of sequence 1.
pub const EMIT_1: u8 = 0b01;
/// Consumes one position of sequence 2.
pub const EMIT_2: u8 = 0b10;
/// Consumes one position of each sequence.
pub const EMIT_BOTH: u8 = 0b11;

/// A pair HMM: start distribution, state-to-state transitions, per-state
/// end-transition probabilities, and an emission bit pattern per state.
///
/// Silent states must be numbered after every state that can feed them, so
/// that a forward scan visiting states in order sees same-cell
/// predecessors already computed.
#[derive(Debug, Clone)]
pub struct PairHmm {
    pub start: Vec<f64>,
    pub trans: Array2<f64>,
    pub end: Vec<f64>,
    pub emit: Vec<u8>,
}

impl PairHmm {
    pub fn new(start: Vec<f64>, trans: Array2<f64>, end: Vec<f64>, emit: Vec<u8>) -> Result<Self> {
        let n = start.len();
        if trans.dim() != (n, n) || end.len() != n || emit.len() != n {
            return Err(PhysaliaError::InvalidInput(format!(
                "pair HMM dimensions disagree: {} start, {:?} transition, {} end, {} emit",
                n,
                trans.dim(),
                end.len(),
                emit.len()
            )));
        }
        if emit.iter().any(|&e| e > EMIT_BOTH) {
            return Err(PhysaliaError::InvalidInput(
                "emission patterns are two-bit values".into(),
            ));
        }
        Ok(PairHmm {
            start,
            trans,
            end,
            emit,
        })
    }

    pub fn n_states(&self) -> usize {
        self.start.len()
    }

    /// Does state `s` consume a position of sequence 1?
    pub fn di(&self, s: usize) -> usize {
        (self.emit[s] & EMIT_1 != 0) as usize
    }

    /// Does state `s` consume a position of sequence 2?
    pub fn dj(&self, s: usize) -> usize {
        (self.emit[s] & EMIT_2 != 0) as usize
    }

    pub fn is_silent(&self, s: usize) -> bool {
        self.emit[s] == EMIT_NONE
    }

    /// States ordered for a forward scan: emitting states first (in index
    /// order), silent states after them.
    pub fn scan_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.n_states()).filter(|&s| !self.is_silent(s)).collect();
        order.extend((0..self.n_states()).filter(|&s| self.is_silent(s)));
        order
    }

    /// The standard three-state match/insert/delete model.
    ///
    /// State 0 matches (emits in both), state 1 inserts (sequence 1 only),
    /// state 2 deletes (sequence 2 only). Whatever a row of `trans` leaves
    /// unallocated goes to the end state.
    pub fn mid(start: [f64; 3], trans: [[f64; 3]; 3]) -> Result<Self> {
        let mut m = Array2::zeros((3, 3));
        let mut end = vec![0.0; 3];
        for s in 0..3 {
            let mut row_sum = 0.0;
            for t in 0..3 {
                m[(s, t)] = trans[s][t];
                row_sum += trans[s][t];
            }
            if row_sum > 1.0 + 1e-12 {
                return Err(PhysaliaError::InvalidInput(format!(
                    "transition row {s} sums to {row_sum} > 1"
                )));
            }
            end[s] = (1.0 - row_sum).max(0.0);
        }
        PairHmm::new(start.to_vec(), m, end, vec![EMIT_BOTH, EMIT_1, EMIT_2])
    }
}
