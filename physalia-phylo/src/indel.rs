//! The indel-model interface: branch length in, pair HMM out.

use physalia_align::{PairHmm, EMIT_1, EMIT_2, EMIT_BOTH};
use ndarray::Array2;
use physalia_core::{PhysaliaError, Result};

/// Produces the pair HMM describing insertions and deletions accumulated
/// over a branch of a given length.
pub trait IndelModel {
    fn pair_hmm(&self, t: f64) -> Result<PairHmm>;
}

/// A simple three-state indel process: gaps open with a probability that
/// saturates in branch length and extend geometrically.
#[derive(Debug, Clone)]
pub struct GeometricIndel {
    /// Rate at which gaps open per unit branch length.
    pub open_rate: f64,
    /// Gap extension probability.
    pub extend: f64,
    /// Probability of ending the alignment from a match.
    pub stop: f64,
}

impl GeometricIndel {
    pub fn new(open_rate: f64, extend: f64, stop: f64) -> Result<Self> {
        if open_rate < 0.0 || !(0.0..1.0).contains(&extend) || !(0.0..1.0).contains(&stop) || stop == 0.0 {
            return Err(PhysaliaError::InvalidInput(format!(
                "bad indel parameters: open_rate {open_rate}, extend {extend}, stop {stop}"
            )));
        }
        Ok(GeometricIndel {
            open_rate,
            extend,
            stop,
        })
    }
}

impl IndelModel for GeometricIndel {
    fn pair_hmm(&self, t: f64) -> Result<PairHmm> {
        if t < 0.0 {
            return Err(PhysaliaError::InvalidInput(format!(
                "negative branch length {t}"
            )));
        }
        // Gap-open probability saturates at 1/3 so that match keeps mass.
        let g = (1.0 - (-self.open_rate * t).exp()) / 3.0;
        let e = self.extend;
        let tau = self.stop;

        let start = vec![1.0 - 2.0 * g, g, g];
        let trans = Array2::from_shape_vec(
            (3, 3),
            vec![
                (1.0 - 2.0 * g) * (1.0 - tau),
                g,
                g,
                (1.0 - e) * (1.0 - 2.0 * g) * (1.0 - tau),
                e + (1.0 - e) * g,
                (1.0 - e) * g,
                (1.0 - e) * (1.0 - 2.0 * g) * (1.0 - tau),
                (1.0 - e) * g,
                e + (1.0 - e) * g,
            ],
        )
        .map_err(|err| PhysaliaError::Structure(err.to_string()))?;
        let end = vec![
            (1.0 - 2.0 * g) * tau,
            (1.0 - e) * (1.0 - 2.0 * g) * tau,
            (1.0 - e) * (1.0 - 2.0 * g) * tau,
        ];
        PairHmm::new(start, trans, end, vec![EMIT_BOTH, EMIT_1, EMIT_2])
    }
}
