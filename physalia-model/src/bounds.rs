//! Range constraints for real-valued parameters.

/// An optional lower and/or upper bound on a parameter's range.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bounds {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl Bounds {
    /// No bounds in either direction.
    pub fn none() -> Self {
        Bounds::default()
    }

    /// Bounded below only.
    pub fn lower_bound(l: f64) -> Self {
        Bounds {
            lower: Some(l),
            upper: None,
        }
    }

    /// Bounded above only.
    pub fn upper_bound(u: f64) -> Self {
        Bounds {
            lower: None,
            upper: Some(u),
        }
    }

    /// Bounded on both sides.
    pub fn interval(l: f64, u: f64) -> Self {
        Bounds {
            lower: Some(l),
            upper: Some(u),
        }
    }

    pub fn below_lower_bound(&self, x: f64) -> bool {
        matches!(self.lower, Some(l) if x < l)
    }

    pub fn above_upper_bound(&self, x: f64) -> bool {
        matches!(self.upper, Some(u) if x > u)
    }

    pub fn in_range(&self, x: f64) -> bool {
        !self.below_lower_bound(x) && !self.above_upper_bound(x)
    }
}
