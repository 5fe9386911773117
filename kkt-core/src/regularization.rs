//! Static sign/magnitude regularization of LDLᵀ pivots.
//!
//! Every variable of the quasi-definite KKT system has a fixed expected pivot
//! sign. A raw pivot of the wrong sign is replaced by `±kkt_reg`; a raw pivot
//! of the right sign is pushed away from zero by `kkt_reg`. Either way
//! `|d| ≥ kkt_reg` with the expected sign, so no runtime pivoting is needed.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default regularization added to every pivot.
pub const DEFAULT_KKT_REG: f64 = 1e-7;

/// Expected sign of a pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PivotClass {
    /// Cost Hessian and slack rows
    Positive,
    /// Inequality and dynamics multiplier rows
    Negative,
}

/// A regularized pivot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pivot {
    pub value: f64,
    /// Raw value had the wrong sign and was replaced
    pub flipped: bool,
}

impl PivotClass {
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            PivotClass::Positive => 1.0,
            PivotClass::Negative => -1.0,
        }
    }

    /// Regularize a raw pivot.
    #[inline]
    pub fn regularize(self, d_raw: f64, kkt_reg: f64) -> Pivot {
        match self {
            PivotClass::Positive => {
                if d_raw < 0.0 {
                    Pivot { value: kkt_reg, flipped: true }
                } else {
                    Pivot { value: d_raw + kkt_reg, flipped: false }
                }
            }
            PivotClass::Negative => {
                if d_raw > 0.0 {
                    Pivot { value: -kkt_reg, flipped: true }
                } else {
                    Pivot { value: d_raw - kkt_reg, flipped: false }
                }
            }
        }
    }

    /// Whether `d` satisfies the class after regularization with `kkt_reg`.
    pub fn admits(self, d: f64, kkt_reg: f64) -> bool {
        d * self.sign() >= kkt_reg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_class() {
        let reg = 1e-7;
        let p = PivotClass::Positive.regularize(2.0, reg);
        assert_eq!(p.value, 2.0 + reg);
        assert!(!p.flipped);

        let p = PivotClass::Positive.regularize(-3.0, reg);
        assert_eq!(p.value, reg);
        assert!(p.flipped);

        let p = PivotClass::Positive.regularize(0.0, reg);
        assert_eq!(p.value, reg);
        assert!(!p.flipped);
    }

    #[test]
    fn test_negative_class() {
        let reg = 1e-7;
        let p = PivotClass::Negative.regularize(-2.0, reg);
        assert_eq!(p.value, -2.0 - reg);
        assert!(!p.flipped);

        let p = PivotClass::Negative.regularize(0.5, reg);
        assert_eq!(p.value, -reg);
        assert!(p.flipped);

        let p = PivotClass::Negative.regularize(0.0, reg);
        assert_eq!(p.value, -reg);
    }

    #[test]
    fn test_magnitude_floor() {
        let reg = 1e-3;
        for &raw in &[-1e3, -1.0, -1e-9, 0.0, 1e-9, 1.0, 1e3] {
            for class in [PivotClass::Positive, PivotClass::Negative] {
                let p = class.regularize(raw, reg);
                assert!(class.admits(p.value, reg), "{:?} raw={} d={}", class, raw, p.value);
            }
        }
    }
}
