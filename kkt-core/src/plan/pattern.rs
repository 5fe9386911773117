//! Natural-order pattern of the KKT lower triangle and its value sources.

use crate::problem::{KktDims, MpcProblem, StageMatrix};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Where the assembler reads the value of one coefficient slot.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Source {
    /// Fill-in or a structurally empty diagonal
    Zero,
    /// Identity coupling (slack/dual, state/dynamics dual)
    Constant(f64),
    /// `s_inv_z[k]`, stage-major
    Weight(usize),
    /// `scale * matrix[(row, col)]`
    Stage {
        matrix: StageMatrix,
        row: usize,
        col: usize,
        scale: f64,
    },
}

impl Source {
    #[inline]
    pub fn value(&self, problem: &MpcProblem, s_inv_z: &[f64]) -> f64 {
        match *self {
            Source::Zero => 0.0,
            Source::Constant(v) => v,
            Source::Weight(k) => s_inv_z[k],
            Source::Stage { matrix, row, col, scale } => scale * problem.stage(matrix)[(row, col)],
        }
    }
}

/// One lower-triangle entry in natural indices (`row >= col`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct NaturalEntry {
    pub row: usize,
    pub col: usize,
    pub source: Source,
}

/// Structural nonzeros of the stage matrices.
pub(crate) struct StagePattern {
    dims: KktDims,
    masks: Vec<Vec<bool>>,
}

impl StagePattern {
    /// Every stage-matrix entry is structural.
    pub fn dense(dims: KktDims) -> Self {
        let masks = StageMatrix::ALL
            .iter()
            .map(|m| {
                let (rows, cols) = m.shape(&dims);
                vec![true; rows * cols]
            })
            .collect();
        Self { dims, masks }
    }

    /// Exact zeros of the setup-time matrices are structural zeros.
    /// Cost blocks use the union of both triangles.
    pub fn from_problem(problem: &MpcProblem, dims: KktDims) -> Self {
        let masks = StageMatrix::ALL
            .iter()
            .map(|&m| {
                let (rows, cols) = m.shape(&dims);
                let mat = problem.stage(m);
                let mut mask = vec![false; rows * cols];
                for r in 0..rows {
                    for c in 0..cols {
                        let nz = if m.is_symmetric() {
                            mat[(r, c)] != 0.0 || mat[(c, r)] != 0.0
                        } else {
                            mat[(r, c)] != 0.0
                        };
                        mask[r * cols + c] = nz;
                    }
                }
                mask
            })
            .collect();
        Self { dims, masks }
    }

    #[inline]
    pub fn contains(&self, matrix: StageMatrix, row: usize, col: usize) -> bool {
        let (_, cols) = matrix.shape(&self.dims);
        self.masks[matrix as usize][row * cols + col]
    }

    fn stage(&self, matrix: StageMatrix, row: usize, col: usize, scale: f64) -> Option<Source> {
        self.contains(matrix, row, col)
            .then_some(Source::Stage { matrix, row, col, scale })
    }
}

/// Collect the lower triangle of the natural KKT matrix.
///
/// Every diagonal entry is present, even when its value is structurally zero.
pub(crate) fn natural_entries(pattern: &StagePattern) -> Vec<NaturalEntry> {
    let dims = pattern.dims;
    let (horizon, nx, nu, ni) = (dims.horizon, dims.nx, dims.nu, dims.ni);
    let mut entries = Vec::new();
    let mut push = |row: usize, col: usize, source: Source| {
        debug_assert!(row >= col);
        entries.push(NaturalEntry { row, col, source });
    };

    // H: state blocks, terminal block last
    for t in 1..=horizon {
        let cost = if t == horizon {
            StageMatrix::TerminalCost
        } else {
            StageMatrix::StateCost
        };
        for r in 0..nx {
            for c in 0..=r {
                match pattern.stage(cost, r, c, 1.0) {
                    Some(src) => push(dims.state(t, r), dims.state(t, c), src),
                    None if r == c => push(dims.state(t, r), dims.state(t, r), Source::Zero),
                    None => {}
                }
            }
        }
    }

    // H: input blocks
    for t in 0..horizon {
        for r in 0..nu {
            for c in 0..=r {
                match pattern.stage(StageMatrix::InputCost, r, c, 1.0) {
                    Some(src) => push(dims.input(t, r), dims.input(t, c), src),
                    None if r == c => push(dims.input(t, r), dims.input(t, r), Source::Zero),
                    None => {}
                }
            }
        }
    }

    // Slacks, inequality duals and G
    for t in 0..horizon {
        for r in 0..ni {
            let s = dims.slack(t, r);
            let z = dims.ineq_dual(t, r);
            push(s, s, Source::Weight(t * ni + r));
            push(z, z, Source::Zero);
            push(z, s, Source::Constant(1.0));
            for c in 0..nx {
                if let Some(src) = pattern.stage(StageMatrix::StateConstraint, r, c, 1.0) {
                    push(z, dims.state(t + 1, c), src);
                }
            }
            for c in 0..nu {
                if let Some(src) = pattern.stage(StageMatrix::InputConstraint, r, c, 1.0) {
                    push(z, dims.input(t, c), src);
                }
            }
        }
    }

    // Dynamics rows: x_{t+1} - A x_t - B u_t
    for t in 0..horizon {
        for r in 0..nx {
            let y = dims.eq_dual(t, r);
            push(y, y, Source::Zero);
            push(y, dims.state(t + 1, r), Source::Constant(1.0));
            if t >= 1 {
                for c in 0..nx {
                    if let Some(src) = pattern.stage(StageMatrix::StateDynamics, r, c, -1.0) {
                        push(y, dims.state(t, c), src);
                    }
                }
            }
            for c in 0..nu {
                if let Some(src) = pattern.stage(StageMatrix::InputDynamics, r, c, -1.0) {
                    push(y, dims.input(t, c), src);
                }
            }
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    #[test]
    fn test_scalar_pattern() {
        let dims = KktDims::new(2, 1, 1, 1);
        let entries = natural_entries(&StagePattern::dense(dims));

        let diag = entries.iter().filter(|e| e.row == e.col).count();
        assert_eq!(diag, dims.n());

        // 2 s-z couplings, 2 Gx, 2 Gu, 2 identity dynamics, 1 A, 2 B
        let offdiag = entries.len() - diag;
        assert_eq!(offdiag, 11);

        assert!(entries.iter().all(|e| e.row >= e.col && e.row < dims.n()));
        assert!(entries
            .iter()
            .any(|e| e.row == 9 && e.col == 0 && e.source == Source::Stage {
                matrix: StageMatrix::StateDynamics,
                row: 0,
                col: 0,
                scale: -1.0,
            }));
    }

    #[test]
    fn test_problem_pattern_drops_zeros() {
        let one = DMatrix::from_element(1, 1, 1.0);
        let prob = MpcProblem {
            horizon: 2,
            Q: one.clone(),
            R: one.clone(),
            Qf: None,
            A: one.clone(),
            B: one.clone(),
            Gx: DMatrix::zeros(1, 1),
            Gu: one,
        };
        let dims = prob.validate().unwrap();
        let entries = natural_entries(&StagePattern::from_problem(&prob, dims));
        let offdiag = entries.iter().filter(|e| e.row != e.col).count();
        assert_eq!(offdiag, 9);
        assert!(!entries.iter().any(|e| matches!(
            e.source,
            Source::Stage { matrix: StageMatrix::StateConstraint, .. }
        )));
    }

    #[test]
    fn test_weight_sources_are_stage_major() {
        let dims = KktDims::new(3, 2, 1, 2);
        let entries = natural_entries(&StagePattern::dense(dims));
        for t in 0..3 {
            for r in 0..2 {
                let s = dims.slack(t, r);
                let e = entries.iter().find(|e| e.row == s && e.col == s).unwrap();
                assert_eq!(e.source, Source::Weight(t * 2 + r));
            }
        }
    }
}
