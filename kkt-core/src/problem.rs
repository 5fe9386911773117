//! MPC problem data and the natural layout of the KKT system.
//!
//! The QP handled by the kernel is, for stages `t = 0..T-1`:
//!
//! ```text
//! minimize    ½ Σ (x_{t+1}ᵀ Q x_{t+1} + u_tᵀ R u_t)       (Q_f on x_T when given)
//! subject to  x_{t+1} - A x_t - B u_t = 0                   (dynamics, x_0 fixed)
//!             G_x x_{t+1} + G_u u_t + s_t = h_t,  s_t ≥ 0   (ni rows per stage)
//! ```
//!
//! The KKT variables are stacked in the natural order
//!
//! ```text
//! [ x_1..x_T | u_0..u_{T-1} | s_0..s_{T-1} | z_0..z_{T-1} | y_0..y_{T-1} ]
//! ```
//!
//! and the matrix has the quasi-definite block form
//!
//! ```text
//! K = [ H   0   Gᵀ  Eᵀ ]
//!     [ 0   W   I   0  ]      W = diag(s_inv_z)
//!     [ G   I   0   0  ]
//!     [ E   0   0   0  ]
//! ```

use crate::error::{KktError, KktResult};
use crate::regularization::PivotClass;
use nalgebra::DMatrix;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Horizon and per-stage sizes of one KKT topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KktDims {
    /// Number of stages T
    pub horizon: usize,
    /// States per stage
    pub nx: usize,
    /// Inputs per stage
    pub nu: usize,
    /// Inequality rows per stage
    pub ni: usize,
}

/// Block a natural KKT index belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarBlock {
    State,
    Input,
    Slack,
    InequalityDual,
    EqualityDual,
}

impl VarBlock {
    /// Expected pivot sign of the block in the quasi-definite ordering.
    pub fn class(self) -> PivotClass {
        match self {
            VarBlock::State | VarBlock::Input | VarBlock::Slack => PivotClass::Positive,
            VarBlock::InequalityDual | VarBlock::EqualityDual => PivotClass::Negative,
        }
    }
}

impl KktDims {
    pub fn new(horizon: usize, nx: usize, nu: usize, ni: usize) -> Self {
        Self { horizon, nx, nu, ni }
    }

    /// Total KKT dimension.
    pub fn n(&self) -> usize {
        self.n_primal() + 2 * self.n_ineq() + self.n_eq()
    }

    /// Number of states plus inputs over the horizon.
    pub fn n_primal(&self) -> usize {
        self.horizon * (self.nx + self.nu)
    }

    /// Number of inequality rows over the horizon (length of `s_inv_z`).
    pub fn n_ineq(&self) -> usize {
        self.horizon * self.ni
    }

    /// Number of dynamics rows over the horizon.
    pub fn n_eq(&self) -> usize {
        self.horizon * self.nx
    }

    /// Natural index of component `r` of `x_t`, `t` in `1..=T`.
    #[inline]
    pub fn state(&self, t: usize, r: usize) -> usize {
        debug_assert!(t >= 1 && t <= self.horizon && r < self.nx);
        (t - 1) * self.nx + r
    }

    /// Natural index of component `r` of `u_t`, `t` in `0..T`.
    #[inline]
    pub fn input(&self, t: usize, r: usize) -> usize {
        debug_assert!(t < self.horizon && r < self.nu);
        self.horizon * self.nx + t * self.nu + r
    }

    /// Natural index of slack row `r` of stage `t`.
    #[inline]
    pub fn slack(&self, t: usize, r: usize) -> usize {
        debug_assert!(t < self.horizon && r < self.ni);
        self.n_primal() + t * self.ni + r
    }

    /// Natural index of the inequality multiplier for row `r` of stage `t`.
    #[inline]
    pub fn ineq_dual(&self, t: usize, r: usize) -> usize {
        debug_assert!(t < self.horizon && r < self.ni);
        self.n_primal() + self.n_ineq() + t * self.ni + r
    }

    /// Natural index of the dynamics multiplier for row `r` of stage `t`.
    #[inline]
    pub fn eq_dual(&self, t: usize, r: usize) -> usize {
        debug_assert!(t < self.horizon && r < self.nx);
        self.n_primal() + 2 * self.n_ineq() + t * self.nx + r
    }

    /// Block of a natural index.
    pub fn block(&self, idx: usize) -> VarBlock {
        assert!(idx < self.n(), "index {} out of range for n = {}", idx, self.n());
        let states = self.horizon * self.nx;
        if idx < states {
            VarBlock::State
        } else if idx < self.n_primal() {
            VarBlock::Input
        } else if idx < self.n_primal() + self.n_ineq() {
            VarBlock::Slack
        } else if idx < self.n_primal() + 2 * self.n_ineq() {
            VarBlock::InequalityDual
        } else {
            VarBlock::EqualityDual
        }
    }

    /// Regularization class of a natural index.
    pub fn class(&self, idx: usize) -> PivotClass {
        self.block(idx).class()
    }
}

/// Stage matrices referenced by the sparsity plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StageMatrix {
    /// Q, cost on x_1..x_{T-1}
    StateCost,
    /// Q_f, cost on x_T (falls back to Q)
    TerminalCost,
    /// R
    InputCost,
    /// A
    StateDynamics,
    /// B
    InputDynamics,
    /// G_x
    StateConstraint,
    /// G_u
    InputConstraint,
}

impl StageMatrix {
    pub const ALL: [StageMatrix; 7] = [
        StageMatrix::StateCost,
        StageMatrix::TerminalCost,
        StageMatrix::InputCost,
        StageMatrix::StateDynamics,
        StageMatrix::InputDynamics,
        StageMatrix::StateConstraint,
        StageMatrix::InputConstraint,
    ];

    /// Shape `(rows, cols)` of the matrix for the given dimensions.
    pub fn shape(self, dims: &KktDims) -> (usize, usize) {
        match self {
            StageMatrix::StateCost | StageMatrix::TerminalCost | StageMatrix::StateDynamics => {
                (dims.nx, dims.nx)
            }
            StageMatrix::InputCost => (dims.nu, dims.nu),
            StageMatrix::InputDynamics => (dims.nx, dims.nu),
            StageMatrix::StateConstraint => (dims.ni, dims.nx),
            StageMatrix::InputConstraint => (dims.ni, dims.nu),
        }
    }

    /// Cost blocks are stored as symmetric matrices.
    pub fn is_symmetric(self) -> bool {
        matches!(
            self,
            StageMatrix::StateCost | StageMatrix::TerminalCost | StageMatrix::InputCost
        )
    }
}

/// Setup-time constants of one MPC tracking problem.
///
/// The same stage blocks are reused at every stage of the horizon.
/// Use zero-row `Gx`/`Gu` for a problem without inequalities.
#[derive(Debug, Clone)]
#[allow(non_snake_case)] // Q, R, A, B are standard control notation
pub struct MpcProblem {
    /// Number of stages T
    pub horizon: usize,
    /// State cost (nx × nx, symmetric)
    pub Q: DMatrix<f64>,
    /// Input cost (nu × nu, symmetric)
    pub R: DMatrix<f64>,
    /// Optional terminal state cost (nx × nx, symmetric)
    pub Qf: Option<DMatrix<f64>>,
    /// State transition (nx × nx)
    pub A: DMatrix<f64>,
    /// Input matrix (nx × nu)
    pub B: DMatrix<f64>,
    /// Inequality rows on the next state (ni × nx)
    pub Gx: DMatrix<f64>,
    /// Inequality rows on the input (ni × nu)
    pub Gu: DMatrix<f64>,
}

impl MpcProblem {
    /// Dimensions implied by the matrix shapes (not validated).
    pub fn dims(&self) -> KktDims {
        KktDims::new(self.horizon, self.A.nrows(), self.B.ncols(), self.Gx.nrows())
    }

    /// Stage matrix referenced by a plan source.
    #[inline]
    pub fn stage(&self, matrix: StageMatrix) -> &DMatrix<f64> {
        match matrix {
            StageMatrix::StateCost => &self.Q,
            StageMatrix::TerminalCost => self.Qf.as_ref().unwrap_or(&self.Q),
            StageMatrix::InputCost => &self.R,
            StageMatrix::StateDynamics => &self.A,
            StageMatrix::InputDynamics => &self.B,
            StageMatrix::StateConstraint => &self.Gx,
            StageMatrix::InputConstraint => &self.Gu,
        }
    }

    /// Check shapes and symmetry, returning the problem dimensions.
    pub fn validate(&self) -> KktResult<KktDims> {
        let dims = self.dims();
        if dims.horizon == 0 {
            return Err(KktError::InvalidDimensions("horizon must be at least 1".into()));
        }
        if dims.nx == 0 || dims.nu == 0 {
            return Err(KktError::InvalidDimensions(format!(
                "need at least one state and one input, got nx = {}, nu = {}",
                dims.nx, dims.nu
            )));
        }
        if self.Gu.nrows() != dims.ni {
            return Err(KktError::DimensionMismatch {
                context: "Gu rows",
                expected: dims.ni,
                actual: self.Gu.nrows(),
            });
        }

        for matrix in StageMatrix::ALL {
            let (rows, cols) = matrix.shape(&dims);
            let m = self.stage(matrix);
            let name = matrix_name(matrix);
            if m.nrows() != rows {
                return Err(KktError::DimensionMismatch { context: name, expected: rows, actual: m.nrows() });
            }
            if m.ncols() != cols {
                return Err(KktError::DimensionMismatch { context: name, expected: cols, actual: m.ncols() });
            }
            if matrix.is_symmetric() && !is_symmetric(m) {
                return Err(KktError::NotSymmetric(name));
            }
        }

        Ok(dims)
    }
}

fn matrix_name(matrix: StageMatrix) -> &'static str {
    match matrix {
        StageMatrix::StateCost => "Q",
        StageMatrix::TerminalCost => "Qf",
        StageMatrix::InputCost => "R",
        StageMatrix::StateDynamics => "A",
        StageMatrix::InputDynamics => "B",
        StageMatrix::StateConstraint => "Gx",
        StageMatrix::InputConstraint => "Gu",
    }
}

fn is_symmetric(m: &DMatrix<f64>) -> bool {
    let scale = m.iter().fold(1.0_f64, |acc, v| acc.max(v.abs()));
    let tol = 1e-12 * scale;
    (0..m.nrows()).all(|i| (0..i).all(|j| (m[(i, j)] - m[(j, i)]).abs() <= tol))
}
