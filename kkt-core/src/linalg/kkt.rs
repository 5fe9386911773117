//! KKT system state, factorization and solves for one MPC instance.
//!
//! A [`KktSystem`] owns every buffer the kernel touches. All of them are sized
//! from the plan in [`KktSystem::new`]; assembly, factorization and solves
//! never allocate afterwards.
//!
//! Operations are sequenced per outer iteration:
//!
//! ```text
//! fill_kkt(s_inv_z)  ->  ldl_factor()  ->  solve(&factor, ..) (any number of times)
//! ```
//!
//! [`KktSystem::ldl_factor`] returns an [`LdlFactorization`] token that the
//! solves take by reference. Re-assembling or changing the regularization
//! invalidates outstanding tokens.

use super::sparse::{self, SparseCsc};
use super::{assemble, ldl, verify};
use crate::error::KktResult;
use crate::plan::Plan;
use crate::problem::MpcProblem;
use crate::settings::{validate_kkt_reg, KktSettings};
use std::sync::Arc;

/// Handle to the factors currently held by a [`KktSystem`].
///
/// Using a handle after `fill_kkt` or `set_kkt_reg` is caught in debug
/// builds only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "solves need the factorization token"]
pub struct LdlFactorization {
    generation: u64,
    sign_flips: usize,
}

impl LdlFactorization {
    /// Pivots whose raw value had the wrong sign and were clamped to `±kkt_reg`.
    pub fn sign_flips(&self) -> usize {
        self.sign_flips
    }
}

/// Solver state for one MPC instance.
///
/// The plan is shared; everything else belongs to this instance, so several
/// instances built from the same `Arc<Plan>` can run on different threads.
#[derive(Debug, Clone)]
pub struct KktSystem {
    plan: Arc<Plan>,
    problem: MpcProblem,
    settings: KktSettings,

    /// Coefficient vector: diagonal in elimination order, then `L` positions
    kkt: Vec<f64>,
    l: Vec<f64>,
    d: Vec<f64>,
    d_inv: Vec<f64>,

    work: Vec<f64>,
    residual: Vec<f64>,
    correction: Vec<f64>,

    /// Bumped whenever the assembled matrix or the factors change
    generation: u64,
}

impl KktSystem {
    /// Create solver state for `problem` using a pre-generated plan.
    ///
    /// The plan is validated here, so a deserialized plan is safe to pass.
    pub fn new(plan: Arc<Plan>, problem: MpcProblem, settings: KktSettings) -> KktResult<Self> {
        settings.validate()?;
        plan.validate()?;
        plan.check_coverage(&problem)?;

        let n = plan.n();
        let l_nnz = plan.l_nnz();
        log::debug!("KKT system: n = {}, L nnz = {}, dims = {:?}", n, l_nnz, plan.dims());

        Ok(Self {
            kkt: vec![0.0; plan.coefficient_len()],
            l: vec![0.0; l_nnz],
            d: vec![0.0; n],
            d_inv: vec![0.0; n],
            work: vec![0.0; n],
            residual: vec![0.0; n],
            correction: vec![0.0; n],
            generation: 0,
            plan,
            problem,
            settings,
        })
    }

    /// KKT dimension.
    pub fn n(&self) -> usize {
        self.plan.n()
    }

    pub fn plan(&self) -> &Arc<Plan> {
        &self.plan
    }

    pub fn problem(&self) -> &MpcProblem {
        &self.problem
    }

    pub fn settings(&self) -> &KktSettings {
        &self.settings
    }

    /// Assembled coefficient vector (unregularized).
    pub fn kkt(&self) -> &[f64] {
        &self.kkt
    }

    /// Strictly-lower factor values, in plan column order.
    pub fn l(&self) -> &[f64] {
        &self.l
    }

    /// Regularized pivots, elimination order.
    pub fn d(&self) -> &[f64] {
        &self.d
    }

    pub fn d_inv(&self) -> &[f64] {
        &self.d_inv
    }

    /// Change the pivot regularization used by the next factorization.
    pub fn set_kkt_reg(&mut self, kkt_reg: f64) -> KktResult<()> {
        validate_kkt_reg(kkt_reg)?;
        self.settings.kkt_reg = kkt_reg;
        self.generation += 1;
        Ok(())
    }

    /// Assemble the KKT matrix for the current interior-point weights.
    ///
    /// `s_inv_z` holds one weight per inequality row, stage-major.
    pub fn fill_kkt(&mut self, s_inv_z: &[f64]) {
        assert_eq!(s_inv_z.len(), self.plan.dims().n_ineq(), "s_inv_z length");
        assemble::fill_kkt(&self.plan, &self.problem, s_inv_z, &mut self.kkt);
        self.generation += 1;
    }

    /// Factor the assembled matrix with static regularization.
    pub fn ldl_factor(&mut self) -> LdlFactorization {
        let sign_flips = ldl::factor(
            &self.plan,
            &self.kkt,
            self.settings.kkt_reg,
            &mut self.l,
            &mut self.d,
            &mut self.d_inv,
            &mut self.work,
        );
        self.generation += 1;
        let factor = LdlFactorization {
            generation: self.generation,
            sign_flips,
        };

        if self.settings.debug {
            let frob = self.check_factorization(&factor);
            log::debug!(
                "ldl_factor: {} sign flips, |K - LDL'|_F^2 = {:.3e} (n*reg^2 = {:.3e})",
                sign_flips,
                frob,
                self.n() as f64 * self.settings.kkt_reg * self.settings.kkt_reg
            );
        }

        factor
    }

    /// One pass of forward substitution, diagonal scaling and backward
    /// substitution. `target` and `var` are in natural order.
    pub fn ldl_solve(&mut self, factor: &LdlFactorization, target: &[f64], var: &mut [f64]) {
        self.check_token(factor);
        let n = self.n();
        assert_eq!(target.len(), n, "target length");
        assert_eq!(var.len(), n, "var length");
        ldl::solve(&self.plan, &self.l, &self.d_inv, target, var, &mut self.work);
    }

    /// One step of iterative refinement against the unregularized matrix.
    ///
    /// Returns the squared residual norm before the correction.
    pub fn refine(&mut self, factor: &LdlFactorization, target: &[f64], var: &mut [f64]) -> f64 {
        self.check_token(factor);
        let n = self.n();
        assert_eq!(target.len(), n, "target length");
        assert_eq!(var.len(), n, "var length");
        verify::matrix_multiply(&self.plan, &self.kkt, var, &mut self.residual);
        let mut norm_sq = 0.0;
        for (r, t) in self.residual.iter_mut().zip(target) {
            *r -= t;
            norm_sq += *r * *r;
        }
        if !norm_sq.is_finite() {
            return norm_sq;
        }

        ldl::solve(&self.plan, &self.l, &self.d_inv, &self.residual, &mut self.correction, &mut self.work);
        for (v, c) in var.iter_mut().zip(&self.correction) {
            *v -= c;
        }
        norm_sq
    }

    /// Solve `K var = target` with `refine_steps` refinement passes.
    pub fn solve(&mut self, factor: &LdlFactorization, target: &[f64], var: &mut [f64]) {
        self.ldl_solve(factor, target, var);

        for step in 0..self.settings.refine_steps {
            let before = self.refine(factor, target, var);
            if self.settings.verbose_refinement {
                let after = self.check_residual(target, var);
                log::debug!(
                    "refinement step {}: residual {:.3e} -> {:.3e}",
                    step + 1,
                    before.sqrt(),
                    after.sqrt()
                );
            }
            if !before.is_finite() {
                log::warn!("non-finite residual, refinement stopped");
                break;
            }
        }

        if self.settings.debug {
            let residual = self.check_residual(target, var);
            log::debug!("solve: |target - K var|^2 = {:.3e}", residual);
        }
    }

    /// `result = K source` with the unregularized matrix.
    pub fn matrix_multiply(&self, source: &[f64], result: &mut [f64]) {
        let n = self.n();
        assert_eq!(source.len(), n, "source length");
        assert_eq!(result.len(), n, "result length");
        verify::matrix_multiply(&self.plan, &self.kkt, source, result);
    }

    /// `‖target - K var‖²` with the unregularized matrix.
    pub fn check_residual(&mut self, target: &[f64], var: &[f64]) -> f64 {
        let n = self.n();
        assert_eq!(target.len(), n, "target length");
        assert_eq!(var.len(), n, "var length");
        verify::check_residual(&self.plan, &self.kkt, target, var, &mut self.residual)
    }

    /// `‖K - L D Lᵀ‖²_F`, with `K` unregularized and permuted.
    ///
    /// Equals `n * kkt_reg²` up to rounding when no pivot was clamped.
    pub fn check_factorization(&mut self, factor: &LdlFactorization) -> f64 {
        self.check_token(factor);
        verify::check_factorization(&self.plan, &self.kkt, &self.l, &self.d, &mut self.work)
    }

    /// `result = P L D Lᵀ Pᵀ source`, in natural order.
    pub fn factor_multiply(&mut self, factor: &LdlFactorization, source: &[f64], result: &mut [f64]) {
        self.check_token(factor);
        let n = self.n();
        assert_eq!(source.len(), n, "source length");
        assert_eq!(result.len(), n, "result length");
        verify::factor_multiply(&self.plan, &self.l, &self.d, source, result, &mut self.work);
    }

    /// Assembled (unregularized) KKT matrix in natural order, both triangles.
    ///
    /// Allocates; meant for export and inspection.
    pub fn kkt_matrix(&self) -> SparseCsc {
        let n = self.n();
        let perm = self.plan.perm();
        let diag = (0..n).map(|i| (perm[i], perm[i], self.kkt[i]));
        let lower = (0..n).flat_map(|i| {
            self.plan.column(i).filter_map(move |pos| {
                let value = self.kkt[n + pos];
                (value != 0.0).then(|| {
                    let (a, b) = (perm[self.plan.l_row(pos)], perm[i]);
                    (a.max(b), a.min(b), value)
                })
            })
        });
        sparse::symmetric_from_lower(n, diag.chain(lower))
    }

    #[inline]
    fn check_token(&self, factor: &LdlFactorization) {
        debug_assert_eq!(
            factor.generation, self.generation,
            "factorization token is stale; call ldl_factor after fill_kkt"
        );
    }
}
