//! Sparsity plan for one fixed KKT topology.
//!
//! A plan is generated offline (or once at startup) from the problem
//! dimensions and stage-matrix pattern. It fixes:
//!
//! - the elimination permutation,
//! - the layout of the coefficient vector (`n` diagonal slots in elimination
//!   order, then one slot per strictly-lower `L` position, fill-in included),
//! - the source of every coefficient slot,
//! - the column and row patterns of `L`,
//! - for every `L[k,i]`, the pivots `j` whose Schur-complement terms it needs.
//!
//! The factorization and solve engines only iterate over these arrays.

mod ordering;
mod pattern;
mod symbolic;

pub use ordering::Ordering;
pub use pattern::Source;

use crate::error::{KktError, KktResult};
use crate::problem::{KktDims, MpcProblem};
use crate::regularization::PivotClass;
use pattern::{natural_entries, StagePattern};
use std::collections::HashSet;
use std::fmt;
use std::ops::Range;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Entry of a row pattern of `L`: `L[row, col]` lives at `pos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RowEntry {
    pub col: usize,
    pub pos: usize,
}

/// Schur-complement term of one `L[k,i]`: `L[k,pivot]` lives at `pos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dependency {
    pub pos: usize,
    pub pivot: usize,
}

/// Size summary of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanStats {
    /// KKT dimension
    pub n: usize,
    /// Structural lower nonzeros of the KKT matrix, diagonal included
    pub kkt_nnz: usize,
    /// Strictly-lower nonzeros of `L`
    pub l_nnz: usize,
    /// Entries of `L` absent from the KKT matrix
    pub fill_in: usize,
    /// Total multiply-adds in the off-diagonal updates
    pub dependencies: usize,
}

impl fmt::Display for PlanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} kkt_nnz={} l_nnz={} fill_in={} deps={}",
            self.n, self.kkt_nnz, self.l_nnz, self.fill_in, self.dependencies
        )
    }
}

/// Immutable elimination plan.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Plan {
    dims: KktDims,
    /// elimination -> natural
    perm: Vec<usize>,
    /// natural -> elimination
    perm_inv: Vec<usize>,
    classes: Vec<PivotClass>,
    sources: Vec<Source>,
    l_col_ptr: Vec<usize>,
    l_rows: Vec<usize>,
    row_ptr: Vec<usize>,
    row_entries: Vec<RowEntry>,
    dep_ptr: Vec<usize>,
    deps: Vec<Dependency>,
    kkt_lower_nnz: usize,
}

impl Plan {
    /// Generate a plan for the structural pattern of `problem`.
    ///
    /// Entries that are exactly zero in the stage matrices are treated as
    /// structural zeros; a problem later assembled with this plan must keep
    /// them zero.
    pub fn generate(problem: &MpcProblem, ordering: Ordering) -> KktResult<Self> {
        let dims = problem.validate()?;
        Self::build(dims, &StagePattern::from_problem(problem, dims), &ordering)
    }

    /// Generate a plan that treats every stage-matrix entry as structural.
    pub fn generate_dense(dims: KktDims, ordering: Ordering) -> KktResult<Self> {
        if dims.horizon == 0 || dims.nx == 0 || dims.nu == 0 {
            return Err(KktError::InvalidDimensions(format!(
                "horizon, nx and nu must be positive, got {:?}",
                dims
            )));
        }
        Self::build(dims, &StagePattern::dense(dims), &ordering)
    }

    fn build(dims: KktDims, stage_pattern: &StagePattern, ordering: &Ordering) -> KktResult<Self> {
        let n = dims.n();
        let entries = natural_entries(stage_pattern);
        let perm = ordering.permutation(&dims, &entries)?;
        let perm_inv = ordering::invert(&perm);
        let classes = perm.iter().map(|&p| dims.class(p)).collect();
        let sym = symbolic::analyze(n, &perm_inv, &entries);

        let plan = Self {
            dims,
            perm,
            perm_inv,
            classes,
            sources: sym.sources,
            l_col_ptr: sym.l_col_ptr,
            l_rows: sym.l_rows,
            row_ptr: sym.row_ptr,
            row_entries: sym.row_entries,
            dep_ptr: sym.dep_ptr,
            deps: sym.deps,
            kkt_lower_nnz: sym.kkt_lower_nnz,
        };

        log::info!("generated sparsity plan ({}): {}", ordering_name(ordering), plan.stats());
        Ok(plan)
    }

    pub fn dims(&self) -> KktDims {
        self.dims
    }

    /// KKT dimension.
    #[inline]
    pub fn n(&self) -> usize {
        self.perm.len()
    }

    /// Strictly-lower nonzeros of `L`.
    #[inline]
    pub fn l_nnz(&self) -> usize {
        self.l_rows.len()
    }

    /// Length of the coefficient vector.
    #[inline]
    pub fn coefficient_len(&self) -> usize {
        self.n() + self.l_nnz()
    }

    /// Elimination index -> natural index.
    #[inline]
    pub fn perm(&self) -> &[usize] {
        &self.perm
    }

    /// Natural index -> elimination index.
    #[inline]
    pub fn perm_inv(&self) -> &[usize] {
        &self.perm_inv
    }

    /// Pivot classes in elimination order.
    #[inline]
    pub fn classes(&self) -> &[PivotClass] {
        &self.classes
    }

    /// Coefficient sources, diagonal slots first.
    #[inline]
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Positions of column `i` of `L`.
    #[inline]
    pub fn column(&self, i: usize) -> Range<usize> {
        self.l_col_ptr[i]..self.l_col_ptr[i + 1]
    }

    /// Row index of the `L` entry at `pos`.
    #[inline]
    pub fn l_row(&self, pos: usize) -> usize {
        self.l_rows[pos]
    }

    /// Row pattern of `L` row `i`, ascending column.
    #[inline]
    pub fn row(&self, i: usize) -> &[RowEntry] {
        &self.row_entries[self.row_ptr[i]..self.row_ptr[i + 1]]
    }

    /// Dependency list of the `L` entry at `pos`.
    #[inline]
    pub fn deps(&self, pos: usize) -> &[Dependency] {
        &self.deps[self.dep_ptr[pos]..self.dep_ptr[pos + 1]]
    }

    pub fn stats(&self) -> PlanStats {
        let original_offdiag = self.kkt_lower_nnz - self.n();
        PlanStats {
            n: self.n(),
            kkt_nnz: self.kkt_lower_nnz,
            l_nnz: self.l_nnz(),
            fill_in: self.l_nnz().saturating_sub(original_offdiag),
            dependencies: self.deps.len(),
        }
    }

    /// Check that `problem` matches this plan's topology.
    ///
    /// Every nonzero stage-matrix entry of `problem` must have a coefficient
    /// slot; values outside the plan's pattern would be silently dropped.
    pub fn check_coverage(&self, problem: &MpcProblem) -> KktResult<()> {
        let dims = problem.validate()?;
        if dims != self.dims {
            return Err(KktError::PlanMismatch { plan: self.dims, problem: dims });
        }

        let covered: HashSet<(usize, usize, usize)> = self
            .sources
            .iter()
            .filter_map(|s| match *s {
                Source::Stage { matrix, row, col, .. } => Some((matrix as usize, row, col)),
                _ => None,
            })
            .collect();

        for entry in natural_entries(&StagePattern::from_problem(problem, dims)) {
            if let Source::Stage { matrix, row, col, .. } = entry.source {
                if !covered.contains(&(matrix as usize, row, col)) {
                    return Err(KktError::InvalidPlan(format!(
                        "no coefficient slot for {:?}[({}, {})]",
                        matrix, row, col
                    )));
                }
            }
        }
        Ok(())
    }

    /// Check every structural invariant the engines rely on.
    ///
    /// Generated plans satisfy these by construction; call this on plans
    /// loaded from external data before building a solver with them.
    pub fn validate(&self) -> KktResult<()> {
        let n = self.dims.n();
        let nnz = self.l_rows.len();
        let invalid = |msg: String| Err(KktError::InvalidPlan(msg));

        if self.perm.len() != n || self.perm_inv.len() != n || self.classes.len() != n {
            return invalid(format!("permutation/class lengths do not match n = {}", n));
        }
        ordering::check_permutation(&self.perm, n)?;
        for (i, &p) in self.perm.iter().enumerate() {
            if self.perm_inv[p] != i {
                return invalid(format!("perm_inv is not the inverse of perm at {}", i));
            }
            if self.classes[i] != self.dims.class(p) {
                return invalid(format!("pivot {} has class {:?}", i, self.classes[i]));
            }
        }

        if self.l_col_ptr.len() != n + 1
            || self.l_col_ptr[0] != 0
            || self.l_col_ptr[n] != nnz
            || self.l_col_ptr.windows(2).any(|w| w[0] > w[1])
        {
            return invalid("malformed L column pointers".into());
        }
        let mut col_of = vec![0; nnz];
        for col in 0..n {
            let rows = &self.l_rows[self.column(col)];
            if rows.iter().any(|&r| r <= col || r >= n) || rows.windows(2).any(|w| w[0] >= w[1]) {
                return invalid(format!("column {} of L is not strictly lower and sorted", col));
            }
            for pos in self.column(col) {
                col_of[pos] = col;
            }
        }

        if self.row_ptr.len() != n + 1
            || self.row_ptr[0] != 0
            || self.row_ptr[n] != self.row_entries.len()
            || self.row_entries.len() != nnz
            || self.row_ptr.windows(2).any(|w| w[0] > w[1])
        {
            return invalid("malformed L row pointers".into());
        }
        for k in 0..n {
            let row = self.row(k);
            if row.windows(2).any(|w| w[0].col >= w[1].col) {
                return invalid(format!("row {} of L is not sorted", k));
            }
            for e in row {
                if e.pos >= nnz || self.l_rows[e.pos] != k || col_of[e.pos] != e.col {
                    return invalid(format!("row {} references a foreign L entry", k));
                }
            }
        }

        if self.dep_ptr.len() != nnz + 1
            || self.dep_ptr[0] != 0
            || self.dep_ptr[nnz] != self.deps.len()
            || self.dep_ptr.windows(2).any(|w| w[0] > w[1])
        {
            return invalid("malformed dependency pointers".into());
        }
        for pos in 0..nnz {
            let (k, i) = (self.l_rows[pos], col_of[pos]);
            for dep in self.deps(pos) {
                let valid = dep.pos < nnz
                    && dep.pivot < i
                    && self.l_rows[dep.pos] == k
                    && col_of[dep.pos] == dep.pivot
                    && self.row(i).binary_search_by_key(&dep.pivot, |e| e.col).is_ok();
                if !valid {
                    return invalid(format!("dependency of L[{}, {}] on pivot {} is invalid", k, i, dep.pivot));
                }
            }
        }

        if self.sources.len() != n + nnz {
            return invalid(format!(
                "expected {} coefficient sources, found {}",
                n + nnz,
                self.sources.len()
            ));
        }
        for (slot, source) in self.sources.iter().enumerate() {
            let ok = match *source {
                Source::Zero | Source::Constant(_) => true,
                Source::Weight(k) => k < self.dims.n_ineq(),
                Source::Stage { matrix, row, col, .. } => {
                    let (rows, cols) = matrix.shape(&self.dims);
                    row < rows && col < cols
                }
            };
            if !ok {
                return invalid(format!("coefficient slot {} has out-of-range source {:?}", slot, source));
            }
        }

        if self.kkt_lower_nnz < n || self.kkt_lower_nnz > n + nnz {
            return invalid("inconsistent structural nonzero count".into());
        }

        Ok(())
    }
}

fn ordering_name(ordering: &Ordering) -> &'static str {
    match ordering {
        Ordering::Natural => "natural",
        Ordering::StageWise => "stage-wise",
        Ordering::ReverseCuthillMcKee => "rcm",
        Ordering::Custom(_) => "custom",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use nalgebra::DMatrix;

    fn dims() -> KktDims {
        KktDims::new(4, 3, 2, 4)
    }

    fn scalar_problem(gx: f64) -> MpcProblem {
        let one = DMatrix::from_element(1, 1, 1.0);
        MpcProblem {
            horizon: 2,
            Q: one.clone(),
            R: one.clone(),
            Qf: None,
            A: one.clone(),
            B: one.clone(),
            Gx: DMatrix::from_element(1, 1, gx),
            Gu: one,
        }
    }

    #[test]
    fn test_coverage() {
        let sparse = Plan::generate(&scalar_problem(0.0), Ordering::StageWise).unwrap();
        assert!(sparse.check_coverage(&scalar_problem(0.0)).is_ok());
        assert!(matches!(
            sparse.check_coverage(&scalar_problem(2.0)),
            Err(KktError::InvalidPlan(_))
        ));

        let dense = Plan::generate_dense(KktDims::new(2, 1, 1, 1), Ordering::StageWise).unwrap();
        assert!(dense.check_coverage(&scalar_problem(2.0)).is_ok());

        let other = Plan::generate_dense(KktDims::new(3, 1, 1, 1), Ordering::StageWise).unwrap();
        assert!(matches!(
            other.check_coverage(&scalar_problem(0.0)),
            Err(KktError::PlanMismatch { .. })
        ));
    }

    #[test]
    fn test_generated_plans_validate() {
        for ordering in [Ordering::Natural, Ordering::StageWise, Ordering::ReverseCuthillMcKee] {
            let plan = Plan::generate_dense(dims(), ordering).unwrap();
            plan.validate().unwrap();
            assert_eq!(plan.n(), dims().n());
            assert_eq!(plan.coefficient_len(), plan.sources().len());
        }
    }

    #[test]
    fn test_classes_follow_blocks() {
        let d = dims();
        let plan = Plan::generate_dense(d, Ordering::StageWise).unwrap();
        for (i, &p) in plan.perm().iter().enumerate() {
            assert_eq!(plan.classes()[i], d.class(p));
        }
        assert_eq!(plan.classes()[0], PivotClass::Positive); // slack first
        assert_eq!(plan.classes()[d.ni], PivotClass::Negative); // then its dual
    }

    #[test]
    fn test_stage_wise_beats_natural() {
        let d = KktDims::new(10, 4, 2, 4);
        let natural = Plan::generate_dense(d, Ordering::Natural).unwrap().stats();
        let staged = Plan::generate_dense(d, Ordering::StageWise).unwrap().stats();
        assert_eq!(natural.kkt_nnz, staged.kkt_nnz);
        assert!(staged.l_nnz < natural.l_nnz, "staged {} natural {}", staged, natural);
    }

    #[test]
    fn test_stage_wise_fill_is_local() {
        // Fill-in per stage does not grow with the horizon
        let short = Plan::generate_dense(KktDims::new(5, 3, 2, 2), Ordering::StageWise).unwrap();
        let long = Plan::generate_dense(KktDims::new(10, 3, 2, 2), Ordering::StageWise).unwrap();
        let per_stage_short = short.stats().l_nnz as f64 / 5.0;
        let per_stage_long = long.stats().l_nnz as f64 / 10.0;
        assert!(per_stage_long < 1.2 * per_stage_short);
    }

    #[test]
    fn test_rejects_empty_dims() {
        let err = Plan::generate_dense(KktDims::new(0, 1, 1, 0), Ordering::StageWise);
        assert!(matches!(err, Err(KktError::InvalidDimensions(_))));
    }

    #[test]
    fn test_validate_detects_corruption() {
        let plan = Plan::generate_dense(dims(), Ordering::StageWise).unwrap();

        let mut bad = plan.clone();
        bad.perm.swap(0, 1);
        assert!(matches!(bad.validate(), Err(KktError::InvalidPlan(_))));

        let mut bad = plan.clone();
        bad.sources.pop();
        assert!(matches!(bad.validate(), Err(KktError::InvalidPlan(_))));

        let mut bad = plan.clone();
        let pos = (0..bad.l_nnz()).find(|&p| !bad.deps(p).is_empty()).unwrap();
        let first = bad.dep_ptr[pos];
        bad.deps[first].pivot = bad.l_rows[pos];
        assert!(matches!(bad.validate(), Err(KktError::InvalidPlan(_))));

        let mut bad = plan;
        let slot = bad
            .sources
            .iter()
            .position(|s| matches!(s, Source::Weight(_)))
            .unwrap();
        bad.sources[slot] = Source::Weight(10_000);
        assert!(matches!(bad.validate(), Err(KktError::InvalidPlan(_))));
    }

    #[test]
    fn test_system_rejects_corrupt_plan() {
        use crate::linalg::kkt::KktSystem;
        use crate::settings::KktSettings;
        use std::sync::Arc;

        let mut bad = Plan::generate(&scalar_problem(1.0), Ordering::StageWise).unwrap();
        assert!(!bad.row_entries.is_empty());
        bad.row_entries[0].pos = 10_000;
        let err = KktSystem::new(Arc::new(bad), scalar_problem(1.0), KktSettings::default());
        assert!(matches!(err, Err(KktError::InvalidPlan(_))));
    }
}
