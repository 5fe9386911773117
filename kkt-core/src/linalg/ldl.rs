//! Planned LDLᵀ factorization and triangular solves.
//!
//! Both engines are straight-line loops over plan arrays: no pivoting, no
//! symbolic work and no allocation. The factorization is left-looking by
//! row: when pivot `i` is reached, row `i` of `L` is complete, so
//!
//! ```text
//! d_i    = K_ii - Σ_j L_ij² d_j
//! L_ki   = (K_ki - Σ_j L_kj d_j L_ij) / d_i        j in deps(k, i)
//! ```
//!
//! with `work[j] = L_ij d_j` cached for the current row.

use crate::plan::Plan;

/// Factor the regularized KKT matrix held in `kkt`.
///
/// Returns the number of pivots whose raw value had the wrong sign.
pub(crate) fn factor(
    plan: &Plan,
    kkt: &[f64],
    kkt_reg: f64,
    l: &mut [f64],
    d: &mut [f64],
    d_inv: &mut [f64],
    work: &mut [f64],
) -> usize {
    let n = plan.n();
    let classes = plan.classes();
    let mut sign_flips = 0;

    for i in 0..n {
        let mut d_raw = kkt[i];
        for e in plan.row(i) {
            let scaled = l[e.pos] * d[e.col];
            work[e.col] = scaled;
            d_raw -= l[e.pos] * scaled;
        }

        let pivot = classes[i].regularize(d_raw, kkt_reg);
        if pivot.flipped {
            sign_flips += 1;
        }
        d[i] = pivot.value;
        d_inv[i] = 1.0 / pivot.value;

        for pos in plan.column(i) {
            let mut value = kkt[n + pos];
            for dep in plan.deps(pos) {
                value -= l[dep.pos] * work[dep.pivot];
            }
            l[pos] = value * d_inv[i];
        }
    }

    sign_flips
}

/// Solve `P L D Lᵀ Pᵀ var = target`; `target` and `var` are in natural order.
pub(crate) fn solve(plan: &Plan, l: &[f64], d_inv: &[f64], target: &[f64], var: &mut [f64], work: &mut [f64]) {
    let n = plan.n();
    let perm = plan.perm();

    // L w = Pᵀ target
    for i in 0..n {
        let mut value = target[perm[i]];
        for e in plan.row(i) {
            value -= l[e.pos] * work[e.col];
        }
        work[i] = value;
    }

    for (w, &di) in work[..n].iter_mut().zip(d_inv) {
        *w *= di;
    }

    // Lᵀ w = D⁻¹ w
    for i in (0..n).rev() {
        let mut value = work[i];
        for pos in plan.column(i) {
            value -= l[pos] * work[plan.l_row(pos)];
        }
        work[i] = value;
    }

    for i in 0..n {
        var[perm[i]] = work[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::assemble::fill_kkt;
    use crate::plan::Ordering;
    use crate::problem::MpcProblem;
    use nalgebra::{DMatrix, DVector};

    fn problem() -> MpcProblem {
        MpcProblem {
            horizon: 3,
            Q: DMatrix::from_row_slice(2, 2, &[2.0, 0.3, 0.3, 1.0]),
            R: DMatrix::from_element(1, 1, 0.5),
            Qf: None,
            A: DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.0, 1.0]),
            B: DMatrix::from_row_slice(2, 1, &[0.0, 0.1]),
            Gx: DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 0.0]),
            Gu: DMatrix::from_row_slice(2, 1, &[0.0, 1.0]),
        }
    }

    /// Dense natural-order KKT matrix with the regularization of `d` undone.
    fn dense_kkt(plan: &Plan, kkt: &[f64]) -> DMatrix<f64> {
        let n = plan.n();
        let perm = plan.perm();
        let mut m = DMatrix::zeros(n, n);
        for i in 0..n {
            m[(perm[i], perm[i])] = kkt[i];
            for pos in plan.column(i) {
                let (a, b) = (perm[plan.l_row(pos)], perm[i]);
                m[(a, b)] = kkt[n + pos];
                m[(b, a)] = kkt[n + pos];
            }
        }
        m
    }

    #[test]
    fn test_factor_and_solve_match_dense() {
        let prob = problem();
        let reg = 1e-7;
        let s_inv_z = [0.7, 1.3, 2.0, 0.4, 1.1, 0.9];

        for ordering in [Ordering::Natural, Ordering::StageWise, Ordering::ReverseCuthillMcKee] {
            let plan = Plan::generate(&prob, ordering).unwrap();
            let n = plan.n();
            let mut kkt = vec![0.0; plan.coefficient_len()];
            fill_kkt(&plan, &prob, &s_inv_z, &mut kkt);

            let mut l = vec![0.0; plan.l_nnz()];
            let (mut d, mut d_inv, mut work) = (vec![0.0; n], vec![0.0; n], vec![0.0; n]);
            let flips = factor(&plan, &kkt, reg, &mut l, &mut d, &mut d_inv, &mut work);
            assert_eq!(flips, 0);

            for i in 0..n {
                assert!(plan.classes()[i].admits(d[i], reg));
            }

            // Regularized matrix in natural order
            let mut dense = dense_kkt(&plan, &kkt);
            for i in 0..n {
                dense[(plan.perm()[i], plan.perm()[i])] += plan.classes()[i].sign() * reg;
            }

            let target: Vec<f64> = (0..n).map(|i| (i as f64 * 0.37).sin()).collect();
            let mut var = vec![0.0; n];
            solve(&plan, &l, &d_inv, &target, &mut var, &mut work);

            let expected = dense.lu().solve(&DVector::from_vec(target)).unwrap();
            for i in 0..n {
                assert!(
                    (var[i] - expected[i]).abs() < 1e-6 * (1.0 + expected[i].abs()),
                    "index {}: {} vs {}",
                    i,
                    var[i],
                    expected[i]
                );
            }
        }
    }

    #[test]
    fn test_wrong_sign_pivot_is_clamped() {
        let mut prob = problem();
        prob.Q = DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 0.0, 1.0]);
        let plan = Plan::generate(&prob, Ordering::Natural).unwrap();
        let n = plan.n();
        let mut kkt = vec![0.0; plan.coefficient_len()];
        fill_kkt(&plan, &prob, &[1.0; 6], &mut kkt);

        let reg = 1e-6;
        let mut l = vec![0.0; plan.l_nnz()];
        let (mut d, mut d_inv, mut work) = (vec![0.0; n], vec![0.0; n], vec![0.0; n]);
        let flips = factor(&plan, &kkt, reg, &mut l, &mut d, &mut d_inv, &mut work);

        // x_1[0] is the first pivot in natural order
        assert!(flips >= 1);
        assert_eq!(d[0], reg);
        for i in 0..n {
            assert!(plan.classes()[i].admits(d[i], reg));
            assert!(d_inv[i].is_finite());
        }
    }
}
