//! Diagnostics: products with the assembled matrix and with the factors.
//!
//! These read the same plan arrays as the engines and never allocate, so they
//! can run inside a solve when diagnostics are enabled.

use crate::plan::Plan;

/// `result = K source` with the unregularized KKT matrix, natural order.
pub(crate) fn matrix_multiply(plan: &Plan, kkt: &[f64], source: &[f64], result: &mut [f64]) {
    let n = plan.n();
    let perm = plan.perm();

    for i in 0..n {
        result[perm[i]] = kkt[i] * source[perm[i]];
    }
    for i in 0..n {
        let col = perm[i];
        for pos in plan.column(i) {
            let value = kkt[n + pos];
            if value != 0.0 {
                let row = perm[plan.l_row(pos)];
                result[row] += value * source[col];
                result[col] += value * source[row];
            }
        }
    }
}

/// `‖target - K var‖²` with the unregularized matrix. Clobbers `work`.
pub(crate) fn check_residual(plan: &Plan, kkt: &[f64], target: &[f64], var: &[f64], work: &mut [f64]) -> f64 {
    matrix_multiply(plan, kkt, var, work);
    target
        .iter()
        .zip(work.iter())
        .map(|(t, k)| (t - k) * (t - k))
        .sum()
}

/// Squared Frobenius norm of `K - L D Lᵀ` over the full symmetric matrix.
///
/// `K` is the unregularized assembled matrix, so the diagonal contributes
/// `kkt_reg²` per pivot that was not clamped. Clobbers `work`.
pub(crate) fn check_factorization(plan: &Plan, kkt: &[f64], l: &[f64], d: &[f64], work: &mut [f64]) -> f64 {
    let n = plan.n();
    work[..n].fill(0.0);
    let mut total = 0.0;

    for k in 0..n {
        let row_k = plan.row(k);
        for e in row_k {
            work[e.col] = l[e.pos];
        }

        // (L D Lᵀ)[k, i] = L[k,i] d_i + Σ_j L[k,j] d_j L[i,j]
        for e in row_k {
            let i = e.col;
            let mut product = work[i] * d[i];
            for f in plan.row(i) {
                product += work[f.col] * d[f.col] * l[f.pos];
            }
            let diff = kkt[n + e.pos] - product;
            total += 2.0 * diff * diff;
        }

        let mut diag = d[k];
        for e in row_k {
            diag += l[e.pos] * l[e.pos] * d[e.col];
        }
        let diff = kkt[k] - diag;
        total += diff * diff;

        for e in row_k {
            work[e.col] = 0.0;
        }
    }

    total
}

/// `result = P L D Lᵀ Pᵀ source`, the matrix the factors actually represent.
pub(crate) fn factor_multiply(plan: &Plan, l: &[f64], d: &[f64], source: &[f64], result: &mut [f64], work: &mut [f64]) {
    let n = plan.n();
    let perm = plan.perm();

    for i in 0..n {
        work[i] = source[perm[i]];
    }

    // Lᵀ: column j reads rows below it, which are still untouched
    for j in 0..n {
        let mut value = work[j];
        for pos in plan.column(j) {
            value += l[pos] * work[plan.l_row(pos)];
        }
        work[j] = value * d[j];
    }

    // L: row k reads columns before it, which are still untouched
    for k in (0..n).rev() {
        let mut value = work[k];
        for e in plan.row(k) {
            value += l[e.pos] * work[e.col];
        }
        work[k] = value;
    }

    for i in 0..n {
        result[perm[i]] = work[i];
    }
}
