//! Sparse matrix helpers on top of `sprs`.
//!
//! The kernel itself works on plan-ordered flat arrays; `sprs` matrices are
//! used at setup time (ordering) and for exporting or inspecting the KKT
//! matrix.

use sprs::{CsMat, TriMat};

/// Sparse matrix in CSC format.
pub type SparseCsc = CsMat<f64>;

/// Build a full symmetric matrix from lower-triangle triplets (`row >= col`).
pub fn symmetric_from_lower<I>(n: usize, lower: I) -> SparseCsc
where
    I: IntoIterator<Item = (usize, usize, f64)>,
{
    let mut tri = TriMat::new((n, n));
    for (i, j, v) in lower {
        debug_assert!(i >= j, "expected a lower-triangle entry, got ({}, {})", i, j);
        tri.add_triplet(i, j, v);
        if i != j {
            tri.add_triplet(j, i, v);
        }
    }
    tri.to_csc()
}

/// Symmetric structure of a set of lower-triangle positions, in CSR form.
pub(crate) fn symmetric_pattern<I>(n: usize, lower: I) -> CsMat<f64>
where
    I: IntoIterator<Item = (usize, usize)>,
{
    let mut tri = TriMat::new((n, n));
    for (i, j) in lower {
        tri.add_triplet(i, j, 1.0);
        if i != j {
            tri.add_triplet(j, i, 1.0);
        }
    }
    tri.to_csr()
}

/// `y = A x` for a CSC matrix.
pub fn spmv(a: &SparseCsc, x: &[f64], y: &mut [f64]) {
    debug_assert!(a.is_csc());
    assert_eq!(a.cols(), x.len(), "x length");
    assert_eq!(a.rows(), y.len(), "y length");

    y.fill(0.0);
    for (col, column) in a.outer_iterator().enumerate() {
        let xc = x[col];
        if xc == 0.0 {
            continue;
        }
        for (row, &v) in column.iter() {
            y[row] += v * xc;
        }
    }
}
