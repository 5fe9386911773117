//! Elimination orders for the KKT system.
//!
//! A permutation maps elimination index to natural index (`perm[new] = old`).
//! Any order gives a usable factorization of the regularized quasi-definite
//! matrix; the choice only changes fill-in.

use super::pattern::NaturalEntry;
use crate::error::{KktError, KktResult};
use crate::linalg::sparse;
use crate::problem::KktDims;

/// Elimination order used when generating a plan.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Ordering {
    /// Natural stacked order
    Natural,
    /// Per stage: slacks, inequality duals, inputs, dynamics duals, next state
    #[default]
    StageWise,
    /// Bandwidth-reducing order computed on the symmetric pattern
    ReverseCuthillMcKee,
    /// Caller-supplied permutation, `perm[elimination] = natural`
    Custom(Vec<usize>),
}

impl Ordering {
    pub(crate) fn permutation(&self, dims: &KktDims, entries: &[NaturalEntry]) -> KktResult<Vec<usize>> {
        let n = dims.n();
        let perm = match self {
            Ordering::Natural => (0..n).collect(),
            Ordering::StageWise => stage_wise(dims),
            Ordering::ReverseCuthillMcKee => reverse_cuthill_mckee(n, entries),
            Ordering::Custom(perm) => perm.clone(),
        };
        check_permutation(&perm, n)?;
        Ok(perm)
    }
}

fn stage_wise(dims: &KktDims) -> Vec<usize> {
    let mut perm = Vec::with_capacity(dims.n());
    for t in 0..dims.horizon {
        perm.extend((0..dims.ni).map(|r| dims.slack(t, r)));
        perm.extend((0..dims.ni).map(|r| dims.ineq_dual(t, r)));
        perm.extend((0..dims.nu).map(|r| dims.input(t, r)));
        perm.extend((0..dims.nx).map(|r| dims.eq_dual(t, r)));
        perm.extend((0..dims.nx).map(|r| dims.state(t + 1, r)));
    }
    perm
}

fn reverse_cuthill_mckee(n: usize, entries: &[NaturalEntry]) -> Vec<usize> {
    let pattern = sparse::symmetric_pattern(n, entries.iter().map(|e| (e.row, e.col)));
    sprs::linalg::reverse_cuthill_mckee(pattern.structure_view())
        .perm
        .vec()
}

/// Check that `perm` is a bijection on `0..n`.
pub(crate) fn check_permutation(perm: &[usize], n: usize) -> KktResult<()> {
    if perm.len() != n {
        return Err(KktError::InvalidPermutation(format!(
            "length {} does not match KKT dimension {}",
            perm.len(),
            n
        )));
    }
    let mut seen = vec![false; n];
    for (pos, &p) in perm.iter().enumerate() {
        if p >= n {
            return Err(KktError::InvalidPermutation(format!(
                "entry {} at position {} is out of range",
                p, pos
            )));
        }
        if seen[p] {
            return Err(KktError::InvalidPermutation(format!("index {} appears twice", p)));
        }
        seen[p] = true;
    }
    Ok(())
}

/// Inverse permutation (`inv[perm[i]] = i`).
pub(crate) fn invert(perm: &[usize]) -> Vec<usize> {
    let mut inv = vec![0; perm.len()];
    for (i, &p) in perm.iter().enumerate() {
        inv[p] = i;
    }
    inv
}
