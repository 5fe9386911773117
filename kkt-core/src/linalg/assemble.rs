//! KKT assembly into the plan's coefficient vector.

use crate::plan::Plan;
use crate::problem::MpcProblem;

/// Write every coefficient slot from its plan source.
///
/// Diagonal slots come first in elimination order, followed by one slot per
/// `L` position. Fill-in slots are reset to zero, so assembling twice with the
/// same inputs gives bit-identical output.
pub(crate) fn fill_kkt(plan: &Plan, problem: &MpcProblem, s_inv_z: &[f64], kkt: &mut [f64]) {
    debug_assert_eq!(kkt.len(), plan.coefficient_len());
    for (slot, source) in kkt.iter_mut().zip(plan.sources()) {
        *slot = source.value(problem, s_inv_z);
    }
}
