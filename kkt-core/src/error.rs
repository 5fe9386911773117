//! Error types for setup-time validation.
//!
//! Assembly, factorization and solves are total once a [`KktSystem`](crate::KktSystem)
//! exists; everything that can fail is checked when plans, problems and settings
//! are built.

use crate::problem::KktDims;
use thiserror::Error;

/// Errors raised while building or validating KKT kernel inputs.
#[derive(Error, Debug)]
pub enum KktError {
    /// A matrix or vector has the wrong size
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// What was being checked
        context: &'static str,
        /// Expected dimension
        expected: usize,
        /// Actual dimension
        actual: usize,
    },

    /// Problem dimensions that cannot describe an MPC horizon
    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// A cost block is not symmetric
    #[error("Matrix {0} is not symmetric")]
    NotSymmetric(&'static str),

    /// Invalid regularization parameter
    #[error("Invalid regularization parameter: {0}")]
    InvalidRegularization(String),

    /// A custom elimination order is not a bijection
    #[error("Invalid permutation: {0}")]
    InvalidPermutation(String),

    /// A sparsity plan violates one of its structural invariants
    #[error("Invalid sparsity plan: {0}")]
    InvalidPlan(String),

    /// The plan was generated for a different topology
    #[error("Plan was generated for {plan:?}, problem has {problem:?}")]
    PlanMismatch {
        /// Dimensions recorded in the plan
        plan: KktDims,
        /// Dimensions of the problem
        problem: KktDims,
    },
}

/// Result type for KKT kernel setup.
pub type KktResult<T> = Result<T, KktError>;
