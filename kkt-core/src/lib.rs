//! kkt-core: fixed-pattern LDLᵀ kernel for MPC interior-point solvers
//!
//! Each iteration of a primal-dual interior-point method for a
//! linear-quadratic MPC problem solves one or more linear systems with the
//! same quasi-definite KKT matrix. Only the slack/multiplier weights change
//! between iterations; the sparsity pattern never does. This crate splits the
//! work accordingly:
//!
//! - **Offline**: [`Plan::generate`] picks an elimination order, runs the
//!   symbolic factorization and records, for every coefficient, where its
//!   value comes from and which pivots its update needs.
//! - **Online**: [`KktSystem`] assembles the matrix, factors it with static
//!   pivot regularization (no pivoting, no allocation) and solves with
//!   optional iterative refinement.
//!
//! # Regularization
//!
//! Every pivot has a fixed expected sign ([`PivotClass`]): positive for
//! states, inputs and slacks, negative for multipliers. Pivots are pushed away
//! from zero by `kkt_reg` and clamped when the raw value has the wrong sign,
//! so `|d_i| ≥ kkt_reg` always holds and the factorization never fails.
//!
//! # Example
//!
//! ```ignore
//! use kkt_core::{KktSettings, KktSystem, MpcProblem, Ordering, Plan};
//! use std::sync::Arc;
//!
//! let plan = Arc::new(Plan::generate(&problem, Ordering::StageWise)?);
//! let mut kkt = KktSystem::new(plan, problem, KktSettings::from_env())?;
//!
//! kkt.fill_kkt(&s_inv_z);
//! let factor = kkt.ldl_factor();
//! kkt.solve(&factor, &rhs, &mut step);
//! ```

#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)] // engines take every buffer explicitly
#![allow(clippy::needless_range_loop)]

pub mod error;
pub mod problem;
pub mod regularization;
pub mod settings;
pub mod plan;
pub mod linalg;

pub use error::{KktError, KktResult};
pub use linalg::kkt::{KktSystem, LdlFactorization};
pub use plan::{Ordering, Plan, PlanStats, Source};
pub use problem::{KktDims, MpcProblem, StageMatrix, VarBlock};
pub use regularization::{PivotClass, DEFAULT_KKT_REG};
pub use settings::KktSettings;
