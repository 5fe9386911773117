//! Linear algebra layer.
//!
//! KKT assembly, the planned LDLᵀ factorization and solves, diagnostics, and
//! `sprs` helpers used at setup time.

pub mod sparse;
pub mod kkt;
mod assemble;
mod ldl;
mod verify;
