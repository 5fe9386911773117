//! Kernel settings.

use crate::error::{KktError, KktResult};
use crate::regularization::DEFAULT_KKT_REG;
use std::env;

/// Settings read by the assembler, factorization and solves.
///
/// `kkt_reg` may be changed between outer iterations through
/// [`KktSystem::set_kkt_reg`](crate::KktSystem::set_kkt_reg); everything else
/// is fixed for the life of a solver instance.
#[derive(Debug, Clone)]
pub struct KktSettings {
    /// Pivot regularization, strictly positive
    pub kkt_reg: f64,

    /// Iterative refinement steps performed by `solve`
    pub refine_steps: usize,

    /// Run factorization/solve diagnostics and log them at debug level
    pub debug: bool,

    /// Log residual norms before and after refinement
    pub verbose_refinement: bool,
}

impl Default for KktSettings {
    fn default() -> Self {
        Self {
            kkt_reg: DEFAULT_KKT_REG,
            refine_steps: 1,
            debug: false,
            verbose_refinement: false,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| v != "0" && v.to_lowercase() != "false")
}

impl KktSettings {
    /// Defaults with environment overrides.
    ///
    /// - `MPC_KKT_REG`: pivot regularization
    /// - `MPC_KKT_REFINE_STEPS`: refinement steps
    /// - `MPC_KKT_DEBUG`: enable diagnostics
    /// - `MPC_KKT_VERBOSE_REFINEMENT`: log refinement residuals
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let kkt_reg = env::var("MPC_KKT_REG")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(defaults.kkt_reg);

        let refine_steps = env::var("MPC_KKT_REFINE_STEPS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.refine_steps);

        Self {
            kkt_reg,
            refine_steps,
            debug: env_flag("MPC_KKT_DEBUG").unwrap_or(defaults.debug),
            verbose_refinement: env_flag("MPC_KKT_VERBOSE_REFINEMENT")
                .unwrap_or(defaults.verbose_refinement),
        }
    }

    /// Reject settings the factorization cannot honour.
    pub fn validate(&self) -> KktResult<()> {
        validate_kkt_reg(self.kkt_reg)
    }
}

pub(crate) fn validate_kkt_reg(kkt_reg: f64) -> KktResult<()> {
    if !kkt_reg.is_finite() || kkt_reg <= 0.0 {
        return Err(KktError::InvalidRegularization(format!(
            "kkt_reg must be finite and positive, got {}",
            kkt_reg
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = KktSettings::default();
        assert_eq!(settings.kkt_reg, 1e-7);
        assert_eq!(settings.refine_steps, 1);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_regularization() {
        for reg in [0.0, -1e-7, f64::NAN, f64::INFINITY] {
            let settings = KktSettings { kkt_reg: reg, ..Default::default() };
            assert!(matches!(
                settings.validate(),
                Err(KktError::InvalidRegularization(_))
            ));
        }
    }
}
