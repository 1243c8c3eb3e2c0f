use crate::error::ConfigError;

/// Penalty auto-adaptation settings.
///
/// When enabled, the penalty parameter is rescaled every `period`
/// iterations whenever the primal and dual residuals drift more than a
/// factor `rsdl_ratio` away from the target ratio `rsdl_target`. The
/// scaled dual variable is rescaled in the opposite direction so the
/// unscaled dual is unchanged.
#[derive(Debug, Clone)]
pub struct AutoRhoOptions {
    /// Enables penalty adaptation. When false the penalty is exactly
    /// constant over the whole solve.
    pub enabled: bool,
    /// Number of iterations between adaptation checks.
    pub period: usize,
    /// Multiplier applied on adaptation; under `auto_scaling` it caps the
    /// derived multiplier instead.
    pub scaling: f64,
    /// Residual imbalance that triggers adaptation.
    pub rsdl_ratio: f64,
    /// Target ratio between primal and dual residuals. `None` defers to
    /// the problem's heuristic (1.0 when it has none).
    pub rsdl_target: Option<f64>,
    /// Derives the multiplier from the measured residual imbalance instead
    /// of applying the fixed `scaling` factor.
    pub auto_scaling: bool,
    /// Lower clamp for the adapted penalty.
    pub rho_min: f64,
    /// Upper clamp for the adapted penalty.
    pub rho_max: f64,
}

impl Default for AutoRhoOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            period: 10,
            scaling: 2.0,
            rsdl_ratio: 10.0,
            rsdl_target: None,
            auto_scaling: false,
            rho_min: 1e-6,
            rho_max: 1e6,
        }
    }
}

impl AutoRhoOptions {
    /// Self-tuning profile used by the restoration problems: adapt every
    /// iteration, derive the multiplier from the residual imbalance, cap
    /// it at `cap`.
    pub fn self_scaling(cap: f64) -> Self {
        Self {
            enabled: true,
            period: 1,
            scaling: cap,
            rsdl_ratio: 1.2,
            auto_scaling: true,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.period < 1 {
            return Err(ConfigError::AutoRhoPeriod);
        }
        check_gt1("AutoRho.Scaling", self.scaling)?;
        check_gt1("AutoRho.RsdlRatio", self.rsdl_ratio)?;
        if let Some(target) = self.rsdl_target {
            check_positive("AutoRho.RsdlTarget", target)?;
        }
        check_positive("AutoRho.RhoMin", self.rho_min)?;
        check_positive("AutoRho.RhoMax", self.rho_max)?;
        if self.rho_min > self.rho_max {
            return Err(ConfigError::RhoBounds {
                min: self.rho_min,
                max: self.rho_max,
            });
        }
        Ok(())
    }
}

/// Settings shared by every ADMM problem.
///
/// All fields have working defaults; construct with struct-update syntax:
///
/// ```
/// use sigadmm::options::AdmmOptions;
///
/// let opts = AdmmOptions {
///     max_main_iter: 300,
///     rel_stop_tol: 1e-3,
///     ..Default::default()
/// };
/// assert!(opts.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct AdmmOptions {
    /// Prints a fixed-width status row per iteration.
    pub verbose: bool,
    /// Maximum number of iterations; a strict upper bound on the number of
    /// history records.
    pub max_main_iter: usize,
    /// Absolute stopping tolerance.
    pub abs_stop_tol: f64,
    /// Relative stopping tolerance.
    pub rel_stop_tol: f64,
    /// Number of consecutive iterations the stopping tolerances must hold
    /// before the solver reports convergence.
    pub stop_count: usize,
    /// Over-relaxation parameter in (0, 2]; 1.0 disables relaxation.
    pub relax_param: f64,
    /// Initial penalty parameter. `None` selects the problem's heuristic.
    pub rho: Option<f64>,
    /// Penalty auto-adaptation settings.
    pub auto_rho: AutoRhoOptions,
    /// Evaluates the data-fidelity term at the split variable instead of
    /// the primal variable. Requires the split to share the primal shape.
    pub aux_var_obj: bool,
    /// Evaluates the regularization term at the split variable instead of
    /// the constraint image of the primal variable.
    pub g_eval_y: bool,
    /// Requests a solution-accuracy residual from direct primal solvers;
    /// the value is recorded with each iteration.
    pub lin_solve_check: bool,
}

impl Default for AdmmOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            max_main_iter: 1000,
            abs_stop_tol: 0.0,
            rel_stop_tol: 1e-4,
            stop_count: 1,
            relax_param: 1.8,
            rho: None,
            auto_rho: AutoRhoOptions::default(),
            aux_var_obj: false,
            g_eval_y: true,
            lin_solve_check: false,
        }
    }
}

impl AdmmOptions {
    /// Checks every constraint, reporting the first violation. Called by
    /// the solver constructor, so an invalid configuration never iterates.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_main_iter < 1 {
            return Err(ConfigError::MaxMainIter);
        }
        if self.stop_count < 1 {
            return Err(ConfigError::StopCount);
        }
        check_non_negative("AbsStopTol", self.abs_stop_tol)?;
        check_non_negative("RelStopTol", self.rel_stop_tol)?;
        if !self.relax_param.is_finite() || self.relax_param <= 0.0 || self.relax_param > 2.0 {
            return Err(ConfigError::RelaxParam(self.relax_param));
        }
        if let Some(rho) = self.rho {
            check_positive("rho", rho)?;
        }
        self.auto_rho.validate()
    }
}

pub(crate) fn check_non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonNegative { name, value })
    }
}

pub(crate) fn check_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Positive { name, value })
    }
}

pub(crate) fn check_gt1(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 1.0 {
        Ok(())
    } else {
        Err(ConfigError::GreaterThanOne { name, value })
    }
}
