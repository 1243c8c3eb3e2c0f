use thiserror::Error;

/// Errors raised while validating a solver configuration.
///
/// Validation runs before the first iteration and reports the first
/// violated constraint, naming the offending option.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("MaxMainIter must be at least 1")]
    MaxMainIter,
    #[error("StopCount must be at least 1")]
    StopCount,
    #[error("{name} must be finite and non-negative (got {value})")]
    NonNegative { name: &'static str, value: f64 },
    #[error("{name} must be finite and positive (got {value})")]
    Positive { name: &'static str, value: f64 },
    #[error("{name} must be greater than 1 (got {value})")]
    GreaterThanOne { name: &'static str, value: f64 },
    #[error("RelaxParam must lie in (0, 2] (got {0})")]
    RelaxParam(f64),
    #[error("AutoRho.Period must be at least 1")]
    AutoRhoPeriod,
    #[error("AutoRho.RhoMin must not exceed AutoRho.RhoMax (got {min} > {max})")]
    RhoBounds { min: f64, max: f64 },
    #[error("AuxVarObj requires the split variable to share the primal shape")]
    AuxVarObjShape,
}

/// Errors raised by problem construction and solving.
#[derive(Error, Debug)]
pub enum SolverError {
    /// Invalid configuration, rejected before any iteration runs.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Incompatible array shapes at construction or warm start.
    #[error("dimension mismatch in {context}: expected {expected:?}, got {got:?}")]
    DimensionMismatch {
        context: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// An axis selection referenced a dimension the signal does not have.
    #[error("axis {axis} is out of range for a {ndim}-dimensional signal")]
    AxisOutOfRange { axis: usize, ndim: usize },

    /// Gradient axes must be strictly increasing and non-empty.
    #[error("gradient axes must be strictly increasing (got {0:?})")]
    UnorderedAxes(Vec<usize>),

    /// A non-finite objective or residual ended the solve. The iteration
    /// history up to and including the diverging record is retained on the
    /// solver.
    #[error("solve diverged at iteration {iteration}: {quantity} is not finite")]
    Divergence {
        iteration: usize,
        quantity: &'static str,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
