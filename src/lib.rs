//! sigadmm
//!
//! This library provides ADMM solvers for signal restoration and sparse
//! coding problems. A generic iteration engine drives problem operators
//! through a fixed schedule of primal, auxiliary, and dual updates while
//! tracking residuals, adapting the penalty parameter, and recording
//! per-iteration statistics. Concrete operators cover total-variation
//! denoising, total-variation deconvolution, and convolutional basis
//! pursuit denoising.
//! For more information, please see the GitHub repository:
//! <https://github.com/sigadmm/sigadmm>.
//!
//! # Functionality
//!
//! - Generic ADMM iteration loop with over-relaxation, stopping rules,
//!   and divergence detection
//! - Adaptive penalty-parameter control with dual rescaling
//! - Per-iteration statistics, step timings, and CSV/JSON export
//! - Total-variation L2 denoising and deconvolution
//! - Convolutional basis pursuit denoising
//!
//! # Features
//!
//! - `rayon` - parallel synthetic-signal generation in the demo binary

/// Convolutional basis pursuit denoising
pub mod cbpdn;

/// Configuration and solver errors
pub mod error;

/// Iteration records, warnings, timings, and exports
pub mod itstat;

/// Array math: norms, thresholds, differences, transforms
pub mod linalg;

/// Solver and penalty-controller options
pub mod options;

/// The ADMM iteration engine and the problem capability trait
pub mod problem;

/// Adaptive penalty-parameter control
pub mod rho;

/// Total-variation L2 denoising and deconvolution
pub mod tvl2;
