use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use ndarray::{ArrayD, IxDyn};
use serde::Serialize;

use crate::{
    error::{ConfigError, SolverError},
    itstat::{IterationLog, IterationRecord, LinSolveWarning},
    linalg::{self, Precision, from_f64, to_f64},
    options::AdmmOptions,
    rho::RhoPolicy,
};

/// Result of one primal solve.
pub struct PrimalSolution<T: Precision> {
    /// The new primal iterate.
    pub x: ArrayD<T>,
    /// Relative residual of the linear solve, when measured.
    pub rel_residual: Option<f64>,
}

impl<T: Precision> PrimalSolution<T> {
    /// Wraps a solution with no accuracy measurement attached.
    pub fn exact(x: ArrayD<T>) -> Self {
        Self {
            x,
            rel_residual: None,
        }
    }
}

/// Capability set a problem exposes to the solver.
///
/// A problem owns its data (signal, kernels, regularization weight) and is
/// immutable across a solve; every per-iteration quantity lives in
/// [`SolverState`]. The solver drives the iteration schedule and calls back
/// into the problem for the pieces that depend on the functional being
/// minimized:
///
/// 1. `solve_primal` - the x-update subproblem
/// 2. `prox` - the proximal map behind the y-update
/// 3. `constraint` / `constraint_adjoint` - the linear operator coupling
///    the primal and split variables (identity unless the problem lifts
///    the split into another space)
/// 4. `objective` - the reported functional split
/// 5. `residual_norms` - normalization for the stopping rules
///
/// Problems minimize `f(x) + g(y)` subject to `A x = y`; with the default
/// identity constraint this is the plain consensus split `x = y`.
pub trait ProblemOperator<T: Precision> {
    /// Shape of the primal variable X.
    fn primal_shape(&self) -> &[usize];

    /// Shape of the split variable Y and the dual U. Defaults to the
    /// primal shape.
    fn split_shape(&self) -> &[usize] {
        self.primal_shape()
    }

    /// Starting value for X. Defaults to zeros.
    fn primal_init(&self) -> ArrayD<T> {
        ArrayD::zeros(IxDyn(self.primal_shape()))
    }

    /// Penalty parameter used when the options leave `rho` unset.
    fn default_rho(&self) -> f64;

    /// Residual target ratio used when the options leave
    /// `AutoRho.RsdlTarget` unset.
    fn rsdl_target_default(&self) -> f64 {
        1.0
    }

    /// Solves the x-update subproblem
    /// `argmin_x f(x) + (rho/2) ||A x - y + u||^2`.
    ///
    /// `x_prev` is the previous iterate, available as a warm start for
    /// iterative solvers. When `check` is set, direct solvers should
    /// measure and report the relative residual of their linear system;
    /// iterative solvers report their final residual regardless.
    fn solve_primal(
        &self,
        x_prev: &ArrayD<T>,
        y: &ArrayD<T>,
        u: &ArrayD<T>,
        rho: T,
        check: bool,
    ) -> Result<PrimalSolution<T>, SolverError>;

    /// Declared accuracy of the primal solve. A reported relative residual
    /// above this value makes the solver record a [`LinSolveWarning`];
    /// `None` disables the check.
    fn solve_tol(&self) -> Option<f64> {
        None
    }

    /// Proximal map of `g/rho`, applied to `A x + u` in the y-update.
    fn prox(&self, v: &ArrayD<T>, rho: T) -> ArrayD<T>;

    /// The constraint operator `A`. Defaults to identity.
    fn constraint(&self, x: &ArrayD<T>) -> ArrayD<T> {
        x.clone()
    }

    /// The adjoint `A^T`. Defaults to identity.
    fn constraint_adjoint(&self, v: &ArrayD<T>) -> ArrayD<T> {
        v.clone()
    }

    /// Objective split `(data_fidelity, weighted_regularization)` at the
    /// evaluation points the solver selects from its options.
    fn objective(&self, fvar: &ArrayD<T>, gvar: &ArrayD<T>) -> (f64, f64);

    /// Normalization pair `(rn, sn)` for the primal and dual residuals.
    /// The solver maps zero entries to one before dividing.
    fn residual_norms(&self, ax: &ArrayD<T>, y: &ArrayD<T>, u: &ArrayD<T>, rho: T) -> (f64, f64) {
        let rn = linalg::norm2(ax).max(linalg::norm2(y));
        let sn = to_f64(rho) * linalg::norm2(&self.constraint_adjoint(u));
        (rn, sn)
    }
}

/// Mutable per-iteration state of a solve.
#[derive(Debug, Clone)]
pub struct SolverState<T: Precision> {
    /// Primal variable X.
    pub x: ArrayD<T>,
    /// Split variable Y.
    pub y: ArrayD<T>,
    /// Split variable from the previous iteration.
    pub yprev: ArrayD<T>,
    /// Scaled dual variable U.
    pub u: ArrayD<T>,
    /// Relaxed constraint image driving the y- and u-updates.
    pub ax: ArrayD<T>,
    /// Unrelaxed constraint image `A x` used by the residuals.
    pub axnr: ArrayD<T>,
    /// Current penalty parameter.
    pub rho: T,
}

/// Terminal outcome of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SolveStatus {
    /// Both residuals stayed under their tolerances for `stop_count`
    /// consecutive iterations.
    Converged,
    /// The iteration limit was reached first.
    MaxIterReached,
    /// A non-finite objective or residual ended the solve.
    Diverged,
    /// The abort flag was observed at an iteration boundary.
    Aborted,
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SolveStatus::Converged => "converged",
            SolveStatus::MaxIterReached => "max iterations reached",
            SolveStatus::Diverged => "diverged",
            SolveStatus::Aborted => "aborted",
        };
        write!(f, "{}", s)
    }
}

/// Condensed outcome of a solve; the full per-iteration history stays on
/// the solver.
#[derive(Debug, Clone, Serialize)]
pub struct SolveSummary {
    pub status: SolveStatus,
    /// Number of iterations recorded.
    pub iterations: usize,
    /// Wall time of the whole solve in milliseconds.
    pub runtime_ms: f64,
    /// Final objective value (NaN when nothing was recorded).
    pub functional: f64,
    /// Final normalized primal residual.
    pub primal_residual: f64,
    /// Final normalized dual residual.
    pub dual_residual: f64,
    /// Penalty parameter after the final iteration.
    pub rho: f64,
    /// Number of linear-solve warnings accumulated.
    pub warnings: usize,
}

struct Residuals {
    r: f64,
    s: f64,
    eps_primal: f64,
    eps_dual: f64,
}

/// ADMM solver that orchestrates the iterative optimization process.
///
/// The solver owns the problem, the iteration state, and the history log.
/// Each iteration runs the primal solve, relaxation, the proximal
/// y-update, the dual ascent, residual evaluation and recording, the
/// divergence check, penalty adaptation, and the stopping rule, in that
/// order. Identical problems and options produce identical iterate
/// sequences and records.
///
/// # Example
///
/// ```rust,no_run
/// use sigadmm::options::AdmmOptions;
/// use sigadmm::problem::{AdmmSolver, ProblemOperator};
///
/// # fn example<P: ProblemOperator<f64>>(problem: P) -> Result<(), sigadmm::error::SolverError> {
/// let mut solver = AdmmSolver::new(problem, AdmmOptions::default())?;
/// let summary = solver.solve()?;
/// println!("{} after {} iterations", summary.status, summary.iterations);
/// solver.print_timing_summary();
/// # Ok(())
/// # }
/// ```
pub struct AdmmSolver<T: Precision, P: ProblemOperator<T>> {
    /// The problem supplying the capability set.
    problem: P,
    /// Validated configuration.
    opts: AdmmOptions,
    /// Iteration state.
    state: SolverState<T>,
    /// History, warnings, and step timings.
    log: IterationLog,
    /// Penalty controller.
    policy: RhoPolicy,
    /// Terminal status once the solve has ended.
    status: Option<SolveStatus>,
    /// Externally owned early-termination flag.
    abort: Option<Arc<AtomicBool>>,
    /// Wall time of the last solve in milliseconds.
    runtime_ms: f64,
}

impl<T: Precision, P: ProblemOperator<T>> AdmmSolver<T, P> {
    /// Validates the configuration against the problem and builds the
    /// initial state. No iteration work happens here beyond
    /// `primal_init`.
    pub fn new(problem: P, opts: AdmmOptions) -> Result<Self, SolverError> {
        opts.validate()?;
        let primal_shape = problem.primal_shape().to_vec();
        let split_shape = problem.split_shape().to_vec();
        if opts.aux_var_obj && primal_shape != split_shape {
            return Err(ConfigError::AuxVarObjShape.into());
        }
        let rho0 = opts.rho.unwrap_or_else(|| problem.default_rho());
        if !rho0.is_finite() || rho0 <= 0.0 {
            return Err(ConfigError::Positive {
                name: "rho",
                value: rho0,
            }
            .into());
        }
        let x = problem.primal_init();
        if x.shape() != primal_shape.as_slice() {
            return Err(SolverError::DimensionMismatch {
                context: "primal initialization",
                expected: primal_shape,
                got: x.shape().to_vec(),
            });
        }
        let xi = opts
            .auto_rho
            .rsdl_target
            .unwrap_or_else(|| problem.rsdl_target_default());
        let policy = RhoPolicy::new(opts.auto_rho.clone(), xi);
        let y = ArrayD::zeros(IxDyn(&split_shape));
        let state = SolverState {
            x,
            yprev: y.clone(),
            u: y.clone(),
            ax: y.clone(),
            axnr: y.clone(),
            y,
            rho: from_f64(rho0),
        };
        Ok(Self {
            problem,
            opts,
            state,
            log: IterationLog::new(),
            policy,
            status: None,
            abort: None,
            runtime_ms: 0.0,
        })
    }

    /// Seeds the split and dual variables before solving.
    pub fn warm_start(&mut self, y0: ArrayD<T>, u0: ArrayD<T>) -> Result<(), SolverError> {
        let split = self.problem.split_shape();
        if y0.shape() != split {
            return Err(SolverError::DimensionMismatch {
                context: "warm start y",
                expected: split.to_vec(),
                got: y0.shape().to_vec(),
            });
        }
        if u0.shape() != split {
            return Err(SolverError::DimensionMismatch {
                context: "warm start u",
                expected: split.to_vec(),
                got: u0.shape().to_vec(),
            });
        }
        self.state.yprev = y0.clone();
        self.state.y = y0;
        self.state.u = u0;
        Ok(())
    }

    /// Installs a flag the loop checks at each iteration boundary;
    /// setting it ends the solve with [`SolveStatus::Aborted`].
    pub fn with_abort_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.abort = Some(flag);
        self
    }

    /// Runs the iteration schedule for at most `max_main_iter` iterations.
    ///
    /// Each call starts a fresh history from the current variables, so a
    /// repeated call continues where the previous one stopped. Divergence
    /// returns an error after the diagnostic record is appended; the
    /// history and state remain readable on the solver.
    pub fn solve(&mut self) -> Result<SolveSummary, SolverError> {
        let start = Instant::now();
        let alpha = self.opts.relax_param;
        let mut below_tol = 0usize;
        let mut status = SolveStatus::MaxIterReached;

        self.log.reset();
        self.status = None;
        if self.opts.verbose {
            println!("{}", IterationRecord::status_header());
            println!("{}", IterationRecord::status_rule());
        }

        for k in 0..self.opts.max_main_iter {
            if self.abort_requested() {
                status = SolveStatus::Aborted;
                break;
            }
            self.log.start_iteration(k);

            // x-update
            let t = Instant::now();
            let solution = self.problem.solve_primal(
                &self.state.x,
                &self.state.y,
                &self.state.u,
                self.state.rho,
                self.opts.lin_solve_check,
            )?;
            self.state.x = solution.x;
            self.log.record_step("solve_primal", t.elapsed());

            if let (Some(res), Some(tol)) = (solution.rel_residual, self.problem.solve_tol()) {
                if res > tol {
                    if self.opts.verbose {
                        println!(
                            "[AdmmSolver] primal solve residual {:.3e} above tolerance {:.3e} at iteration {}",
                            res, tol, k
                        );
                    }
                    self.log.warn(LinSolveWarning {
                        iteration: k,
                        residual: res,
                        tolerance: tol,
                    });
                }
            }

            // relaxation, y-update, dual ascent
            let t = Instant::now();
            self.state.axnr = self.problem.constraint(&self.state.x);
            self.state.ax = if alpha == 1.0 {
                self.state.axnr.clone()
            } else {
                let a = from_f64::<T>(alpha);
                let b = from_f64::<T>(1.0 - alpha);
                &self.state.axnr * a + &self.state.y * b
            };
            let v = &self.state.ax + &self.state.u;
            let y_new = self.problem.prox(&v, self.state.rho);
            self.state.yprev = std::mem::replace(&mut self.state.y, y_new);
            self.state.u = &self.state.u + &self.state.ax - &self.state.y;
            self.log.record_step("prox_dual", t.elapsed());

            // residuals, objective, record
            let t = Instant::now();
            let rsdl = self.compute_residuals();
            let (data_fidelity, regularization) = self.evaluate_objective();
            let functional = data_fidelity + regularization;
            let record = IterationRecord {
                iteration: k,
                functional,
                data_fidelity,
                regularization,
                primal_residual: rsdl.r,
                dual_residual: rsdl.s,
                eps_primal: rsdl.eps_primal,
                eps_dual: rsdl.eps_dual,
                rho: to_f64(self.state.rho),
                solve_residual: solution.rel_residual,
                time_ms: start.elapsed().as_secs_f64() * 1000.0,
            };
            if self.opts.verbose {
                println!("{}", record.status_row());
            }
            self.log.append(record);
            self.log.record_step("residuals", t.elapsed());

            // a non-finite objective or residual is fatal; the record just
            // appended keeps the diagnostic values readable
            let diverged = if !functional.is_finite() {
                Some("objective")
            } else if !rsdl.r.is_finite() {
                Some("primal residual")
            } else if !rsdl.s.is_finite() {
                Some("dual residual")
            } else {
                None
            };
            if let Some(quantity) = diverged {
                self.status = Some(SolveStatus::Diverged);
                self.runtime_ms = start.elapsed().as_secs_f64() * 1000.0;
                return Err(SolverError::Divergence {
                    iteration: k,
                    quantity,
                });
            }

            // penalty adaptation
            self.policy
                .adapt(k, rsdl.r, rsdl.s, &mut self.state.rho, &mut self.state.u);

            // stopping rule
            if rsdl.r < rsdl.eps_primal && rsdl.s < rsdl.eps_dual {
                below_tol += 1;
                if below_tol >= self.opts.stop_count {
                    status = SolveStatus::Converged;
                    break;
                }
            } else {
                below_tol = 0;
            }
        }

        self.runtime_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.status = Some(status);
        Ok(self.summary_with(status))
    }

    fn abort_requested(&self) -> bool {
        self.abort
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    fn compute_residuals(&self) -> Residuals {
        let st = &self.state;
        let rho = to_f64(st.rho);
        let (rn, sn) = self.problem.residual_norms(&st.axnr, &st.y, &st.u, st.rho);
        let rn = if rn == 0.0 { 1.0 } else { rn };
        let sn = if sn == 0.0 { 1.0 } else { sn };
        let r = linalg::norm2(&(&st.axnr - &st.y)) / rn;
        let s = rho * linalg::norm2(&self.problem.constraint_adjoint(&(&st.yprev - &st.y))) / sn;
        let nx = (st.x.len() as f64).sqrt();
        let nc = (st.y.len() as f64).sqrt();
        Residuals {
            r,
            s,
            eps_primal: nc * self.opts.abs_stop_tol / rn + self.opts.rel_stop_tol,
            eps_dual: nx * self.opts.abs_stop_tol / sn + self.opts.rel_stop_tol,
        }
    }

    fn evaluate_objective(&self) -> (f64, f64) {
        let st = &self.state;
        let fvar = if self.opts.aux_var_obj { &st.y } else { &st.x };
        let gvar = if self.opts.g_eval_y { &st.y } else { &st.axnr };
        self.problem.objective(fvar, gvar)
    }

    fn summary_with(&self, status: SolveStatus) -> SolveSummary {
        let last = self.log.last();
        SolveSummary {
            status,
            iterations: self.log.len(),
            runtime_ms: self.runtime_ms,
            functional: last.map(|r| r.functional).unwrap_or(f64::NAN),
            primal_residual: last.map(|r| r.primal_residual).unwrap_or(f64::NAN),
            dual_residual: last.map(|r| r.dual_residual).unwrap_or(f64::NAN),
            rho: to_f64(self.state.rho),
            warnings: self.log.warnings().len(),
        }
    }

    /// Current primal variable.
    pub fn x(&self) -> &ArrayD<T> {
        &self.state.x
    }

    /// Current split variable.
    pub fn y(&self) -> &ArrayD<T> {
        &self.state.y
    }

    /// Current scaled dual variable.
    pub fn u(&self) -> &ArrayD<T> {
        &self.state.u
    }

    /// Current penalty parameter.
    pub fn rho(&self) -> f64 {
        to_f64(self.state.rho)
    }

    /// Terminal status, `None` while the solve has not ended.
    pub fn status(&self) -> Option<SolveStatus> {
        self.status
    }

    /// Read-only view of the iteration history.
    pub fn history(&self) -> &[IterationRecord] {
        self.log.history()
    }

    /// Linear-solve warnings accumulated so far.
    pub fn warnings(&self) -> &[LinSolveWarning] {
        self.log.warnings()
    }

    /// The full log, for exports.
    pub fn log(&self) -> &IterationLog {
        &self.log
    }

    /// The problem this solver was built around.
    pub fn problem(&self) -> &P {
        &self.problem
    }

    /// Wall time of the last solve in milliseconds.
    pub fn runtime_ms(&self) -> f64 {
        self.runtime_ms
    }

    /// Consumes the solver, returning the primal variable.
    pub fn into_x(self) -> ArrayD<T> {
        self.state.x
    }

    /// Exports step timing data to a CSV file for analysis.
    pub fn export_step_timings(&self, filename: &str) -> Result<(), SolverError> {
        self.log.write_step_timings_csv(filename)
    }

    /// Prints per-step timing statistics to the console.
    pub fn print_timing_summary(&self) {
        println!("\n=== ADMM Step Timing Summary ===");
        let step_stats = self.log.step_statistics();
        for (step, (avg, max, count)) in step_stats {
            println!("{}: avg={:.2}ms, max={:.2}ms, count={}", step, avg, max, count);
        }
        println!();
    }
}
