use crate::error::SolverError;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::Write,
    time::Duration,
};

/// One immutable row of the iteration history.
///
/// Scalar fields are `f64` regardless of the working precision of the
/// problem; the arrays themselves never enter the history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 0-based iteration index.
    pub iteration: usize,
    /// Objective value: data fidelity plus weighted regularization.
    pub functional: f64,
    /// Data-fidelity term.
    pub data_fidelity: f64,
    /// Weighted regularization term.
    pub regularization: f64,
    /// Normalized primal residual.
    pub primal_residual: f64,
    /// Normalized dual residual.
    pub dual_residual: f64,
    /// Primal stopping tolerance at this iteration.
    pub eps_primal: f64,
    /// Dual stopping tolerance at this iteration.
    pub eps_dual: f64,
    /// Penalty parameter used during this iteration.
    pub rho: f64,
    /// Relative residual of the primal linear solve, when measured.
    pub solve_residual: Option<f64>,
    /// Milliseconds elapsed since the solve started.
    pub time_ms: f64,
}

impl IterationRecord {
    /// Column header matching [`status_row`](Self::status_row).
    pub fn status_header() -> String {
        format!(
            "{:>5}  {:>11}  {:>11}  {:>11}  {:>9}  {:>9}  {:>9}",
            "Itn", "Fnc", "DFid", "Reg", "r", "s", "Rho"
        )
    }

    /// Horizontal rule printed under the header.
    pub fn status_rule() -> String {
        "-".repeat(Self::status_header().len())
    }

    /// Fixed-width console row for verbose output.
    pub fn status_row(&self) -> String {
        format!(
            "{:>5}  {:>11.4e}  {:>11.4e}  {:>11.4e}  {:>9.2e}  {:>9.2e}  {:>9.2e}",
            self.iteration,
            self.functional,
            self.data_fidelity,
            self.regularization,
            self.primal_residual,
            self.dual_residual,
            self.rho
        )
    }
}

/// Non-fatal notice that a primal linear solve missed its declared
/// tolerance. Recorded alongside the history, never raised as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinSolveWarning {
    /// Iteration the solve belonged to.
    pub iteration: usize,
    /// Measured relative residual.
    pub residual: f64,
    /// Tolerance the problem declared.
    pub tolerance: f64,
}

/// A record of wall time spent in one step of one iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTimingRecord {
    /// Name of the step (e.g. "solve_primal", "prox_dual").
    pub step_name: String,
    /// The iteration number when this step was executed.
    pub iteration: usize,
    /// Duration of the step in milliseconds.
    pub duration_ms: f64,
}

/// Iteration history and performance bookkeeping for one solve.
///
/// `IterationLog` appends one immutable record per iteration, collects
/// linear-solve warnings and per-step wall times, and exports all of it
/// as CSV or JSON. The history is never truncated by the solver; every
/// termination path leaves the records accumulated so far readable.
pub struct IterationLog {
    /// Per-iteration solver records.
    records: Vec<IterationRecord>,
    /// Accumulated linear-solve warnings.
    warnings: Vec<LinSolveWarning>,
    /// Collection of step timing records.
    step_timings: Vec<StepTimingRecord>,
    /// Current iteration number for new step recordings.
    current_iteration: usize,
}

impl IterationLog {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            warnings: Vec::new(),
            step_timings: Vec::new(),
            current_iteration: 0,
        }
    }

    /// Clears the history, warnings, and timings.
    pub fn reset(&mut self) {
        self.records.clear();
        self.warnings.clear();
        self.step_timings.clear();
        self.current_iteration = 0;
    }

    pub fn start_iteration(&mut self, iteration: usize) {
        self.current_iteration = iteration;
    }

    pub fn record_step(&mut self, step_name: &str, duration: Duration) {
        self.step_timings.push(StepTimingRecord {
            step_name: step_name.to_string(),
            iteration: self.current_iteration,
            duration_ms: duration.as_secs_f64() * 1000.0,
        });
    }

    pub fn append(&mut self, record: IterationRecord) {
        self.records.push(record);
    }

    pub fn warn(&mut self, warning: LinSolveWarning) {
        self.warnings.push(warning);
    }

    /// Read-only view of the history; never consumed.
    pub fn history(&self) -> &[IterationRecord] {
        &self.records
    }

    pub fn warnings(&self) -> &[LinSolveWarning] {
        &self.warnings
    }

    pub fn last(&self) -> Option<&IterationRecord> {
        self.records.last()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Per-step timing statistics as `step name -> (average ms, max ms,
    /// count)`.
    pub fn step_statistics(&self) -> HashMap<String, (f64, f64, usize)> {
        let mut stats = HashMap::new();

        for record in &self.step_timings {
            let entry = stats
                .entry(record.step_name.clone())
                .or_insert((0.0f64, 0.0f64, 0));
            entry.0 += record.duration_ms;
            entry.1 = entry.1.max(record.duration_ms);
            entry.2 += 1;
        }

        // Convert accumulated totals to averages
        for (_, entry) in stats.iter_mut() {
            entry.0 /= entry.2 as f64;
        }

        stats
    }

    /// Writes the iteration history as CSV, one row per record.
    pub fn write_history_csv(&self, filename: &str) -> Result<(), SolverError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(filename)?;

        writeln!(
            file,
            "iteration,functional,data_fidelity,regularization,primal_residual,\
             dual_residual,eps_primal,eps_dual,rho,solve_residual,time_ms"
        )?;

        for record in &self.records {
            let solve_residual = record
                .solve_residual
                .map(|v| format!("{:.6e}", v))
                .unwrap_or_default();
            writeln!(
                file,
                "{},{:.9e},{:.9e},{:.9e},{:.6e},{:.6e},{:.6e},{:.6e},{:.6e},{},{:.3}",
                record.iteration,
                record.functional,
                record.data_fidelity,
                record.regularization,
                record.primal_residual,
                record.dual_residual,
                record.eps_primal,
                record.eps_dual,
                record.rho,
                solve_residual,
                record.time_ms
            )?;
        }

        Ok(())
    }

    /// Writes the iteration history as pretty-printed JSON.
    pub fn write_history_json(&self, filename: &str) -> Result<(), SolverError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(filename)?;
        serde_json::to_writer_pretty(file, &self.records)?;
        Ok(())
    }

    /// Writes the per-step timing records as CSV.
    pub fn write_step_timings_csv(&self, filename: &str) -> Result<(), SolverError> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(filename)?;

        writeln!(file, "step_name,iteration,duration_ms")?;

        for record in &self.step_timings {
            writeln!(
                file,
                "{},{},{:.3}",
                record.step_name, record.iteration, record.duration_ms
            )?;
        }

        Ok(())
    }
}

impl Default for IterationLog {
    fn default() -> Self {
        Self::new()
    }
}
