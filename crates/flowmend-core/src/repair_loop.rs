use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    Graph, MendConfig, Severity, StrategyTable, ValidationReport, Violation, validate_graph,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

/// Final result of [`run_repair_loop`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairRun {
    pub outcome: Outcome,
    pub graph: Graph,
    /// Notes of every fix actually applied, in order.
    pub changelog: Vec<String>,
    pub residual_errors: Vec<Violation>,
    pub residual_warnings: Vec<Violation>,
    /// Number of validation passes performed (at most `max_iterations + 1`).
    pub passes: usize,
}

impl RepairRun {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

enum LoopState {
    Validating,
    Repairing(ValidationReport),
    Done(Outcome, ValidationReport),
}

/// Bounded validate/repair state machine.
///
/// Works on a private copy of `graph`. Each round validates, and if the
/// graph is still invalid applies every strategy that applies, in report
/// order. Stops on success, when `max_iterations` repair rounds have run, or
/// when a round changes nothing.
pub fn run_repair_loop(graph: &Graph, config: &MendConfig) -> RepairRun {
    let table = StrategyTable::standard(config.repair.unreachable);
    run_repair_loop_with(graph, config, &table)
}

/// [`run_repair_loop`] with a caller-supplied strategy table.
pub fn run_repair_loop_with(graph: &Graph, config: &MendConfig, table: &StrategyTable) -> RepairRun {
    let max_iterations = config.repair.max_iterations;
    let mut working = graph.clone();
    let mut changelog: Vec<String> = Vec::new();
    let mut iterations = 0usize;
    let mut passes = 0usize;
    let mut state = LoopState::Validating;

    let (outcome, report) = loop {
        state = match state {
            LoopState::Validating => {
                let report = validate_graph(&working, &config.fields);
                passes += 1;
                if report.valid {
                    LoopState::Done(Outcome::Success, report)
                } else if iterations >= max_iterations {
                    debug!("Repair cap of {} iterations reached", max_iterations);
                    LoopState::Done(Outcome::Failure, report)
                } else {
                    LoopState::Repairing(report)
                }
            }
            LoopState::Repairing(report) => {
                let before = changelog.len();
                for violation in &report.violations {
                    if let Some(note) = table.apply(&mut working, violation) {
                        changelog.push(note);
                    }
                }
                iterations += 1;
                let applied = changelog.len() - before;
                debug!(
                    iteration = iterations,
                    violations = report.violations.len(),
                    applied,
                    "Repair round finished"
                );
                if applied == 0 {
                    LoopState::Done(Outcome::Failure, report)
                } else {
                    LoopState::Validating
                }
            }
            LoopState::Done(outcome, report) => break (outcome, report),
        };
    };

    let (residual_errors, residual_warnings): (Vec<Violation>, Vec<Violation>) = report
        .violations
        .into_iter()
        .partition(|v| v.severity() == Severity::Error);

    match outcome {
        Outcome::Success => info!(
            "Graph valid after {} pass(es), {} fix(es) applied",
            passes,
            changelog.len()
        ),
        Outcome::Failure => warn!(
            "Graph still invalid after {} pass(es): {} error(s), {} warning(s), {} fix(es) applied",
            passes,
            residual_errors.len(),
            residual_warnings.len(),
            changelog.len()
        ),
    }

    RepairRun {
        outcome,
        graph: working,
        changelog,
        residual_errors,
        residual_warnings,
        passes,
    }
}
