//! Multi-iteration driver.
//!
//! Runs the program under test once per iteration against a shared
//! [`SearchTree`], turning each execution's outcome into a report and folding
//! it into the tree, until the tree is exhausted or a budget runs out.

use crate::error::{ExplorationError, ExplorationResult, PathError};
use crate::space::{SearchTree, StateSpace, DEFAULT_SEARCH_SEED};
use crate::stats::StatsCounter;
use crate::verdict::{AnalysisMessage, CallAnalysis, MessageKind, VerificationStatus};
use pathspace_solver::ConstraintSolver;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Configuration for one exploration run.
#[derive(Debug, Clone)]
pub struct ExploreConfig {
    /// Maximum number of iterations (0 = unlimited).
    pub max_iterations: usize,
    /// Wall-clock budget for the whole run.
    pub per_condition_timeout: Duration,
    /// Wall-clock budget for one execution.
    pub per_path_timeout: Duration,
    /// Handed to the solver factory for each iteration.
    pub solver_timeout: Duration,
    /// Seed of the branch-choice RNG.
    pub seed: u64,
    /// Stop as soon as the aggregate report is refuted.
    pub stop_on_refutation: bool,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            max_iterations: 0,
            per_condition_timeout: Duration::from_secs(30),
            per_path_timeout: Duration::from_secs(5),
            solver_timeout: Duration::from_secs(1),
            seed: DEFAULT_SEARCH_SEED,
            stop_on_refutation: true,
        }
    }
}

/// Outcome of an exploration run.
#[derive(Debug, Clone)]
pub struct ExplorationReport {
    pub analysis: CallAnalysis,
    /// Whether every path was explored.
    pub exhausted: bool,
    pub iterations: usize,
    pub stats: StatsCounter,
    pub elapsed: Duration,
}

impl ExplorationReport {
    /// Final verdict. Confirmation requires a fully explored tree; a run in
    /// which every path was void has no verdict.
    pub fn status(&self) -> Option<VerificationStatus> {
        match self.analysis.status {
            Some(VerificationStatus::Confirmed) if !self.exhausted => {
                Some(VerificationStatus::Unknown)
            }
            status => status,
        }
    }
}

impl fmt::Display for ExplorationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.status().map_or("NONE", VerificationStatus::name);
        write!(
            f,
            "{status} after {} iterations in {:.2?}{}",
            self.iterations,
            self.elapsed,
            if self.exhausted { " (exhausted)" } else { "" }
        )
    }
}

/// Convert one execution's outcome into its path report.
///
/// Fatal engine errors are passed through.
pub fn path_analysis(outcome: Result<CallAnalysis, PathError>) -> ExplorationResult<CallAnalysis> {
    match outcome {
        Ok(analysis) => Ok(analysis),
        Err(PathError::Raised { kind, message }) => Ok(CallAnalysis::refuted(
            AnalysisMessage::new(MessageKind::ExecErr, format!("{kind}: {message}")),
        )),
        Err(PathError::Engine(err)) => match err {
            ExplorationError::PathTimeout { .. } => Ok(CallAnalysis::unknown()),
            ExplorationError::IgnoreAttempt { reason } => {
                debug!(reason = %reason, "ignoring path");
                Ok(CallAnalysis::ignored())
            }
            ExplorationError::NotDeterministic { detail } => Ok(CallAnalysis::refuted(
                AnalysisMessage::new(MessageKind::NotDeterministic, detail),
            )),
            fatal => Err(fatal),
        },
    }
}

/// Drives repeated executions of one program over one search tree.
pub struct Explorer<S: ConstraintSolver> {
    config: ExploreConfig,
    tree: SearchTree<S>,
}

impl<S: ConstraintSolver> Explorer<S> {
    pub fn new(config: ExploreConfig) -> Self {
        let tree = SearchTree::new(config.seed);
        Self { config, tree }
    }

    pub fn config(&self) -> &ExploreConfig {
        &self.config
    }

    pub fn tree(&self) -> &SearchTree<S> {
        &self.tree
    }

    /// Explore `program` until the tree is exhausted or a budget runs out.
    ///
    /// `make_solver` builds a fresh solver for each iteration from the
    /// configured solver timeout.
    pub fn run<V, F, P>(
        &mut self,
        mut make_solver: F,
        mut program: P,
    ) -> ExplorationResult<ExplorationReport>
    where
        V: Clone,
        F: FnMut(Duration) -> S,
        P: for<'t> FnMut(&mut StateSpace<'t, S, V>) -> Result<CallAnalysis, PathError>,
    {
        let start = Instant::now();
        let condition_deadline = start + self.config.per_condition_timeout;
        let mut iterations = 0;
        let mut analysis = self.tree.result();
        let mut exhausted = self.tree.is_exhausted();
        info!(
            max_iterations = self.config.max_iterations,
            seed = self.config.seed,
            "starting exploration"
        );

        while !exhausted {
            if self.config.max_iterations != 0 && iterations >= self.config.max_iterations {
                info!(iterations, "reached iteration limit");
                break;
            }
            let now = Instant::now();
            if now >= condition_deadline {
                info!(iterations, "reached time limit");
                break;
            }
            iterations += 1;

            let solver = make_solver(self.config.solver_timeout);
            let path_deadline = now + self.config.per_path_timeout;
            let mut space = StateSpace::new(&mut self.tree, solver, path_deadline)?;
            let outcome = program(&mut space);
            let decisions = space.decisions();
            let path = path_analysis(outcome)?;
            let path_status = path.status;
            (analysis, exhausted) = space.finalize(path)?;
            debug!(
                iteration = iterations,
                decisions,
                path_status = ?path_status,
                status = ?analysis.status,
                "iteration complete"
            );

            if self.config.stop_on_refutation && analysis.is_refuted() {
                info!(iterations, "found a refutation");
                break;
            }
        }

        let report = ExplorationReport {
            analysis,
            exhausted,
            iterations,
            stats: self.tree.stats(),
            elapsed: start.elapsed(),
        };
        info!(
            status = ?report.status(),
            iterations,
            exhausted,
            unknown_pct = report.stats.unknown_pct(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "exploration complete"
        );
        Ok(report)
    }
}
