//! Runtime orchestrator for the solving phase.
//!
//! The orchestrator runs the full evaluation pipeline:
//! - Deterministic constraint checking (verity-core)
//! - Bounded parallel solving of the surviving questions
//! - Deterministic reconciliation and summary (verity-core)
//!
//! Solving uses a sliding window over a `JoinSet`: at most `concurrency`
//! questions are in flight and a new one starts as each finishes. Results
//! are keyed by pair index, so completion order never affects the output.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::collections::{BTreeMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;

use verity_core::{
    ConstraintChecker, EvaluationDocument, PairCheck, Reconciler, Reconciliation, RunSummary,
    SolveOutcome,
};

use crate::cancel::CancelSignal;
use crate::checkpoint::{Checkpoint, CheckpointError};
use crate::config::{RuntimeConfig, RuntimeConfigError};
use crate::mcp::McpError;
use crate::providers::ProviderError;
use crate::resilience::UsageMeter;
use crate::solver::Solver;

/// Errors that stop a run before it produces results.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] RuntimeConfigError),

    #[error("Provider not configured: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool server unavailable: {0}")]
    ToolServer(#[from] McpError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Explicit state of one run, created at start and dropped at the end.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub config: RuntimeConfig,
    pub cancel: CancelSignal,

    /// Where progress is saved; `None` disables checkpoints
    pub checkpoint_path: Option<PathBuf>,

    /// Reuse a matching checkpoint's completed outcomes
    pub resume: bool,
}

impl RunContext {
    pub fn new(config: RuntimeConfig, cancel: CancelSignal) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            config,
            cancel,
            checkpoint_path: None,
            resume: false,
        }
    }

    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>, resume: bool) -> Self {
        self.checkpoint_path = Some(path.into());
        self.resume = resume;
        self
    }
}

/// Outcomes of the solving phase.
#[derive(Debug, Default)]
pub struct SolveRun {
    pub outcomes: BTreeMap<usize, SolveOutcome>,

    /// Indices that were never solved
    pub pending: Vec<usize>,

    pub cancelled: bool,

    /// Scheduling stopped because the run token budget was spent
    pub budget_exhausted: bool,

    /// Outcomes taken from a checkpoint rather than solved in this run
    pub resumed: usize,
}

/// Result of a complete evaluation.
#[derive(Debug)]
pub struct EvaluationRun {
    pub checks: Vec<PairCheck>,
    pub reconciliation: Reconciliation,
    pub summary: RunSummary,
    pub cancelled: bool,
}

/// Drives solving and reconciliation for one document.
pub struct Orchestrator {
    solver: Arc<dyn Solver>,
    usage: Arc<UsageMeter>,
}

impl Orchestrator {
    pub fn new(solver: Arc<dyn Solver>, usage: Arc<UsageMeter>) -> Self {
        Self { solver, usage }
    }

    /// Check, solve, and reconcile a document.
    pub async fn evaluate(
        &self,
        ctx: &RunContext,
        document: &EvaluationDocument,
        checker: &ConstraintChecker,
    ) -> Result<EvaluationRun, RuntimeError> {
        let checks = checker.check_all(&document.pairs);
        for check in checks.iter().filter(|c| !c.verdict.is_accept()) {
            tracing::info!(index = check.index, verdict = ?check.verdict, "Constraint check");
        }

        let questions: Vec<(usize, String)> = checks
            .iter()
            .filter(|c| c.verdict.proceeds())
            .filter_map(|c| document.pair(c.index))
            .map(|p| (p.index, p.question.clone()))
            .collect();

        tracing::info!(
            run_id = %ctx.run_id,
            total = document.len(),
            to_solve = questions.len(),
            "Starting solve phase"
        );

        let solved = self
            .solve_all(ctx, &document.fingerprint(), questions)
            .await?;

        let reconciliation =
            Reconciler::for_checker(checker).reconcile(document, &checks, &solved.outcomes);

        let usage = self.usage.snapshot();
        let mut summary =
            RunSummary::from_reconciliation(&ctx.run_id, ctx.started_at, &reconciliation)
                .with_usage(usage.summary())
                .with_metadata("model", ctx.config.model.model.clone())
                .with_metadata("estimated_cost_usd", format!("{:.6}", usage.estimated_cost));
        summary.cancelled = solved.cancelled;
        if solved.budget_exhausted {
            summary = summary.with_metadata("token_budget", "exhausted");
        }
        if solved.resumed > 0 {
            summary = summary.with_metadata("resumed_outcomes", solved.resumed.to_string());
        }

        Ok(EvaluationRun {
            checks,
            reconciliation,
            summary,
            cancelled: solved.cancelled,
        })
    }

    /// Solve questions with bounded concurrency.
    ///
    /// Saves a checkpoint after every completion when the context has a
    /// checkpoint path. On cancellation, in-flight solves are aborted and
    /// only completed outcomes are returned.
    pub async fn solve_all(
        &self,
        ctx: &RunContext,
        fingerprint: &str,
        questions: Vec<(usize, String)>,
    ) -> Result<SolveRun, RuntimeError> {
        let mut checkpoint = Checkpoint::new(fingerprint, &ctx.run_id);
        let mut run = SolveRun::default();

        if ctx.resume {
            if let Some(prior) = self.load_prior(ctx, fingerprint)? {
                for (index, _) in &questions {
                    if let Some(outcome) = prior.completed.get(index) {
                        checkpoint.completed.insert(*index, outcome.clone());
                    }
                }
                run.resumed = checkpoint.completed.len();
                tracing::info!(resumed = run.resumed, "Resuming from checkpoint");
            }
        }

        let mut queue: VecDeque<(usize, String)> = questions
            .into_iter()
            .filter(|(index, _)| !checkpoint.completed.contains_key(index))
            .collect();
        checkpoint.pending = queue.iter().map(|(index, _)| *index).collect();

        let concurrency = ctx.config.concurrency.max(1);
        let mut join_set: JoinSet<(usize, SolveOutcome)> = JoinSet::new();

        self.fill(&mut join_set, &mut queue, concurrency, ctx, &mut run);

        loop {
            let joined = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    run.cancelled = true;
                    join_set.abort_all();
                    // Solves that finished before the abort are still kept
                    while let Some(joined) = join_set.join_next().await {
                        if let Ok((index, outcome)) = joined {
                            self.record(ctx, &mut checkpoint, index, outcome);
                        }
                    }
                    break;
                }
                joined = join_set.join_next() => joined,
            };

            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok((index, outcome)) => self.record(ctx, &mut checkpoint, index, outcome),
                Err(e) => tracing::error!(error = %e, "Solver task failed to join"),
            }

            self.fill(&mut join_set, &mut queue, concurrency, ctx, &mut run);
        }

        if run.cancelled {
            tracing::warn!(
                completed = checkpoint.completed.len(),
                pending = checkpoint.pending.len(),
                "Run cancelled"
            );
        }

        if let Some(path) = &ctx.checkpoint_path {
            if checkpoint.pending.is_empty() {
                Checkpoint::remove(path)?;
            } else {
                checkpoint.save(path)?;
            }
        }

        run.pending = checkpoint.pending;
        run.outcomes = checkpoint.completed;
        Ok(run)
    }

    fn load_prior(
        &self,
        ctx: &RunContext,
        fingerprint: &str,
    ) -> Result<Option<Checkpoint>, RuntimeError> {
        let Some(path) = &ctx.checkpoint_path else {
            return Ok(None);
        };
        match Checkpoint::load(path)? {
            Some(prior) if prior.matches(fingerprint) => Ok(Some(prior)),
            Some(prior) => {
                tracing::warn!(
                    checkpoint_run = %prior.run_id,
                    "Checkpoint belongs to a different document, starting fresh"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Start queued questions until the window is full.
    fn fill(
        &self,
        join_set: &mut JoinSet<(usize, SolveOutcome)>,
        queue: &mut VecDeque<(usize, String)>,
        concurrency: usize,
        ctx: &RunContext,
        run: &mut SolveRun,
    ) {
        while join_set.len() < concurrency && !ctx.cancel.is_cancelled() {
            if self.usage.exhausted() {
                if !queue.is_empty() && !run.budget_exhausted {
                    tracing::warn!(
                        remaining = queue.len(),
                        "Token budget exhausted, not scheduling further questions"
                    );
                    run.budget_exhausted = true;
                }
                return;
            }
            let Some((index, question)) = queue.pop_front() else {
                return;
            };

            let solver = self.solver.clone();
            join_set.spawn(async move {
                let outcome = AssertUnwindSafe(solver.solve(&question))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| SolveOutcome::Unresolved {
                        reason: "solver panicked".to_string(),
                        steps: 0,
                    });
                (index, outcome)
            });
        }
    }

    fn record(
        &self,
        ctx: &RunContext,
        checkpoint: &mut Checkpoint,
        index: usize,
        outcome: SolveOutcome,
    ) {
        match &outcome {
            SolveOutcome::Answered { steps, classification, .. } => tracing::info!(
                index,
                steps,
                classification = classification.as_str(),
                "Solved"
            ),
            SolveOutcome::Unresolved { reason, steps } => {
                tracing::info!(index, steps, reason = %reason, "Unresolved")
            }
            SolveOutcome::Unsafe { tool, classification, .. } => tracing::warn!(
                index,
                tool = %tool,
                classification = classification.as_str(),
                "Unsafe operation required"
            ),
        }

        checkpoint.pending.retain(|i| *i != index);
        checkpoint.completed.insert(index, outcome);

        if let Some(path) = &ctx.checkpoint_path {
            if let Err(e) = checkpoint.save(path) {
                tracing::warn!(error = %e, "Failed to save checkpoint");
            }
        }
    }
}
