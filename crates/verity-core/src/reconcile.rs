//! Reconciler: merges solver outcomes into the authoritative document.
//!
//! The reconciler applies strict, non-configurable policy rules per pair:
//! 1. Rejected by constraint checking → excluded (`rejected_*`)
//! 2. Unsafe outcome, or an answer that needed a write/destructive
//!    operation → excluded (`dropped_unsafe`)
//! 3. Answered with a value that is not a scalar → kept unchanged
//!    (`unresolved`); solver output never bypasses `scalar_answer`
//! 4. Answered with a different (trimmed) value → answer overwritten
//!    (`corrected`, previous value kept in the ledger)
//! 5. Answered with the same value → kept byte-for-byte (`confirmed`)
//! 6. Unresolved, or never solved → kept unchanged (`unresolved`)
//!
//! Output order always equals input order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::constraints::{
    CompiledRuleSet, ConstraintChecker, ConstraintRule, RuleOutcome, ScalarAnswerRule,
};
use crate::document::EvaluationDocument;
use crate::types::{
    Finding, OperationClassification, PairCheck, PairStatus, QaPair, SolveOutcome, Verdict,
};

/// Reason recorded for pairs that passed checking but have no outcome.
pub const NOT_SOLVED: &str = "no solver outcome recorded";

/// Per-pair record of what the run decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub index: usize,
    pub question: String,
    #[serde(flatten)]
    pub status: PairStatus,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Finding>,

    /// Solver steps taken, if the pair was solved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<OperationClassification>,
}

/// The reconciled document plus the ledger explaining every decision.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub document: EvaluationDocument,
    pub ledger: Vec<LedgerEntry>,
}

impl Reconciliation {
    /// Count of ledger entries with the given category.
    pub fn count(&self, category: &str) -> usize {
        self.ledger
            .iter()
            .filter(|e| e.status.category() == category)
            .count()
    }
}

/// Merges constraint checks and solver outcomes into a final document.
pub struct Reconciler {
    rules: CompiledRuleSet,
}

impl Reconciler {
    /// Reconciler using the built-in rule set for candidate checks.
    pub fn new() -> Self {
        Self::with_rules(CompiledRuleSet::builtin())
    }

    pub fn with_rules(rules: CompiledRuleSet) -> Self {
        Self { rules }
    }

    /// Check candidates with the same rules the document was checked with.
    pub fn for_checker(checker: &ConstraintChecker) -> Self {
        Self::with_rules(checker.ruleset().clone())
    }

    /// Reconcile a document.
    ///
    /// # Arguments
    ///
    /// * `document` - The validated input document
    /// * `checks` - Constraint checks, one per pair (missing checks accept)
    /// * `outcomes` - Solver outcomes keyed by pair index
    pub fn reconcile(
        &self,
        document: &EvaluationDocument,
        checks: &[PairCheck],
        outcomes: &BTreeMap<usize, SolveOutcome>,
    ) -> Reconciliation {
        let checks: HashMap<usize, &PairCheck> = checks.iter().map(|c| (c.index, c)).collect();

        let mut kept: Vec<QaPair> = Vec::with_capacity(document.len());
        let mut ledger: Vec<LedgerEntry> = Vec::with_capacity(document.len());

        for pair in &document.pairs {
            let check = checks.get(&pair.index);
            let warnings = check.map(|c| c.warnings.clone()).unwrap_or_default();
            let outcome = outcomes.get(&pair.index);

            let (status, survivor) = match check.map(|c| &c.verdict) {
                Some(Verdict::Reject { rule, reason }) => (
                    PairStatus::Rejected {
                        rule: *rule,
                        reason: reason.clone(),
                    },
                    None,
                ),
                _ => self.apply_outcome(pair, outcome),
            };

            tracing::debug!(index = pair.index, status = status.category(), "Reconciled pair");

            if let Some(survivor) = survivor {
                kept.push(survivor);
            }

            ledger.push(LedgerEntry {
                index: pair.index,
                question: pair.question.clone(),
                status,
                warnings,
                steps: outcome.map(|o| o.steps()),
                classification: outcome.map(|o| o.classification()),
            });
        }

        let mut reconciled = EvaluationDocument::new(document.format, kept);
        reconciled.format_version = document.format_version;

        Reconciliation {
            document: reconciled,
            ledger,
        }
    }

    fn apply_outcome(
        &self,
        pair: &QaPair,
        outcome: Option<&SolveOutcome>,
    ) -> (PairStatus, Option<QaPair>) {
        match outcome {
            None => (
                PairStatus::Unresolved {
                    reason: NOT_SOLVED.to_string(),
                },
                Some(pair.clone()),
            ),

            Some(SolveOutcome::Unsafe {
                classification,
                tool,
                ..
            }) => (
                PairStatus::DroppedUnsafe {
                    classification: *classification,
                    tool: Some(tool.clone()),
                },
                None,
            ),

            Some(SolveOutcome::Answered { classification, .. }) if classification.is_unsafe() => (
                PairStatus::DroppedUnsafe {
                    classification: *classification,
                    tool: None,
                },
                None,
            ),

            Some(SolveOutcome::Answered { candidate, .. }) => {
                let candidate = candidate.trim();
                let mut proposed = pair.clone();
                proposed.set_answer(candidate);
                if let RuleOutcome::Reject(reason) = ScalarAnswerRule.check(&proposed, &self.rules) {
                    return (
                        PairStatus::Unresolved {
                            reason: format!("solver answer is not a scalar: {}", reason),
                        },
                        Some(pair.clone()),
                    );
                }

                if candidate == pair.normalized_answer() {
                    (PairStatus::Confirmed, Some(pair.clone()))
                } else {
                    (
                        PairStatus::Corrected {
                            previous: pair.answer.clone(),
                            answer: candidate.to_string(),
                        },
                        Some(proposed),
                    )
                }
            }

            Some(SolveOutcome::Unresolved { reason, .. }) => (
                PairStatus::Unresolved {
                    reason: reason.clone(),
                },
                Some(pair.clone()),
            ),
        }
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}
