//! Constraint checking for question/answer pairs.
//!
//! Each pair is run through a fixed, ordered list of rules:
//!
//! 1. `scalar_answer`: the answer is a single value
//! 2. `stationary_question`: the answer cannot drift over time
//! 3. `explicit_format`: ambiguous answer shapes come with a format hint
//! 4. `no_verbatim_lookup`: the question is not a keyword search
//!
//! Verdict resolution is strict: the first REJECT in rule order wins, otherwise
//! the first WARN, otherwise ACCEPT. Every WARN is kept on the [`PairCheck`]
//! even when a REJECT masks it. Checking is purely functional.

pub mod patterns;
mod rules;
mod ruleset;

pub use rules::{ExplicitFormatRule, NoVerbatimLookupRule, ScalarAnswerRule, StationaryQuestionRule};
pub use ruleset::{CompiledRuleSet, ConfigError, PhraseSet, RuleSet};

use crate::types::{Finding, PairCheck, QaPair, RuleId, Verdict};

/// What a single rule concluded about a pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Pass,
    Warn(String),
    Reject(String),
}

/// A single constraint rule.
pub trait ConstraintRule: Send + Sync {
    /// Identifier (also determines report category on REJECT).
    fn id(&self) -> RuleId;

    /// Check one pair.
    fn check(&self, pair: &QaPair, rules: &CompiledRuleSet) -> RuleOutcome;
}

/// Runs every rule over a pair and resolves the verdict.
pub struct ConstraintChecker {
    ruleset: CompiledRuleSet,
    rules: Vec<Box<dyn ConstraintRule>>,
}

impl ConstraintChecker {
    /// Build a checker from a rule set. Fails if any pattern does not compile.
    pub fn new(ruleset: &RuleSet) -> Result<Self, ConfigError> {
        Ok(Self {
            ruleset: ruleset.compile()?,
            rules: vec![
                Box::new(ScalarAnswerRule),
                Box::new(StationaryQuestionRule),
                Box::new(ExplicitFormatRule),
                Box::new(NoVerbatimLookupRule),
            ],
        })
    }

    /// Check a single pair.
    pub fn check(&self, pair: &QaPair) -> PairCheck {
        let mut rejection: Option<Finding> = None;
        let mut warnings: Vec<Finding> = Vec::new();

        for rule in &self.rules {
            match rule.check(pair, &self.ruleset) {
                RuleOutcome::Pass => {}
                RuleOutcome::Warn(reason) => warnings.push(Finding {
                    rule: rule.id(),
                    reason,
                }),
                RuleOutcome::Reject(reason) => {
                    if rejection.is_none() {
                        rejection = Some(Finding {
                            rule: rule.id(),
                            reason,
                        });
                    }
                }
            }
        }

        let verdict = match (rejection, warnings.first()) {
            (Some(finding), _) => Verdict::Reject {
                rule: finding.rule,
                reason: finding.reason,
            },
            (None, Some(first)) => Verdict::Warn {
                rule: first.rule,
                reason: first.reason.clone(),
            },
            (None, None) => Verdict::Accept,
        };

        match &verdict {
            Verdict::Reject { rule, reason } => {
                tracing::debug!(index = pair.index, rule = %rule, reason = %reason, "Pair rejected");
            }
            Verdict::Warn { rule, .. } => {
                tracing::debug!(index = pair.index, rule = %rule, warnings = warnings.len(), "Pair flagged");
            }
            Verdict::Accept => {}
        }

        PairCheck {
            index: pair.index,
            verdict,
            warnings,
        }
    }

    /// The compiled rule set this checker matches against.
    pub fn ruleset(&self) -> &CompiledRuleSet {
        &self.ruleset
    }

    /// Check every pair, preserving order.
    pub fn check_all(&self, pairs: &[QaPair]) -> Vec<PairCheck> {
        pairs.iter().map(|p| self.check(p)).collect()
    }
}

impl Default for ConstraintChecker {
    fn default() -> Self {
        Self {
            ruleset: CompiledRuleSet::builtin(),
            rules: vec![
                Box::new(ScalarAnswerRule),
                Box::new(StationaryQuestionRule),
                Box::new(ExplicitFormatRule),
                Box::new(NoVerbatimLookupRule),
            ],
        }
    }
}
