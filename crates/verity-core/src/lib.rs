//! # verity-core
//!
//! Deterministic verification pipeline for MCP evaluation documents.
//!
//! This crate answers, for every question/answer pair in a document:
//! - Is the pair well-formed? (schema validation)
//! - Can the answer be verified at all? (constraint checking)
//! - Given an independently derived answer, what should the document say?
//!   (reconciliation)
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same input always produces same output
//! 2. **No network, no LLM**: Solving lives in `verity-runtime`
//! 3. **Order-preserving**: Output order equals input order
//! 4. **No unsafe survivors**: Pairs needing write/destructive operations are
//!    never written back
//!
//! ## Example
//!
//! ```rust,ignore
//! use verity_core::{check_document, EvaluationDocument, RuleSet};
//!
//! let document = EvaluationDocument::from_path("eval.xml")?;
//! let checks = check_document(&document, &RuleSet::default())?;
//!
//! for check in checks {
//!     println!("#{} {:?}", check.index + 1, check.verdict);
//! }
//! ```

pub mod constraints;
pub mod document;
pub mod emitter;
pub mod reconcile;
pub mod report;
pub mod schema;
pub mod types;

// Re-export main types at crate root
pub use constraints::{ConfigError, ConstraintChecker, ConstraintRule, RuleOutcome, RuleSet};
pub use document::{DocumentError, DuplicateQuestionError, EvaluationDocument, SchemaError};
pub use emitter::{atomic_write, render_document, write_document, EmitError};
pub use reconcile::{LedgerEntry, Reconciler, Reconciliation};
pub use report::{ExitStatus, ReportFormat, RunSummary, TokenUsage};
pub use types::{
    DocumentFormat, Finding, OperationClassification, PairCheck, PairStatus, QaPair, RuleId,
    SolveOutcome, Verdict,
};

/// Run constraint checking over every pair of a document.
///
/// Fails only if the rule set itself is invalid.
pub fn check_document(
    document: &EvaluationDocument,
    ruleset: &RuleSet,
) -> Result<Vec<PairCheck>, ConfigError> {
    let checker = ConstraintChecker::new(ruleset)?;
    Ok(checker.check_all(&document.pairs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_check_then_reconcile() {
        let input = r#"
<evaluation version="1">
  <qa_pair>
    <question>What repo was archived in Q3 2023 with most forks?</question>
    <answer>old-repo</answer>
  </qa_pair>
  <qa_pair>
    <question>How many open issues exist right now?</question>
    <answer>12</answer>
  </qa_pair>
</evaluation>
"#;
        let document = EvaluationDocument::parse(input, DocumentFormat::Xml).unwrap();
        let checks = check_document(&document, &RuleSet::default()).unwrap();
        assert!(checks[0].verdict.is_accept());
        assert!(checks[1].verdict.is_reject());

        let mut outcomes = BTreeMap::new();
        outcomes.insert(
            0,
            SolveOutcome::Answered {
                candidate: "new-repo".to_string(),
                classification: OperationClassification::ReadOnly,
                steps: 4,
            },
        );

        let result = Reconciler::new().reconcile(&document, &checks, &outcomes);
        assert_eq!(result.document.len(), 1);
        assert_eq!(result.document.pairs[0].answer, "new-repo");
        assert_eq!(result.count("corrected"), 1);
        assert_eq!(result.count("rejected_unstable"), 1);
    }
}
