//! The four constraint rules, in priority order.

use crate::types::{QaPair, RuleId};

use super::patterns::{
    asks_for_choice, is_grouped_number, looks_like_boolean, looks_like_date, quoted_literals,
    ESCAPED_CHAR_PATTERN,
};
use super::ruleset::CompiledRuleSet;
use super::{ConstraintRule, RuleOutcome};

// ============================================================================
// scalar_answer
// ============================================================================

/// The answer must be a single scalar value.
///
/// Multi-line answers and JSON objects are always rejected. Lists (JSON arrays
/// or delimiter-separated values) are rejected unless the question pins a
/// deterministic order or format, in which case the list compares as a plain
/// string and the pair is only flagged.
pub struct ScalarAnswerRule;

enum AnswerShape {
    Scalar,
    MultiLine,
    Object,
    List(usize),
}

impl ScalarAnswerRule {
    fn shape(answer: &str, rules: &CompiledRuleSet) -> AnswerShape {
        if answer.lines().filter(|l| !l.trim().is_empty()).count() > 1 {
            return AnswerShape::MultiLine;
        }

        if answer.starts_with('[') || answer.starts_with('{') {
            match serde_json::from_str::<serde_json::Value>(answer) {
                Ok(serde_json::Value::Array(items)) => return AnswerShape::List(items.len()),
                Ok(serde_json::Value::Object(_)) => return AnswerShape::Object,
                _ => {}
            }
        }

        // Numbers with thousands separators and spelled-out dates contain
        // commas but are single values.
        if is_grouped_number(answer) || looks_like_date(answer) {
            return AnswerShape::Scalar;
        }

        let unescaped = ESCAPED_CHAR_PATTERN.replace_all(answer, "");
        let items = rules
            .list_separator
            .split(&unescaped)
            .filter(|item| !item.trim().is_empty())
            .count();

        if items > 1 {
            AnswerShape::List(items)
        } else {
            AnswerShape::Scalar
        }
    }
}

impl ConstraintRule for ScalarAnswerRule {
    fn id(&self) -> RuleId {
        RuleId::ScalarAnswer
    }

    fn check(&self, pair: &QaPair, rules: &CompiledRuleSet) -> RuleOutcome {
        match Self::shape(pair.normalized_answer(), rules) {
            AnswerShape::Scalar => RuleOutcome::Pass,
            AnswerShape::MultiLine => {
                RuleOutcome::Reject("answer spans multiple lines".to_string())
            }
            AnswerShape::Object => RuleOutcome::Reject("answer is a structured object".to_string()),
            AnswerShape::List(items) => match rules.order_hints.find(&pair.question) {
                Some(hint) => RuleOutcome::Warn(format!(
                    "answer is a list of {} items; accepted because the question asks for '{}'",
                    items, hint
                )),
                None => RuleOutcome::Reject(format!(
                    "answer is a list of {} items with no deterministic order",
                    items
                )),
            },
        }
    }
}

// ============================================================================
// stationary_question
// ============================================================================

/// The question must not depend on mutable, current state.
pub struct StationaryQuestionRule;

impl ConstraintRule for StationaryQuestionRule {
    fn id(&self) -> RuleId {
        RuleId::StationaryQuestion
    }

    fn check(&self, pair: &QaPair, rules: &CompiledRuleSet) -> RuleOutcome {
        let question = &pair.question;

        if let Some(phrase) = rules.non_stationary.find(question) {
            return RuleOutcome::Reject(format!(
                "question depends on current state ('{}')",
                phrase
            ));
        }

        if let Some(phrase) = rules.window_sensitive.find(question) {
            if !rules.has_time_window(question) {
                return RuleOutcome::Reject(format!(
                    "'{}' without a fixed time window",
                    phrase
                ));
            }
        }

        RuleOutcome::Pass
    }
}

// ============================================================================
// explicit_format
// ============================================================================

/// Dates, booleans and choices need a stated answer format.
pub struct ExplicitFormatRule;

impl ExplicitFormatRule {
    fn ambiguous_kind(pair: &QaPair) -> Option<&'static str> {
        let answer = pair.normalized_answer();
        if looks_like_date(answer) {
            Some("date")
        } else if looks_like_boolean(answer) {
            Some("boolean")
        } else if asks_for_choice(&pair.question) {
            Some("choice")
        } else {
            None
        }
    }
}

impl ConstraintRule for ExplicitFormatRule {
    fn id(&self) -> RuleId {
        RuleId::ExplicitFormat
    }

    fn check(&self, pair: &QaPair, rules: &CompiledRuleSet) -> RuleOutcome {
        let Some(kind) = Self::ambiguous_kind(pair) else {
            return RuleOutcome::Pass;
        };

        if rules.format_hints.find(&pair.question).is_some() {
            RuleOutcome::Pass
        } else {
            RuleOutcome::Warn(format!(
                "{} answer but the question gives no answer format",
                kind
            ))
        }
    }
}

// ============================================================================
// no_verbatim_lookup
// ============================================================================

/// Questions should not be answerable by keyword search on a quoted literal.
pub struct NoVerbatimLookupRule;

impl ConstraintRule for NoVerbatimLookupRule {
    fn id(&self) -> RuleId {
        RuleId::NoVerbatimLookup
    }

    fn check(&self, pair: &QaPair, rules: &CompiledRuleSet) -> RuleOutcome {
        let answer = pair.normalized_answer();

        for literal in quoted_literals(&pair.question) {
            if literal == answer {
                return RuleOutcome::Warn(format!(
                    "question quotes the answer verbatim ('{}')",
                    literal
                ));
            }
            if rules.known_identifiers.contains(literal) {
                return RuleOutcome::Warn(format!(
                    "question quotes a known identifier ('{}')",
                    literal
                ));
            }
        }

        RuleOutcome::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::RuleSet;

    fn compiled() -> CompiledRuleSet {
        RuleSet::default().compile().unwrap()
    }

    fn pair(question: &str, answer: &str) -> QaPair {
        QaPair::new(0, question, answer)
    }

    #[test]
    fn test_scalar_accepts_plain_values() {
        let rules = compiled();
        for answer in ["old-repo", "42", "1,234", "-12,000.5", "July 14, 2023", "a\\,b"] {
            let outcome = ScalarAnswerRule.check(&pair("Which repo?", answer), &rules);
            assert_eq!(outcome, RuleOutcome::Pass, "answer {:?}", answer);
        }
    }

    #[test]
    fn test_scalar_rejects_lists() {
        let rules = compiled();
        let outcome = ScalarAnswerRule.check(&pair("Which labels were used?", "bug, docs"), &rules);
        assert!(matches!(outcome, RuleOutcome::Reject(_)));

        let outcome = ScalarAnswerRule.check(&pair("Which labels?", r#"["bug","docs"]"#), &rules);
        assert!(matches!(outcome, RuleOutcome::Reject(ref r) if r.contains("2 items")));
    }

    #[test]
    fn test_scalar_rejects_multiline_and_objects() {
        let rules = compiled();
        let outcome = ScalarAnswerRule.check(&pair("Which repo?", "alpha\nbeta"), &rules);
        assert!(matches!(outcome, RuleOutcome::Reject(_)));

        let outcome = ScalarAnswerRule.check(&pair("Which repo?", r#"{"name":"alpha"}"#), &rules);
        assert!(matches!(outcome, RuleOutcome::Reject(_)));
    }

    #[test]
    fn test_ordered_list_is_only_flagged() {
        let rules = compiled();
        let q = "List the labels on issue 7 in alphabetical order, comma-separated.";
        let outcome = ScalarAnswerRule.check(&pair(q, "bug,docs,ui"), &rules);
        assert!(matches!(outcome, RuleOutcome::Warn(ref r) if r.contains("alphabetical")));
    }

    #[test]
    fn test_stationary_rejects_current_state() {
        let rules = compiled();
        let outcome = StationaryQuestionRule
            .check(&pair("How many open issues exist right now?", "12"), &rules);
        assert!(matches!(outcome, RuleOutcome::Reject(ref r) if r.contains("right now")));
    }

    #[test]
    fn test_stationary_requires_time_window_for_counts() {
        let rules = compiled();
        let outcome =
            StationaryQuestionRule.check(&pair("How many releases were tagged?", "9"), &rules);
        assert!(matches!(outcome, RuleOutcome::Reject(_)));

        let outcome = StationaryQuestionRule
            .check(&pair("How many releases were tagged in 2022?", "9"), &rules);
        assert_eq!(outcome, RuleOutcome::Pass);

        let outcome = StationaryQuestionRule.check(
            &pair("What repo was archived in Q3 2023 with most forks?", "old-repo"),
            &rules,
        );
        assert_eq!(outcome, RuleOutcome::Pass);
    }

    #[test]
    fn test_explicit_format() {
        let rules = compiled();
        let outcome =
            ExplicitFormatRule.check(&pair("When was v1.0 released?", "2021-03-04"), &rules);
        assert!(matches!(outcome, RuleOutcome::Warn(ref r) if r.starts_with("date")));

        let outcome = ExplicitFormatRule.check(
            &pair("When was v1.0 released? Use YYYY-MM-DD format.", "2021-03-04"),
            &rules,
        );
        assert_eq!(outcome, RuleOutcome::Pass);

        let outcome = ExplicitFormatRule.check(&pair("Was PR 9 merged?", "yes"), &rules);
        assert!(matches!(outcome, RuleOutcome::Warn(ref r) if r.starts_with("boolean")));

        let outcome = ExplicitFormatRule.check(&pair("Who merged PR 9?", "alice"), &rules);
        assert_eq!(outcome, RuleOutcome::Pass);
    }

    #[test]
    fn test_verbatim_lookup() {
        let rules = compiled();
        let outcome = NoVerbatimLookupRule.check(
            &pair(r#"Which repo is named "flux-core"?"#, "flux-core"),
            &rules,
        );
        assert!(matches!(outcome, RuleOutcome::Warn(_)));

        let mut ruleset = RuleSet::default();
        ruleset.known_identifiers = vec!["Alpha Release".to_string()];
        let rules = ruleset.compile().unwrap();
        let outcome = NoVerbatimLookupRule.check(
            &pair(r#"Who authored "Alpha Release"?"#, "carol"),
            &rules,
        );
        assert!(matches!(outcome, RuleOutcome::Warn(ref r) if r.contains("known identifier")));

        let outcome = NoVerbatimLookupRule.check(&pair("Who authored v2?", "carol"), &rules);
        assert_eq!(outcome, RuleOutcome::Pass);
    }
}
