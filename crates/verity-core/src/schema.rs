//! JSON Schema validation for documents and rule sets.
//!
//! JSON/YAML evaluation documents are validated against
//! `schema/evaluation.schema.json`; rule-set configuration files against
//! `schema/ruleset.schema.json`. Both schemas are embedded at compile time and
//! compiled once.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded evaluation document schema.
const EVALUATION_SCHEMA_JSON: &str = include_str!("../../../schema/evaluation.schema.json");

/// Embedded rule-set schema.
const RULESET_SCHEMA_JSON: &str = include_str!("../../../schema/ruleset.schema.json");

static EVALUATION_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();
static RULESET_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema loading.
#[derive(Error, Debug)]
pub enum SchemaLoadError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

fn compile(source: &str) -> Result<jsonschema::Validator, String> {
    let schema_value: serde_json::Value = match serde_json::from_str(source) {
        Ok(v) => v,
        Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
    };

    match jsonschema::options().build(&schema_value) {
        Ok(v) => Ok(v),
        Err(e) => Err(format!("Failed to compile schema: {}", e)),
    }
}

fn validator(
    cell: &'static OnceLock<Result<jsonschema::Validator, String>>,
    source: &'static str,
) -> Result<&'static jsonschema::Validator, SchemaLoadError> {
    match cell.get_or_init(|| compile(source)) {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaLoadError::LoadError(e.clone())),
    }
}

fn collect_errors(
    validator: &jsonschema::Validator,
    instance: &serde_json::Value,
) -> Result<(), Vec<String>> {
    let errors: Vec<String> = validator
        .iter_errors(instance)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate a JSON/YAML evaluation document against the schema.
///
/// Returns every validation error message, in schema traversal order.
pub fn validate_document_schema(document: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = validator(&EVALUATION_SCHEMA, EVALUATION_SCHEMA_JSON)
        .map_err(|e| vec![e.to_string()])?;
    collect_errors(validator, document)
}

/// Validate a rule-set configuration against the schema.
pub fn validate_ruleset_schema(ruleset: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator =
        validator(&RULESET_SCHEMA, RULESET_SCHEMA_JSON).map_err(|e| vec![e.to_string()])?;
    collect_errors(validator, ruleset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_document_passes_schema() {
        let value = serde_json::json!({
            "version": 1,
            "qa_pairs": [
                { "question": "Who opened issue 12?", "answer": "bob" },
                { "question": "How many commits landed in March 2022?", "answer": 41 },
                { "question": "Was v1.0 signed? Answer true or false.", "answer": false }
            ]
        });
        assert!(validate_document_schema(&value).is_ok());
    }

    #[test]
    fn test_list_answer_fails_schema() {
        let value = serde_json::json!({
            "version": 1,
            "qa_pairs": [ { "question": "Q?", "answer": ["a", "b"] } ]
        });
        let errors = validate_document_schema(&value).unwrap_err();
        assert!(!errors.is_empty());
        assert!(errors[0].contains("/qa_pairs/0/answer"));
    }

    #[test]
    fn test_additional_properties_fail() {
        let value = serde_json::json!({
            "version": 1,
            "qa_pairs": [],
            "unknown_field": "should fail"
        });
        assert!(validate_document_schema(&value).is_err());
    }

    #[test]
    fn test_empty_question_fails() {
        let value = serde_json::json!({
            "version": 1,
            "qa_pairs": [ { "question": "", "answer": "x" } ]
        });
        assert!(validate_document_schema(&value).is_err());
    }

    #[test]
    fn test_ruleset_version_format() {
        let ok = serde_json::json!({ "version": "1.0" });
        assert!(validate_ruleset_schema(&ok).is_ok());

        let bad = serde_json::json!({ "version": "one" });
        assert!(validate_ruleset_schema(&bad).is_err());
    }

    #[test]
    fn test_ruleset_rejects_unknown_keys() {
        let value = serde_json::json!({
            "version": "1.0",
            "non_stationary_phrases": ["currently"],
            "shadow_rules": true
        });
        assert!(validate_ruleset_schema(&value).is_err());
    }

    #[test]
    fn test_ruleset_rejects_duplicate_phrases() {
        let value = serde_json::json!({
            "version": "1.0",
            "format_hints": ["iso", "iso"]
        });
        assert!(validate_ruleset_schema(&value).is_err());
    }
}
