//! Evaluation document parsing and structural validation.
//!
//! Documents are parsed fail-fast: the first structurally invalid record
//! aborts the run before any solving begins. Markup documents are scanned by
//! [`markup`]; JSON and YAML documents are validated against the embedded
//! evaluation schema before deserialisation.

mod markup;

pub use markup::{decode_entities, encode_text};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::schema::validate_document_schema;
use crate::types::{DocumentFormat, QaPair};

/// The only document format version currently understood.
pub const FORMAT_VERSION: u32 = 1;

/// Structural problems in an evaluation document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("record {record} (line {line}): missing <question>")]
    MissingQuestion { record: usize, line: usize },

    #[error("record {record} (line {line}): missing <answer>")]
    MissingAnswer { record: usize, line: usize },

    #[error("record {record}: <{field}> is empty")]
    EmptyField { record: usize, field: String },

    #[error("record {record} (line {line}): <{field}> appears more than once")]
    DuplicateField {
        record: usize,
        line: usize,
        field: String,
    },

    #[error("record {record} (line {line}): {detail}")]
    MalformedRecord {
        record: usize,
        line: usize,
        detail: String,
    },

    #[error("line {line}: {detail}")]
    Malformed { line: usize, detail: String },

    #[error("unsupported document version '{found}'")]
    UnsupportedVersion { found: String },

    #[error("document does not match the evaluation schema: {}", .errors.join("; "))]
    InvalidStructure { errors: Vec<String> },

    #[error("failed to decode document: {0}")]
    Decode(String),
}

/// Two records share the same question text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("duplicate question in records {first} and {second}: {question:?}")]
pub struct DuplicateQuestionError {
    pub question: String,
    pub first: usize,
    pub second: usize,
}

/// Errors loading an evaluation document.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("failed to read document: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    DuplicateQuestion(#[from] DuplicateQuestionError),
}

/// Serialised shape of JSON/YAML documents.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireDocument {
    pub version: u32,
    #[serde(default)]
    pub qa_pairs: Vec<WirePair>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WirePair {
    pub question: String,
    /// Strings, numbers and booleans are accepted; answers are always
    /// written back as strings.
    pub answer: serde_json::Value,
}

/// An ordered set of question/answer pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationDocument {
    pub format: DocumentFormat,
    pub format_version: u32,
    pub pairs: Vec<QaPair>,
}

impl EvaluationDocument {
    /// Create a document from already-validated pairs.
    pub fn new(format: DocumentFormat, pairs: Vec<QaPair>) -> Self {
        Self {
            format,
            format_version: FORMAT_VERSION,
            pairs,
        }
    }

    /// Parse and validate a document.
    ///
    /// An empty input yields an empty document. Duplicate questions are an
    /// error rather than being silently merged.
    pub fn parse(input: &str, format: DocumentFormat) -> Result<Self, DocumentError> {
        let pairs = if input.trim().is_empty() {
            Vec::new()
        } else {
            match format {
                DocumentFormat::Xml => markup::parse_records(input)?,
                DocumentFormat::Json => {
                    let value: serde_json::Value = serde_json::from_str(input)
                        .map_err(|e| SchemaError::Decode(e.to_string()))?;
                    pairs_from_value(value)?
                }
                DocumentFormat::Yaml => {
                    let value: serde_json::Value = serde_yaml::from_str(input)
                        .map_err(|e| SchemaError::Decode(e.to_string()))?;
                    pairs_from_value(value)?
                }
            }
        };

        check_duplicates(&pairs)?;

        tracing::debug!(pairs = pairs.len(), format = ?format, "Parsed evaluation document");

        Ok(Self::new(format, pairs))
    }

    /// Read and parse a document, inferring the format from its extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DocumentError> {
        let path = path.as_ref();
        let format = DocumentFormat::from_extension(path.extension().and_then(|e| e.to_str()));
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents, format)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Look up a pair by its input index.
    pub fn pair(&self, index: usize) -> Option<&QaPair> {
        self.pairs.iter().find(|p| p.index == index)
    }

    /// SHA-256 over the pairs' content, independent of encoding and layout.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.format_version.to_le_bytes());
        for pair in &self.pairs {
            hasher.update((pair.index as u64).to_le_bytes());
            hasher.update(pair.question.as_bytes());
            hasher.update([0u8]);
            hasher.update(pair.answer.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

fn pairs_from_value(value: serde_json::Value) -> Result<Vec<QaPair>, SchemaError> {
    // A version mismatch gets a precise error instead of a schema dump.
    if let Some(version) = value.get("version") {
        if version.as_u64() != Some(FORMAT_VERSION as u64) {
            return Err(SchemaError::UnsupportedVersion {
                found: version.to_string(),
            });
        }
    }

    validate_document_schema(&value).map_err(|errors| SchemaError::InvalidStructure { errors })?;

    let wire: WireDocument =
        serde_json::from_value(value).map_err(|e| SchemaError::Decode(e.to_string()))?;

    wire.qa_pairs
        .into_iter()
        .enumerate()
        .map(|(index, pair)| {
            let question = pair.question.trim();
            let answer = match &pair.answer {
                serde_json::Value::String(s) => s.trim().to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                other => {
                    return Err(SchemaError::Decode(format!(
                        "record {}: answer must be a scalar, found {}",
                        index + 1,
                        other
                    )))
                }
            };
            if question.is_empty() {
                return Err(SchemaError::EmptyField {
                    record: index + 1,
                    field: "question".to_string(),
                });
            }
            if answer.is_empty() {
                return Err(SchemaError::EmptyField {
                    record: index + 1,
                    field: "answer".to_string(),
                });
            }
            Ok(QaPair::new(index, question, answer))
        })
        .collect()
}

/// Reject documents that contain the same question twice.
fn check_duplicates(pairs: &[QaPair]) -> Result<(), DuplicateQuestionError> {
    let mut seen: HashMap<&str, usize> = HashMap::new();

    for pair in pairs {
        let key = pair.question.trim();
        if let Some(first) = seen.insert(key, pair.index) {
            return Err(DuplicateQuestionError {
                question: key.to_string(),
                first: first + 1,
                second: pair.index + 1,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_PAIRS: &str = r#"
<evaluation>
  <qa_pair>
    <question>Which repository archived in Q3 2023 has the most forks?</question>
    <answer>old-repo</answer>
  </qa_pair>
  <qa_pair>
    <question>What year was the first release tagged? Answer as YYYY.</question>
    <answer>2019</answer>
  </qa_pair>
</evaluation>
"#;

    #[test]
    fn test_parse_markup_document() {
        let doc = EvaluationDocument::parse(TWO_PAIRS, DocumentFormat::Xml).unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.pairs[0].answer, "old-repo");
        assert_eq!(doc.pairs[1].index, 1);
    }

    #[test]
    fn test_empty_document_is_not_an_error() {
        for format in [DocumentFormat::Xml, DocumentFormat::Json, DocumentFormat::Yaml] {
            let doc = EvaluationDocument::parse("   \n", format).unwrap();
            assert!(doc.is_empty());
        }
        let doc = EvaluationDocument::parse("<evaluation></evaluation>", DocumentFormat::Xml)
            .unwrap();
        assert!(doc.is_empty());
    }

    #[test]
    fn test_duplicate_questions_rejected() {
        let input = r#"
<qa_pair><question>How many stars did v1 have?</question><answer>10</answer></qa_pair>
<qa_pair><question>How many stars did v1 have?</question><answer>12</answer></qa_pair>
"#;
        let result = EvaluationDocument::parse(input, DocumentFormat::Xml);
        match result {
            Err(DocumentError::DuplicateQuestion(err)) => {
                assert_eq!(err.first, 1);
                assert_eq!(err.second, 2);
            }
            other => panic!("expected duplicate question error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_json_document() {
        let input = r#"{
            "version": 1,
            "qa_pairs": [
                { "question": "Who merged PR 42?", "answer": "alice" }
            ]
        }"#;
        let doc = EvaluationDocument::parse(input, DocumentFormat::Json).unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.pairs[0].question, "Who merged PR 42?");
    }

    #[test]
    fn test_parse_yaml_document() {
        let input = r#"
version: 1
qa_pairs:
  - question: "Who merged PR 42?"
    answer: "alice"
  - question: "Which label was applied first to issue 7?"
    answer: "bug"
"#;
        let doc = EvaluationDocument::parse(input, DocumentFormat::Yaml).unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.pairs[1].answer, "bug");
    }

    #[test]
    fn test_json_numeric_answer_becomes_text() {
        let input = r#"{ "version": 1, "qa_pairs": [ { "question": "How many forks did v2 have by 2023-01-01?", "answer": 17 } ] }"#;
        let doc = EvaluationDocument::parse(input, DocumentFormat::Json).unwrap();
        assert_eq!(doc.pairs[0].answer, "17");
    }

    #[test]
    fn test_json_missing_answer_fails_schema() {
        let input = r#"{ "version": 1, "qa_pairs": [ { "question": "Q?" } ] }"#;
        let result = EvaluationDocument::parse(input, DocumentFormat::Json);
        assert!(matches!(
            result,
            Err(DocumentError::Schema(SchemaError::InvalidStructure { .. }))
        ));
    }

    #[test]
    fn test_fingerprint_ignores_layout() {
        let compact = r#"<qa_pair><question>Who merged PR 42?</question><answer>alice</answer></qa_pair>"#;
        let yaml = "version: 1\nqa_pairs:\n  - question: Who merged PR 42?\n    answer: alice\n";
        let a = EvaluationDocument::parse(compact, DocumentFormat::Xml).unwrap();
        let b = EvaluationDocument::parse(yaml, DocumentFormat::Yaml).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = a.clone();
        c.pairs[0].set_answer("bob");
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_json_unsupported_version() {
        let input = r#"{ "version": 2, "qa_pairs": [] }"#;
        let result = EvaluationDocument::parse(input, DocumentFormat::Json);
        assert!(matches!(
            result,
            Err(DocumentError::Schema(SchemaError::UnsupportedVersion { .. }))
        ));
    }
}
