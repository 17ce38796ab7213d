//! Core types shared across the verification pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single question/answer record under evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QaPair {
    /// Position in the input document (stable identity for write-back)
    pub index: usize,

    /// The question posed to the tool server under evaluation
    pub question: String,

    /// The recorded answer (a single scalar value)
    pub answer: String,

    /// Original source span of this record, kept so unchanged pairs can be
    /// re-emitted byte-for-byte.
    #[serde(skip)]
    pub raw: Option<String>,
}

impl QaPair {
    /// Create a pair with no retained source span.
    pub fn new(index: usize, question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            index,
            question: question.into(),
            answer: answer.into(),
            raw: None,
        }
    }

    /// Replace the recorded answer. The retained source span no longer
    /// matches and is discarded.
    pub fn set_answer(&mut self, answer: impl Into<String>) {
        self.answer = answer.into();
        self.raw = None;
    }

    /// Answer as used for comparison (surrounding whitespace trimmed).
    pub fn normalized_answer(&self) -> &str {
        self.answer.trim()
    }
}

/// Encoding of an evaluation document on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// Tagged `<qa_pair>` blocks (the canonical authoring format)
    #[default]
    Xml,
    /// `{ "version": 1, "qa_pairs": [...] }`
    Json,
    /// Same structure as JSON, in YAML
    Yaml,
}

impl DocumentFormat {
    /// Infer the format from a file extension. Anything unrecognised is XML.
    pub fn from_extension(ext: Option<&str>) -> Self {
        match ext.map(|e| e.to_ascii_lowercase()).as_deref() {
            Some("json") => DocumentFormat::Json,
            Some("yaml") | Some("yml") => DocumentFormat::Yaml,
            _ => DocumentFormat::Xml,
        }
    }
}

/// What kind of operation a solve needed.
///
/// Variants are ordered by severity so the classification of a whole solve
/// is the `max` over the operations it required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationClassification {
    ReadOnly,
    Unknown,
    Write,
    Destructive,
}

impl OperationClassification {
    /// Write and destructive operations disqualify a pair.
    pub fn is_unsafe(&self) -> bool {
        matches!(
            self,
            OperationClassification::Write | OperationClassification::Destructive
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClassification::ReadOnly => "READ_ONLY",
            OperationClassification::Unknown => "UNKNOWN",
            OperationClassification::Write => "WRITE",
            OperationClassification::Destructive => "DESTRUCTIVE",
        }
    }
}

impl fmt::Display for OperationClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a constraint rule, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    ScalarAnswer,
    StationaryQuestion,
    ExplicitFormat,
    NoVerbatimLookup,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleId::ScalarAnswer => "scalar_answer",
            RuleId::StationaryQuestion => "stationary_question",
            RuleId::ExplicitFormat => "explicit_format",
            RuleId::NoVerbatimLookup => "no_verbatim_lookup",
        }
    }

    /// Report category used when this rule rejects a pair.
    pub fn rejection_category(&self) -> &'static str {
        match self {
            RuleId::ScalarAnswer => "rejected_non_scalar",
            RuleId::StationaryQuestion => "rejected_unstable",
            RuleId::ExplicitFormat => "rejected_ambiguous_format",
            RuleId::NoVerbatimLookup => "rejected_trivial_lookup",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single rule's observation about a pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub rule: RuleId,
    pub reason: String,
}

/// Final constraint verdict for a pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Accept,
    Reject { rule: RuleId, reason: String },
    Warn { rule: RuleId, reason: String },
}

impl Verdict {
    /// Whether the pair proceeds to solving. WARN is non-blocking.
    pub fn proceeds(&self) -> bool {
        !matches!(self, Verdict::Reject { .. })
    }

    pub fn is_accept(&self) -> bool {
        matches!(self, Verdict::Accept)
    }

    pub fn is_reject(&self) -> bool {
        matches!(self, Verdict::Reject { .. })
    }

    pub fn is_warn(&self) -> bool {
        matches!(self, Verdict::Warn { .. })
    }
}

/// Result of checking one pair against the rule set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairCheck {
    pub index: usize,
    pub verdict: Verdict,

    /// Every WARN finding, including ones masked by the final verdict
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Finding>,
}

/// What the Solver produced for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SolveOutcome {
    /// The solver derived a candidate answer.
    Answered {
        candidate: String,
        classification: OperationClassification,
        steps: u32,
    },

    /// No answer within budget, or the tool server could not be reached.
    Unresolved { reason: String, steps: u32 },

    /// The only path to an answer needed a disallowed operation.
    Unsafe {
        classification: OperationClassification,
        tool: String,
        steps: u32,
    },
}

impl SolveOutcome {
    /// Classification observed while solving (unresolved solves are unknown).
    pub fn classification(&self) -> OperationClassification {
        match self {
            SolveOutcome::Answered { classification, .. } => *classification,
            SolveOutcome::Unsafe { classification, .. } => *classification,
            SolveOutcome::Unresolved { .. } => OperationClassification::Unknown,
        }
    }

    pub fn steps(&self) -> u32 {
        match self {
            SolveOutcome::Answered { steps, .. }
            | SolveOutcome::Unresolved { steps, .. }
            | SolveOutcome::Unsafe { steps, .. } => *steps,
        }
    }
}

/// Final per-pair status reported by the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairStatus {
    Confirmed,
    Corrected { previous: String, answer: String },
    DroppedUnsafe {
        classification: OperationClassification,
        tool: Option<String>,
    },
    Unresolved { reason: String },
    Rejected { rule: RuleId, reason: String },
}

impl PairStatus {
    /// Category name used in the summary report.
    pub fn category(&self) -> &'static str {
        match self {
            PairStatus::Confirmed => "confirmed",
            PairStatus::Corrected { .. } => "corrected",
            PairStatus::DroppedUnsafe { .. } => "dropped_unsafe",
            PairStatus::Unresolved { .. } => "unresolved",
            PairStatus::Rejected { rule, .. } => rule.rejection_category(),
        }
    }

    /// Human-readable reason, if the status carries one.
    pub fn describe(&self) -> Option<String> {
        match self {
            PairStatus::Confirmed => None,
            PairStatus::Corrected { previous, answer } => {
                Some(format!("answer corrected from {:?} to {:?}", previous, answer))
            }
            PairStatus::DroppedUnsafe { classification, tool } => Some(match tool {
                Some(tool) => format!("requires {} operation via tool '{}'", classification, tool),
                None => format!("requires {} operation", classification),
            }),
            PairStatus::Unresolved { reason } => Some(reason.clone()),
            PairStatus::Rejected { rule, reason } => Some(format!("{}: {}", rule, reason)),
        }
    }
}
