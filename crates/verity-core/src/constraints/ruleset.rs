//! Rule-set configuration for the constraint checker.
//!
//! The heuristics behind the rules are vocabularies (phrase lists and
//! patterns). A rule set can be loaded from YAML or JSON, is validated against
//! `schema/ruleset.schema.json`, and is compiled once at startup. Any problem
//! here is a fatal configuration error.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::schema::validate_ruleset_schema;

/// Errors loading or compiling a rule set.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read rule set: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Rule set validation failed: {}", .0.join("; "))]
    ValidationError(Vec<String>),

    #[error("Invalid pattern in {field}: {pattern:?}: {source}")]
    InvalidPattern {
        field: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Tunable vocabulary for the constraint rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSet {
    /// Rule set version (semver-like)
    pub version: String,

    /// Phrases that make a question depend on mutable current state
    #[serde(default = "defaults::non_stationary_phrases")]
    pub non_stationary_phrases: Vec<String>,

    /// Counting phrases that are only stable with a fixed time window
    #[serde(default = "defaults::window_sensitive_phrases")]
    pub window_sensitive_phrases: Vec<String>,

    /// Regexes (case-insensitive) that recognise an explicit time window
    #[serde(default = "defaults::time_window_patterns")]
    pub time_window_patterns: Vec<String>,

    /// Phrases that pin a deterministic order for list answers
    #[serde(default = "defaults::order_hints")]
    pub order_hints: Vec<String>,

    /// Phrases that tell the solver how to format its answer
    #[serde(default = "defaults::format_hints")]
    pub format_hints: Vec<String>,

    /// Titles/identifiers known to appear verbatim in the tool server's data
    #[serde(default)]
    pub known_identifiers: Vec<String>,

    /// Regex matching a separator between list items
    #[serde(default = "defaults::list_separators")]
    pub list_separators: String,
}

mod defaults {
    fn owned(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    pub fn non_stationary_phrases() -> Vec<String> {
        owned(&[
            "currently",
            "right now",
            "at the moment",
            "at present",
            "as of today",
            "as of now",
            "today",
            "this week",
            "this month",
            "how many open",
            "so far",
            "to date",
        ])
    }

    pub fn window_sensitive_phrases() -> Vec<String> {
        owned(&["number of", "how many", "count of", "total count"])
    }

    pub fn time_window_patterns() -> Vec<String> {
        owned(&[
            r"\b(19|20)\d{2}\b",
            r"\bq[1-4]\b",
            r"\b(january|february|march|april|june|july|august|september|october|november|december)\b",
            r"\bbetween\b.+\band\b",
            r"\b(as of|before|prior to|until|by the end of|during)\b",
            r"\b\d{4}-\d{2}(-\d{2})?\b",
            r"\b(v|version\s*)\d+(\.\d+)+\b",
        ])
    }

    pub fn order_hints() -> Vec<String> {
        owned(&[
            "alphabetical",
            "alphabetically",
            "sorted",
            "in ascending order",
            "in descending order",
            "in chronological order",
            "ordered by",
            "comma-separated",
            "comma separated",
        ])
    }

    pub fn format_hints() -> Vec<String> {
        owned(&[
            "format",
            "yyyy",
            "iso 8601",
            "iso-8601",
            "true or false",
            "true/false",
            "yes or no",
            "yes/no",
            "answer with",
            "respond with",
            "one of",
            "e.g.",
            "exactly as",
        ])
    }

    pub fn list_separators() -> String {
        r"[,;|]".to_string()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            non_stationary_phrases: defaults::non_stationary_phrases(),
            window_sensitive_phrases: defaults::window_sensitive_phrases(),
            time_window_patterns: defaults::time_window_patterns(),
            order_hints: defaults::order_hints(),
            format_hints: defaults::format_hints(),
            known_identifiers: Vec::new(),
            list_separators: defaults::list_separators(),
        }
    }
}

impl RuleSet {
    /// Parse a rule set from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a rule set from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Load a rule set file; `.json` files are JSON, anything else YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        validate_ruleset_schema(&value).map_err(ConfigError::ValidationError)?;
        let ruleset: RuleSet = serde_json::from_value(value)?;
        Ok(ruleset)
    }

    /// Compile phrase lists and patterns into matchers.
    pub fn compile(&self) -> Result<CompiledRuleSet, ConfigError> {
        let time_windows = self
            .time_window_patterns
            .iter()
            .map(|p| compile_pattern("time_window_patterns", p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CompiledRuleSet {
            non_stationary: PhraseSet::new("non_stationary_phrases", &self.non_stationary_phrases)?,
            window_sensitive: PhraseSet::new(
                "window_sensitive_phrases",
                &self.window_sensitive_phrases,
            )?,
            time_windows,
            order_hints: PhraseSet::new("order_hints", &self.order_hints)?,
            format_hints: PhraseSet::new("format_hints", &self.format_hints)?,
            known_identifiers: self.known_identifiers.iter().cloned().collect(),
            list_separator: compile_pattern("list_separators", &self.list_separators)?,
        })
    }
}

fn compile_pattern(field: &'static str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(&format!("(?i){}", pattern)).map_err(|source| ConfigError::InvalidPattern {
        field,
        pattern: pattern.to_string(),
        source,
    })
}

/// An ordered list of phrases matched case-insensitively on word boundaries.
#[derive(Debug, Clone)]
pub struct PhraseSet {
    phrases: Vec<(String, Regex)>,
}

impl PhraseSet {
    fn new(field: &'static str, phrases: &[String]) -> Result<Self, ConfigError> {
        let phrases = phrases
            .iter()
            .map(|phrase| {
                // Phrases may end in punctuation ("e.g."), so plain `\b` does
                // not work as a boundary on both sides.
                let pattern = format!(r"(?:^|\W){}(?:\W|$)", regex::escape(phrase));
                compile_pattern(field, &pattern).map(|re| (phrase.clone(), re))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { phrases })
    }

    /// The first phrase (in configured order) present in `text`.
    pub fn find(&self, text: &str) -> Option<&str> {
        self.phrases
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(phrase, _)| phrase.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

/// A rule set ready for matching.
#[derive(Debug, Clone)]
pub struct CompiledRuleSet {
    pub non_stationary: PhraseSet,
    pub window_sensitive: PhraseSet,
    pub time_windows: Vec<Regex>,
    pub order_hints: PhraseSet,
    pub format_hints: PhraseSet,
    pub known_identifiers: HashSet<String>,
    pub list_separator: Regex,
}

impl CompiledRuleSet {
    /// The built-in rule set, compiled.
    pub fn builtin() -> Self {
        RuleSet::default()
            .compile()
            .unwrap_or_else(|e| panic!("built-in rule set must compile: {}", e))
    }

    /// Whether the question pins an explicit, fixed time window.
    pub fn has_time_window(&self, question: &str) -> bool {
        self.time_windows.iter().any(|re| re.is_match(question))
    }
}
