//! Shared detection patterns for constraint rules.
//!
//! Fixed shapes (dates, booleans, quoted literals, number formats) live here.
//! Vocabulary that authors may want to tune lives in [`super::RuleSet`].

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // =========================================================================
    // ANSWER SHAPES
    // =========================================================================

    /// Integer or decimal with thousands separators ("1,234" or "-12,000.5")
    pub static ref THOUSANDS_PATTERN: Regex = Regex::new(
        r"^[-+]?\d{1,3}(,\d{3})+(\.\d+)?$"
    ).unwrap();

    /// A backslash-escaped character, e.g. an escaped list separator
    pub static ref ESCAPED_CHAR_PATTERN: Regex = Regex::new(r"\\.").unwrap();

    /// ISO dates, slash dates, and spelled-out month dates
    pub static ref DATE_PATTERN: Regex = Regex::new(
        r"(?ix)^(
            \d{4}-\d{2}-\d{2}([T\s]\d{2}:\d{2}(:\d{2})?)?
          | \d{1,2}/\d{1,2}/\d{2,4}
          | (jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?\s+\d{1,2}(st|nd|rd|th)?,?\s+\d{4}
          | \d{1,2}(st|nd|rd|th)?\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|sept|oct|nov|dec)[a-z]*\.?,?\s+\d{4}
        )$"
    ).unwrap();

    /// Boolean-like answers
    pub static ref BOOLEAN_PATTERN: Regex = Regex::new(
        r"(?i)^(true|false|yes|no|y|n)$"
    ).unwrap();

    // =========================================================================
    // QUESTION SHAPES
    // =========================================================================

    /// Questions asking to pick between alternatives
    pub static ref CHOICE_PATTERN: Regex = Regex::new(
        r"(?i)\b(which|whether|either)\b.+\bor\b"
    ).unwrap();

    /// Double-quoted, curly-quoted, or single-quoted (word-initial) literals
    pub static ref QUOTED_LITERAL_PATTERN: Regex = Regex::new(
        r#""([^"]+)"|“([^”]+)”|(?:^|\s)'([^']+)'"#
    ).unwrap();
}

/// Check if an answer is a number written with thousands separators.
pub fn is_grouped_number(answer: &str) -> bool {
    THOUSANDS_PATTERN.is_match(answer)
}

/// Check if an answer looks like a date.
pub fn looks_like_date(answer: &str) -> bool {
    DATE_PATTERN.is_match(answer)
}

/// Check if an answer looks like a boolean.
pub fn looks_like_boolean(answer: &str) -> bool {
    BOOLEAN_PATTERN.is_match(answer)
}

/// Check if a question asks to choose between alternatives.
pub fn asks_for_choice(question: &str) -> bool {
    CHOICE_PATTERN.is_match(question)
}

/// Quoted literals in a question, trimmed, in order of appearance.
pub fn quoted_literals(question: &str) -> Vec<&str> {
    QUOTED_LITERAL_PATTERN
        .captures_iter(question)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect()
}
