//! Scanner for the tagged `<qa_pair>` document format.
//!
//! ```text
//! <evaluation version="1">
//!   <qa_pair>
//!     <question>...</question>
//!     <answer>...</answer>
//!   </qa_pair>
//! </evaluation>
//! ```
//!
//! The `<evaluation>` root is optional. Comments and an XML declaration are
//! skipped. Field text is entity-decoded and trimmed; the full source span of
//! each record is retained for byte-stable re-emission.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use super::{SchemaError, FORMAT_VERSION};
use crate::types::QaPair;

lazy_static! {
    /// Comments, declarations, and open/close/self-closing tags.
    static ref TOKEN_PATTERN: Regex = Regex::new(
        r#"(?s)<!--.*?-->|<\?.*?\?>|<(/)?([A-Za-z_][A-Za-z0-9_.\-]*)([^<>]*?)(/)?>"#
    ).unwrap();

    static ref VERSION_ATTR: Regex = Regex::new(
        r#"\bversion\s*=\s*["']([^"']*)["']"#
    ).unwrap();

    static ref ENTITY_PATTERN: Regex = Regex::new(
        r"&(lt|gt|amp|quot|apos|#[0-9]+|#x[0-9A-Fa-f]+);"
    ).unwrap();
}

const ROOT_TAG: &str = "evaluation";
const RECORD_TAG: &str = "qa_pair";

/// Scanner state: which element we are currently inside.
enum Scope {
    Top,
    Root,
    Record(RecordBuilder),
    Field(RecordBuilder, Field, usize),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Question,
    Answer,
}

impl Field {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "question" => Some(Field::Question),
            "answer" => Some(Field::Answer),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Field::Question => "question",
            Field::Answer => "answer",
        }
    }
}

struct RecordBuilder {
    record: usize,
    in_root: bool,
    line: usize,
    start: usize,
    question: Option<String>,
    answer: Option<String>,
}

/// Parse every `<qa_pair>` record in `input`.
pub(super) fn parse_records(input: &str) -> Result<Vec<QaPair>, SchemaError> {
    let mut pairs = Vec::new();
    let mut scope = Scope::Top;
    let mut seen_root = false;
    let mut cursor = 0;

    for caps in TOKEN_PATTERN.captures_iter(input) {
        let Some(token) = caps.get(0) else {
            continue;
        };
        let text = &input[cursor..token.start()];

        // Text between tokens is only meaningful inside a field.
        if !matches!(scope, Scope::Field(..)) && !text.trim().is_empty() {
            return Err(unexpected_text(input, cursor, text, &scope));
        }
        cursor = token.end();

        let Some(name) = caps.get(2).map(|m| m.as_str()) else {
            // Comment or declaration.
            continue;
        };
        let closing = caps.get(1).is_some();
        let self_closing = caps.get(4).is_some();
        let line = line_of(input, token.start());

        scope = match scope {
            Scope::Top => match (name, closing) {
                (ROOT_TAG, false) if !seen_root => {
                    check_version(&caps)?;
                    seen_root = true;
                    if self_closing {
                        Scope::Top
                    } else {
                        Scope::Root
                    }
                }
                (RECORD_TAG, false) if !self_closing => Scope::Record(RecordBuilder {
                    record: pairs.len() + 1,
                    in_root: false,
                    line,
                    start: token.start(),
                    question: None,
                    answer: None,
                }),
                _ => {
                    return Err(SchemaError::Malformed {
                        line,
                        detail: format!("unexpected {}", describe_tag(name, closing)),
                    })
                }
            },

            Scope::Root => match (name, closing) {
                (ROOT_TAG, true) => Scope::Top,
                (RECORD_TAG, false) if !self_closing => Scope::Record(RecordBuilder {
                    record: pairs.len() + 1,
                    in_root: true,
                    line,
                    start: token.start(),
                    question: None,
                    answer: None,
                }),
                _ => {
                    return Err(SchemaError::Malformed {
                        line,
                        detail: format!(
                            "unexpected {} inside <{}>",
                            describe_tag(name, closing),
                            ROOT_TAG
                        ),
                    })
                }
            },

            Scope::Record(builder) => {
                if closing && name == RECORD_TAG {
                    let raw = &input[builder.start..token.end()];
                    let in_root = builder.in_root;
                    pairs.push(finish_record(builder, pairs.len(), raw)?);
                    if in_root {
                        Scope::Root
                    } else {
                        Scope::Top
                    }
                } else if let (Some(field), false, false) = (Field::from_tag(name), closing, self_closing) {
                    let already = match field {
                        Field::Question => builder.question.is_some(),
                        Field::Answer => builder.answer.is_some(),
                    };
                    if already {
                        return Err(SchemaError::DuplicateField {
                            record: builder.record,
                            line,
                            field: field.name().to_string(),
                        });
                    }
                    Scope::Field(builder, field, token.end())
                } else {
                    return Err(SchemaError::MalformedRecord {
                        record: builder.record,
                        line,
                        detail: format!("unexpected {}", describe_tag(name, closing)),
                    });
                }
            }

            Scope::Field(mut builder, field, text_start) => {
                if closing && Field::from_tag(name) == Some(field) {
                    let value = decode_entities(input[text_start..token.start()].trim());
                    match field {
                        Field::Question => builder.question = Some(value),
                        Field::Answer => builder.answer = Some(value),
                    }
                    Scope::Record(builder)
                } else {
                    return Err(SchemaError::MalformedRecord {
                        record: builder.record,
                        line,
                        detail: format!(
                            "unexpected {} inside <{}>",
                            describe_tag(name, closing),
                            field.name()
                        ),
                    });
                }
            }
        };
    }

    let trailing = &input[cursor..];
    if !matches!(scope, Scope::Field(..)) && !trailing.trim().is_empty() {
        return Err(unexpected_text(input, cursor, trailing, &scope));
    }

    match scope {
        Scope::Top => Ok(pairs),
        Scope::Root => Err(SchemaError::Malformed {
            line: line_of(input, input.len()),
            detail: format!("unclosed <{}>", ROOT_TAG),
        }),
        Scope::Record(builder) | Scope::Field(builder, ..) => Err(SchemaError::MalformedRecord {
            record: builder.record,
            line: builder.line,
            detail: format!("unclosed <{}>", RECORD_TAG),
        }),
    }
}

fn finish_record(builder: RecordBuilder, index: usize, raw: &str) -> Result<QaPair, SchemaError> {
    let question = builder.question.ok_or(SchemaError::MissingQuestion {
        record: builder.record,
        line: builder.line,
    })?;
    let answer = builder.answer.ok_or(SchemaError::MissingAnswer {
        record: builder.record,
        line: builder.line,
    })?;

    if question.is_empty() {
        return Err(SchemaError::EmptyField {
            record: builder.record,
            field: "question".to_string(),
        });
    }
    if answer.is_empty() {
        return Err(SchemaError::EmptyField {
            record: builder.record,
            field: "answer".to_string(),
        });
    }

    Ok(QaPair {
        index,
        question,
        answer,
        raw: Some(raw.to_string()),
    })
}

fn check_version(caps: &Captures<'_>) -> Result<(), SchemaError> {
    let attrs = caps.get(3).map(|m| m.as_str()).unwrap_or("");
    if let Some(found) = VERSION_ATTR.captures(attrs).and_then(|c| c.get(1)) {
        if found.as_str().trim() != FORMAT_VERSION.to_string() {
            return Err(SchemaError::UnsupportedVersion {
                found: found.as_str().to_string(),
            });
        }
    }
    Ok(())
}

fn unexpected_text(input: &str, offset: usize, text: &str, scope: &Scope) -> SchemaError {
    let skipped = text.len() - text.trim_start().len();
    let line = line_of(input, offset + skipped);
    let snippet: String = text.trim().chars().take(40).collect();
    match scope {
        Scope::Record(builder) => SchemaError::MalformedRecord {
            record: builder.record,
            line,
            detail: format!("stray text {:?} outside <question>/<answer>", snippet),
        },
        _ => SchemaError::Malformed {
            line,
            detail: format!("stray text {:?} outside <{}>", snippet, RECORD_TAG),
        },
    }
}

fn describe_tag(name: &str, closing: bool) -> String {
    if closing {
        format!("</{}>", name)
    } else {
        format!("<{}>", name)
    }
}

/// 1-based line number of a byte offset.
fn line_of(input: &str, offset: usize) -> usize {
    input[..offset.min(input.len())].matches('\n').count() + 1
}

/// Decode the predefined XML entities and numeric character references.
/// Unknown references are left untouched.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    ENTITY_PATTERN
        .replace_all(text, |caps: &Captures<'_>| {
            let entity = &caps[1];
            let decoded = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ if entity.starts_with("#x") => u32::from_str_radix(&entity[2..], 16)
                    .ok()
                    .and_then(char::from_u32),
                _ => entity[1..].parse::<u32>().ok().and_then(char::from_u32),
            };
            decoded
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Escape text for use as element content.
pub fn encode_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_records_without_root() {
        let input = "<qa_pair><question>Q1?</question><answer>a</answer></qa_pair>\n\
                     <qa_pair><question>Q2?</question><answer>b</answer></qa_pair>";
        let pairs = parse_records(input).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].question, "Q2?");
    }

    #[test]
    fn test_raw_span_retained() {
        let record = "<qa_pair>\n    <question>Q?</question>\n    <answer> a </answer>\n  </qa_pair>";
        let input = format!("<evaluation>\n  {}\n</evaluation>\n", record);
        let pairs = parse_records(&input).unwrap();
        assert_eq!(pairs[0].raw.as_deref(), Some(record));
        assert_eq!(pairs[0].answer, "a");
    }

    #[test]
    fn test_comments_and_declaration_skipped() {
        let input = r#"<?xml version="1.0"?>
<!-- generated by hand -->
<evaluation version="1">
  <!-- first -->
  <qa_pair><question>Q?</question><answer>yes</answer></qa_pair>
</evaluation>"#;
        assert_eq!(parse_records(input).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_answer_names_record() {
        let input = r#"<evaluation>
  <qa_pair><question>Q1?</question><answer>a</answer></qa_pair>
  <qa_pair>
    <question>Q2?</question>
  </qa_pair>
</evaluation>"#;
        let err = parse_records(input).unwrap_err();
        assert_eq!(err, SchemaError::MissingAnswer { record: 2, line: 3 });
    }

    #[test]
    fn test_missing_question() {
        let input = "<qa_pair><answer>a</answer></qa_pair>";
        assert!(matches!(
            parse_records(input),
            Err(SchemaError::MissingQuestion { record: 1, .. })
        ));
    }

    #[test]
    fn test_unclosed_record_is_malformed() {
        let input = "<evaluation><qa_pair><question>Q?</question><answer>a</answer></evaluation>";
        assert!(matches!(
            parse_records(input),
            Err(SchemaError::MalformedRecord { record: 1, .. })
        ));
    }

    #[test]
    fn test_nested_tag_in_field_is_malformed() {
        let input = "<qa_pair><question>Q <b>bold</b>?</question><answer>a</answer></qa_pair>";
        assert!(matches!(
            parse_records(input),
            Err(SchemaError::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_stray_text_rejected() {
        let input = "<evaluation>hello<qa_pair><question>Q?</question><answer>a</answer></qa_pair></evaluation>";
        assert!(matches!(parse_records(input), Err(SchemaError::Malformed { .. })));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let input = "<qa_pair><question>Q?</question><answer>a</answer><answer>b</answer></qa_pair>";
        assert!(matches!(
            parse_records(input),
            Err(SchemaError::DuplicateField { record: 1, .. })
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let input = r#"<evaluation version="2"></evaluation>"#;
        assert!(matches!(
            parse_records(input),
            Err(SchemaError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_entities_decoded() {
        let input = "<qa_pair><question>Is 3 &lt; 4 &amp;&amp; 5 &gt; 2?</question><answer>&#121;es</answer></qa_pair>";
        let pairs = parse_records(input).unwrap();
        assert_eq!(pairs[0].question, "Is 3 < 4 && 5 > 2?");
        assert_eq!(pairs[0].answer, "yes");
    }

    #[test]
    fn test_less_than_followed_by_space_is_text() {
        let input = "<qa_pair><question>Is a < b?</question><answer>true</answer></qa_pair>";
        let pairs = parse_records(input).unwrap();
        assert_eq!(pairs[0].question, "Is a < b?");
    }

    #[test]
    fn test_encode_decode_inverse() {
        let text = "a < b && c > d";
        assert_eq!(decode_entities(&encode_text(text)), text);
    }
}
