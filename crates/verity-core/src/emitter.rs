//! Serialises reconciled documents and writes output files atomically.

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::document::{encode_text, EvaluationDocument, WireDocument, WirePair};
use crate::types::DocumentFormat;

/// Errors writing documents or reports.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialise JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to serialise YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Render a document in its own format.
pub fn render_document(document: &EvaluationDocument) -> Result<String, EmitError> {
    render_as(document, document.format)
}

/// Render a document in the given format.
///
/// Markup output reuses each pair's retained source span, so pairs the run
/// did not change are written back byte-for-byte.
pub fn render_as(document: &EvaluationDocument, format: DocumentFormat) -> Result<String, EmitError> {
    match format {
        DocumentFormat::Xml => Ok(render_markup(document)),
        DocumentFormat::Json => {
            let mut out = serde_json::to_string_pretty(&to_wire(document))?;
            out.push('\n');
            Ok(out)
        }
        DocumentFormat::Yaml => Ok(serde_yaml::to_string(&to_wire(document))?),
    }
}

fn render_markup(document: &EvaluationDocument) -> String {
    let mut out = format!("<evaluation version=\"{}\">\n", document.format_version);
    for pair in &document.pairs {
        match &pair.raw {
            Some(raw) => {
                out.push_str("  ");
                out.push_str(raw);
                out.push('\n');
            }
            None => {
                out.push_str("  <qa_pair>\n");
                out.push_str(&format!("    <question>{}</question>\n", encode_text(&pair.question)));
                out.push_str(&format!("    <answer>{}</answer>\n", encode_text(&pair.answer)));
                out.push_str("  </qa_pair>\n");
            }
        }
    }
    out.push_str("</evaluation>\n");
    out
}

fn to_wire(document: &EvaluationDocument) -> WireDocument {
    WireDocument {
        version: document.format_version,
        qa_pairs: document
            .pairs
            .iter()
            .map(|p| WirePair {
                question: p.question.clone(),
                answer: serde_json::Value::String(p.answer.clone()),
            })
            .collect(),
    }
}

/// Atomically write `data` to `path` using a tempfile in the same directory.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), EmitError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent)?;
            parent
        }
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Render and atomically write a document.
///
/// The format follows the target path's extension when it has one, otherwise
/// the document's own format.
pub fn write_document(document: &EvaluationDocument, path: &Path) -> Result<(), EmitError> {
    let format = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => DocumentFormat::from_extension(Some(ext)),
        None => document.format,
    };
    let rendered = render_as(document, format)?;
    atomic_write(path, rendered.as_bytes())?;
    tracing::info!(path = %path.display(), pairs = document.len(), "Wrote evaluation document");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QaPair;

    const SOURCE: &str = r#"<evaluation version="1">
  <qa_pair><question>Who merged PR 42?</question>   <answer>alice</answer></qa_pair>
  <qa_pair>
    <question>Which tag came first, v1 or v2? Answer with the tag name.</question>
    <answer>v1</answer>
  </qa_pair>
</evaluation>
"#;

    #[test]
    fn test_unchanged_pairs_are_byte_stable() {
        let doc = EvaluationDocument::parse(SOURCE, DocumentFormat::Xml).unwrap();
        let rendered = render_document(&doc).unwrap();
        assert!(rendered
            .contains("<qa_pair><question>Who merged PR 42?</question>   <answer>alice</answer></qa_pair>"));

        let reparsed = EvaluationDocument::parse(&rendered, DocumentFormat::Xml).unwrap();
        assert_eq!(reparsed.pairs, doc.pairs);
        assert_eq!(render_document(&reparsed).unwrap(), rendered);
    }

    #[test]
    fn test_changed_pair_rendered_canonically() {
        let mut doc = EvaluationDocument::parse(SOURCE, DocumentFormat::Xml).unwrap();
        doc.pairs[0].set_answer("a & b");
        let rendered = render_document(&doc).unwrap();
        assert!(rendered.contains("    <answer>a &amp; b</answer>\n"));

        let reparsed = EvaluationDocument::parse(&rendered, DocumentFormat::Xml).unwrap();
        assert_eq!(reparsed.pairs[0].answer, "a & b");
        assert_eq!(reparsed.pairs[1].raw, doc.pairs[1].raw);
    }

    #[test]
    fn test_json_and_yaml_output_parse_back() {
        let doc = EvaluationDocument::new(
            DocumentFormat::Json,
            vec![QaPair::new(0, "How many forks did v2 have by 2023-01-01?", "17")],
        );
        for format in [DocumentFormat::Json, DocumentFormat::Yaml] {
            let rendered = render_as(&doc, format).unwrap();
            let reparsed = EvaluationDocument::parse(&rendered, format).unwrap();
            assert_eq!(reparsed.pairs[0].answer, "17");
        }
    }

    #[test]
    fn test_empty_document_renders_root_only() {
        let doc = EvaluationDocument::new(DocumentFormat::Xml, vec![]);
        assert_eq!(
            render_document(&doc).unwrap(),
            "<evaluation version=\"1\">\n</evaluation>\n"
        );
    }

    #[test]
    fn test_write_document_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/eval.json");
        let doc = EvaluationDocument::new(DocumentFormat::Xml, vec![QaPair::new(0, "Q in 2020?", "x")]);

        write_document(&doc, &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.trim_start().starts_with('{'));
        let reparsed = EvaluationDocument::from_path(&path).unwrap();
        assert_eq!(reparsed.pairs[0].question, "Q in 2020?");
    }
}
