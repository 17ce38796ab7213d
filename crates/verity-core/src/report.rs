//! Run summary and exit-code policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use crate::reconcile::{LedgerEntry, Reconciliation};
use crate::types::PairStatus;

/// Every report category, in display order.
pub const CATEGORIES: [&str; 8] = [
    "confirmed",
    "corrected",
    "dropped_unsafe",
    "unresolved",
    "rejected_non_scalar",
    "rejected_unstable",
    "rejected_ambiguous_format",
    "rejected_trivial_lookup",
];

/// Process exit status.
///
/// Precedence when several apply: `Fatal` > `UnresolvedThreshold` >
/// `DroppedUnsafe` > `Clean`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Clean,
    DroppedUnsafe,
    UnresolvedThreshold,
    Fatal,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::DroppedUnsafe => 1,
            ExitStatus::Fatal => 2,
            ExitStatus::UnresolvedThreshold => 3,
        }
    }

    /// Exit status for a completed run.
    ///
    /// Rejected pairs are reported but do not affect the exit status.
    pub fn for_summary(summary: &RunSummary, unresolved_threshold: usize) -> Self {
        if summary.count("unresolved") > unresolved_threshold {
            ExitStatus::UnresolvedThreshold
        } else if summary.count("dropped_unsafe") > 0 {
            ExitStatus::DroppedUnsafe
        } else {
            ExitStatus::Clean
        }
    }
}

/// Token usage reported by the language model across a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Output format for the summary report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Markdown,
    Json,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!("unknown report format '{}'", other)),
        }
    }
}

/// Summary of one evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,

    /// Path of the evaluated document, if it came from a file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,

    pub total: usize,
    pub counts: BTreeMap<String, usize>,

    /// Pairs carrying at least one WARN finding
    pub warned: usize,

    pub usage: TokenUsage,

    /// The run was cancelled before every pair was solved
    #[serde(default)]
    pub cancelled: bool,

    pub entries: Vec<LedgerEntry>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl RunSummary {
    /// Build a summary from a reconciliation ledger.
    pub fn new(run_id: impl Into<String>, started_at: DateTime<Utc>, ledger: &[LedgerEntry]) -> Self {
        let finished_at = Utc::now();
        let mut counts: BTreeMap<String, usize> =
            CATEGORIES.iter().map(|c| (c.to_string(), 0)).collect();
        for entry in ledger {
            *counts.entry(entry.status.category().to_string()).or_insert(0) += 1;
        }

        Self {
            run_id: run_id.into(),
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
            document: None,
            total: ledger.len(),
            counts,
            warned: ledger.iter().filter(|e| !e.warnings.is_empty()).count(),
            usage: TokenUsage::default(),
            cancelled: false,
            entries: ledger.to_vec(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn from_reconciliation(
        run_id: impl Into<String>,
        started_at: DateTime<Utc>,
        reconciliation: &Reconciliation,
    ) -> Self {
        Self::new(run_id, started_at, &reconciliation.ledger)
    }

    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn count(&self, category: &str) -> usize {
        self.counts.get(category).copied().unwrap_or(0)
    }

    /// Rejected pairs across all rules.
    pub fn rejected(&self) -> usize {
        self.counts
            .iter()
            .filter(|(k, _)| k.starts_with("rejected_"))
            .map(|(_, v)| v)
            .sum()
    }

    /// Entries that need attention (anything other than a clean confirmation).
    pub fn notable(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries
            .iter()
            .filter(|e| e.status != PairStatus::Confirmed || !e.warnings.is_empty())
    }

    /// Render the summary in the requested format.
    pub fn render(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Text => self.render_text(),
            ReportFormat::Markdown => self.render_markdown(),
            ReportFormat::Json => serde_json::to_string_pretty(self).unwrap_or_default(),
        }
    }

    fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Run {}", self.run_id);
        if let Some(doc) = &self.document {
            let _ = writeln!(out, "Document: {}", doc);
        }
        let _ = writeln!(
            out,
            "Pairs: {} ({} ms{})",
            self.total,
            self.duration_ms,
            if self.cancelled { ", cancelled" } else { "" }
        );
        for category in CATEGORIES {
            let n = self.count(category);
            if n > 0 {
                let _ = writeln!(out, "  {:<26} {}", category, n);
            }
        }
        if self.warned > 0 {
            let _ = writeln!(out, "  {:<26} {}", "with warnings", self.warned);
        }
        if self.usage.total() > 0 {
            let _ = writeln!(
                out,
                "Tokens: {} in / {} out",
                self.usage.input_tokens, self.usage.output_tokens
            );
        }

        let notable: Vec<&LedgerEntry> = self.notable().collect();
        if !notable.is_empty() {
            out.push('\n');
            for entry in notable {
                let _ = writeln!(
                    out,
                    "[{}] #{} {}",
                    entry.status.category(),
                    entry.index + 1,
                    entry.question
                );
                if let Some(reason) = entry.status.describe() {
                    let _ = writeln!(out, "    {}", reason);
                }
                for warning in &entry.warnings {
                    let _ = writeln!(out, "    warn {}: {}", warning.rule, warning.reason);
                }
            }
        }
        out
    }

    fn render_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Evaluation report\n");
        let _ = writeln!(out, "- **Run**: `{}`", self.run_id);
        if let Some(doc) = &self.document {
            let _ = writeln!(out, "- **Document**: `{}`", doc);
        }
        let _ = writeln!(out, "- **Started**: {}", self.started_at.to_rfc3339());
        let _ = writeln!(out, "- **Duration**: {} ms", self.duration_ms);
        if self.cancelled {
            let _ = writeln!(out, "- **Cancelled**: yes");
        }
        if self.usage.total() > 0 {
            let _ = writeln!(
                out,
                "- **Tokens**: {} in / {} out",
                self.usage.input_tokens, self.usage.output_tokens
            );
        }

        let _ = writeln!(out, "\n| Category | Count |\n|---|---|");
        for category in CATEGORIES {
            let _ = writeln!(out, "| {} | {} |", category, self.count(category));
        }

        let notable: Vec<&LedgerEntry> = self.notable().collect();
        if !notable.is_empty() {
            let _ = writeln!(out, "\n## Pairs needing attention\n");
            let _ = writeln!(out, "| # | Status | Question | Detail |\n|---|---|---|---|");
            for entry in notable {
                let mut detail = entry.status.describe().unwrap_or_default();
                for warning in &entry.warnings {
                    if !detail.is_empty() {
                        detail.push_str("<br>");
                    }
                    let _ = write!(detail, "warn {}: {}", warning.rule, warning.reason);
                }
                let _ = writeln!(
                    out,
                    "| {} | {} | {} | {} |",
                    entry.index + 1,
                    entry.status.category(),
                    escape_cell(&entry.question),
                    escape_cell(&detail)
                );
            }
        }
        out
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}
