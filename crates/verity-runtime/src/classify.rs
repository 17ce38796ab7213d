//! Classification of tools by the operations they perform.
//!
//! Resolution order for a tool:
//! 1. explicit overrides from configuration
//! 2. MCP annotations (`readOnlyHint`, `destructiveHint`)
//! 3. the most severe verb in the tool name
//! 4. `Unknown`

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use verity_core::OperationClassification;

use crate::mcp::ToolDescriptor;

lazy_static! {
    static ref CAMEL_BOUNDARY: Regex = Regex::new(r"([a-z0-9])([A-Z])").unwrap();
}

const READ_VERBS: &[&str] = &[
    "get", "list", "search", "read", "fetch", "find", "query", "describe", "show", "view",
    "lookup", "count", "browse", "retrieve", "check", "inspect", "download", "export",
];

const WRITE_VERBS: &[&str] = &[
    "create", "update", "set", "write", "post", "add", "put", "patch", "edit", "modify",
    "insert", "upload", "send", "comment", "merge", "assign", "rename", "move", "archive",
    "close", "open", "fork", "star", "approve", "publish", "run", "execute", "trigger",
];

const DESTRUCTIVE_VERBS: &[&str] = &[
    "delete", "remove", "drop", "destroy", "purge", "truncate", "erase", "wipe", "revoke",
    "reset", "clear", "kill", "terminate", "unpublish",
];

/// Classifies tools advertised by a server.
#[derive(Debug, Clone, Default)]
pub struct ToolClassifier {
    overrides: BTreeMap<String, OperationClassification>,
}

impl ToolClassifier {
    pub fn new(overrides: BTreeMap<String, OperationClassification>) -> Self {
        Self { overrides }
    }

    pub fn classify(&self, tool: &ToolDescriptor) -> OperationClassification {
        if let Some(classification) = self.overrides.get(&tool.name) {
            return *classification;
        }

        if let Some(annotations) = &tool.annotations {
            match (annotations.read_only_hint, annotations.destructive_hint) {
                (Some(true), _) => return OperationClassification::ReadOnly,
                (_, Some(true)) => return OperationClassification::Destructive,
                // Not read-only: MCP treats unspecified destructiveness as destructive
                (Some(false), Some(false)) => return OperationClassification::Write,
                (Some(false), None) => return OperationClassification::Destructive,
                _ => {}
            }
        }

        classify_name(&tool.name)
    }

    /// Classify a tool the server never advertised.
    pub fn classify_name(&self, name: &str) -> OperationClassification {
        self.overrides
            .get(name)
            .copied()
            .unwrap_or_else(|| classify_name(name))
    }
}

/// Classify by the most severe verb anywhere in the tool name.
///
/// `get_and_delete_cache` is destructive: a read verb never masks a later
/// write or destructive one.
pub fn classify_name(name: &str) -> OperationClassification {
    let split = CAMEL_BOUNDARY.replace_all(name, "${1}_${2}").to_lowercase();

    split
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter_map(|token| {
            if DESTRUCTIVE_VERBS.contains(&token) {
                Some(OperationClassification::Destructive)
            } else if WRITE_VERBS.contains(&token) {
                Some(OperationClassification::Write)
            } else if READ_VERBS.contains(&token) {
                Some(OperationClassification::ReadOnly)
            } else {
                None
            }
        })
        .max()
        .unwrap_or(OperationClassification::Unknown)
}
