//! Resumable record of a partially solved run.
//!
//! Saved after every completed solve and removed once every pair is solved.
//! A checkpoint only applies to the exact document it was taken from: the
//! document fingerprint must match for `--resume` to reuse it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use verity_core::SolveOutcome;

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Failed to read checkpoint: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse checkpoint: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to write checkpoint: {0}")]
    Write(#[from] verity_core::EmitError),

    #[error("Unsupported checkpoint version {0}")]
    Version(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,

    /// Fingerprint of the document being solved
    pub fingerprint: String,

    pub run_id: String,

    pub saved_at: DateTime<Utc>,

    /// Outcomes of fully completed solves, by pair index
    pub completed: BTreeMap<usize, SolveOutcome>,

    /// Indices still to solve
    pub pending: Vec<usize>,
}

impl Checkpoint {
    pub fn new(fingerprint: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            fingerprint: fingerprint.into(),
            run_id: run_id.into(),
            saved_at: Utc::now(),
            completed: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    /// Default location: `<document>.verity-checkpoint.json`.
    pub fn default_path(document: &Path) -> PathBuf {
        let mut name = document
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".verity-checkpoint.json");
        document.with_file_name(name)
    }

    /// Load a checkpoint; a missing file is not an error.
    pub fn load(path: &Path) -> Result<Option<Self>, CheckpointError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let checkpoint: Checkpoint = serde_json::from_str(&content)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::Version(checkpoint.version));
        }
        Ok(Some(checkpoint))
    }

    pub fn save(&mut self, path: &Path) -> Result<(), CheckpointError> {
        self.saved_at = Utc::now();
        let json = serde_json::to_vec_pretty(self)?;
        verity_core::atomic_write(path, &json)?;
        Ok(())
    }

    pub fn matches(&self, fingerprint: &str) -> bool {
        self.fingerprint == fingerprint
    }

    /// Remove the checkpoint file if present.
    pub fn remove(path: &Path) -> Result<(), CheckpointError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_core::OperationClassification;

    #[test]
    fn test_default_path() {
        assert_eq!(
            Checkpoint::default_path(Path::new("/tmp/evals/github.xml")),
            PathBuf::from("/tmp/evals/github.xml.verity-checkpoint.json")
        );
    }

    #[test]
    fn test_save_load_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eval.xml.verity-checkpoint.json");

        assert!(Checkpoint::load(&path).unwrap().is_none());

        let mut checkpoint = Checkpoint::new("abc123", "run-1");
        checkpoint.completed.insert(
            2,
            SolveOutcome::Answered {
                candidate: "new-repo".to_string(),
                classification: OperationClassification::ReadOnly,
                steps: 3,
            },
        );
        checkpoint.pending = vec![0, 1];
        checkpoint.save(&path).unwrap();

        let loaded = Checkpoint::load(&path).unwrap().unwrap();
        assert!(loaded.matches("abc123"));
        assert!(!loaded.matches("def456"));
        assert_eq!(loaded.completed, checkpoint.completed);
        assert_eq!(loaded.pending, vec![0, 1]);

        Checkpoint::remove(&path).unwrap();
        assert!(!path.exists());
        Checkpoint::remove(&path).unwrap();
    }

    #[test]
    fn test_rejects_future_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        std::fs::write(
            &path,
            r#"{"version":9,"fingerprint":"x","run_id":"r","saved_at":"2024-01-01T00:00:00Z","completed":{},"pending":[]}"#,
        )
        .unwrap();
        assert!(matches!(
            Checkpoint::load(&path),
            Err(CheckpointError::Version(9))
        ));
    }
}
