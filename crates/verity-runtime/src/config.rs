//! Runtime configuration for the solving phase.
//!
//! Loaded from YAML; every field has a default so an empty file is valid.
//! CLI flags override individual fields after loading.
//!
//! ```yaml
//! concurrency: 4
//! max_steps: 12
//! call_timeout: 30s
//! question_timeout: 5m
//! unknown_tools: deny
//! tool_overrides:
//!   run_report: READ_ONLY
//! model:
//!   model: claude-sonnet-4-5
//!   max_tokens: 4096
//!   temperature: 0.0
//!   timeout: 2m
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use verity_core::OperationClassification;

use crate::providers::CompletionConfig;
use crate::resilience::{CircuitBreakerConfig, RetryConfig};

/// Errors loading runtime configuration.
#[derive(Error, Debug)]
pub enum RuntimeConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// What to do when the model asks for a tool of unknown classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownToolPolicy {
    /// Invoke it; the solve is classified `Unknown`
    #[default]
    Allow,
    /// Refuse it; the question becomes unresolved
    Deny,
}

/// Configuration for the solving phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Questions solved concurrently
    pub concurrency: usize,

    /// Tool calls allowed per question
    pub max_steps: u32,

    /// Deadline for a single tool call
    #[serde(with = "duration_human")]
    pub call_timeout: Duration,

    /// Deadline for solving one question end to end
    #[serde(with = "duration_human")]
    pub question_timeout: Duration,

    /// Retry policy for tool connection failures
    pub retry: RetryConfig,

    /// Per-server circuit breaker
    pub circuit_breaker: CircuitBreakerConfig,

    pub unknown_tools: UnknownToolPolicy,

    /// Explicit classifications by tool name, applied before annotations
    pub tool_overrides: BTreeMap<String, OperationClassification>,

    /// Model parameters
    pub model: CompletionConfig,

    /// API key; falls back to `ANTHROPIC_API_KEY`
    pub api_key: Option<String>,

    /// Alternate provider endpoint
    pub base_url: Option<String>,

    /// Unresolved pairs tolerated before exit code 3
    pub unresolved_threshold: usize,

    /// Token ceiling for the whole run; solving stops scheduling when spent
    pub max_run_tokens: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_steps: 12,
            call_timeout: Duration::from_secs(30),
            question_timeout: Duration::from_secs(300),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            unknown_tools: UnknownToolPolicy::default(),
            tool_overrides: BTreeMap::new(),
            model: CompletionConfig::default(),
            api_key: None,
            base_url: None,
            unresolved_threshold: 0,
            max_run_tokens: None,
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate YAML configuration.
    pub fn from_yaml(yaml: &str) -> Result<Self, RuntimeConfigError> {
        let config: RuntimeConfig = if yaml.trim().is_empty() {
            RuntimeConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuntimeConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), RuntimeConfigError> {
        if self.concurrency == 0 {
            return Err(RuntimeConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_steps == 0 {
            return Err(RuntimeConfigError::Invalid(
                "max_steps must be at least 1".to_string(),
            ));
        }
        if self.call_timeout.is_zero() || self.question_timeout.is_zero() {
            return Err(RuntimeConfigError::Invalid(
                "timeouts must be non-zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(RuntimeConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.min_delay > self.retry.max_delay {
            return Err(RuntimeConfigError::Invalid(
                "retry.min_delay exceeds retry.max_delay".to_string(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0
            || self.circuit_breaker.success_threshold == 0
        {
            return Err(RuntimeConfigError::Invalid(
                "circuit breaker thresholds must be at least 1".to_string(),
            ));
        }
        if self.model.model.trim().is_empty() {
            return Err(RuntimeConfigError::Invalid("model must be set".to_string()));
        }
        Ok(())
    }
}

/// Serde adapter for `humantime` durations ("30s", "5m", "1h 30m").
pub mod duration_human {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RuntimeConfig::from_yaml("").unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.max_steps, 12);
        assert_eq!(config.unknown_tools, UnknownToolPolicy::Allow);
        assert_eq!(config.unresolved_threshold, 0);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
concurrency: 8
max_steps: 5
call_timeout: 10s
question_timeout: 2m
unknown_tools: deny
tool_overrides:
  run_report: READ_ONLY
  sync_mirror: WRITE
retry:
  max_attempts: 4
  min_delay: 100ms
  max_delay: 2s
model:
  model: claude-haiku-4-5
  max_tokens: 1024
  temperature: 0.0
  timeout: 45s
unresolved_threshold: 2
max_run_tokens: 200000
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert_eq!(config.question_timeout, Duration::from_secs(120));
        assert_eq!(config.unknown_tools, UnknownToolPolicy::Deny);
        assert_eq!(
            config.tool_overrides.get("run_report"),
            Some(&OperationClassification::ReadOnly)
        );
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.min_delay, Duration::from_millis(100));
        assert_eq!(config.model.model, "claude-haiku-4-5");
        assert_eq!(config.model.timeout, Duration::from_secs(45));
        assert_eq!(config.max_run_tokens, Some(200_000));
    }

    #[test]
    fn test_rejects_unknown_field() {
        assert!(matches!(
            RuntimeConfig::from_yaml("concurency: 3"),
            Err(RuntimeConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        assert!(matches!(
            RuntimeConfig::from_yaml("concurrency: 0"),
            Err(RuntimeConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_bad_duration() {
        assert!(RuntimeConfig::from_yaml("call_timeout: soon").is_err());
    }

    #[test]
    fn test_durations_serialize_human_readable() {
        let yaml = serde_yaml::to_string(&RuntimeConfig::default()).unwrap();
        assert!(yaml.contains("call_timeout: 30s"));
        assert!(yaml.contains("question_timeout: 5m"));
    }
}
