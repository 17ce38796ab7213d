//! Token accounting for the solving phase.
//!
//! Every completion made by any worker is recorded into one [`UsageMeter`].
//! An optional run-level [`TokenBudget`] stops the orchestrator from
//! scheduling further questions once it is spent.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::providers::TokenUsage;

/// Token budget for a run.
pub struct TokenBudget {
    /// Maximum tokens allowed
    pub max_tokens: u64,

    /// Currently used tokens
    used: AtomicU64,
}

impl TokenBudget {
    /// Create a new token budget.
    pub fn new(max_tokens: u64) -> Self {
        Self {
            max_tokens,
            used: AtomicU64::new(0),
        }
    }

    /// Record token usage.
    pub fn record(&self, tokens: u64) {
        self.used.fetch_add(tokens, Ordering::SeqCst);
    }

    /// Get remaining tokens.
    pub fn remaining(&self) -> u64 {
        self.max_tokens.saturating_sub(self.used.load(Ordering::SeqCst))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

/// Accumulated LLM usage for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    /// Total tokens used
    pub total_tokens: u64,

    /// Prompt/input tokens
    pub prompt_tokens: u64,

    /// Completion/output tokens
    pub completion_tokens: u64,

    /// Number of LLM calls made
    pub llm_calls: u32,

    /// Estimated cost in USD
    pub estimated_cost: f64,

    /// Tokens written to cache
    pub cache_creation_tokens: u64,

    /// Tokens read from cache
    pub cache_read_tokens: u64,
}

impl LlmUsage {
    /// Add token usage from a provider response.
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total());
        self.llm_calls += 1;
        self.cache_creation_tokens += u64::from(usage.cache_creation_tokens);
        self.cache_read_tokens += u64::from(usage.cache_read_tokens);

        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    /// Input/output totals in the shape the run summary reports.
    pub fn summary(&self) -> verity_core::TokenUsage {
        verity_core::TokenUsage {
            input_tokens: self.prompt_tokens,
            output_tokens: self.completion_tokens,
        }
    }

    /// Estimate cost for a usage entry.
    fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // Pricing per million tokens
        let (input_rate, output_rate, cache_write_rate, cache_read_rate) = match model {
            m if m.contains("sonnet-4-5") => (3.0, 15.0, 3.75, 0.3),
            m if m.contains("opus-4-5") => (5.0, 25.0, 6.25, 0.5),
            m if m.contains("haiku-4-5") => (1.0, 5.0, 1.25, 0.1),
            _ => (3.0, 15.0, 3.75, 0.3), // Default to Sonnet pricing
        };

        let input_cost = (usage.prompt_tokens as f64 / 1_000_000.0) * input_rate;
        let output_cost = (usage.completion_tokens as f64 / 1_000_000.0) * output_rate;
        let cache_write_cost = (usage.cache_creation_tokens as f64 / 1_000_000.0) * cache_write_rate;
        let cache_read_cost = (usage.cache_read_tokens as f64 / 1_000_000.0) * cache_read_rate;

        input_cost + output_cost + cache_write_cost + cache_read_cost
    }
}

/// Shared usage recorder for all workers of a run.
pub struct UsageMeter {
    budget: Option<TokenBudget>,
    usage: RwLock<LlmUsage>,
}

impl UsageMeter {
    pub fn new(max_run_tokens: Option<u64>) -> Self {
        Self {
            budget: max_run_tokens.map(TokenBudget::new),
            usage: RwLock::new(LlmUsage::default()),
        }
    }

    /// Record usage after a completion.
    pub fn record(&self, usage: &TokenUsage, model: &str) {
        if let Some(budget) = &self.budget {
            budget.record(u64::from(usage.total()));
        }
        self.usage.write().add(usage, model);
    }

    /// Whether the run-level budget is spent.
    pub fn exhausted(&self) -> bool {
        self.budget.as_ref().map(|b| b.is_exhausted()).unwrap_or(false)
    }

    pub fn snapshot(&self) -> LlmUsage {
        self.usage.read().clone()
    }
}

impl Default for UsageMeter {
    fn default() -> Self {
        Self::new(None)
    }
}
