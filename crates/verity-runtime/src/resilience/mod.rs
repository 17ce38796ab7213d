//! Resilience patterns for verity-runtime.
//!
//! This module provides:
//! - Circuit breaker per tool server
//! - Run-level token accounting and budget
//! - Retry with exponential backoff

mod budget;
mod circuit_breaker;
mod retry;

pub use budget::{LlmUsage, TokenBudget, UsageMeter};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::RetryConfig;
