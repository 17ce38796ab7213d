//! Circuit breaker to prevent cascade failures.
//!
//! When calls to a tool server fail repeatedly, its circuit opens and
//! subsequent calls fail fast instead of waiting out their timeouts. Each
//! question hitting an open circuit becomes unresolved; the run continues.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::duration_human;

/// Circuit breaker configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    /// Failures before opening circuit
    pub failure_threshold: u32,

    /// Time before attempting recovery
    #[serde(with = "duration_human")]
    pub recovery_timeout: Duration,

    /// Successes needed to close circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone)]
pub enum CircuitState {
    /// Normal operation
    Closed { failures: u32 },

    /// Circuit is open, calls fail fast
    Open { opened_at: Instant },

    /// Testing if circuit can close
    HalfOpen { successes: u32 },
}

/// Circuit breaker keyed by tool server name.
pub struct CircuitBreaker {
    states: RwLock<HashMap<String, CircuitState>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Check if the circuit for a server is open.
    pub fn is_open(&self, server: &str) -> bool {
        let states = self.states.read();
        match states.get(server) {
            Some(CircuitState::Open { opened_at }) => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    drop(states);
                    self.transition_to_half_open(server);
                    false
                } else {
                    true
                }
            }
            Some(CircuitState::HalfOpen { .. }) => false, // Allow test calls
            _ => false,
        }
    }

    /// Record a successful call.
    pub fn record_success(&self, server: &str) {
        let mut states = self.states.write();
        match states.get(server).cloned() {
            Some(CircuitState::HalfOpen { successes }) => {
                if successes + 1 >= self.config.success_threshold {
                    states.insert(server.to_string(), CircuitState::Closed { failures: 0 });
                    tracing::info!(server, "Circuit closed after successful recovery");
                } else {
                    states.insert(
                        server.to_string(),
                        CircuitState::HalfOpen {
                            successes: successes + 1,
                        },
                    );
                }
            }
            Some(CircuitState::Closed { .. }) => {
                states.insert(server.to_string(), CircuitState::Closed { failures: 0 });
            }
            _ => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self, server: &str) {
        let mut states = self.states.write();
        let failures = match states.get(server).cloned() {
            Some(CircuitState::Closed { failures }) => failures + 1,
            None => 1,
            Some(CircuitState::HalfOpen { .. }) => {
                states.insert(
                    server.to_string(),
                    CircuitState::Open {
                        opened_at: Instant::now(),
                    },
                );
                tracing::warn!(server, "Circuit reopened after failed recovery attempt");
                return;
            }
            Some(CircuitState::Open { .. }) => return,
        };

        if failures >= self.config.failure_threshold {
            states.insert(
                server.to_string(),
                CircuitState::Open {
                    opened_at: Instant::now(),
                },
            );
            tracing::warn!(server, failures, "Circuit opened after repeated failures");
        } else {
            states.insert(server.to_string(), CircuitState::Closed { failures });
        }
    }

    fn transition_to_half_open(&self, server: &str) {
        let mut states = self.states.write();
        if matches!(states.get(server), Some(CircuitState::Open { .. })) {
            states.insert(server.to_string(), CircuitState::HalfOpen { successes: 0 });
            tracing::info!(server, "Circuit transitioning to half-open for recovery test");
        }
    }

    #[cfg(test)]
    fn state(&self, server: &str) -> CircuitState {
        self.states
            .read()
            .get(server)
            .cloned()
            .unwrap_or(CircuitState::Closed { failures: 0 })
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
