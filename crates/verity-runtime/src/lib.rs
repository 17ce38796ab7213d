//! # verity-runtime
//!
//! Agent-driven solving for Verity.
//!
//! `verity-core` decides which pairs are verifiable and what the document
//! should say given a solver outcome. This crate produces those outcomes: an
//! LLM answers each surviving question by calling tools on the MCP server
//! under evaluation, never seeing the recorded answer.
//!
//! ## Safety
//!
//! Every tool call is classified before it is made. A question whose only
//! path to an answer needs a write or destructive operation ends as
//! [`SolveOutcome::Unsafe`](verity_core::SolveOutcome::Unsafe) and the
//! operation is never invoked.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use verity_runtime::{
//!     mcp::{McpClient, StdioTransport},
//!     AgentSolver, AnthropicProvider, CancelSignal, CircuitBreaker, Orchestrator,
//!     RunContext, RuntimeConfig, UsageMeter,
//! };
//!
//! let config = RuntimeConfig::from_file("verity.yaml")?;
//! let transport = StdioTransport::spawn("github-mcp", &[], &[])?;
//! let server = Arc::new(McpClient::connect("github", Box::new(transport)).await?);
//! let provider = Arc::new(AnthropicProvider::from_config(None, None)?);
//! let usage = Arc::new(UsageMeter::new(config.max_run_tokens));
//! let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
//!
//! let solver = AgentSolver::connect(provider, server, &config, breaker, usage.clone()).await?;
//! let orchestrator = Orchestrator::new(Arc::new(solver), usage);
//!
//! let ctx = RunContext::new(config, CancelSignal::new());
//! let run = orchestrator.evaluate(&ctx, &document, &checker).await?;
//! println!("{}", run.summary.render(ReportFormat::Text));
//! ```

pub mod cancel;
pub mod checkpoint;
pub mod classify;
pub mod config;
pub mod mcp;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod solver;

pub use cancel::CancelSignal;
pub use checkpoint::{Checkpoint, CheckpointError};
pub use classify::ToolClassifier;
pub use config::{RuntimeConfig, RuntimeConfigError, UnknownToolPolicy};
pub use mcp::{McpClient, McpError, ToolServer};
pub use orchestrator::{EvaluationRun, Orchestrator, RunContext, RuntimeError, SolveRun};
pub use providers::{AnthropicProvider, LlmProvider, ProviderError};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, RetryConfig, UsageMeter};
pub use solver::{AgentSolver, Solver};
