//! Independent solving of evaluation questions.
//!
//! [`AgentSolver`] drives an LLM through a private tool-use conversation
//! against the server under evaluation. Every tool the model asks for is
//! classified before it is invoked; a write or destructive request ends the
//! solve as [`SolveOutcome::Unsafe`] without touching the server.

use async_trait::async_trait;
use backon::Retryable;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use verity_core::{OperationClassification, SolveOutcome};

use crate::classify::ToolClassifier;
use crate::config::{RuntimeConfig, UnknownToolPolicy};
use crate::mcp::{McpError, ToolCallResult, ToolServer};
use crate::prompts::{question_prompt, SOLVER_SYSTEM_PROMPT};
use crate::providers::{
    ChatMessage, CompletionConfig, CompletionRequest, ContentBlock, LlmProvider, ProviderError,
    ToolSpec,
};
use crate::resilience::{CircuitBreaker, RetryConfig, UsageMeter};

lazy_static! {
    static ref RESPONSE_TAG: Regex = Regex::new(r"(?s)<response>(.*?)</response>").unwrap();
}

/// Derives an answer for a question without seeing the recorded one.
#[async_trait]
pub trait Solver: Send + Sync {
    async fn solve(&self, question: &str) -> SolveOutcome;
}

/// Extract the final answer from the last `<response>` tag.
pub fn extract_response(text: &str) -> Option<String> {
    RESPONSE_TAG
        .captures_iter(text)
        .last()
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|answer| !answer.is_empty())
}

/// LLM agent solving over an MCP tool server.
pub struct AgentSolver {
    provider: Arc<dyn LlmProvider>,
    server: Arc<dyn ToolServer>,
    classifier: ToolClassifier,
    catalog: HashMap<String, OperationClassification>,
    tools: Vec<ToolSpec>,
    breaker: Arc<CircuitBreaker>,
    usage: Arc<UsageMeter>,
    model: CompletionConfig,
    retry: RetryConfig,
    unknown_tools: UnknownToolPolicy,
    max_steps: u32,
    call_timeout: Duration,
    question_timeout: Duration,
}

impl AgentSolver {
    /// Discover and classify the server's tools.
    pub async fn connect(
        provider: Arc<dyn LlmProvider>,
        server: Arc<dyn ToolServer>,
        config: &RuntimeConfig,
        breaker: Arc<CircuitBreaker>,
        usage: Arc<UsageMeter>,
    ) -> Result<Self, McpError> {
        let classifier = ToolClassifier::new(config.tool_overrides.clone());
        let descriptors = match tokio::time::timeout(config.call_timeout, server.list_tools()).await
        {
            Ok(result) => result?,
            Err(_) => return Err(McpError::Timeout(config.call_timeout)),
        };

        let mut catalog = HashMap::new();
        let mut tools = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let classification = classifier.classify(&descriptor);
            tracing::debug!(
                tool = %descriptor.name,
                classification = classification.as_str(),
                "classified tool"
            );
            catalog.insert(descriptor.name.clone(), classification);
            tools.push(ToolSpec {
                name: descriptor.name,
                description: descriptor.description.unwrap_or_default(),
                input_schema: descriptor.input_schema,
            });
        }

        let read_only = catalog
            .values()
            .filter(|c| **c == OperationClassification::ReadOnly)
            .count();
        tracing::info!(
            server = server.name(),
            tools = tools.len(),
            read_only,
            "discovered tools"
        );

        Ok(Self {
            provider,
            server,
            classifier,
            catalog,
            tools,
            breaker,
            usage,
            model: config.model.clone(),
            retry: config.retry.clone(),
            unknown_tools: config.unknown_tools,
            max_steps: config.max_steps,
            call_timeout: config.call_timeout,
            question_timeout: config.question_timeout,
        })
    }

    /// Classification of each discovered tool.
    pub fn catalog(&self) -> &HashMap<String, OperationClassification> {
        &self.catalog
    }

    fn classification_of(&self, tool: &str) -> OperationClassification {
        self.catalog
            .get(tool)
            .copied()
            .unwrap_or_else(|| self.classifier.classify_name(tool))
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<ContentTurn, ProviderError> {
        let response = (move || self.provider.complete(request, &self.model))
            .retry(self.retry.backoff())
            .when(ProviderError::is_retryable)
            .notify(|e, delay| {
                tracing::warn!(provider = self.provider.name(), error = %e, ?delay, "retrying completion")
            })
            .await?;

        self.usage.record(&response.usage, &response.model);

        let calls = response
            .tool_uses()
            .into_iter()
            .map(|u| ToolCall {
                id: u.id.to_string(),
                name: u.name.to_string(),
                input: u.input.clone(),
            })
            .collect();
        Ok(ContentTurn {
            text: response.text(),
            calls,
            content: response.content,
        })
    }

    /// Call a tool with timeout, retries and the server's circuit breaker.
    async fn invoke(&self, tool: &str, arguments: &Value) -> Result<ToolCallResult, McpError> {
        let server = self.server.name();
        if self.breaker.is_open(server) {
            return Err(McpError::CircuitOpen(server.to_string()));
        }

        let result = (move || async move {
            match tokio::time::timeout(
                self.call_timeout,
                self.server.call_tool(tool, arguments.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(McpError::Timeout(self.call_timeout)),
            }
        })
        .retry(self.retry.backoff())
        .when(McpError::is_retryable)
        .notify(|e, delay| tracing::warn!(server, tool, error = %e, ?delay, "retrying tool call"))
        .await;

        match &result {
            Ok(_) => self.breaker.record_success(server),
            Err(e) if e.is_connection_failure() => self.breaker.record_failure(server),
            Err(_) => {}
        }
        result
    }

    async fn converse(&self, question: &str, steps: &AtomicU32) -> SolveOutcome {
        let mut request = CompletionRequest {
            system: Some(SOLVER_SYSTEM_PROMPT.to_string()),
            messages: vec![ChatMessage::user(question_prompt(question))],
            tools: self.tools.clone(),
        };
        let mut severity = OperationClassification::ReadOnly;
        let used = || steps.load(Ordering::SeqCst);

        loop {
            let turn = match self.complete(&request).await {
                Ok(turn) => turn,
                Err(e) => {
                    return SolveOutcome::Unresolved {
                        reason: format!("model call failed: {}", e),
                        steps: used(),
                    }
                }
            };

            if turn.calls.is_empty() {
                return match extract_response(&turn.text) {
                    Some(candidate) => SolveOutcome::Answered {
                        candidate,
                        classification: severity,
                        steps: used(),
                    },
                    None => SolveOutcome::Unresolved {
                        reason: "final message has no <response> answer".to_string(),
                        steps: used(),
                    },
                };
            }

            // Classify the whole turn before invoking anything
            let mut classified = Vec::with_capacity(turn.calls.len());
            for call in &turn.calls {
                let classification = self.classification_of(&call.name);
                if classification.is_unsafe() {
                    tracing::warn!(
                        tool = %call.name,
                        classification = classification.as_str(),
                        "refusing unsafe tool call"
                    );
                    return SolveOutcome::Unsafe {
                        classification,
                        tool: call.name.clone(),
                        steps: used(),
                    };
                }
                if classification == OperationClassification::Unknown
                    && self.unknown_tools == UnknownToolPolicy::Deny
                {
                    return SolveOutcome::Unresolved {
                        reason: format!(
                            "tool '{}' has unknown classification and unknown tools are denied",
                            call.name
                        ),
                        steps: used(),
                    };
                }
                classified.push(classification);
            }

            let mut results = Vec::with_capacity(turn.calls.len());
            for (call, classification) in turn.calls.iter().zip(classified) {
                if used() >= self.max_steps {
                    return SolveOutcome::Unresolved {
                        reason: format!("tool-call budget of {} exhausted", self.max_steps),
                        steps: used(),
                    };
                }
                steps.fetch_add(1, Ordering::SeqCst);
                severity = severity.max(classification);

                tracing::debug!(tool = %call.name, step = used(), "invoking tool");
                let (content, is_error) = match self.invoke(&call.name, &call.input).await {
                    Ok(result) => (result.text, result.is_error),
                    // The model may correct bad arguments on its next turn
                    Err(McpError::Rpc { code, message }) => {
                        (format!("error {}: {}", code, message), true)
                    }
                    Err(e) => {
                        return SolveOutcome::Unresolved {
                            reason: format!("tool '{}' failed: {}", call.name, e),
                            steps: used(),
                        }
                    }
                };
                results.push(ContentBlock::ToolResult {
                    tool_use_id: call.id.clone(),
                    content,
                    is_error,
                });
            }

            request.messages.push(ChatMessage::assistant(turn.content));
            request.messages.push(ChatMessage::tool_results(results));
        }
    }
}

struct ToolCall {
    id: String,
    name: String,
    input: Value,
}

struct ContentTurn {
    text: String,
    calls: Vec<ToolCall>,
    content: Vec<ContentBlock>,
}

#[async_trait]
impl Solver for AgentSolver {
    async fn solve(&self, question: &str) -> SolveOutcome {
        let steps = AtomicU32::new(0);
        match tokio::time::timeout(self.question_timeout, self.converse(question, &steps)).await {
            Ok(outcome) => outcome,
            Err(_) => SolveOutcome::Unresolved {
                reason: format!(
                    "question deadline of {} exceeded",
                    humantime::format_duration(self.question_timeout)
                ),
                steps: steps.load(Ordering::SeqCst),
            },
        }
    }
}
