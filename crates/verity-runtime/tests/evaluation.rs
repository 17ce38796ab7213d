//! End-to-end evaluation runs against an in-process tool server.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use verity_core::{
    render_document, ConstraintChecker, DocumentFormat, EvaluationDocument, ExitStatus, RuleSet,
};
use verity_runtime::mcp::{ToolAnnotations, ToolCallResult, ToolDescriptor};
use verity_runtime::providers::{
    CompletionConfig, CompletionRequest, CompletionResponse, ContentBlock, TokenUsage,
};
use verity_runtime::{
    AgentSolver, CancelSignal, CircuitBreaker, LlmProvider, McpError, Orchestrator, ProviderError,
    RetryConfig, RunContext, RuntimeConfig, ToolServer, UsageMeter,
};

/// Plays a fixed conversation per question, chosen by a substring of the
/// question. The turn is the number of assistant messages already sent.
struct RoutedProvider {
    routes: Vec<(&'static str, Vec<Vec<ContentBlock>>)>,
}

#[async_trait]
impl LlmProvider for RoutedProvider {
    async fn complete(
        &self,
        request: &CompletionRequest,
        _config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let prompt = match request.messages.first().and_then(|m| m.content.first()) {
            Some(ContentBlock::Text { text }) => text.clone(),
            _ => return Err(ProviderError::ParseError("no question".to_string())),
        };
        let turn = request
            .messages
            .iter()
            .filter(|m| matches!(m.role, verity_runtime::providers::Role::Assistant))
            .count();

        let script = self
            .routes
            .iter()
            .find(|(key, _)| prompt.contains(key))
            .map(|(_, turns)| turns)
            .ok_or_else(|| ProviderError::ParseError(format!("unscripted: {}", prompt)))?;
        let content = script
            .get(turn)
            .or_else(|| script.last())
            .cloned()
            .unwrap_or_default();

        Ok(CompletionResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
                ..Default::default()
            },
            model: "scripted".to_string(),
            stop_reason: None,
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "routed"
    }
}

struct RepoServer {
    calls: Mutex<Vec<String>>,
}

impl RepoServer {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ToolServer for RepoServer {
    fn name(&self) -> &str {
        "repos"
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let tool = |name: &str, annotations: Option<ToolAnnotations>| ToolDescriptor {
            name: name.to_string(),
            description: Some(format!("{} tool", name)),
            input_schema: json!({"type": "object"}),
            annotations,
        };
        Ok(vec![
            tool(
                "search_archived_repos",
                Some(ToolAnnotations {
                    read_only_hint: Some(true),
                    destructive_hint: None,
                }),
            ),
            tool("get_repo", None),
            tool("delete_repo", None),
        ])
    }

    async fn call_tool(&self, name: &str, _arguments: Value) -> Result<ToolCallResult, McpError> {
        self.calls.lock().push(name.to_string());
        Ok(ToolCallResult {
            text: json!({"name": "new-repo", "forks": 310}).to_string(),
            is_error: false,
        })
    }
}

fn say(text: &str) -> Vec<ContentBlock> {
    vec![ContentBlock::Text {
        text: text.to_string(),
    }]
}

fn call(name: &str) -> Vec<ContentBlock> {
    vec![ContentBlock::ToolUse {
        id: format!("toolu_{}", name),
        name: name.to_string(),
        input: json!({}),
    }]
}

const DOCUMENT: &str = r#"<evaluation version="1">
  <qa_pair>
    <question>What repo was archived in Q3 2023 with most forks?</question>
    <answer>old-repo</answer>
  </qa_pair>
  <qa_pair>
    <question>How many open issues exist right now?</question>
    <answer>12</answer>
  </qa_pair>
  <qa_pair>
    <question>Which repository disappears after the cleanup job deletes stale forks in 2022?</question>
    <answer>stale-fork</answer>
  </qa_pair>
  <qa_pair>
    <question>Which repo had the longest-lived branch in 2021?</question>
    <answer>legacy-api</answer>
  </qa_pair>
</evaluation>
"#;

fn provider() -> RoutedProvider {
    RoutedProvider {
        routes: vec![
            (
                "archived in Q3 2023",
                vec![
                    call("search_archived_repos"),
                    say("The most forked one is <response>new-repo</response>"),
                ],
            ),
            ("cleanup job", vec![call("delete_repo")]),
            ("longest-lived branch", vec![call("get_repo")]),
        ],
    }
}

fn config() -> RuntimeConfig {
    RuntimeConfig {
        concurrency: 2,
        max_steps: 3,
        retry: RetryConfig {
            max_attempts: 2,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
        ..Default::default()
    }
}

async fn orchestrator(config: &RuntimeConfig, server: Arc<RepoServer>) -> Orchestrator {
    let usage = Arc::new(UsageMeter::new(config.max_run_tokens));
    let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
    let solver = AgentSolver::connect(
        Arc::new(provider()),
        server,
        config,
        breaker,
        usage.clone(),
    )
    .await
    .unwrap();
    Orchestrator::new(Arc::new(solver), usage)
}

#[tokio::test]
async fn test_full_run_reconciles_every_category() {
    let config = config();
    let server = Arc::new(RepoServer::new());
    let orchestrator = orchestrator(&config, server.clone()).await;
    let document = EvaluationDocument::parse(DOCUMENT, DocumentFormat::Xml).unwrap();
    let checker = ConstraintChecker::new(&RuleSet::default()).unwrap();
    let ctx = RunContext::new(config.clone(), CancelSignal::new());

    let run = orchestrator.evaluate(&ctx, &document, &checker).await.unwrap();
    let summary = &run.summary;

    assert_eq!(summary.total, 4);
    assert_eq!(summary.count("corrected"), 1);
    assert_eq!(summary.count("rejected_unstable"), 1);
    assert_eq!(summary.count("dropped_unsafe"), 1);
    assert_eq!(summary.count("unresolved"), 1);
    assert!(summary.usage.total() > 0);
    let cost: f64 = summary.metadata["estimated_cost_usd"].parse().unwrap();
    assert!(cost > 0.0);

    // Destructive tool was never invoked
    assert!(!server.calls.lock().iter().any(|c| c == "delete_repo"));

    // Corrected pair carries the solved answer; rejected and unsafe pairs are gone
    let output = &run.reconciliation.document;
    let answers: Vec<&str> = output.pairs.iter().map(|p| p.answer.as_str()).collect();
    assert_eq!(answers, vec!["new-repo", "legacy-api"]);

    // Unresolved over the default threshold of zero
    assert_eq!(ExitStatus::for_summary(summary, config.unresolved_threshold).code(), 3);
    assert_eq!(ExitStatus::for_summary(summary, 1).code(), 1);
}

#[tokio::test]
async fn test_budget_exhaustion_is_unresolved() {
    let config = config();
    let server = Arc::new(RepoServer::new());
    let orchestrator = orchestrator(&config, server.clone()).await;
    let document = EvaluationDocument::parse(
        r#"<evaluation version="1">
  <qa_pair>
    <question>Which repo had the longest-lived branch in 2021?</question>
    <answer>legacy-api</answer>
  </qa_pair>
</evaluation>"#,
        DocumentFormat::Xml,
    )
    .unwrap();
    let checker = ConstraintChecker::new(&RuleSet::default()).unwrap();
    let ctx = RunContext::new(config.clone(), CancelSignal::new());

    let run = orchestrator.evaluate(&ctx, &document, &checker).await.unwrap();

    assert_eq!(run.summary.count("unresolved"), 1);
    assert_eq!(server.calls.lock().len(), config.max_steps as usize);
    let reason = run.summary.entries[0].status.describe().unwrap_or_default();
    assert!(reason.contains("budget"), "reason: {}", reason);
}

#[tokio::test]
async fn test_rerun_on_output_is_stable() {
    let config = config();
    let document = EvaluationDocument::parse(DOCUMENT, DocumentFormat::Xml).unwrap();
    let checker = ConstraintChecker::new(&RuleSet::default()).unwrap();

    let first = orchestrator(&config, Arc::new(RepoServer::new()))
        .await
        .evaluate(&RunContext::new(config.clone(), CancelSignal::new()), &document, &checker)
        .await
        .unwrap();
    let rendered = render_document(&first.reconciliation.document).unwrap();

    let reparsed = EvaluationDocument::parse(&rendered, DocumentFormat::Xml).unwrap();
    let second = orchestrator(&config, Arc::new(RepoServer::new()))
        .await
        .evaluate(&RunContext::new(config.clone(), CancelSignal::new()), &reparsed, &checker)
        .await
        .unwrap();

    assert_eq!(second.summary.count("confirmed"), 1);
    assert_eq!(second.summary.count("corrected"), 0);
    assert_eq!(render_document(&second.reconciliation.document).unwrap(), rendered);
}

#[tokio::test]
async fn test_cancelled_run_reports_pending_as_unresolved() {
    let config = config();
    let orchestrator = orchestrator(&config, Arc::new(RepoServer::new())).await;
    let document = EvaluationDocument::parse(DOCUMENT, DocumentFormat::Xml).unwrap();
    let checker = ConstraintChecker::new(&RuleSet::default()).unwrap();

    let cancel = CancelSignal::new();
    cancel.cancel();
    let ctx = RunContext::new(config, cancel);

    let run = orchestrator.evaluate(&ctx, &document, &checker).await.unwrap();

    assert!(run.cancelled);
    assert!(run.summary.cancelled);
    assert_eq!(run.summary.count("rejected_unstable"), 1);
    assert_eq!(run.summary.count("unresolved"), 3);
}
