use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use verity_core::{
    check_document, render_document, write_document, ConstraintChecker, EvaluationDocument,
    ExitStatus, ReportFormat, RuleSet, Verdict,
};
use verity_runtime::mcp::{HttpTransport, StdioTransport, Transport};
use verity_runtime::{
    AgentSolver, AnthropicProvider, CancelSignal, Checkpoint, CircuitBreaker, LlmProvider,
    McpClient, Orchestrator, RunContext, RuntimeConfig, UsageMeter,
};

#[derive(Parser)]
#[command(name = "verity")]
#[command(about = "Verify MCP evaluation documents against the live tool server", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check, solve, and reconcile an evaluation document
    Evaluate(EvaluateArgs),
    /// Schema and constraint checks only (no tool server)
    Check {
        /// Path to the evaluation document (.xml, .json, .yaml)
        document: PathBuf,
        /// Constraint rule set (YAML or JSON)
        #[arg(long, env = "VERITY_RULES")]
        rules: Option<PathBuf>,
        /// Print checks as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportKind {
    Stdio,
    Http,
}

#[derive(clap::Args)]
struct EvaluateArgs {
    /// Path to the evaluation document (.xml, .json, .yaml)
    document: PathBuf,

    /// How to reach the tool server
    #[arg(long, value_enum, default_value = "stdio")]
    transport: TransportKind,

    /// Server command (stdio)
    #[arg(long)]
    command: Option<String>,
    /// Server argument (stdio, repeatable)
    #[arg(long = "arg", allow_hyphen_values = true)]
    args: Vec<String>,
    /// Server environment variable KEY=VALUE (stdio, repeatable)
    #[arg(long = "env", value_parser = parse_var)]
    env: Vec<(String, String)>,

    /// Server endpoint (http)
    #[arg(long)]
    url: Option<String>,
    /// Request header KEY:VALUE (http, repeatable)
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Runtime configuration (YAML)
    #[arg(long, env = "VERITY_CONFIG")]
    config: Option<PathBuf>,
    /// Constraint rule set (YAML or JSON)
    #[arg(long, env = "VERITY_RULES")]
    rules: Option<PathBuf>,

    /// Write the reconciled document here
    #[arg(long, conflicts_with = "in_place")]
    output: Option<PathBuf>,
    /// Overwrite the input document
    #[arg(long)]
    in_place: bool,

    /// Write the report here instead of stderr
    #[arg(long)]
    report: Option<PathBuf>,
    #[arg(long, default_value = "text", value_parser = parse_report_format)]
    report_format: ReportFormat,

    /// Questions solved concurrently
    #[arg(long)]
    concurrency: Option<usize>,
    /// Tool calls allowed per question
    #[arg(long)]
    max_steps: Option<u32>,
    /// Model used by the solver
    #[arg(long, env = "VERITY_MODEL")]
    model: Option<String>,
    /// Unresolved pairs tolerated before exit code 3
    #[arg(long)]
    unresolved_threshold: Option<usize>,

    /// Reuse outcomes from a matching checkpoint
    #[arg(long)]
    resume: bool,
}

fn parse_var(s: &str) -> std::result::Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("Invalid variable format '{}'. Expected key=value", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn parse_header(s: &str) -> std::result::Result<(String, String), String> {
    let pos = s
        .find(':')
        .ok_or_else(|| format!("Invalid header format '{}'. Expected key:value", s))?;
    let key = s[..pos].trim();
    if key.is_empty() {
        return Err(format!("Invalid header format '{}'. Empty header name", s));
    }
    Ok((key.to_string(), s[pos + 1..].trim().to_string()))
}

fn parse_report_format(s: &str) -> std::result::Result<ReportFormat, String> {
    s.parse()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "verity=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Evaluate(args) => evaluate(args).await,
        Commands::Check {
            document,
            rules,
            json,
        } => check(&document, rules.as_deref(), json),
    };

    std::process::exit(exit_code(result));
}

/// Map a command result to the process exit code. Any error is fatal.
fn exit_code(result: Result<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitStatus::Fatal.code()
        }
    }
}

fn load_rules(path: Option<&Path>) -> Result<RuleSet> {
    match path {
        Some(path) => RuleSet::from_file(path)
            .with_context(|| format!("Failed to load rules from {}", path.display())),
        None => Ok(RuleSet::default()),
    }
}

fn load_config(args: &EvaluateArgs) -> Result<RuntimeConfig> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps;
    }
    if let Some(model) = &args.model {
        config.model.model = model.clone();
    }
    if let Some(threshold) = args.unresolved_threshold {
        config.unresolved_threshold = threshold;
    }

    config.validate().context("Invalid runtime configuration")?;
    Ok(config)
}

/// Name used in logs and as the circuit breaker key.
fn server_name(args: &EvaluateArgs) -> String {
    match args.transport {
        TransportKind::Stdio => args
            .command
            .as_deref()
            .map(|c| {
                Path::new(c)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(c)
                    .to_string()
            })
            .unwrap_or_else(|| "stdio".to_string()),
        TransportKind::Http => args.url.clone().unwrap_or_else(|| "http".to_string()),
    }
}

fn build_transport(args: &EvaluateArgs) -> Result<Box<dyn Transport>> {
    match args.transport {
        TransportKind::Stdio => {
            let Some(command) = &args.command else {
                bail!("--command is required with --transport stdio");
            };
            let transport = StdioTransport::spawn(command, &args.args, &args.env)
                .with_context(|| format!("Failed to start tool server '{}'", command))?;
            Ok(Box::new(transport))
        }
        TransportKind::Http => {
            let Some(url) = &args.url else {
                bail!("--url is required with --transport http");
            };
            let transport = HttpTransport::new(url.clone(), &args.headers)
                .with_context(|| format!("Invalid tool server endpoint '{}'", url))?;
            Ok(Box::new(transport))
        }
    }
}

async fn ensure_ready(provider: &dyn LlmProvider) -> Result<()> {
    if !provider.health_check().await {
        bail!(
            "Model provider '{}' is not ready: check the configured API key",
            provider.name()
        );
    }
    Ok(())
}

async fn evaluate(args: EvaluateArgs) -> Result<i32> {
    let config = load_config(&args)?;
    let ruleset = load_rules(args.rules.as_deref())?;
    let checker = ConstraintChecker::new(&ruleset).context("Invalid rule set")?;

    let document = EvaluationDocument::from_path(&args.document)
        .with_context(|| format!("Failed to load {}", args.document.display()))?;

    let provider =
        AnthropicProvider::from_config(config.api_key.as_deref(), config.base_url.as_deref())?;
    ensure_ready(&provider).await?;

    let name = server_name(&args);
    let transport = build_transport(&args)?;
    let server = McpClient::connect(name.clone(), transport)
        .await
        .with_context(|| format!("Failed to initialize tool server '{}'", name))?;

    let usage = Arc::new(UsageMeter::new(config.max_run_tokens));
    let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));

    let solver = AgentSolver::connect(
        Arc::new(provider),
        Arc::new(server),
        &config,
        breaker,
        usage.clone(),
    )
    .await
    .with_context(|| format!("Failed to list tools on '{}'", name))?;
    tracing::info!(server = %name, tools = solver.catalog().len(), "Connected to tool server");

    let cancel = CancelSignal::new();
    cancel.listen_for_signals();

    let threshold = config.unresolved_threshold;
    let ctx = RunContext::new(config, cancel)
        .with_checkpoint(Checkpoint::default_path(&args.document), args.resume);

    let orchestrator = Orchestrator::new(Arc::new(solver), usage);
    let run = orchestrator.evaluate(&ctx, &document, &checker).await?;
    let summary = run
        .summary
        .with_document(args.document.display().to_string());

    if run.cancelled {
        tracing::warn!(
            "Run cancelled; document left untouched. Re-run with --resume to continue"
        );
    } else {
        let output = if args.in_place {
            Some(args.document.clone())
        } else {
            args.output.clone()
        };
        match output {
            Some(path) => {
                write_document(&run.reconciliation.document, &path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                tracing::info!(path = %path.display(), pairs = run.reconciliation.document.len(), "Wrote document");
            }
            None => print!("{}", render_document(&run.reconciliation.document)?),
        }
    }

    let report = summary.render(args.report_format);
    match &args.report {
        Some(path) => verity_core::atomic_write(path, report.as_bytes())
            .with_context(|| format!("Failed to write report to {}", path.display()))?,
        None => eprint!("{}", report),
    }

    if run.cancelled {
        return Ok(ExitStatus::Fatal.code());
    }
    Ok(ExitStatus::for_summary(&summary, threshold).code())
}

fn check(path: &Path, rules: Option<&Path>, json: bool) -> Result<i32> {
    let ruleset = load_rules(rules)?;
    let document = EvaluationDocument::from_path(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let checks = check_document(&document, &ruleset).context("Invalid rule set")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&checks)?);
    } else {
        for check in &checks {
            let line = match &check.verdict {
                Verdict::Accept => "ACCEPT".to_string(),
                Verdict::Warn { rule, reason } => format!("WARN    {}: {}", rule, reason),
                Verdict::Reject { rule, reason } => format!("REJECT  {}: {}", rule, reason),
            };
            println!("#{:<4} {}", check.index + 1, line);
            for warning in check.warnings.iter().skip(usize::from(check.verdict.is_warn())) {
                println!("      WARN    {}: {}", warning.rule, warning.reason);
            }
        }
        let rejected = checks.iter().filter(|c| c.verdict.is_reject()).count();
        println!(
            "\n{} pairs: {} rejected, {} to solve",
            checks.len(),
            rejected,
            checks.len() - rejected
        );
    }

    if checks.iter().any(|c| c.verdict.is_reject()) {
        Ok(1)
    } else {
        Ok(0)
    }
}
