//! Tollgate CLI — evaluates policy hooks for AI agent events.
//!
//! `tollgate check` speaks the same protocol as a command hook: it reads an
//! event on stdin, prints a decision record on stdout, and exits 2 on deny.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tollgate_api::AnthropicProvider;
use tollgate_config::{CliOverrides, TollgateConfig};
use tollgate_hooks::{
    CircuitBreaker, CommandExecutor, HookDispatcher, HookEvent, HookInput, HookRegistry,
    HookRunner, HookVerdict, PromptExecutor,
};

/// Exit code for a denied action, matching the command hook protocol.
const DENY_EXIT_CODE: u8 = 2;

#[derive(Parser)]
#[command(name = "tollgate", version, about = "Policy hooks for AI agent tool calls")]
struct Cli {
    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Settings file to use instead of ~/.tollgate/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project root holding .tollgate/config.toml (default: current directory)
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    /// Default model for prompt hooks
    #[arg(long, global = true)]
    model: Option<String>,

    /// API key (overrides ANTHROPIC_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Turn hooks off; every event is allowed
    #[arg(long, global = true)]
    no_hooks: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read an event from stdin, run matching hooks, print the verdict
    Check {
        /// Event to assume when the input has no `hook_event_name`
        #[arg(long)]
        event: Option<HookEvent>,
    },
    /// Print the handlers that would run for an event, in order
    Match {
        #[arg(long)]
        event: HookEvent,
        /// Tool name to match against rule matchers
        #[arg(long)]
        tool: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = load_config(CliOverrides {
        config_path: cli.config,
        project_dir: cli.project_dir,
        api_key: cli.api_key,
        model: cli.model,
        hooks_enabled: cli.no_hooks.then_some(false),
    })?;

    match cli.command {
        Command::Check { event } => check(&config, event).await,
        Command::Match { event, tool } => {
            print_matches(&config, event, tool.as_deref().unwrap_or(""))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(overrides: CliOverrides) -> Result<TollgateConfig> {
    TollgateConfig::load(overrides).context("Failed to load configuration")
}

async fn check(config: &TollgateConfig, event: Option<HookEvent>) -> Result<ExitCode> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .context("Failed to read hook input from stdin")?;
    let input = parse_input(&raw, event.unwrap_or(HookEvent::PreToolUse))?;

    let runner = build_runner(config)?;
    let verdict = runner.evaluate(&input).await;
    if let HookVerdict::Allow { asked: true, .. } = verdict {
        tracing::info!("A hook asked for confirmation; allowing");
    }

    let output = serde_json::to_string(&verdict.to_decision())?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{output}")?;
    stdout.flush()?;

    Ok(if verdict.is_deny() {
        ExitCode::from(DENY_EXIT_CODE)
    } else {
        ExitCode::SUCCESS
    })
}

fn print_matches(config: &TollgateConfig, event: HookEvent, tool: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    for handler in HookRegistry::match_hooks(config.active_hooks(), event, tool) {
        writeln!(stdout, "{}", handler.identity())?;
    }
    Ok(())
}

/// Parse a hook event document. Empty input is an event with no fields.
fn parse_input(raw: &str, default_event: HookEvent) -> Result<HookInput> {
    let mut doc: Value = if raw.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        serde_json::from_str(raw).context("Hook input is not valid JSON")?
    };

    let fields = doc
        .as_object_mut()
        .context("Hook input must be a JSON object")?;
    fields
        .entry("hook_event_name")
        .or_insert_with(|| Value::String(default_event.as_str().to_string()));

    let mut input: HookInput =
        serde_json::from_value(doc).context("Hook input has an invalid shape")?;
    if input.session_id.is_none() {
        input.session_id = Some(uuid::Uuid::new_v4().to_string());
    }
    Ok(input)
}

fn build_runner(config: &TollgateConfig) -> Result<HookRunner> {
    let breaker = CircuitBreaker::shared();
    let prompt = match &config.api_key {
        Some(key) => {
            let provider = AnthropicProvider::new(key.as_str(), config.api_base_url.as_str())
                .context("Failed to create API client")?;
            Some(PromptExecutor::new(
                Arc::new(provider),
                Arc::clone(&breaker),
                config.hook_model.clone(),
            ))
        }
        None => {
            tracing::debug!("No API key configured; prompt hooks will be skipped");
            None
        }
    };

    let dispatcher = HookDispatcher::new(CommandExecutor::new(breaker), prompt);
    Ok(HookRunner::new(config.active_hooks().cloned(), dispatcher))
}
