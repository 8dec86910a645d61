mod demo;

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use strand_agent::{
    AgentRunner, CheckpointStore, EventBusHandler, ExecutionResult, FeaturePipeline,
    TracingHandler,
};
use strand_core::config::{AppConfig, ModelConfig};
use strand_core::event::EventBus;
use strand_core::types::AgentEvent;
use strand_tools::ToolRegistry;

#[derive(Parser)]
#[command(name = "strand", version, about = "Graph-based agent runtime")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "strand.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demo strategy on a prompt
    Run {
        /// The prompt to send to the agent
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Resume the latest checkpointed run
    Resume,
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        default_config()
    };

    let filter = config.log.clone().unwrap_or_default().filter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    if !cli.config.exists() {
        info!(path = %cli.config.display(), "No config file found, using defaults");
    }

    let store = match &config.checkpoint {
        Some(cp) if cp.enabled => Some(Arc::new(CheckpointStore::open(&cp.resolved_path())?)),
        _ => None,
    };

    let event_bus = Arc::new(EventBus::default());
    let pipeline = FeaturePipeline::new()
        .with_handler(TracingHandler)
        .with_handler(EventBusHandler::new(event_bus.clone()));

    let runner = AgentRunner::builder(demo::strategy(store.clone())?, Arc::new(demo::RuleExecutor))
        .registry(Arc::new(ToolRegistry::with_builtins()))
        .config(config.agent.clone())
        .model(config.model.clone())
        .pipeline(pipeline)
        .build();

    let cancel = runner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let printer = tokio::spawn(print_events(event_bus.subscribe()));

    let outcome = match cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Some(Commands::Resume) => {
            let Some(store) = &store else {
                anyhow::bail!("checkpointing is disabled; add a [checkpoint] section to the config");
            };
            let Some(checkpoint) = store.load_latest(demo::STRATEGY_NAME)? else {
                anyhow::bail!("no checkpoint saved for strategy '{}'", demo::STRATEGY_NAME);
            };
            info!(run_id = %checkpoint.run_id, node_id = %checkpoint.node_id, "Resuming");
            runner.resume::<String>(&checkpoint).await
        }
        Some(Commands::Run { prompt }) => runner.run(read_prompt(prompt)).await,
        None => runner.run(read_prompt(Vec::new())).await,
    };

    printer.abort();
    match outcome {
        Ok(ExecutionResult::Success(answer)) => println!("{}", answer),
        Ok(ExecutionResult::Interrupted(reason)) => eprintln!("[interrupted: {}]", reason),
        Err(e) => {
            error!(error = %e, "Agent run failed");
            return Err(e.into());
        }
    }
    Ok(())
}

/// Prompt from the arguments, or from stdin when none were given.
fn read_prompt(words: Vec<String>) -> String {
    let text = words.join(" ");
    if !text.is_empty() {
        return text;
    }
    io::stdin()
        .lock()
        .lines()
        .map_while(|l| l.ok())
        .collect::<Vec<_>>()
        .join("\n")
}

async fn print_events(mut rx: tokio::sync::broadcast::Receiver<AgentEvent>) {
    while let Ok(event) = rx.recv().await {
        match event {
            AgentEvent::ToolStart { call, .. } => eprintln!("[tool: {}]", call.tool),
            AgentEvent::ToolEnd { result, .. } => {
                let status = if result.succeeded() { "ok" } else { "ERROR" };
                eprintln!("[{}: {}] {}", result.tool, status, truncate(&result.content, 200));
            }
            AgentEvent::RunError { error, .. } => eprintln!("[error: {}]", error),
            _ => {}
        }
    }
}

fn default_config() -> AppConfig {
    AppConfig {
        agent: Default::default(),
        model: ModelConfig::new("rules"),
        checkpoint: None,
        log: None,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
