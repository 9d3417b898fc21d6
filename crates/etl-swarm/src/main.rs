use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use coordination::events::EventFilter;
use coordination::{EventBus, PipelineState, RoundController, TerminalReason};
use etl_swarm::config::SwarmConfig;
use etl_swarm::prompts::PROMPT_VERSION;
use etl_swarm::providers::build_bindings;
use etl_swarm::retrieval::KeywordRetriever;
use etl_swarm::telemetry::{spawn_event_log, write_run_result};
use tracing::info;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config (defaults come from SWARM_* environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate and refine a pipeline for one task
    Run {
        /// Natural-language task description
        #[arg(long)]
        task: String,

        /// Initial input artifact consumed by the first producing step
        #[arg(long)]
        input: Option<String>,

        /// Format of --input (csv, parquet, json, ...)
        #[arg(long, requires = "input")]
        input_format: Option<String>,

        /// Round limit (overrides policy.max_rounds)
        #[arg(long)]
        max_rounds: Option<u32>,

        /// Run result path (overrides output.run_result)
        #[arg(long)]
        output: Option<PathBuf>,

        /// JSONL event log path (overrides output.events)
        #[arg(long)]
        events: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = SwarmConfig::load(args.config.as_deref())?;

    match args.command {
        Command::ShowConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Command::Run {
            task,
            input,
            input_format,
            max_rounds,
            output,
            events,
        } => {
            if let Some(max_rounds) = max_rounds {
                config.policy.max_rounds = max_rounds;
            }
            if let Some(output) = output {
                config.output.run_result = output;
            }
            if events.is_some() {
                config.output.events = events;
            }
            config.validate()?;
            run(config, task, input, input_format).await
        }
    }
}

async fn run(config: SwarmConfig, task: String, input: Option<String>, input_format: Option<String>) -> Result<()> {
    info!(
        endpoint = %config.endpoint.url,
        model = %config.endpoint.model,
        voters = config.voters.len(),
        max_rounds = config.policy.max_rounds,
        prompt_version = PROMPT_VERSION,
        "ETL swarm starting"
    );

    let mut state = PipelineState::new(task);
    if let Some(path) = input {
        state = state.with_artifact(path, input_format.unwrap_or_else(|| "unknown".into()));
    }

    let (bindings, panel) = build_bindings(&config)?;
    let bus = EventBus::new().shared();
    let event_log = config
        .output
        .events
        .clone()
        .map(|path| spawn_event_log(&bus, path, EventFilter::new().run(&state.run_id)));

    let mut controller = RoundController::new(config.policy.clone(), bindings, panel)?.with_event_bus(bus.clone());
    if !config.retrieval.documents.is_empty() {
        controller = controller.with_retriever(Arc::new(KeywordRetriever::load(&config.retrieval.documents[..])?));
    }

    let report = controller.run(state).await;
    drop(controller);
    drop(bus);
    if let Some(handle) = event_log {
        let written = handle.await?;
        info!(events = written, "event log closed");
    }

    write_run_result(&report.result, &config.output.run_result)?;
    println!("{}", report.result.summary_line());
    println!("{}", report.session.status_line());

    if let TerminalReason::Aborted { code, message } = &report.result.terminal_reason {
        bail!("run aborted ({code}): {message}");
    }
    Ok(())
}
