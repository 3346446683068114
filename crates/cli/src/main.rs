//! newsgate CLI entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: load `newsgate.toml` (and `.env`) and validate it.
//! 2. **Wire observability**: install `tracing-subscriber` with a JSON or
//!    pretty layer and, when configured, an OpenTelemetry OTLP exporter.
//! 3. **Construct infrastructure**: the inference provider, file sources,
//!    Parquet store and cost report store, injected into
//!    [`nodes::PipelineOrchestrator`].
//! 4. **Dispatch**: `run` executes one pipeline run; `gate` and `process`
//!    replay part of a stored run; `inspect` reads back stored partitions and
//!    cost reports.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use pipeline::Stage;

mod config;
mod inspect;
mod replay;
mod run;
mod telemetry;

use config::DEFAULT_CONFIG_PATH;

/// Admission and analysis pipeline for Spanish-language financial news.
#[derive(Parser, Debug)]
#[command(name = "newsgate", version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline once over the configured sources
    Run(RunArgs),

    /// Re-evaluate the gates over a stored run's raw news
    Gate(ReplayArgs),

    /// Re-run the chains over a stored run's admitted candidates
    Process(ReplayArgs),

    /// Read back stored partitions or cost reports
    #[command(subcommand)]
    Inspect(InspectCommand),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Partition date (defaults to today, UTC)
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Run identifier; re-using one replaces that run's partitions
    #[arg(long)]
    run_id: Option<String>,

    /// Override `[pipeline.run] max_articles`
    #[arg(long)]
    max_articles: Option<usize>,

    /// Use the deterministic zero-cost mock provider
    #[arg(long)]
    mock_llm: bool,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Partition date of the stored run
    #[arg(long)]
    date: NaiveDate,

    /// Run identifier of the stored run
    #[arg(long)]
    run_id: String,

    /// Use the deterministic zero-cost mock provider
    #[arg(long)]
    mock_llm: bool,
}

#[derive(Subcommand, Debug)]
enum InspectCommand {
    /// Record counts of a stage partition, per run
    Partition {
        /// Stage path, e.g. `processed/news`
        #[arg(long, value_parser = parse_stage)]
        stage: Stage,

        #[arg(long)]
        date: NaiveDate,
    },

    /// Stored cost reports of a date
    Costs {
        #[arg(long)]
        date: NaiveDate,
    },
}

fn parse_stage(value: &str) -> Result<Stage, String> {
    Stage::parse(value).ok_or_else(|| {
        let known: Vec<&str> = Stage::ALL.iter().map(|s| s.as_str()).collect();
        format!("unknown stage {value:?}; expected one of {}", known.join(", "))
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = config::AppConfig::load(&cli.config)?;

    match cli.command {
        Command::Run(args) => run::execute(config, args).await,
        Command::Gate(args) => replay::gate(config, args).await,
        Command::Process(args) => replay::process(config, args).await,
        Command::Inspect(command) => inspect::execute(&config, command).await,
    }
}
