//! netsentinel command-line entry point.

mod pipeline;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ns_core::config::AppConfig;
use ns_core::repo::Page;
use ns_core::stats::StatsService;
use ns_detect::{PacketSource, ReplaySource, SyntheticSource};
use ns_observability::{init_logging_with_config, register_pipeline_metrics, LoggingConfig};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "netsentinel", about = "Autonomous network-defense pipeline", version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON (production profile).
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline against synthetic traffic.
    Run {
        /// Number of synthetic packets to generate.
        #[arg(long, default_value_t = 100_000)]
        packets: u64,
        /// RNG seed for the generator.
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Run the pipeline against a JSONL capture replay.
    Replay {
        /// Capture file, one packet per line.
        file: PathBuf,
    },
    /// Revert a previously executed action by id.
    Revert {
        action_id: Uuid,
    },
    /// Print the stats snapshot.
    Stats {
        /// Also list the most recent action records.
        #[arg(long, default_value_t = 0)]
        actions: u32,
    },
    /// Validate the configuration and exit.
    ValidateConfig,
}

fn load_config(path: &Option<PathBuf>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load(path).map_err(Into::into),
        None => Ok(AppConfig::from_env()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let logging = if cli.json_logs {
        LoggingConfig::production()
    } else {
        LoggingConfig::default()
    };
    init_logging_with_config(logging);
    register_pipeline_metrics();

    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Run { packets, seed } => {
            let source: Box<dyn PacketSource> = Box::new(
                SyntheticSource::new(packets, seed)
                    .with_pacing(std::time::Duration::from_millis(1)),
            );
            pipeline::run(config, source).await
        }
        Command::Replay { file } => {
            let source: Box<dyn PacketSource> = Box::new(
                ReplaySource::open(&file)
                    .with_context(|| format!("opening capture {}", file.display()))?,
            );
            pipeline::run(config, source).await
        }
        Command::Revert { action_id } => revert(config, action_id).await,
        Command::Stats { actions } => stats(config, actions).await,
        Command::ValidateConfig => {
            let registry = pipeline::build_registry(&config);
            pipeline::validate(&config, &registry)?;
            println!("configuration ok");
            Ok(())
        }
    }
}

async fn revert(config: AppConfig, action_id: Uuid) -> Result<()> {
    use ns_observability::AuditLog;
    use ns_response::ResponseEngine;

    let registry = pipeline::build_registry(&config);
    pipeline::validate(&config, &registry)?;

    let bus = pipeline::build_bus(&config).await?;
    let repo = pipeline::build_repo(&config).await?;
    let engine = ResponseEngine::new(
        bus,
        repo,
        registry,
        &config.response,
        config.investigation.verdict_thresholds,
        Arc::new(AuditLog::new(100)),
    )?;

    let record = engine
        .revert(action_id)
        .await
        .with_context(|| format!("reverting action {action_id}"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn stats(config: AppConfig, actions: u32) -> Result<()> {
    let repo = pipeline::build_repo(&config).await?;
    let service = StatsService::new(repo);

    let snapshot = service.snapshot().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    if actions > 0 {
        let page = service.actions(Page::new(actions, 0)).await?;
        println!("{}", serde_json::to_string_pretty(&page)?);
    }
    Ok(())
}
