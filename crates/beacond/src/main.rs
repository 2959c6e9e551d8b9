//! beacond - Beacon engine daemon
//!
//! Aggregates service logs into rollups, serves cached dashboard statistics
//! and sends alert notifications when error rates cross their thresholds.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use beacon_scheduler::StopOutcome;
use beacond::{Engine, EngineConfig, SAMPLE_CONFIG};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "beacond")]
#[command(about = "Beacon log aggregation and alerting engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine until interrupted
    Run {
        /// Path to config file
        #[arg(short, long, env = "BEACOND_CONFIG", default_value = "/etc/beacond/beacond.toml")]
        config: PathBuf,

        /// JSON Lines file of log entries to load before starting
        #[arg(long)]
        seed_logs: Option<PathBuf>,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "/etc/beacond/beacond.toml")]
        output: PathBuf,
    },

    /// Validate a config file and print the effective settings
    CheckConfig {
        /// Path to config file
        #[arg(short, long, default_value = "/etc/beacond/beacond.toml")]
        config: PathBuf,

        /// Print the effective configuration as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, seed_logs } => {
            let config = EngineConfig::from_file(&config)?;
            init_tracing(&config)?;
            run_engine(config, seed_logs).await?;
        }

        Commands::InitConfig { output } => {
            init_config(output)?;
        }

        Commands::CheckConfig { config, json } => {
            check_config(config, json)?;
        }
    }

    Ok(())
}

fn init_tracing(config: &EngineConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter)?,
    };

    let (json, plain) = if config.json_logs {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .init();
    Ok(())
}

async fn run_engine(config: EngineConfig, seed_logs: Option<PathBuf>) -> anyhow::Result<()> {
    info!(
        aggregation_secs = config.scheduler.aggregation_interval_secs,
        alerts = config.alerts.len(),
        "starting beacond"
    );

    let (engine, repository) = Engine::in_memory(config)?;

    if let Some(path) = seed_logs {
        let reader = BufReader::new(File::open(&path)?);
        let loaded = repository.load_jsonl(reader)?;
        info!(path = %path.display(), entries = loaded, "loaded seed logs");
    }

    engine.start()?;
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    let outcome = engine.stop().await?;
    if outcome == StopOutcome::Cancelled {
        warn!("jobs did not finish within the grace period");
    }
    Ok(())
}

fn init_config(output: PathBuf) -> anyhow::Result<()> {
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&output, SAMPLE_CONFIG)?;

    println!("Config written to: {}", output.display());
    println!("Edit [[alerts]] to configure per-service thresholds, then run:");
    println!("  beacond run --config {}", output.display());
    Ok(())
}

fn check_config(path: PathBuf, json: bool) -> anyhow::Result<()> {
    let config = EngineConfig::from_file(&path)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("Config OK: {}", path.display());
    println!();
    println!("Scheduler:");
    println!("  aggregation:   every {}s", config.scheduler.aggregation_interval_secs);
    println!("  daily rollup:  every {}s", config.scheduler.daily_interval_secs);
    println!("  health check:  every {}s", config.scheduler.health_check_interval_secs);
    println!("Cache TTL:       {}s", config.cache.ttl_secs);
    println!("Health window:   {}s", config.health.window_secs);
    println!(
        "Email:           {}",
        config.notifications.smtp.as_ref().map_or("disabled", |s| s.host.as_str())
    );
    println!();
    println!("Alerts ({}):", config.alerts.len());
    for alert in &config.alerts {
        println!(
            "  {:<20} error>{}/min warning>{}/min {}",
            alert.service,
            alert.error_threshold_per_min,
            alert.warning_threshold_per_min,
            if alert.enabled { "enabled" } else { "disabled" }
        );
    }
    Ok(())
}
