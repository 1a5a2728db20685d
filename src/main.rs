//! fieldlink - main entry point
//!
//! Starts the dispatch agent against the configured broker and runs until a
//! termination signal arrives, then shuts down gracefully.

use clap::{Parser, Subcommand};
use fieldlink::actuator::SimulatedActuator;
use fieldlink::agent::DispatchAgent;
use fieldlink::config::AgentConfig;
use fieldlink::logging::init_default_logging;
use fieldlink::probe::TcpProbe;
use fieldlink::producer::SimulatedSampler;
use fieldlink::session::MqttSession;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Resilient device-to-cloud telemetry dispatch agent
#[derive(Parser)]
#[command(name = "fieldlink")]
#[command(about = "Device-to-cloud telemetry dispatch agent")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting fieldlink v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_agent(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {e}");
        process::exit(1);
    }

    info!("Exiting.");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(AgentConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = vec!["fieldlink.toml", "config/fieldlink.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(AgentConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create fieldlink.toml".into())
        }
    }
}

async fn run_agent(config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Device ID: {}", config.device.id);

    let session = MqttSession::new(
        &config.device.id,
        config.cloud.clone(),
        config.connect_timeout(),
    )?;
    let probe = Arc::new(TcpProbe::from_config(&config.network));

    let mut agent = DispatchAgent::new(
        config,
        session,
        probe,
        Arc::new(SimulatedActuator),
        Arc::new(SimulatedSampler),
    );

    // Startup failures are fatal: better a visible exit than a silent hang
    agent.start().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Agent is running; waiting for commands and producing telemetry...");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    agent.shutdown().await;
    Ok(())
}

fn handle_config_command(
    config: AgentConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
