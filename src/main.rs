//! Composer pipeline engine - command line entry point
//!
//! Runs a single chat turn through a pipeline, checks backend reachability,
//! or prints the effective configuration.

use clap::{Parser, Subcommand};
use composer_engine::backend::{BackendConfig, ComposerBackend};
use composer_engine::config::ComposerConfig;
use composer_engine::observability::init_default_logging;
use composer_engine::pipeline::{PipelineId, PipelineOrchestrator};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

/// Composer pipeline engine
#[derive(Parser)]
#[command(name = "composer-engine")]
#[command(about = "Run chat turns through composer pipelines")]
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
    /// Run one chat turn and print the saved reply
    Send {
        /// Pipeline to run
        #[arg(short, long)]
        pipeline: PipelineId,
        /// User message for the turn
        #[arg(short, long)]
        message: String,
    },
    /// Check that the backend is reachable
    Ping,
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

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Send { pipeline, message } => send(config, pipeline, &message).await,
        Commands::Ping => ping(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<ComposerConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ComposerConfig::load_from_file(path)?);
    }

    for path_str in ["composer.toml", "config/composer.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ComposerConfig::load_from_file(&path)?);
        }
    }

    info!("No configuration file found, using environment");
    Ok(ComposerConfig::from_env()?)
}

fn build_backend(config: &ComposerConfig) -> Result<Arc<ComposerBackend>, Box<dyn std::error::Error>> {
    let backend_config = BackendConfig::from_config(config)?;
    Ok(Arc::new(ComposerBackend::new(backend_config)?))
}

async fn send(
    config: ComposerConfig,
    pipeline_id: PipelineId,
    message: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let backend = build_backend(&config)?;
    let orchestrator = PipelineOrchestrator::from_config(&config, backend.clone(), backend);

    let outcome = orchestrator.chat_send(pipeline_id, message).await?;
    if let Some(kind) = outcome.failure {
        info!(turn_id = %outcome.turn_id, kind = %kind, "Pipeline failed; failure saved as reply");
    }
    println!("{}", outcome.api_message);
    Ok(())
}

async fn ping(config: ComposerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let backend = build_backend(&config)?;
    backend.ping().await?;
    println!("Backend at {} is reachable", config.backend.base_url);
    Ok(())
}

fn handle_config_command(
    config: ComposerConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
