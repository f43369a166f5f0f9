//! Nexon Server - model serving over REST and RPC
//!
//! This binary hosts the shared inference core behind the REST and RPC
//! front ends, plus the model registry and health endpoints.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nexon_server::{
    config::ServerConfig,
    server::{run_server, NexonServer},
};

/// Command line arguments
#[derive(Parser)]
#[command(
    name = "nexon-server",
    about = "Model inference server with a shared session cache",
    long_about = "Serves deployed models over a REST API and a protobuf RPC endpoint. Both front ends share one inference orchestrator and one bounded, load-deduplicating model session cache."
)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Server bind address, overrides the configuration
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Serve,
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "nexon-server.toml")]
        output: PathBuf,
        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        config: PathBuf,
    },
    /// Show server information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    match args.command {
        Some(Commands::Config { ref output, force }) => generate_config(output, force),
        Some(Commands::Validate { ref config }) => validate_config(config),
        Some(Commands::Info) => {
            show_info();
            Ok(())
        }
        Some(Commands::Serve) | None => start_server(&args).await,
    }
}

/// Initialize logging based on command line arguments
fn init_logging(args: &Args) -> anyhow::Result<()> {
    let log_level: Level = args
        .log_level
        .parse()
        .with_context(|| format!("Invalid log level: {}", args.log_level))?;

    let env_filter = EnvFilter::from_default_env()
        .add_directive(format!("nexon_server={}", log_level).parse()?)
        .add_directive(format!("nexon_core={}", log_level).parse()?)
        .add_directive("tower_http=debug".parse()?);

    if args.json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().pretty())
            .with(env_filter)
            .init();
    }

    Ok(())
}

/// Start the server
async fn start_server(args: &Args) -> anyhow::Result<()> {
    info!("Starting Nexon Server v{}", nexon_server::VERSION);

    match &args.config {
        Some(path) => info!("Loading configuration from: {:?}", path),
        None => info!("Using default configuration with environment overrides"),
    }
    let mut config = ServerConfig::load(args.config.as_deref()).context("Failed to load config")?;

    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    info!("Server configuration:");
    info!("  Bind address: {}", config.bind);
    info!("  Cache capacity: {}", config.cache.capacity);
    info!("  Cache TTL: {}s", config.cache.ttl_secs);
    info!("  Verify deployment: {}", config.orchestrator.verify_deployment);
    info!("  Seed directory: {:?}", config.store.seed_dir);

    let server = NexonServer::new(config)?;
    run_server(server).await?;
    Ok(())
}

/// Generate a default configuration file
fn generate_config(output: &Path, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        error!("Configuration file already exists: {:?}", output);
        error!("Use --force to overwrite");
        bail!("Configuration file already exists");
    }

    ServerConfig::default()
        .to_file(output)
        .map_err(|e| anyhow::anyhow!("Failed to write config: {}", e))?;

    info!("Generated default configuration file: {:?}", output);
    Ok(())
}

/// Validate a configuration file
fn validate_config(config_path: &Path) -> anyhow::Result<()> {
    info!("Validating configuration file: {:?}", config_path);

    match ServerConfig::from_file(config_path) {
        Ok(config) => {
            info!("Configuration is valid");
            info!("  Bind address: {}", config.bind);
            info!("  Cache capacity: {}", config.cache.capacity);
            info!("  Request timeout: {}s", config.limits.request_timeout);
            Ok(())
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            Err(anyhow::anyhow!("Invalid configuration: {}", e))
        }
    }
}

/// Show server information
fn show_info() {
    println!("Nexon Server v{}", nexon_server::VERSION);
    println!("Model inference server with a shared session cache");
    println!();
    println!("Endpoints:");
    println!("  POST /inference/infer/{{model}}     REST inference (JSON)");
    println!("  POST /rpc/predict                  RPC inference (protobuf)");
    println!("  POST /upload/{{name}}               Upload a model version");
    println!("  POST /deployment/deploy            Deploy an uploaded version");
    println!("  POST /deployment/deploy-file/{{name}} Upload and deploy");
    println!("  PUT  /deployment/undeploy/{{name}}  Undeploy a version");
    println!("  GET  /models, /cache/stats, /health/ready");
    println!();
    println!("Environment:");
    println!("  MODEL_CACHE_MAX, MODEL_CACHE_TTL, MODEL_CACHE_SWEEP_SECS");
    println!("  NEXON_<SECTION>__<KEY> overrides any configuration value");
    println!();
    println!("Usage:");
    println!("  nexon-server                        # Start with default config");
    println!("  nexon-server -c config.toml         # Start with custom config");
    println!("  nexon-server config                 # Generate default config");
    println!("  nexon-server validate config.toml   # Validate config file");
}
