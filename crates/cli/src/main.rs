//! Lumen CLI
//!
//! Manage knowledge bases and ask questions answered from them.

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::{CacheCommand, KbCommand};
use lumen_core::config::AppConfig;
use lumen_core::logging::{self, LogFormat};
use std::path::PathBuf;

/// Lumen - retrieval-augmented answers from local knowledge bases
#[derive(Parser, Debug)]
#[command(name = "lumen")]
#[command(about = "Retrieval-augmented answers from local knowledge bases", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to workspace directory (default: current directory)
    #[arg(short, long, global = true, env = "LUMEN_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Path to config file
    #[arg(short, long, global = true, env = "LUMEN_CONFIG")]
    config: Option<PathBuf>,

    /// Log level or filter directive (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Generation provider
    #[arg(short, long, global = true, env = "LUMEN_PROVIDER")]
    provider: Option<String>,

    /// Generation model
    #[arg(short, long, global = true, env = "LUMEN_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Knowledge base management and querying
    Kb(KbCommand),

    /// Response and session cache maintenance
    Cache(CacheCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load()
        .context("failed to load configuration")?
        .with_overrides(
            cli.workspace,
            cli.config,
            cli.provider,
            cli.model,
            cli.log_level,
            cli.verbose,
            cli.no_color,
        );

    logging::init_logging(
        config.log_level.as_deref(),
        config.no_color,
        LogFormat::parse(&config.log_format),
    )?;
    config.validate()?;

    tracing::debug!(
        workspace = ?config.workspace,
        provider = %config.provider,
        model = %config.model,
        "Lumen CLI starting"
    );

    config
        .ensure_lumen_dir()
        .context("failed to prepare the data directory")?;

    let command_name = match &cli.command {
        Commands::Kb(cmd) => cmd.name(),
        Commands::Cache(_) => "cache",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    let result = match cli.command {
        Commands::Kb(cmd) => cmd.execute(&config).await,
        Commands::Cache(cmd) => cmd.execute(&config).await,
    };

    match &result {
        Ok(_) => tracing::debug!("Command completed"),
        Err(e) => tracing::error!(error = %e, "Command failed"),
    }

    Ok(result?)
}
