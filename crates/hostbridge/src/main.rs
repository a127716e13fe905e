//! hostbridge - bridge between a tool-calling orchestrator and a stateful host
//!
//! Main entry point for the hostbridge CLI.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

mod commands;
mod operations;

use commands::{call, config, serve};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// hostbridge - expose a host's tools and resources to an orchestrator
#[derive(Parser)]
#[command(name = "hostbridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Config directory (default: platform config dir)
    #[arg(long, global = true, env = "HOSTBRIDGE_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the host listener with the built-in operations
    Serve(serve::ServeArgs),

    /// Call an operation on a running host
    Call(call::CallArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = hostbridge_config::load_config_with_options(None, cli.config_dir.as_deref())
        .context("failed to load configuration")?;

    // Console (human-readable, stderr) + rolling JSON file
    let filter = if cli.verbose {
        "hostbridge=debug,hostbridge_host=debug,hostbridge_client=debug,hostbridge_config=debug,info"
    } else {
        "hostbridge=info,hostbridge_host=info,hostbridge_client=warn,warn"
    };

    let logging = loaded.config.logging();
    let file_layer = if logging.json_file {
        let log_dir = logging
            .directory
            .clone()
            .or_else(|| cli.config_dir.clone().map(|d| d.join("logs")))
            .or_else(|| hostbridge_config::user_config_dir().map(|d| d.join("logs")))
            .unwrap_or_else(|| PathBuf::from("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "hostbridge.log");
        Some(tracing_appender::non_blocking(file_appender))
    } else {
        None
    };
    let (file_writer, _guard) = match file_layer {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "hostbridge=trace,hostbridge_host=trace,hostbridge_client=trace,hostbridge_config=trace,info",
                ))
        }))
        .init();

    let ctx = commands::Context {
        config: loaded,
        config_dir: cli.config_dir,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Serve(args) => serve::run(args, &ctx).await,
        Commands::Call(args) => call::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
