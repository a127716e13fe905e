//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};

use hostbridge_config::{self, BridgeConfig};

use super::Context;

/// Project-local config file name.
const PROJECT_CONFIG_FILE: &str = "hostbridge.toml";

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration and where it came from
    Show,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./hostbridge.toml) instead of user config
        #[arg(long)]
        local: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Init { local, force } => cmd_init(ctx, local, force),
        ConfigCommand::Path => cmd_path(ctx),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = &ctx.config;
    let config = effective(&loaded.config);

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    println!("# hostbridge configuration\n");

    println!("Config file search order (later overrides earlier):");
    for source in &loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }
    println!();

    if !loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &loaded.warnings {
            println!("  ⚠ {}", w);
        }
        println!();
    }

    println!("{}", config.to_toml()?);
    Ok(())
}

/// Every section filled in, so `show` prints what is actually in effect.
fn effective(config: &BridgeConfig) -> BridgeConfig {
    BridgeConfig {
        host: Some(config.host()),
        client: Some(config.client()),
        logging: Some(config.logging()),
    }
}

fn cmd_init(ctx: &Context, local: bool, force: bool) -> Result<()> {
    let path = if local {
        PathBuf::from(PROJECT_CONFIG_FILE)
    } else {
        ctx.user_config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?
            .join("config.toml")
    };

    if path.exists() && !force {
        println!("Config file already exists: {}", path.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    hostbridge_config::save_config(&BridgeConfig::with_defaults(), &path)?;
    println!("Created config file: {}", path.display());
    Ok(())
}

fn cmd_path(ctx: &Context) -> Result<()> {
    match ctx.user_config_dir() {
        Some(dir) => println!("{}", dir.join("config.toml").display()),
        None => eprintln!("Could not determine config directory"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_fills_every_section() {
        let config = effective(&BridgeConfig::new());
        assert!(config.host.is_some());
        assert!(config.client.is_some());
        assert!(config.logging.is_some());
    }
}
