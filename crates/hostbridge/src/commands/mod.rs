//! CLI command handlers.

pub mod call;
pub mod config;
pub mod serve;

use std::path::PathBuf;

use hostbridge_config::LoadedConfig;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Configuration after file layers and environment overrides.
    pub config: LoadedConfig,
    /// Config directory given on the command line, if any.
    pub config_dir: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// The user config directory in effect.
    pub fn user_config_dir(&self) -> Option<PathBuf> {
        self.config_dir
            .clone()
            .or_else(hostbridge_config::user_config_dir)
    }
}
