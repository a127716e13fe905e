//! Configuration system for the host bridge.
//!
//! Provides TOML-based configuration with:
//! - `[host]` listener settings (bind address, WebSocket path, queue size)
//! - `[client]` orchestrator settings (host URL, client name)
//! - `[logging]` file logging settings
//! - Config file layering (user config dir + project-local overrides)
//! - Environment variable overrides applied last
//!
//! Request timeouts read from configuration never go below
//! [`MIN_REQUEST_TIMEOUT_SECS`].

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    apply_env_overrides, load_config, load_config_file, load_config_with_options, save_config,
    user_config_dir, user_config_path, ConfigSource, LoadedConfig,
};
pub use error::{ConfigError, Result};
pub use types::*;
