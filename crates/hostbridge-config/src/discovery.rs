//! Config file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `~/.config/hostbridge/config.toml` (user config)
//! 2. `./hostbridge.toml` (project-local)
//! 3. Environment variables (`HOSTBRIDGE_*`)
//! 4. CLI arguments (handled externally)

use std::path::{Path, PathBuf};

use crate::{BridgeConfig, ConfigError, Result};

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "hostbridge.toml";

/// Default config filename within the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for config directory resolution.
const APP_NAME: &str = "hostbridge";

/// Environment variable to override the config directory.
const CONFIG_DIR_ENV: &str = "HOSTBRIDGE_CONFIG_DIR";

/// Host name/address both sides should use.
pub const HOST_ENV: &str = "HOSTBRIDGE_HOST";
/// Port both sides should use.
pub const PORT_ENV: &str = "HOSTBRIDGE_PORT";
/// Explicit WebSocket URL for the client side.
pub const URL_ENV: &str = "HOSTBRIDGE_URL";
/// Request timeout in seconds, for both sides.
pub const REQUEST_TIMEOUT_ENV: &str = "HOSTBRIDGE_REQUEST_TIMEOUT";
/// Client name presented on connect.
pub const CLIENT_NAME_ENV: &str = "HOSTBRIDGE_CLIENT_NAME";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Path to the config file.
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged configuration.
    pub config: BridgeConfig,
    /// Sources that were checked, in order of precedence (lowest first).
    pub sources: Vec<ConfigSource>,
    /// Warnings generated during loading (e.g. unreadable layers).
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Get paths of sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Load configuration by discovering and merging all config layers, then
/// applying environment overrides from the process environment.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Load configuration with explicit control over the user config directory.
///
/// `config_dir` overrides both `HOSTBRIDGE_CONFIG_DIR` and the platform
/// default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = BridgeConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    // 1. User config: explicit override, then env var, then platform default
    let user_config_path = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => user_config_path(),
    };
    if let Some(path) = user_config_path {
        sources.push(load_layer(&mut config, &path, &mut warnings));
    }

    // 2. Project-local config
    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings));

    // 3. Environment
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<BridgeConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    BridgeConfig::from_toml(&contents)
}

/// Save configuration to a file.
///
/// Creates parent directories if they don't exist.
pub fn save_config(config: &BridgeConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// Get the user config file path.
pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// Get the user config directory.
///
/// Checks `HOSTBRIDGE_CONFIG_DIR` first, then falls back to the platform
/// default.
pub fn user_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Apply `HOSTBRIDGE_*` overrides using the given variable lookup.
///
/// `HOSTBRIDGE_HOST` / `HOSTBRIDGE_PORT` move both the listener and the
/// client URL; `HOSTBRIDGE_URL` then overrides the client URL outright.
pub fn apply_env_overrides<F>(config: &mut BridgeConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let mut host = config.host();
    let mut client = config.client();
    let mut host_changed = false;
    let mut client_changed = false;

    let env_host = get(HOST_ENV);
    let env_port = get(PORT_ENV)
        .map(|raw| {
            raw.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
                field: PORT_ENV.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()?;

    if env_host.is_some() || env_port.is_some() {
        if let Some(h) = env_host {
            host.bind = h;
        }
        if let Some(p) = env_port {
            host.port = p;
        }
        client.url = format!("ws://{}:{}{}", host.bind, host.port, host.ws_path());
        host_changed = true;
        client_changed = true;
    }

    if let Some(url) = get(URL_ENV) {
        client.url = url;
        client_changed = true;
    }

    if let Some(raw) = get(REQUEST_TIMEOUT_ENV) {
        let secs = raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
            field: REQUEST_TIMEOUT_ENV.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        })?;
        host.request_timeout_secs = secs;
        client.request_timeout_secs = secs;
        host_changed = true;
        client_changed = true;
    }

    if let Some(name) = get(CLIENT_NAME_ENV) {
        client.client_name = Some(name);
        client_changed = true;
    }

    if host_changed {
        config.host = Some(host);
    }
    if client_changed {
        config.client = Some(client);
    }
    Ok(())
}

/// Try to load a config file and merge it into the existing config.
fn load_layer(config: &mut BridgeConfig, path: &Path, warnings: &mut Vec<String>) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    match load_config_file(path) {
        Ok(layer) => {
            tracing::debug!(path = %path.display(), "loaded config layer");
            config.merge(layer);
            ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            ConfigSource {
                path: path.to_path_buf(),
                loaded: false,
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
