//! Config file handling for the thermo CLI
//!
//! Settings come from a TOML file holding any subset of
//! [`ClientConfig`] fields. Command-line flags override the file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use thermo_client::ClientConfig;

/// Load the configuration.
///
/// An explicit `path` must exist. Without one the default file is used if
/// present, and built-in defaults otherwise.
pub fn load(path: Option<&Path>) -> Result<ClientConfig> {
    match path {
        Some(path) => read(path),
        None => {
            let path = default_config_file();
            if path.exists() {
                read(&path)
            } else {
                Ok(ClientConfig::default())
            }
        }
    }
}

fn read(path: &Path) -> Result<ClientConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Save a configuration as TOML
pub fn save(config: &ClientConfig, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))
}

/// Apply command-line overrides and check the result
pub fn with_overrides(
    mut config: ClientConfig,
    address: Option<String>,
    timeout_ms: Option<u64>,
) -> Result<ClientConfig> {
    if let Some(address) = address {
        config.address = address;
    }
    if let Some(timeout_ms) = timeout_ms {
        config.call_timeout_ms = timeout_ms;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Get the default config file path
pub fn default_config_file() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("thermo")
        .join("config.toml")
}
