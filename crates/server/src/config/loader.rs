//! Configuration file loading and parsing
//!
//! Loads gitden configuration from RON files, discovering the file in the
//! standard location and writing defaults there on first run.

use super::{Config, default_state_dir};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "GITDEN_CONFIG_PATH";

const CONFIG_FILENAME: &str = "config.ron";

/// Standard config path, `~/.gitden/config.ron`
pub fn default_config_path() -> PathBuf {
    default_state_dir().join(CONFIG_FILENAME)
}

/// Load configuration from a specific file path
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_ron(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config
        .validate()
        .map_err(|msg| anyhow::anyhow!("Invalid config file {}: {}", path.display(), msg))?;
    Ok(config)
}

/// Load configuration with automatic file discovery
///
/// Searches for config files in the following locations (in order):
/// 1. Path specified in GITDEN_CONFIG_PATH environment variable
/// 2. ~/.gitden/config.ron
///
/// If no config file is found, the default configuration is written to
/// `~/.gitden/config.ron` and returned.
pub fn load_with_discovery() -> Result<(Config, PathBuf)> {
    if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            tracing::debug!("Loading config from {}: {}", CONFIG_PATH_ENV, path.display());
            return Ok((load_from_file(&path)?, path));
        } else {
            tracing::warn!(
                "{} specified but file not found: {}",
                CONFIG_PATH_ENV,
                path.display()
            );
        }
    }

    let path = default_config_path();
    let config = load_or_init(&path)?;
    Ok((config, path))
}

/// Load `path`, or write and return the defaults when it does not exist
pub fn load_or_init(path: &Path) -> Result<Config> {
    if path.exists() {
        tracing::debug!("Loading config from: {}", path.display());
        return load_from_file(path);
    }

    tracing::info!("No config file found, writing defaults to {}", path.display());
    let config = Config::default();
    save_to_file(&config, path)?;
    Ok(config)
}

/// Write `config` as pretty RON, creating parent directories
pub fn save_to_file(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }

    let content = to_ron(config)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))
}

/// Render `config` as pretty RON
pub fn to_ron(config: &Config) -> Result<String> {
    ron::ser::to_string_pretty(config, ron::ser::PrettyConfig::default())
        .context("Failed to serialize RON configuration")
}

/// Parse RON configuration string
fn parse_ron(content: &str) -> Result<Config> {
    ron::from_str(content).context("Failed to parse RON configuration")
}
