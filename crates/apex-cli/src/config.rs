//! Configuration file management for apex.
//!
//! Provides a TOML config file at `~/.config/apex/apex.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use apex_core::config::GovernanceConfig;

/// Return the apex config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/apex` or `~/.config/apex`. We
/// intentionally ignore the platform-specific `dirs::config_dir()` (which
/// returns `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("apex");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("apex")
}

/// Return the path to the apex config file.
pub fn config_path() -> PathBuf {
    config_dir().join("apex.toml")
}

/// Resolve the governance configuration using the chain: CLI flag > env var
/// `APEX_CONFIG` (path to an alternate file) > default config file location
/// > built-in defaults.
///
/// Returns built-in defaults (already valid) if no file is found anywhere
/// in the chain; returns an error only if a file was found but failed to
/// parse or validate.
pub fn resolve(cli_config_path: Option<&str>) -> Result<GovernanceConfig> {
    let path = if let Some(p) = cli_config_path {
        Some(PathBuf::from(p))
    } else if let Ok(p) = std::env::var("APEX_CONFIG") {
        Some(PathBuf::from(p))
    } else {
        let default_path = config_path();
        default_path.exists().then_some(default_path)
    };

    let Some(path) = path else {
        return Ok(GovernanceConfig::default());
    };

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    GovernanceConfig::parse_toml(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))
}

/// Write `config` to the default config file location, creating parent
/// directories as needed.
pub fn save(config: &GovernanceConfig) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}
