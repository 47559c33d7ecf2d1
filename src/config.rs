//! Configuration management for wsterm.
//!
//! Loads TOML configuration from `~/.wsterm/config.toml`.
//!
//! # Configuration File
//!
//! ```toml
//! # Terminal endpoint (ws:// or wss://)
//! endpoint = "ws://localhost:5000/terminal"
//!
//! # Auth token (prefer -t or --token-env over storing it here)
//! token = "..."
//!
//! [status_bar]
//! visible = true
//! ```
//!
//! Command line arguments override file values.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Terminal endpoint URL
    pub endpoint: Option<String>,
    /// Auth token
    pub token: Option<String>,
    /// Status bar settings
    pub status_bar: StatusBarConfig,
}

/// Status bar configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusBarConfig {
    pub visible: bool,
}

impl Default for StatusBarConfig {
    fn default() -> Self {
        Self { visible: true }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(config) = toml::from_str(&content) {
                        return config;
                    }
                }
            }
        }
        Self::default()
    }

    /// Save configuration to file
    #[allow(dead_code)]
    pub fn save(&self) -> Result<(), String> {
        if let Some(path) = Self::config_path() {
            let content = toml::to_string_pretty(self)
                .map_err(|e| format!("Failed to serialize config: {}", e))?;
            fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;
            Ok(())
        } else {
            Err("Could not determine config path".to_string())
        }
    }

    fn config_path() -> Option<PathBuf> {
        let dir = data_dir()?;
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Some(dir.join("config.toml"))
    }
}

/// `~/.wsterm`, created on demand; also holds the log file.
pub fn data_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".wsterm"))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_visible_status_bar() {
        let config = Config::default();
        assert!(config.status_bar.visible);
        assert!(config.endpoint.is_none());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config =
            toml::from_str("endpoint = \"ws://localhost:5000/terminal\"").unwrap();
        assert_eq!(
            config.endpoint.as_deref(),
            Some("ws://localhost:5000/terminal")
        );
        assert!(config.token.is_none());
        assert!(config.status_bar.visible);
    }
}
