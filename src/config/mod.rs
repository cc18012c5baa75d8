//! Configuration file management
//!
//! Loads TOML configuration files and provides application settings.
//! Default config path: ~/.config/imhostd/config.toml

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Host loop settings
    pub host: HostConfig,
    /// D-Bus service settings
    pub bus: BusConfig,
    /// XIM frontend settings
    pub xim: XimConfig,
}

/// Host loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Upper bound on one wait, in milliseconds (0 = block indefinitely)
    pub tick_timeout_ms: u64,
}

impl HostConfig {
    /// Wait bound as a `Duration`; `None` blocks until activity.
    pub fn tick_timeout(&self) -> Option<Duration> {
        if self.tick_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.tick_timeout_ms))
        }
    }
}

/// D-Bus service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Enable the session-bus module
    pub enabled: bool,
    /// Well-known service name to claim on the bus
    pub service_name: String,
}

/// XIM frontend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XimConfig {
    /// Enable the XIM backend (requires a reachable X display)
    pub enabled: bool,
    /// X display name (e.g. ":0"); empty uses $DISPLAY
    pub display: String,
    /// Screen number on the display
    pub screen: i32,
    /// Key chords that toggle the input method (e.g. "ctrl+space")
    pub trigger_keys: Vec<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        // 500ms keeps signal latency low without busy-waking the host
        Self {
            tick_timeout_ms: 500,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "org.imhostd.Host1".to_string(),
        }
    }
}

impl Default for XimConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            display: String::new(),
            screen: 0,
            trigger_keys: vec!["ctrl+space".to_string()],
        }
    }
}

impl Config {
    /// System-wide config path
    const SYSTEM_CONFIG_PATH: &'static str = "/etc/imhostd/config.toml";

    /// Get the path that would be used for loading config
    /// Returns None if using built-in defaults
    pub fn config_path() -> Option<std::path::PathBuf> {
        // 1. IMHOSTD_CONFIG environment variable
        if let Ok(path) = std::env::var("IMHOSTD_CONFIG") {
            let p = std::path::Path::new(&path);
            if p.exists() {
                return Some(p.to_path_buf());
            }
        }

        // 2. User config: ~/.config/imhostd/config.toml
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("imhostd").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }
        }

        // 3. System config: /etc/imhostd/config.toml
        let system_config = std::path::Path::new(Self::SYSTEM_CONFIG_PATH);
        if system_config.exists() {
            return Some(system_config.to_path_buf());
        }

        None
    }

    /// Load configuration with priority:
    /// 1. IMHOSTD_CONFIG environment variable
    /// 2. ~/.config/imhostd/config.toml (user config)
    /// 3. /etc/imhostd/config.toml (system config)
    /// 4. Built-in defaults
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            match Self::load_from_file(path.to_string_lossy().as_ref()) {
                Ok(config) => {
                    info!("Loaded config: {}", path.display());
                    return config;
                }
                Err(e) => {
                    warn!("Failed to load config {}: {}", path.display(), e);
                }
            }
        }
        info!("Using built-in default config");
        Self::default()
    }

    /// Load settings from specified path
    fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        Ok(config)
    }
}
