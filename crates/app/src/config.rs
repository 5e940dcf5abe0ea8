//! Demo configuration
//!
//! Loaded from `config.toml` in the platform config directory, or from the
//! path given with `--config`. Missing keys fall back to defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use mpapi_net::ClientConfig;
use serde::{Deserialize, Serialize};

/// Identifier used when none is configured
pub const DEFAULT_IDENTIFIER: &str = "c2438167-831b-4bf7-8bdc-0489eaf98e25";

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Relay connection settings
    pub server: ClientConfig,
    /// Player details sent with host and join
    pub player: PlayerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub name: String,
}

/// Values given on the command line
#[derive(Debug, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub identifier: Option<String>,
    pub debug: bool,
    pub name: Option<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            name: "Player".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ClientConfig {
                identifier: DEFAULT_IDENTIFIER.to_string(),
                ..ClientConfig::default()
            },
            player: PlayerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default location is
    /// tried and its absence means built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Apply command-line overrides on top of the loaded file
    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(host) = overrides.host {
            self.server.host = host;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(identifier) = overrides.identifier {
            self.server.identifier = identifier;
        }
        if overrides.debug {
            self.server.debug = true;
        }
        if let Some(name) = overrides.name {
            self.player.name = name;
        }
        if self.server.identifier.is_empty() {
            self.server.identifier = DEFAULT_IDENTIFIER.to_string();
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }
}

/// `<config dir>/mpapi/config.toml`
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("dev", "mpapi", "mpapi").map(|dirs| dirs.config_dir().join("config.toml"))
}
