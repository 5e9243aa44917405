//! Configuration loading and types

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use hvremote_exec::ConnectionConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration for the hvremote binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Binary settings
    #[serde(default)]
    pub cli: CliConfig,
    /// Remote host to operate on
    #[serde(default)]
    pub connection: Option<ConnectionConfig>,
}

/// Which transport carries the operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Pooled,
    Ephemeral,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Binary settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Transport used when `--transport` is not given
    #[serde(default)]
    pub transport: TransportKind,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log format (pretty, json)
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| eyre::eyre!("cannot read {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from the explicit path, the environment or the default paths
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be loaded
    pub fn discover(explicit: Option<&Path>) -> eyre::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(path) = std::env::var("HVREMOTE_CONFIG") {
            return Self::load(Path::new(&path));
        }

        for path in default_paths() {
            if path.exists() {
                return Self::load(&path);
            }
        }

        Ok(Config::default())
    }

    /// The connection table, validated
    ///
    /// # Errors
    /// Returns error if the table is missing or incomplete
    pub fn connection(&self) -> eyre::Result<ConnectionConfig> {
        let connection = self
            .connection
            .clone()
            .ok_or_else(|| eyre::eyre!("no [connection] table in configuration"))?;
        connection.validate()?;
        Ok(connection)
    }
}

fn default_paths() -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from("hvremote.toml"),
        PathBuf::from("/etc/hvremote/hvremote.toml"),
    ];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("hvremote/hvremote.toml"));
    }
    paths
}
