//! Configuration module for ack-server.
//!
//! Supports command-line arguments (each also readable from an environment
//! variable) and a TOML configuration file. CLI arguments take precedence
//! over config file values, which take precedence over built-in defaults.

use crate::session::{ReadMode, SessionConfig};
use bytes::Bytes;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "ack-server")]
#[command(version)]
#[command(about = "A serial TCP server that acknowledges every read", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, env = "ACK_SERVER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(short = 'H', long, env = "ACK_SERVER_HOST")]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long, env = "ACK_SERVER_PORT")]
    pub port: Option<u16>,

    /// Read mode: one byte per read, or up to 1024 bytes per read
    #[arg(short, long, value_enum, env = "ACK_SERVER_MODE")]
    pub mode: Option<ReadMode>,

    /// Acknowledgment sent after every read (defaults per mode)
    #[arg(short, long, env = "ACK_SERVER_ACK")]
    pub ack: Option<String>,

    /// Idle read timeout in seconds (0 = wait forever)
    #[arg(long, env = "ACK_SERVER_IDLE_TIMEOUT")]
    pub idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "ACK_SERVER_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Idle read timeout in seconds, 0 disables it
    #[serde(default)]
    pub idle_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            idle_timeout: 0,
        }
    }
}

/// Session configuration
#[derive(Debug, Deserialize, Default)]
pub struct SessionSection {
    #[serde(default)]
    pub mode: ReadMode,
    pub ack: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    65432
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub mode: ReadMode,
    pub ack: String,
    pub idle_timeout: Option<Duration>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args, environment and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    /// Merge CLI args over TOML values. The acknowledgment falls back to
    /// the default for whichever mode wins.
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let mode = cli.mode.unwrap_or(toml_config.session.mode);
        let ack = cli
            .ack
            .or(toml_config.session.ack)
            .unwrap_or_else(|| mode.default_ack().to_string());
        let idle_secs = cli.idle_timeout.unwrap_or(toml_config.server.idle_timeout);

        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            mode,
            ack,
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        }
    }

    /// Session parameters derived from this configuration.
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            ack: Bytes::from(self.ack.clone().into_bytes()),
            idle_timeout: self.idle_timeout,
            ..SessionConfig::new(self.mode)
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
