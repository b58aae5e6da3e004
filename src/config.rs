//! Configuration module for reverse-relay.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the relay server
#[derive(Parser, Debug)]
#[command(name = "reverse-relay")]
#[command(author = "reverse-relay authors")]
#[command(version = "0.1.0")]
#[command(about = "Reverses every chunk it receives on a worker thread", long_about = None)]
pub struct CliArgs {
    /// TCP port to listen on
    pub port: u16,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (defaults to the wildcard address)
    #[arg(long)]
    pub host: Option<String>,

    /// Maximum number of bytes taken from a socket per read
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Maximum bytes per read
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Readiness events collected per poll
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            backlog: default_backlog(),
            chunk_size: default_chunk_size(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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
    "0.0.0.0".to_string()
}

fn default_backlog() -> i32 {
    1024
}

fn default_chunk_size() -> usize {
    64 * 1024 // 64 KiB
}

fn default_event_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub chunk_size: usize,
    pub event_capacity: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from the process arguments and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::try_parse().map_err(ConfigError::Cli)?;
        Self::from_args(cli)
    }

    /// Merge parsed CLI arguments with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port,
            backlog: toml_config.server.backlog,
            chunk_size: cli.chunk_size.unwrap_or(toml_config.server.chunk_size),
            event_capacity: toml_config.server.event_capacity,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };

        if config.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be greater than zero"));
        }
        if config.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be greater than zero",
            ));
        }

        Ok(config)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    Cli(clap::Error),
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Cli(e) => write!(f, "{e}"),
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.backlog, 1024);
        assert_eq!(config.server.chunk_size, 64 * 1024);
        assert_eq!(config.server.event_capacity, 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "127.0.0.1"
            backlog = 16
            chunk_size = 4096

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.backlog, 16);
        assert_eq!(config.server.chunk_size, 4096);
        assert_eq!(config.server.event_capacity, 1024);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_port_is_required() {
        let err = CliArgs::try_parse_from(["reverse-relay"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_port_must_be_numeric() {
        let err = CliArgs::try_parse_from(["reverse-relay", "http"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_defaults() {
        let cli = CliArgs::try_parse_from(["reverse-relay", "7000"]).unwrap();
        let config = Config::from_args(cli).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_cli_overrides_file() {
        let path = std::env::temp_dir().join(format!(
            "reverse-relay-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "[server]\nhost = \"127.0.0.1\"\nchunk_size = 512\n\n[logging]\nlevel = \"warn\"\n",
        )
        .unwrap();

        let cli = CliArgs::try_parse_from([
            "reverse-relay",
            "7001",
            "--config",
            path.to_str().unwrap(),
            "--chunk-size",
            "128",
        ])
        .unwrap();
        let config = Config::from_args(cli).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.chunk_size, 128);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let cli =
            CliArgs::try_parse_from(["reverse-relay", "7002", "--chunk-size", "0"]).unwrap();
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs::try_parse_from([
            "reverse-relay",
            "7003",
            "--config",
            "/nonexistent/reverse-relay.toml",
        ])
        .unwrap();
        assert!(matches!(
            Config::from_args(cli),
            Err(ConfigError::FileRead(_, _))
        ));
    }
}
