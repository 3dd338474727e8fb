//! Configuration for the demo control daemon.
//!
//! Supports command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the demo daemon
#[derive(Parser, Debug)]
#[command(name = "ctlsockd")]
#[command(version = "0.1.0")]
#[command(about = "Demo daemon exposing a control socket", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Control socket path (absolute) or name (placed in the runtime dir)
    #[arg(short = 's', long)]
    pub socket: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Control-socket configuration
#[derive(Debug, Deserialize, Default)]
pub struct ControlConfig {
    /// Control socket path or name; defaults to `<program>.<pid>.ctl` in
    /// the runtime directory when unset
    pub socket: Option<String>,
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

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub socket: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Config {
            socket: cli.socket.or(toml_config.control.socket),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.control.socket, None);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [control]
            socket = "/run/demo.ctl"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.control.socket.as_deref(), Some("/run/demo.ctl"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ctlsockd.toml");
        std::fs::write(
            &file,
            "[control]\nsocket = \"from-file.ctl\"\n[logging]\nlevel = \"debug\"\n",
        )
        .unwrap();

        let cli = CliArgs::parse_from([
            "ctlsockd",
            "--config",
            file.to_str().unwrap(),
            "--socket",
            "from-cli.ctl",
        ]);
        let config = Config::from_cli(cli).unwrap();

        assert_eq!(config.socket.as_deref(), Some("from-cli.ctl"));
        assert_eq!(config.log_level, "debug");
    }
}
