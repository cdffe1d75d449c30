//! Configuration for the HTTP server and client (§6 "Server/client config
//! options").
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

/// Command-line arguments for the server binary.
#[derive(Parser, Debug)]
#[command(name = "grow-httpd")]
#[command(author = "grow-httpd authors")]
#[command(version = "0.1.0")]
#[command(about = "A cross-platform HTTP/1.1 server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads (0 = number of CPU cores)
    #[arg(short = 'w', long)]
    pub threads: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure.
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerTomlConfig,
    #[serde(default)]
    pub client: ClientTomlConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerTomlConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    pub threads: Option<usize>,
    #[serde(default = "default_ring_size")]
    pub ring_size: u32,
    /// §4.4 "HEAD handling": dispatch HEAD to the GET handler and discard
    /// the body instead of requiring a dedicated HEAD handler.
    #[serde(default = "default_redirect_head_to_get")]
    pub redirect_head_to_get: bool,
    /// Maximum request body size accepted, in bytes (§4.3, §7 413 mapping).
    #[serde(default = "default_connection_allowed_size")]
    pub connection_allowed_size: usize,
    /// Idle connection timeout, in seconds.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// How often, in milliseconds, a worker re-checks the shutdown flag
    /// while idle (§4.4 "graceful shutdown").
    #[serde(default = "default_shutdown_poll_interval_ms")]
    pub shutdown_poll_interval_ms: u64,
}

impl Default for ServerTomlConfig {
    fn default() -> Self {
        ServerTomlConfig {
            listen: default_listen(),
            threads: None,
            ring_size: default_ring_size(),
            redirect_head_to_get: default_redirect_head_to_get(),
            connection_allowed_size: default_connection_allowed_size(),
            idle_timeout_secs: default_idle_timeout_secs(),
            shutdown_poll_interval_ms: default_shutdown_poll_interval_ms(),
        }
    }
}

/// Default per-request options for the HTTP client (§6 "client config
/// options"); individual requests may override any of these.
#[derive(Debug, Deserialize)]
pub struct ClientTomlConfig {
    #[serde(default = "default_client_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub ignore_redirects: bool,
    #[serde(default = "default_cors_mode")]
    pub cors_mode: String,
    #[serde(default = "default_credentials_mode")]
    pub credentials: String,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

impl Default for ClientTomlConfig {
    fn default() -> Self {
        ClientTomlConfig {
            timeout_secs: default_client_timeout_secs(),
            ignore_redirects: false,
            cors_mode: default_cors_mode(),
            credentials: default_credentials_mode(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: default_log_level() }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_ring_size() -> u32 {
    256
}
fn default_redirect_head_to_get() -> bool {
    true
}
fn default_connection_allowed_size() -> usize {
    8 * 1024 * 1024
}
fn default_idle_timeout_secs() -> u64 {
    75
}
fn default_shutdown_poll_interval_ms() -> u64 {
    100
}
fn default_client_timeout_secs() -> u64 {
    30
}
fn default_cors_mode() -> String {
    "no-cors".to_string()
}
fn default_credentials_mode() -> String {
    "same-origin".to_string()
}
fn default_pool_max_idle_per_host() -> usize {
    8
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Final, resolved server configuration (§6 "server config options").
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub thread_count: usize,
    pub ring_size: u32,
    pub redirect_head_to_get: bool,
    pub connection_allowed_size: usize,
    pub idle_timeout: Duration,
    pub shutdown_poll_interval: Duration,
    pub log_level: String,
}

/// Default per-request client options (§6 "client config options"); a
/// single outbound request's actual `method`/`url`/`body`/`headers`/
/// `cookies` are supplied at call time and are not part of this type.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub ignore_redirects: bool,
    pub cors_mode: String,
    pub credentials: String,
    pub pool_max_idle_per_host: usize,
}

impl ServerConfig {
    /// Load configuration from CLI args and an optional TOML file. CLI
    /// arguments take precedence over TOML file values.
    pub fn load() -> Result<(ServerConfig, ClientConfig), ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let server = ServerConfig {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            thread_count: cli.threads.or(toml_config.server.threads).unwrap_or(0),
            ring_size: toml_config.server.ring_size,
            redirect_head_to_get: toml_config.server.redirect_head_to_get,
            connection_allowed_size: toml_config.server.connection_allowed_size,
            idle_timeout: Duration::from_secs(toml_config.server.idle_timeout_secs),
            shutdown_poll_interval: Duration::from_millis(toml_config.server.shutdown_poll_interval_ms),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };

        let client = ClientConfig {
            timeout: Duration::from_secs(toml_config.client.timeout_secs),
            ignore_redirects: toml_config.client.ignore_redirects,
            cors_mode: toml_config.client.cors_mode,
            credentials: toml_config.client.credentials,
            pool_max_idle_per_host: toml_config.client.pool_max_idle_per_host,
        };

        Ok((server, client))
    }
}

#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
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
        assert_eq!(config.server.listen, "127.0.0.1:8080");
        assert!(config.server.redirect_head_to_get);
        assert_eq!(config.server.connection_allowed_size, 8 * 1024 * 1024);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9000"
            threads = 4
            redirect_head_to_get = false

            [client]
            timeout_secs = 10

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.server.threads, Some(4));
        assert!(!config.server.redirect_head_to_get);
        assert_eq!(config.client.timeout_secs, 10);
        assert_eq!(config.logging.level, "debug");
    }
}
