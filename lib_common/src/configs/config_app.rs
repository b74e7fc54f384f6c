//! # Application Configuration
//!
//! Settings are layered, later layers winning for every field they set:
//!
//! 1. built-in defaults,
//! 2. an optional JSON config file (`warwatch.conf.json` or `--config-path`),
//! 3. environment variables and command-line flags (via `clap`).
//!
//! `.env` files are loaded with `dotenvy` before the environment is read. The
//! shared WebSocket secret has no default: without it the process refuses to
//! start.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = "warwatch.conf.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required setting {0} is missing")]
    Missing(&'static str),

    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("config file {path}: {reason}")]
    File { path: PathBuf, reason: String },
}

/// Every setting, optional. One instance per layer.
#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[command(about = "Map watcher WebSocket notification server", version)]
#[serde(rename_all = "camelCase")]
pub struct ConfigArgs {
    #[arg(long, env = "PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[arg(long, env = "WS_AUTH_TOKEN", hide_env_values = true, help = "Shared secret clients present as the WebSocket sub-protocol.")]
    pub auth_token: Option<String>,

    #[arg(long, env = "APP_ENV", help = "Deployment environment; 'production' disables console logging.")]
    pub app_env: Option<String>,

    #[arg(long, env = "MAP_URL", help = "URL of the map page to poll.")]
    pub map_url: Option<String>,

    #[arg(long, env = "POLL_SCHEDULE", help = "Six-field cron expression for polling (seconds first).")]
    pub poll_schedule: Option<String>,

    #[arg(long, env = "WARWATCH_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[arg(long, env = "LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "LOG_FILE", help = "Name of the JSON log file inside the log directory.")]
    pub log_file: Option<String>,

    #[arg(long, env = "LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[arg(long, env = "FETCH_TIMEOUT_SECS", help = "Timeout in seconds for one map page request.")]
    pub fetch_timeout_secs: Option<u64>,

    #[arg(long, env = "FETCH_RETRIES", help = "Transport-level retries per map page request.")]
    pub fetch_retries: Option<u32>,

    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", help = "Sliding window length in seconds for inbound rate limiting.")]
    pub rate_limit_window_secs: Option<u64>,

    #[arg(long, env = "RATE_LIMIT_MAX_MESSAGES", help = "Messages admitted per client per window.")]
    pub rate_limit_max_messages: Option<usize>,

    #[arg(long, env = "SHUTDOWN_GRACE_SECS", help = "Seconds to wait for sessions to close on shutdown.")]
    pub shutdown_grace_secs: Option<u64>,
}

impl ConfigArgs {
    /// Built-in defaults. The auth token and config path have none.
    pub fn defaults() -> Self {
        ConfigArgs {
            port: Some(8080),
            app_env: Some("development".to_string()),
            map_url: Some("http://api.chatwars.me/webview/map".to_string()),
            poll_schedule: Some("0 * * * * *".to_string()),
            log_dir: Some(PathBuf::from("logs")),
            log_file: Some("ws.log".to_string()),
            log_level: Some("info".to_string()),
            fetch_timeout_secs: Some(10),
            fetch_retries: Some(0),
            rate_limit_window_secs: Some(15 * 60),
            rate_limit_max_messages: Some(100),
            shutdown_grace_secs: Some(10),
            ..Default::default()
        }
    }

    /// Merges two layers; `other` overrides `self` for every `Some` field.
    pub fn merge(self, other: ConfigArgs) -> ConfigArgs {
        ConfigArgs {
            port: other.port.or(self.port),
            auth_token: other.auth_token.or(self.auth_token),
            app_env: other.app_env.or(self.app_env),
            map_url: other.map_url.or(self.map_url),
            poll_schedule: other.poll_schedule.or(self.poll_schedule),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_file: other.log_file.or(self.log_file),
            log_level: other.log_level.or(self.log_level),
            fetch_timeout_secs: other.fetch_timeout_secs.or(self.fetch_timeout_secs),
            fetch_retries: other.fetch_retries.or(self.fetch_retries),
            rate_limit_window_secs: other.rate_limit_window_secs.or(self.rate_limit_window_secs),
            rate_limit_max_messages: other.rate_limit_max_messages.or(self.rate_limit_max_messages),
            shutdown_grace_secs: other.shutdown_grace_secs.or(self.shutdown_grace_secs),
        }
    }

    /// Reads one JSON layer from disk.
    pub fn from_file(path: &Path) -> Result<ConfigArgs, ConfigError> {
        let file_error = |reason: String| ConfigError::File {
            path: path.to_path_buf(),
            reason,
        };
        let text = fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| file_error(e.to_string()))
    }
}

/// Fully resolved settings.
#[derive(Clone)]
pub struct AppConfig {
    pub port: u16,
    pub auth_token: String,
    pub app_env: String,
    pub map_url: String,
    pub poll_schedule: String,
    pub log_dir: PathBuf,
    pub log_file: String,
    pub log_level: String,
    pub fetch_timeout: Duration,
    pub fetch_retries: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_max_messages: usize,
    pub shutdown_grace: Duration,
}

fn required<T>(value: Option<T>, name: &'static str) -> Result<T, ConfigError> {
    value.ok_or(ConfigError::Missing(name))
}

impl AppConfig {
    /// Loads `.env`, parses the command line and environment, and resolves all
    /// layers.
    pub fn load() -> Result<AppConfig, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_cli(ConfigArgs::parse())
    }

    /// Resolves defaults ← config file ← `cli`.
    ///
    /// A config file named explicitly (in `cli`) must exist; the default one is
    /// optional.
    pub fn from_cli(cli: ConfigArgs) -> Result<AppConfig, ConfigError> {
        let file_layer = match &cli.config_path {
            Some(path) => Some(ConfigArgs::from_file(path)?),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Some(ConfigArgs::from_file(path)?)
                } else {
                    None
                }
            }
        };

        Self::resolve(file_layer, cli)
    }

    pub fn resolve(file_layer: Option<ConfigArgs>, cli: ConfigArgs) -> Result<AppConfig, ConfigError> {
        let mut merged = ConfigArgs::defaults();
        if let Some(file) = file_layer {
            merged = merged.merge(file);
        }
        let merged = merged.merge(cli);

        let auth_token = merged
            .auth_token
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::Missing("WS_AUTH_TOKEN"))?;

        let rate_limit_window_secs = required(merged.rate_limit_window_secs, "RATE_LIMIT_WINDOW_SECS")?;
        if rate_limit_window_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "RATE_LIMIT_WINDOW_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        let rate_limit_max_messages = required(merged.rate_limit_max_messages, "RATE_LIMIT_MAX_MESSAGES")?;
        if rate_limit_max_messages == 0 {
            return Err(ConfigError::Invalid {
                name: "RATE_LIMIT_MAX_MESSAGES",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(AppConfig {
            port: required(merged.port, "PORT")?,
            auth_token,
            app_env: required(merged.app_env, "APP_ENV")?,
            map_url: required(merged.map_url, "MAP_URL")?,
            poll_schedule: required(merged.poll_schedule, "POLL_SCHEDULE")?,
            log_dir: required(merged.log_dir, "LOG_DIR")?,
            log_file: required(merged.log_file, "LOG_FILE")?,
            log_level: required(merged.log_level, "LOG_LEVEL")?,
            fetch_timeout: Duration::from_secs(required(merged.fetch_timeout_secs, "FETCH_TIMEOUT_SECS")?),
            fetch_retries: required(merged.fetch_retries, "FETCH_RETRIES")?,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            rate_limit_max_messages,
            shutdown_grace: Duration::from_secs(required(merged.shutdown_grace_secs, "SHUTDOWN_GRACE_SECS")?),
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("auth_token", &"<redacted>")
            .field("app_env", &self.app_env)
            .field("map_url", &self.map_url)
            .field("poll_schedule", &self.poll_schedule)
            .field("log_dir", &self.log_dir)
            .field("log_file", &self.log_file)
            .field("log_level", &self.log_level)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("fetch_retries", &self.fetch_retries)
            .field("rate_limit_window", &self.rate_limit_window)
            .field("rate_limit_max_messages", &self.rate_limit_max_messages)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish()
    }
}

impl fmt::Display for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "port={} env={} map={} schedule='{}' rate_limit={}/{}s",
            self.port,
            self.app_env,
            self.map_url,
            self.poll_schedule,
            self.rate_limit_max_messages,
            self.rate_limit_window.as_secs()
        )
    }
}
