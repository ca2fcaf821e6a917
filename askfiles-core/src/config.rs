//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/askfiles/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/askfiles/` (~/.config/askfiles/)
//! - Data: `$XDG_DATA_HOME/askfiles/` (~/.local/share/askfiles/)
//! - State/Logs: `$XDG_STATE_HOME/askfiles/` (~/.local/state/askfiles/)
//!
//! The `GEMINI_API_KEY` environment variable takes precedence over
//! `gemini.api_key`.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted for the Gemini API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Gemini API configuration
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// Retry and fallback tuning
    #[serde(default)]
    pub retry: RetryConfig,

    /// File activation table
    #[serde(default)]
    pub activation: ActivationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins allowed by CORS
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Upper bound on an uploaded file, in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_cors_origins() -> Vec<String> {
    [4200, 3000, 3001, 3002, 5173, 5174]
        .iter()
        .map(|port| format!("http://localhost:{}", port))
        .collect()
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

/// Gemini API configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    /// API key (can also use the GEMINI_API_KEY env var)
    pub api_key: Option<String>,

    /// REST endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Models in priority order; the first one is the default
    #[serde(default = "default_models")]
    pub models: Vec<String>,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Seconds between state polls while an upload is processing
    #[serde(default = "default_upload_poll_secs")]
    pub upload_poll_secs: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: default_endpoint(),
            models: default_models(),
            timeout_secs: default_timeout(),
            upload_poll_secs: default_upload_poll_secs(),
        }
    }
}

impl GeminiConfig {
    /// The key to use, preferring the environment over the config file.
    pub fn resolved_api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|key| !key.trim().is_empty()))
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(Error::Config(
                "gemini.models must name at least one model".to_string(),
            ));
        }
        if self.models.iter().any(|m| m.trim().is_empty()) {
            return Err(Error::Config(
                "gemini.models must not contain empty names".to_string(),
            ));
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(Error::Config(format!(
                "gemini.endpoint must be an http(s) URL, got {:?}",
                self.endpoint
            )));
        }
        Ok(())
    }
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_models() -> Vec<String> {
    vec![
        "gemini-2.5-flash".to_string(),
        "gemini-2.0-flash".to_string(),
        "gemini-pro-latest".to_string(),
        "gemini-flash-latest".to_string(),
    ]
}

fn default_timeout() -> u64 {
    120
}

fn default_upload_poll_secs() -> u64 {
    1
}

/// Retry and fallback tuning
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Attempts against the current model
    #[serde(default = "default_primary_attempts")]
    pub primary_attempts: u32,

    /// First backoff delay for the current model, in milliseconds
    #[serde(default = "default_primary_delay_ms")]
    pub primary_initial_delay_ms: u64,

    /// Attempts against each fallback model
    #[serde(default = "default_fallback_attempts")]
    pub fallback_attempts: u32,

    /// First backoff delay for fallback models, in milliseconds
    #[serde(default = "default_fallback_delay_ms")]
    pub fallback_initial_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            primary_attempts: default_primary_attempts(),
            primary_initial_delay_ms: default_primary_delay_ms(),
            fallback_attempts: default_fallback_attempts(),
            fallback_initial_delay_ms: default_fallback_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn primary_delay(&self) -> Duration {
        Duration::from_millis(self.primary_initial_delay_ms)
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_millis(self.fallback_initial_delay_ms)
    }
}

fn default_primary_attempts() -> u32 {
    3
}

fn default_primary_delay_ms() -> u64 {
    1000
}

fn default_fallback_attempts() -> u32 {
    2
}

fn default_fallback_delay_ms() -> u64 {
    2000
}

/// File activation table configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ActivationConfig {
    /// Override path for the activation table
    pub path: Option<PathBuf>,
}

impl ActivationConfig {
    /// Configured path, or `$XDG_DATA_HOME/askfiles/file-statuses.json`
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(Config::activation_table_path)
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write log lines to stderr
    #[serde(default)]
    pub stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stderr: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.gemini.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/askfiles/config.toml` (~/.config/askfiles/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("askfiles").join("config.toml")
    }

    /// Returns the data directory path
    ///
    /// `$XDG_DATA_HOME/askfiles/` (~/.local/share/askfiles/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("askfiles")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/askfiles/` (~/.local/state/askfiles/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("askfiles")
    }

    /// Returns the default activation table path
    ///
    /// `$XDG_DATA_HOME/askfiles/file-statuses.json`
    pub fn activation_table_path() -> PathBuf {
        Self::data_dir().join("file-statuses.json")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/askfiles/askfiles.log` (~/.local/state/askfiles/askfiles.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("askfiles.log")
    }
}
