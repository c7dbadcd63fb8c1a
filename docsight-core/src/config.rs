//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/docsight/config.toml` and then
//! overlaid with `DOCSIGHT_*` environment variables, so a deployment can keep
//! secrets out of the file entirely.
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/docsight/` (~/.config/docsight/)
//! - State/Logs: `$XDG_STATE_HOME/docsight/` (~/.local/state/docsight/)
//!
//! Every token is independently optional. A missing token disables the
//! feature that needs it instead of failing the host application.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

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

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Analytics backend (event writes and pipe reads)
    #[serde(default)]
    pub backend: BackendConfig,

    /// Batched ingestion settings
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Remote tool registry used by the agent catalog
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Session cookie settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Client address anonymization
    #[serde(default)]
    pub privacy: PrivacyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Analytics backend configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Backend base URL (e.g., `https://api.tinybird.co`)
    pub base_url: Option<String>,

    /// Token allowed to append events
    pub write_token: Option<String>,

    /// Token allowed to read pipes
    pub read_token: Option<String>,

    /// Datasource events are appended to
    #[serde(default = "default_events_datasource")]
    pub events_datasource: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,

    /// Per-slice timeout for composite summary reads, in seconds
    #[serde(default = "default_summary_timeout")]
    pub summary_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            write_token: None,
            read_token: None,
            events_datasource: default_events_datasource(),
            timeout_secs: default_backend_timeout(),
            summary_timeout_secs: default_summary_timeout(),
        }
    }
}

impl BackendConfig {
    /// Base URL without a trailing slash
    pub fn base_url(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .filter(|url| !url.is_empty())
    }

    /// Check if event writes can be attempted
    pub fn can_write(&self) -> bool {
        self.base_url().is_some() && non_empty(&self.write_token)
    }

    /// Check if pipe reads can be attempted
    pub fn can_read(&self) -> bool {
        self.base_url().is_some() && non_empty(&self.read_token)
    }
}

fn default_events_datasource() -> String {
    "analytics_events".to_string()
}

fn default_backend_timeout() -> u64 {
    10
}

fn default_summary_timeout() -> u64 {
    8
}

/// Batched ingestion configuration
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Events per bulk request (1..=500, default 20)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Max seconds an event waits before the timer flushes it
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// Hard cap on queued events after requeueing a failed batch
    #[serde(default = "default_max_backlog")]
    pub max_backlog: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval(),
            max_backlog: default_max_backlog(),
        }
    }
}

impl IngestConfig {
    /// Validate batch settings, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.batch_size > 500 {
            return Err(Error::Config(
                "ingest.batch_size must be between 1 and 500".to_string(),
            ));
        }
        if self.flush_interval_secs == 0 {
            return Err(Error::Config(
                "ingest.flush_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.max_backlog < self.batch_size {
            return Err(Error::Config(
                "ingest.max_backlog must be at least ingest.batch_size".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_batch_size() -> usize {
    20
}

fn default_flush_interval() -> u64 {
    5
}

fn default_max_backlog() -> usize {
    1000
}

/// Tool registry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Registry endpoint (MCP over HTTP)
    pub url: Option<String>,

    /// Admin token presented to the registry
    pub admin_token: Option<String>,

    /// Timeout for each registry round-trip, in seconds
    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,

    /// How long a discovered tool list stays cached (0 = until refreshed)
    #[serde(default = "default_tool_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: None,
            admin_token: None,
            timeout_secs: default_registry_timeout(),
            cache_ttl_secs: default_tool_cache_ttl(),
        }
    }
}

impl RegistryConfig {
    /// Check if the registry can be contacted
    pub fn is_ready(&self) -> bool {
        non_empty(&self.url) && non_empty(&self.admin_token)
    }
}

fn default_registry_timeout() -> u64 {
    30
}

fn default_tool_cache_ttl() -> u64 {
    300
}

/// Session cookie configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Cookie carrying the session token
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Mark the cookie `Secure` (production deployments)
    #[serde(default)]
    pub secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            secure: false,
        }
    }
}

fn default_cookie_name() -> String {
    "docsight_sid".to_string()
}

/// Privacy configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PrivacyConfig {
    /// Salt mixed into client address hashes; without it no hash is stored
    pub ip_salt: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from the default path, then apply environment overrides
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Overlay `DOCSIGHT_*` variables returned by `lookup`.
    ///
    /// Empty values are ignored so an exported-but-blank variable does not
    /// clobber a token from the file.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DOCSIGHT_BACKEND_URL") {
            self.backend.base_url = Some(v);
        }
        if let Some(v) = get("DOCSIGHT_WRITE_TOKEN") {
            self.backend.write_token = Some(v);
        }
        if let Some(v) = get("DOCSIGHT_READ_TOKEN") {
            self.backend.read_token = Some(v);
        }
        if let Some(v) = get("DOCSIGHT_REGISTRY_URL") {
            self.registry.url = Some(v);
        }
        if let Some(v) = get("DOCSIGHT_REGISTRY_TOKEN") {
            self.registry.admin_token = Some(v);
        }
        if let Some(v) = get("DOCSIGHT_IP_SALT") {
            self.privacy.ip_salt = Some(v);
        }
        if let Some(v) = get("DOCSIGHT_ENV") {
            if v.eq_ignore_ascii_case("production") {
                self.session.secure = true;
            }
        }
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/docsight/config.toml` (~/.config/docsight/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("docsight").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/docsight/` (~/.local/state/docsight/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("docsight")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/docsight/docsight.log` (~/.local/state/docsight/docsight.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("docsight.log")
    }
}
