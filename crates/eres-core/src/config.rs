//! eres configuration system.
//!
//! Loaded from `~/.eres/config.toml` by default. Credentials live in the file
//! or in `ERES_*_PASSWORD` environment variables, never in the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EresError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EresConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub directory: HttpEndpointConfig,
    #[serde(default)]
    pub panels: PanelSourceConfig,
}

impl Default for EresConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            store: StoreConfig::default(),
            smtp: SmtpConfig::default(),
            retry: RetryConfig::default(),
            directory: HttpEndpointConfig::default(),
            panels: PanelSourceConfig::default(),
        }
    }
}

impl EresConfig {
    /// Load config from the default path, falling back to defaults if absent.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            let mut config = Self::default();
            config.apply_env();
            Ok(config)
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EresError::Config(format!("Failed to read config: {e}")))?;
        let mut config = Self::parse(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Parse TOML text without touching the environment.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| EresError::Config(format!("Failed to parse config: {e}")))
    }

    /// Environment overrides for secrets.
    fn apply_env(&mut self) {
        if let Ok(pw) = std::env::var("ERES_SMTP_PASSWORD") {
            self.smtp.password = pw;
        }
        if let Ok(pw) = std::env::var("ERES_DIRECTORY_PASSWORD") {
            self.directory.password = pw;
        }
        if let Ok(pw) = std::env::var("ERES_PANELS_PASSWORD") {
            self.panels.password = pw;
        }
    }

    /// Reject configurations the dispatcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.smtp.host.trim().is_empty() {
            return Err(EresError::Config("smtp.host is empty".into()));
        }
        if self.smtp.email.trim().is_empty() {
            return Err(EresError::Config("smtp.email (sender) is empty".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(EresError::Config("retry.max_attempts must be >= 1".into()));
        }
        if self.scheduler.max_parallel == 0 {
            return Err(EresError::Config("scheduler.max_parallel must be >= 1".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the eres home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".eres")
    }
}

/// Expand `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// Tick cadence and pipeline limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Consecutive failed runs of one schedule before an alert is raised.
    #[serde(default = "default_alert_after")]
    pub alert_after_failures: u32,
    /// Scratch space for materialized documents.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
}

fn default_tick_interval() -> u64 { 60 }
fn default_max_parallel() -> usize { 4 }
fn default_alert_after() -> u32 { 5 }
fn default_work_dir() -> String { "~/.eres/work".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            max_parallel: default_max_parallel(),
            alert_after_failures: default_alert_after(),
            work_dir: default_work_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String { "~/.eres/eres.db".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self { path: default_store_path() }
    }
}

/// Outbound mail server and sender identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,
    /// Defaults to 587 with STARTTLS, 465 for implicit TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Authenticated sender address.
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default = "bool_true")]
    pub starttls: bool,
}

fn bool_true() -> bool { true }

impl SmtpConfig {
    /// Port to connect to: the configured one, else the standard port for the TLS mode.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.starttls { 587 } else { 465 })
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: None,
            email: String::new(),
            password: String::new(),
            display_name: None,
            starttls: true,
        }
    }
}

/// Bounded retry around the mail transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 { 2 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 10_000 }

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

/// An HTTP collaborator, such as the recipient directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEndpointConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_http_timeout() -> u64 { 10 }

impl Default for HttpEndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_secs: default_http_timeout(),
        }
    }
}

/// Panel data source. Panel queries run longer than directory lookups, so the
/// timeout default is wider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelSourceConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_panels_timeout")]
    pub timeout_secs: u64,
}

fn default_panels_timeout() -> u64 { 30 }

impl Default for PanelSourceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_secs: default_panels_timeout(),
        }
    }
}

impl From<PanelSourceConfig> for HttpEndpointConfig {
    fn from(panels: PanelSourceConfig) -> Self {
        Self {
            url: panels.url,
            username: panels.username,
            password: panels.password,
            timeout_secs: panels.timeout_secs,
        }
    }
}
