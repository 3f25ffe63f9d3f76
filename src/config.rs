use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Substrings of certificate, OCSP and connectivity-check hosts that are
/// dropped without being logged or relayed.
pub const DEFAULT_IGNORED_DOMAINS: &[&str] = &[
    "gvt1.com",
    "digicert.com",
    "ocsp.",
    "crl.",
    "msftconnecttest.com",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Text
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// One domain per line. Created empty when missing.
    #[serde(default = "default_blacklist_file")]
    pub blacklist_file: String,
    #[serde(default = "default_ignored_domains")]
    pub ignored_domains: Vec<String>,
    /// Per-read bound while accumulating the client's request. Hitting it
    /// ends accumulation, it is not an error.
    #[serde(default = "default_request_read_timeout_ms")]
    pub request_read_timeout_ms: u64,
    #[serde(default = "default_upstream_read_timeout_secs")]
    pub upstream_read_timeout_secs: u64,
    // None leaves the connect to the OS default
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default = "default_log_throttle_interval_ms")]
    pub log_throttle_interval_ms: u64,
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_blacklist_file() -> String {
    "blacklist.txt".to_string()
}

fn default_ignored_domains() -> Vec<String> {
    DEFAULT_IGNORED_DOMAINS.iter().map(|d| d.to_string()).collect()
}

fn default_request_read_timeout_ms() -> u64 {
    2000
}

fn default_upstream_read_timeout_secs() -> u64 {
    10
}

fn default_log_throttle_interval_ms() -> u64 {
    300
}

fn default_relay_buffer_size() -> usize {
    8 * 1024
}

fn default_max_request_size() -> usize {
    64 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            blacklist_file: default_blacklist_file(),
            ignored_domains: default_ignored_domains(),
            request_read_timeout_ms: default_request_read_timeout_ms(),
            upstream_read_timeout_secs: default_upstream_read_timeout_secs(),
            connect_timeout_secs: None,
            log_throttle_interval_ms: default_log_throttle_interval_ms(),
            relay_buffer_size: default_relay_buffer_size(),
            max_request_size: default_max_request_size(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, ProxyError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> Result<(), ProxyError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.blacklist_file.trim().is_empty() {
            return Err(ProxyError::Config("blacklist_file must not be empty".to_string()));
        }
        if self.request_read_timeout_ms == 0 {
            return Err(ProxyError::Config("request_read_timeout_ms must be greater than 0".to_string()));
        }
        if self.upstream_read_timeout_secs == 0 {
            return Err(ProxyError::Config("upstream_read_timeout_secs must be greater than 0".to_string()));
        }
        if self.connect_timeout_secs == Some(0) {
            return Err(ProxyError::Config("connect_timeout_secs must be greater than 0 when set".to_string()));
        }
        if self.relay_buffer_size == 0 {
            return Err(ProxyError::Config("relay_buffer_size must be greater than 0".to_string()));
        }
        if self.max_request_size == 0 {
            return Err(ProxyError::Config("max_request_size must be greater than 0".to_string()));
        }
        Ok(())
    }

    pub fn request_read_timeout(&self) -> Duration {
        Duration::from_millis(self.request_read_timeout_ms)
    }

    pub fn upstream_read_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_read_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    pub fn log_throttle_interval(&self) -> Duration {
        Duration::from_millis(self.log_throttle_interval_ms)
    }
}
