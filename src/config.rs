//! Environment-driven configuration for the dashboard server.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::observability::{LogFormat, LoggingConfig};
use crate::poll::DEFAULT_POLL_INTERVAL_MS;
use crate::store::DEFAULT_DISMISS_COOLDOWN_MS;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_ALERTS_API_URL: &str = "http://127.0.0.1:5000/api/alerts";
/// Shortest poll period accepted from the environment.
pub const MIN_POLL_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardConfig {
    pub bind_addr: SocketAddr,
    pub alerts_api_url: String,
    pub poll_interval_ms: u64,
    pub dismiss_cooldown_ms: i64,
    /// Sqlite file for notification state; `None` keeps it in memory.
    pub store_path: Option<PathBuf>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend<'a> {
    Memory,
    Sqlite(&'a Path),
}

impl StorageBackend<'_> {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite(_) => "sqlite",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: '{value}'")]
    InvalidValue { var: &'static str, value: String },
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR
                .parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8080))),
            alerts_api_url: DEFAULT_ALERTS_API_URL.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            dismiss_cooldown_ms: DEFAULT_DISMISS_COOLDOWN_MS,
            store_path: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl DashboardConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(raw) = non_blank_var("ALERTDASH_ADDR") {
            cfg.bind_addr = parse_var("ALERTDASH_ADDR", raw)?;
        }
        if let Some(raw) = non_blank_var("ALERTDASH_API_URL") {
            cfg.alerts_api_url = raw;
        }
        if let Some(raw) = non_blank_var("ALERTDASH_POLL_INTERVAL_MS") {
            let interval: u64 = parse_var("ALERTDASH_POLL_INTERVAL_MS", raw.clone())?;
            if interval < MIN_POLL_INTERVAL_MS {
                return Err(ConfigError::InvalidValue {
                    var: "ALERTDASH_POLL_INTERVAL_MS",
                    value: raw,
                });
            }
            cfg.poll_interval_ms = interval;
        }
        if let Some(raw) = non_blank_var("ALERTDASH_DISMISS_COOLDOWN_MS") {
            let cooldown: i64 = parse_var("ALERTDASH_DISMISS_COOLDOWN_MS", raw.clone())?;
            if cooldown < 0 {
                return Err(ConfigError::InvalidValue {
                    var: "ALERTDASH_DISMISS_COOLDOWN_MS",
                    value: raw,
                });
            }
            cfg.dismiss_cooldown_ms = cooldown;
        }
        if let Some(raw) = non_blank_var("ALERTDASH_STORE_PATH") {
            cfg.store_path = Some(PathBuf::from(raw));
        }

        if let Some(raw) = non_blank_var("ALERTDASH_LOG_LEVEL") {
            cfg.logging.level = raw;
        }
        if let Some(raw) = non_blank_var("ALERTDASH_LOG_FORMAT") {
            cfg.logging.format = parse_var::<LogFormat>("ALERTDASH_LOG_FORMAT", raw)?;
        }
        if let Some(raw) = non_blank_var("ALERTDASH_LOG_TARGET") {
            cfg.logging.include_target = parse_flag("ALERTDASH_LOG_TARGET", raw)?;
        }

        Ok(cfg)
    }

    pub fn storage_backend(&self) -> StorageBackend<'_> {
        match &self.store_path {
            Some(path) => StorageBackend::Sqlite(path.as_path()),
            None => StorageBackend::Memory,
        }
    }
}

fn non_blank_var(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}

fn parse_var<T: std::str::FromStr>(var: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::InvalidValue { var, value: raw })
}

fn parse_flag(var: &'static str, raw: String) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { var, value: raw }),
    }
}
