//! Subscriber setup and the server's lifecycle events.
//!
//! Everything the store and poll loop log goes through `tracing` with
//! `component` and `event` fields; this module only decides where those
//! records end up and emits the start, bind and shutdown markers.

use std::net::SocketAddr;
use std::str::FromStr;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::DashboardConfig;
use crate::store::NotificationStore;

/// Directive used when the configured one does not parse.
pub const FALLBACK_LOG_DIRECTIVE: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Read from `ALERTDASH_LOG_*` as part of [`DashboardConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `alertdash=debug,info`.
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: FALLBACK_LOG_DIRECTIVE.to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config.level))
        .with_target(config.include_target)
        .with_ansi(config.format == LogFormat::Pretty);

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

fn env_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(FALLBACK_LOG_DIRECTIVE))
}

/// One record with every setting the server runs under.
pub fn log_app_start(cfg: &DashboardConfig) {
    info!(
        component = "alert_dashboard",
        event = "app.start",
        log_level = %cfg.logging.level,
        log_format = cfg.logging.format.as_str(),
        bind_addr = %cfg.bind_addr,
        api_url = %cfg.alerts_api_url,
        poll_interval_ms = cfg.poll_interval_ms,
        dismiss_cooldown_ms = cfg.dismiss_cooldown_ms,
        storage = cfg.storage_backend().as_str(),
        store_path = ?cfg.store_path
    );
}

pub fn log_app_bind(bound_addr: SocketAddr) {
    info!(
        component = "alert_dashboard",
        event = "app.bind",
        bind_addr = %bound_addr,
        route = "/dashboard"
    );
}

/// Final state of the notification store as the server stops.
pub fn log_app_shutdown(store: &NotificationStore) {
    info!(
        component = "alert_dashboard",
        event = "app.shutdown",
        active = store.active_notifications().len(),
        dismissed = store.dismissed_ids().len(),
        revision = store.revision()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use tracing::level_filters::LevelFilter;

    use crate::kv_store::InMemoryKeyValueStore;
    use crate::model::AlertId;

    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn captured(f: impl FnOnce()) -> String {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_ansi(false)
            .with_writer(move || Capture(Arc::clone(&sink)))
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buf.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn log_format_parses_loosely_and_names_unknown_values() {
        assert_eq!(" JSON ".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!(
            "yaml".parse::<LogFormat>(),
            Err("unknown log format 'yaml'".to_string())
        );
    }

    #[test]
    fn unparsable_directive_falls_back_to_info() {
        assert_eq!(env_filter("debug").max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(
            env_filter("alertdash=trace,info").max_level_hint(),
            Some(LevelFilter::TRACE)
        );
        assert_eq!(env_filter("alertdash=loud").max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn app_start_carries_store_and_poll_settings() {
        let cfg = DashboardConfig {
            poll_interval_ms: 7_000,
            dismiss_cooldown_ms: 15_000,
            store_path: Some(PathBuf::from("/var/lib/alertdash/state.sqlite")),
            ..DashboardConfig::default()
        };

        let logs = captured(|| log_app_start(&cfg));

        assert!(logs.contains("\"event\":\"app.start\""));
        assert!(logs.contains("\"poll_interval_ms\":7000"));
        assert!(logs.contains("\"dismiss_cooldown_ms\":15000"));
        assert!(logs.contains("\"storage\":\"sqlite\""));
        assert!(logs.contains("state.sqlite"));
        assert!(logs.contains("\"log_format\":\"pretty\""));
    }

    #[test]
    fn shutdown_reports_final_store_counts() {
        let mut store = NotificationStore::with_defaults(Arc::new(InMemoryKeyValueStore::new()));
        store.dismiss(&AlertId::from(3_u64));

        let logs = captured(|| log_app_shutdown(&store));

        assert!(logs.contains("\"event\":\"app.shutdown\""));
        assert!(logs.contains("\"active\":0"));
        assert!(logs.contains("\"dismissed\":1"));
        assert!(logs.contains(&format!("\"revision\":{}", store.revision())));
    }
}
