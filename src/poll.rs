//! Periodic alerts poll feeding the notification store.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::model::AlertsResponse;
use crate::store::{lock_store, ReconcileReport, SharedNotificationStore};

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("alerts request failed: {0}")]
    Transport(String),
    #[error("alerts endpoint returned status {0}")]
    Status(u16),
    #[error("alerts payload could not be decoded: {0}")]
    Decode(String),
}

pub trait AlertsFetcher: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<AlertsResponse, PollError>> + Send;
}

/// Fetches `{alerts, triggered, groups}` from the alerts API. No request
/// timeout is set; a hung request just delays the next tick.
pub struct HttpAlertsFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpAlertsFetcher {
    pub fn new(url: impl Into<String>) -> Result<Self, PollError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| PollError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl AlertsFetcher for HttpAlertsFetcher {
    async fn fetch(&self) -> Result<AlertsResponse, PollError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| PollError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status(status.as_u16()));
        }

        response
            .json::<AlertsResponse>()
            .await
            .map_err(|err| PollError::Decode(err.to_string()))
    }
}

/// UI surfaces that hold the poll loop while open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    Dropdown,
    Modal,
    Search,
    ErrorBanner,
}

impl PauseReason {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "dropdown" => Some(Self::Dropdown),
            "modal" => Some(Self::Modal),
            "search" => Some(Self::Search),
            "error_banner" => Some(Self::ErrorBanner),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dropdown => "dropdown",
            Self::Modal => "modal",
            Self::Search => "search",
            Self::ErrorBanner => "error_banner",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PauseGate {
    reasons: Arc<Mutex<BTreeSet<PauseReason>>>,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self, reason: PauseReason) {
        self.lock().insert(reason);
    }

    pub fn resume(&self, reason: PauseReason) {
        self.lock().remove(&reason);
    }

    pub fn is_paused(&self) -> bool {
        !self.lock().is_empty()
    }

    pub fn active_reasons(&self) -> Vec<PauseReason> {
        self.lock().iter().copied().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<PauseReason>> {
        self.reasons.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Last successful poll payload, for the alert list view.
#[derive(Debug, Clone, Default)]
pub struct LatestAlerts {
    inner: Arc<RwLock<AlertsResponse>>,
}

impl LatestAlerts {
    pub fn replace(&self, response: AlertsResponse) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = response;
    }

    pub fn snapshot(&self) -> AlertsResponse {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Reconciled(ReconcileReport),
    Paused,
    Failed(String),
}

/// Handle the UI side uses to pause the loop or ask for an immediate poll.
#[derive(Debug, Clone)]
pub struct PollControl {
    pause: PauseGate,
    refresh: Arc<Notify>,
}

impl PollControl {
    pub fn pause_gate(&self) -> &PauseGate {
        &self.pause
    }

    pub fn request_refresh(&self) {
        self.refresh.notify_one();
    }
}

pub struct PollLoop<F> {
    fetcher: F,
    store: SharedNotificationStore,
    latest: LatestAlerts,
    control: PollControl,
    cfg: PollConfig,
}

impl<F: AlertsFetcher> PollLoop<F> {
    pub fn new(fetcher: F, store: SharedNotificationStore, cfg: PollConfig) -> Self {
        Self {
            fetcher,
            store,
            latest: LatestAlerts::default(),
            control: PollControl {
                pause: PauseGate::new(),
                refresh: Arc::new(Notify::new()),
            },
            cfg,
        }
    }

    pub fn control(&self) -> PollControl {
        self.control.clone()
    }

    pub fn latest_alerts(&self) -> LatestAlerts {
        self.latest.clone()
    }

    pub async fn poll_once(&self) -> PollOutcome {
        if self.control.pause.is_paused() {
            debug!(
                component = "poll",
                event = "poll.tick.skipped",
                reasons = ?self.control.pause.active_reasons()
            );
            return PollOutcome::Paused;
        }

        let response = match self.fetcher.fetch().await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    component = "poll",
                    event = "poll.fetch.error",
                    error = %err
                );
                return PollOutcome::Failed(err.to_string());
            }
        };

        let report = lock_store(&self.store).reconcile(&response.triggered);
        info!(
            component = "poll",
            event = "poll.reconciled",
            alerts = response.alerts.len(),
            triggered = response.triggered.len(),
            groups = response.groups.len(),
            upserted = report.upserted
        );
        self.latest.replace(response);

        PollOutcome::Reconciled(report)
    }

    /// Poll once immediately, then every interval or whenever a refresh is
    /// requested, until `shutdown` resolves.
    pub async fn run<S>(self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.cfg.interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            component = "poll",
            event = "poll.start",
            interval_ms = self.cfg.interval_ms
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
                _ = self.control.refresh.notified() => {
                    debug!(component = "poll", event = "poll.refresh.requested");
                }
            }
            self.poll_once().await;
        }

        info!(component = "poll", event = "poll.stop");
    }
}
