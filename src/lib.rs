//! Triggered-alert notifications for a price-alert dashboard.
//!
//! The store decides which "alert triggered" banners are visible given the
//! periodic server poll, the persisted dismissal log and the persisted
//! active-notification cache:
//! - dismissals are sticky against poll responses that were already in flight
//! - active notifications outlive a poll that transiently omits them
//! - all-items alerts report only members that are new since the last poll

mod config;
mod dashboard;
mod diff;
mod kv_store;
mod model;
mod observability;
mod poll;
mod render;
mod store;

pub use config::{
    ConfigError, DashboardConfig, StorageBackend, DEFAULT_ALERTS_API_URL, DEFAULT_BIND_ADDR,
    MIN_POLL_INTERVAL_MS,
};
pub use dashboard::{dashboard_router, DashboardState};
pub use diff::{annotate_new_items, diff_member_items, parse_member_items, ItemDiff, TriggeredItem};
pub use kv_store::{
    load_json, save_json, InMemoryKeyValueStore, KeyValueStore, SqliteKeyValueStore, StorageError,
};
pub use model::{AlertId, AlertType, AlertsResponse, NotificationRecord, TriggeredAlert};
pub use observability::{
    init_logging, log_app_bind, log_app_shutdown, log_app_start, LogFormat, LoggingConfig,
    LoggingInitError, FALLBACK_LOG_DIRECTIVE,
};
pub use poll::{
    AlertsFetcher, HttpAlertsFetcher, LatestAlerts, PauseGate, PauseReason, PollConfig,
    PollControl, PollError, PollLoop, PollOutcome, DEFAULT_POLL_INTERVAL_MS,
};
pub use render::{
    render_banners, render_banners_html, render_dashboard_html, Banner, BANNER_SLOT_ID,
};
pub use store::{
    lock_store, Clock, ManualClock, NotificationStore, NotificationStoreConfig, ReconcileReport,
    SharedNotificationStore, SystemClock, ACTIVE_NOTIFICATIONS_KEY, DEFAULT_DISMISS_COOLDOWN_MS,
    DISMISSED_NOTIFICATIONS_KEY, TRIGGERED_ITEMS_KEY_PREFIX,
};
