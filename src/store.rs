//! Notification store: dismissed set, active notification cache and
//! per-alert member-item baselines, all persisted through a
//! [`KeyValueStore`].
//!
//! The server poll, the dismissal log and the active cache can disagree.
//! Rules:
//! - a dismiss is applied in memory and persisted immediately;
//! - a poll may clear a dismissal only once the dismissal is older than the
//!   cooldown, so a response that was in flight before the click cannot
//!   resurrect the banner;
//! - reconcile only adds or refreshes active entries, it never removes them.
//!
//! Storage failures are logged and otherwise ignored: in-memory state stays
//! authoritative for the rest of the process.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::diff::{annotate_new_items, diff_member_items, parse_member_items, ItemDiff};
use crate::kv_store::{load_json, save_json, KeyValueStore, StorageError};
use crate::model::{AlertId, NotificationRecord, TriggeredAlert};

pub const DEFAULT_DISMISS_COOLDOWN_MS: i64 = 10_000;
pub const DISMISSED_NOTIFICATIONS_KEY: &str = "dismissed-notifications";
pub const ACTIVE_NOTIFICATIONS_KEY: &str = "active-notifications";
pub const TRIGGERED_ITEMS_KEY_PREFIX: &str = "triggered-items-";

pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set_ms(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationStoreConfig {
    pub dismiss_cooldown_ms: i64,
    pub dismissed_key: String,
    pub active_key: String,
    pub triggered_items_prefix: String,
}

impl Default for NotificationStoreConfig {
    fn default() -> Self {
        Self {
            dismiss_cooldown_ms: DEFAULT_DISMISS_COOLDOWN_MS,
            dismissed_key: DISMISSED_NOTIFICATIONS_KEY.to_string(),
            active_key: ACTIVE_NOTIFICATIONS_KEY.to_string(),
            triggered_items_prefix: TRIGGERED_ITEMS_KEY_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub upserted: usize,
    pub cleared_dismissals: usize,
    pub suppressed: usize,
    pub new_items: usize,
}

pub type SharedNotificationStore = Arc<Mutex<NotificationStore>>;

pub fn lock_store(store: &SharedNotificationStore) -> MutexGuard<'_, NotificationStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct NotificationStore {
    storage: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    cfg: NotificationStoreConfig,
    dismissed: HashSet<AlertId>,
    recent_dismissals: HashMap<AlertId, i64>,
    active: HashMap<AlertId, NotificationRecord>,
    triggered_items: HashMap<AlertId, HashSet<String>>,
    revision: u64,
}

impl NotificationStore {
    pub fn new(
        storage: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        cfg: NotificationStoreConfig,
    ) -> Self {
        let mut store = Self {
            storage,
            clock,
            cfg,
            dismissed: HashSet::new(),
            recent_dismissals: HashMap::new(),
            active: HashMap::new(),
            triggered_items: HashMap::new(),
            revision: 0,
        };
        store.load_persisted();

        info!(
            component = "notification_store",
            event = "store.opened",
            dismissed = store.dismissed.len(),
            active = store.active.len(),
            cooldown_ms = store.cfg.dismiss_cooldown_ms
        );
        store
    }

    pub fn with_defaults(storage: Arc<dyn KeyValueStore>) -> Self {
        Self::new(
            storage,
            Arc::new(SystemClock),
            NotificationStoreConfig::default(),
        )
    }

    pub fn into_shared(self) -> SharedNotificationStore {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &NotificationStoreConfig {
        &self.cfg
    }

    /// Bumped on every state change; views re-render when it moves.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Re-read persisted state, e.g. when a cached page is restored.
    /// Recent-dismissal timestamps are process state and survive this.
    pub fn restore_from_storage(&mut self) {
        self.triggered_items.clear();
        self.load_persisted();
        self.revision += 1;

        info!(
            component = "notification_store",
            event = "store.restored",
            dismissed = self.dismissed.len(),
            active = self.active.len()
        );
    }

    pub fn dismiss(&mut self, id: &AlertId) {
        self.dismissed.insert(id.clone());
        self.persist_dismissed();

        self.recent_dismissals
            .insert(id.clone(), self.clock.now_ms());

        self.active.remove(id);
        self.persist_active();

        self.revision += 1;
        info!(
            component = "notification_store",
            event = "notification.dismiss",
            alert_id = %id
        );
    }

    pub fn is_dismissed(&self, id: &AlertId) -> bool {
        self.dismissed.contains(id)
    }

    pub fn is_recently_dismissed(&self, id: &AlertId) -> bool {
        self.recent_dismissals
            .get(id)
            .map(|dismissed_at| self.clock.now_ms() - dismissed_at < self.cfg.dismiss_cooldown_ms)
            .unwrap_or(false)
    }

    /// Drop `id` from the dismissed set unless it was dismissed within the
    /// cooldown. Returns whether the dismissal was cleared.
    pub fn clear_dismissal(&mut self, id: &AlertId) -> bool {
        if self.is_recently_dismissed(id) {
            debug!(
                component = "notification_store",
                event = "notification.clear_dismissal.suppressed",
                alert_id = %id
            );
            return false;
        }

        if !self.dismissed.remove(id) {
            return false;
        }
        self.persist_dismissed();
        self.revision += 1;
        true
    }

    pub fn reconcile(&mut self, triggered: &[TriggeredAlert]) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut changed = false;

        for alert in triggered {
            if self.is_dismissed(&alert.id) {
                if self.clear_dismissal(&alert.id) {
                    report.cleared_dismissals += 1;
                } else {
                    report.suppressed += 1;
                    continue;
                }
            }

            let mut record = NotificationRecord::from_triggered(alert, alert.triggered_text.clone());
            if alert.is_all_items {
                if let Some(raw) = &alert.triggered_data {
                    let diff = self.compute_new_items(&alert.id, raw);
                    record.text = annotate_new_items(&alert.triggered_text, diff.new_count);
                    record.new_item_ids = diff.new_item_ids();
                    report.new_items += diff.new_count;
                }
            }

            report.upserted += 1;
            if self.active.get(&alert.id) != Some(&record) {
                self.active.insert(alert.id.clone(), record);
                changed = true;
            }
        }

        if changed {
            self.persist_active();
            self.revision += 1;
        }

        info!(
            component = "notification_store",
            event = "notification.reconcile",
            triggered = triggered.len(),
            upserted = report.upserted,
            cleared_dismissals = report.cleared_dismissals,
            suppressed = report.suppressed,
            new_items = report.new_items
        );
        report
    }

    /// Diff the current member items of an all-items alert against the
    /// previous observation and store the new baseline. Malformed input
    /// yields an empty diff and leaves the baseline untouched.
    pub fn compute_new_items(&mut self, id: &AlertId, raw: &Value) -> ItemDiff {
        let Some(current) = parse_member_items(raw) else {
            warn!(
                component = "notification_store",
                event = "diff.payload.malformed",
                alert_id = %id
            );
            return ItemDiff::default();
        };

        let previous = self.previous_items(id);
        let (diff, baseline) = diff_member_items(&previous, current);
        self.triggered_items.insert(id.clone(), baseline);
        self.persist_triggered_items(id);

        if diff.new_count > 0 {
            debug!(
                component = "notification_store",
                event = "diff.new_items",
                alert_id = %id,
                new_count = diff.new_count,
                total = diff.all_items.len()
            );
        }
        diff
    }

    /// Active notifications that are not dismissed, keyed by id.
    pub fn active_notifications(&self) -> BTreeMap<AlertId, NotificationRecord> {
        self.active
            .iter()
            .filter(|(id, _)| !self.dismissed.contains(*id))
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    pub fn dismissed_ids(&self) -> Vec<AlertId> {
        let mut ids: Vec<AlertId> = self.dismissed.iter().cloned().collect();
        ids.sort();
        ids
    }

    fn previous_items(&mut self, id: &AlertId) -> HashSet<String> {
        if let Some(items) = self.triggered_items.get(id) {
            return items.clone();
        }

        let key = self.triggered_items_key(id);
        let loaded: HashSet<String> = match load_json::<Vec<String>>(self.storage.as_ref(), &key) {
            Ok(items) => items.unwrap_or_default().into_iter().collect(),
            Err(err) => {
                log_load_failure(&key, &err);
                HashSet::new()
            }
        };
        self.triggered_items.insert(id.clone(), loaded.clone());
        loaded
    }

    fn triggered_items_key(&self, id: &AlertId) -> String {
        format!("{}{}", self.cfg.triggered_items_prefix, id)
    }

    fn load_persisted(&mut self) {
        let dismissed_key = self.cfg.dismissed_key.clone();
        self.dismissed = match load_json::<Vec<AlertId>>(self.storage.as_ref(), &dismissed_key) {
            Ok(ids) => ids.unwrap_or_default().into_iter().collect(),
            Err(err) => {
                log_load_failure(&dismissed_key, &err);
                HashSet::new()
            }
        };

        let active_key = self.cfg.active_key.clone();
        self.active = match load_json::<BTreeMap<String, NotificationRecord>>(
            self.storage.as_ref(),
            &active_key,
        ) {
            Ok(records) => records
                .unwrap_or_default()
                .into_iter()
                .map(|(id, record)| (AlertId::from(id), record))
                .collect(),
            Err(err) => {
                log_load_failure(&active_key, &err);
                HashMap::new()
            }
        };
    }

    fn persist_dismissed(&self) {
        let mut ids: Vec<&str> = self.dismissed.iter().map(AlertId::as_str).collect();
        ids.sort_unstable();
        let result = save_json(self.storage.as_ref(), &self.cfg.dismissed_key, &ids);
        log_write_failure(&self.cfg.dismissed_key, result);
    }

    fn persist_active(&self) {
        let records: BTreeMap<&str, &NotificationRecord> = self
            .active
            .iter()
            .map(|(id, record)| (id.as_str(), record))
            .collect();
        let result = save_json(self.storage.as_ref(), &self.cfg.active_key, &records);
        log_write_failure(&self.cfg.active_key, result);
    }

    fn persist_triggered_items(&self, id: &AlertId) {
        let Some(items) = self.triggered_items.get(id) else {
            return;
        };
        let mut sorted: Vec<&String> = items.iter().collect();
        sorted.sort_unstable();

        let key = self.triggered_items_key(id);
        let result = save_json(self.storage.as_ref(), &key, &sorted);
        log_write_failure(&key, result);
    }
}

fn log_write_failure(key: &str, result: Result<(), StorageError>) {
    if let Err(err) = result {
        warn!(
            component = "notification_store",
            event = "notification.storage.write_failed",
            key,
            error = %err
        );
    }
}

fn log_load_failure(key: &str, err: &StorageError) {
    warn!(
        component = "notification_store",
        event = "notification.storage.load_failed",
        key,
        error = %err
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_store::InMemoryKeyValueStore;
    use crate::model::AlertType;
    use serde_json::json;

    fn store_with_clock(kv: &InMemoryKeyValueStore, clock: &ManualClock) -> NotificationStore {
        NotificationStore::new(
            Arc::new(kv.clone()),
            Arc::new(clock.clone()),
            NotificationStoreConfig::default(),
        )
    }

    fn price_alert(id: u64, text: &str) -> TriggeredAlert {
        TriggeredAlert {
            id: AlertId::from(id),
            triggered_text: text.to_string(),
            alert_type: AlertType::Price,
            is_all_items: false,
            triggered_data: None,
        }
    }

    #[test]
    fn recently_dismissed_window_is_half_open() {
        let kv = InMemoryKeyValueStore::new();
        let clock = ManualClock::new(1_000);
        let mut store = store_with_clock(&kv, &clock);
        let id = AlertId::from(1_u64);

        assert!(!store.is_recently_dismissed(&id));
        store.dismiss(&id);

        clock.advance_ms(DEFAULT_DISMISS_COOLDOWN_MS - 1);
        assert!(store.is_recently_dismissed(&id));

        clock.advance_ms(1);
        assert!(!store.is_recently_dismissed(&id));
    }

    #[test]
    fn clear_dismissal_on_unknown_id_is_noop() {
        let kv = InMemoryKeyValueStore::new();
        let clock = ManualClock::new(0);
        let mut store = store_with_clock(&kv, &clock);
        let before = store.revision();

        assert!(!store.clear_dismissal(&AlertId::from("ghost")));
        assert_eq!(store.revision(), before);
    }

    #[test]
    fn reconcile_suppressed_alert_is_not_upserted() {
        let kv = InMemoryKeyValueStore::new();
        let clock = ManualClock::new(0);
        let mut store = store_with_clock(&kv, &clock);
        let id = AlertId::from(5_u64);

        store.dismiss(&id);
        let report = store.reconcile(&[price_alert(5, "Price >= 10")]);

        assert_eq!(report.suppressed, 1);
        assert_eq!(report.upserted, 0);
        assert!(store.active_notifications().is_empty());
    }

    #[test]
    fn unchanged_poll_leaves_revision_alone() {
        let kv = InMemoryKeyValueStore::new();
        let clock = ManualClock::new(0);
        let mut store = store_with_clock(&kv, &clock);

        store.reconcile(&[price_alert(1, "Price >= 10")]);
        let settled = store.revision();

        let report = store.reconcile(&[price_alert(1, "Price >= 10")]);
        assert_eq!(report.upserted, 1);
        assert_eq!(store.revision(), settled);

        store.reconcile(&[]);
        assert_eq!(store.revision(), settled);

        store.reconcile(&[price_alert(1, "Price >= 11")]);
        assert_eq!(store.revision(), settled + 1);
    }

    #[test]
    fn write_failures_degrade_to_memory_only() {
        let kv = InMemoryKeyValueStore::new();
        let clock = ManualClock::new(0);
        let mut store = store_with_clock(&kv, &clock);
        kv.set_fail_writes(true);

        store.reconcile(&[price_alert(9, "Price >= 1")]);
        assert!(store.active_notifications().contains_key(&AlertId::from(9_u64)));

        store.dismiss(&AlertId::from(9_u64));
        assert!(store.is_dismissed(&AlertId::from(9_u64)));
        assert!(kv.keys().is_empty());
    }

    #[test]
    fn corrupt_persisted_state_loads_as_empty() {
        let kv = InMemoryKeyValueStore::new();
        kv.set(DISMISSED_NOTIFICATIONS_KEY, "{oops").unwrap();
        kv.set(ACTIVE_NOTIFICATIONS_KEY, "[1,2]").unwrap();

        let store = store_with_clock(&kv, &ManualClock::new(0));
        assert!(store.dismissed_ids().is_empty());
        assert!(store.active_notifications().is_empty());
    }

    #[test]
    fn all_items_text_is_annotated_only_when_new_items_appear() {
        let kv = InMemoryKeyValueStore::new();
        let mut store = store_with_clock(&kv, &ManualClock::new(0));
        let mut alert = TriggeredAlert {
            id: AlertId::from(7_u64),
            triggered_text: "Spike on all items (2 items matched)".to_string(),
            alert_type: AlertType::Spike,
            is_all_items: true,
            triggered_data: Some(json!([{"item_id": 1}, {"item_id": 2}])),
        };

        store.reconcile(std::slice::from_ref(&alert));
        let first = store.active_notifications()[&alert.id].clone();
        assert_eq!(first.text, "Spike on all items (2 items matched)");
        assert!(first.is_spike_all_items);

        alert.triggered_text = "Spike on all items (3 items matched)".to_string();
        alert.triggered_data = Some(json!("[{\"item_id\":1},{\"item_id\":2},{\"item_id\":3}]"));
        let report = store.reconcile(std::slice::from_ref(&alert));

        let second = store.active_notifications()[&alert.id].clone();
        assert_eq!(report.new_items, 1);
        assert_eq!(second.text, "Spike on all items (1 NEW item matched)");
        assert_eq!(second.new_item_ids, vec!["3".to_string()]);
    }

    #[test]
    fn malformed_member_data_falls_back_to_plain_text() {
        let kv = InMemoryKeyValueStore::new();
        let mut store = store_with_clock(&kv, &ManualClock::new(0));
        let alert = TriggeredAlert {
            id: AlertId::from(11_u64),
            triggered_text: "Spread on all (4 items matched)".to_string(),
            alert_type: AlertType::Spread,
            is_all_items: true,
            triggered_data: Some(json!("garbage")),
        };

        store.reconcile(std::slice::from_ref(&alert));
        let record = store.active_notifications()[&alert.id].clone();
        assert_eq!(record.text, alert.triggered_text);
        assert!(kv
            .get(&format!("{TRIGGERED_ITEMS_KEY_PREFIX}11"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn restore_rereads_storage_and_keeps_cooldown() {
        let kv = InMemoryKeyValueStore::new();
        let clock = ManualClock::new(0);
        let mut store = store_with_clock(&kv, &clock);
        let id = AlertId::from(3_u64);
        store.dismiss(&id);

        kv.set(DISMISSED_NOTIFICATIONS_KEY, "[\"3\",\"4\"]").unwrap();
        store.restore_from_storage();

        assert!(store.is_dismissed(&AlertId::from(4_u64)));
        assert!(store.is_recently_dismissed(&id));
    }
}
