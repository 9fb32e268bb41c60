use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alertdash::{
    lock_store, AlertId, AlertType, AlertsFetcher, AlertsResponse, InMemoryKeyValueStore,
    ManualClock, NotificationStore, NotificationStoreConfig, PauseReason, PollConfig, PollError,
    PollLoop, PollOutcome, SharedNotificationStore, TriggeredAlert,
};
use tokio::sync::{oneshot, Notify};

#[derive(Clone, Default)]
struct ScriptedFetcher {
    responses: Arc<Mutex<VecDeque<Result<AlertsResponse, PollError>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedFetcher {
    fn push(&self, response: Result<AlertsResponse, PollError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AlertsFetcher for ScriptedFetcher {
    async fn fetch(&self) -> Result<AlertsResponse, PollError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(AlertsResponse::default()))
    }
}

/// Holds the response until released, like a request still on the wire.
struct GatedFetcher {
    release: Arc<Notify>,
    response: AlertsResponse,
}

impl AlertsFetcher for GatedFetcher {
    async fn fetch(&self) -> Result<AlertsResponse, PollError> {
        self.release.notified().await;
        Ok(self.response.clone())
    }
}

fn shared_store(clock: &ManualClock) -> SharedNotificationStore {
    NotificationStore::new(
        Arc::new(InMemoryKeyValueStore::new()),
        Arc::new(clock.clone()),
        NotificationStoreConfig::default(),
    )
    .into_shared()
}

fn response_with(id: u64, text: &str) -> AlertsResponse {
    AlertsResponse {
        alerts: vec![serde_json::json!({"id": id, "name": "BTC above 100k"})],
        triggered: vec![TriggeredAlert {
            id: AlertId::from(id),
            triggered_text: text.to_string(),
            alert_type: AlertType::Price,
            is_all_items: false,
            triggered_data: None,
        }],
        groups: vec!["crypto".to_string()],
    }
}

async fn wait_for_calls(fetcher: &ScriptedFetcher, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while fetcher.calls() < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("poll loop should reach the expected call count");
}

#[tokio::test]
async fn poll_once_reconciles_and_keeps_latest_payload() {
    let store = shared_store(&ManualClock::new(0));
    let fetcher = ScriptedFetcher::default();
    fetcher.push(Ok(response_with(42, "Price >= 100")));

    let poll = PollLoop::new(fetcher.clone(), Arc::clone(&store), PollConfig::default());
    let outcome = poll.poll_once().await;

    assert!(matches!(outcome, PollOutcome::Reconciled(ref report) if report.upserted == 1));
    assert!(lock_store(&store)
        .active_notifications()
        .contains_key(&AlertId::from(42_u64)));
    assert_eq!(poll.latest_alerts().snapshot().groups, vec!["crypto".to_string()]);
}

#[tokio::test]
async fn paused_loop_issues_no_fetch() {
    let store = shared_store(&ManualClock::new(0));
    let fetcher = ScriptedFetcher::default();
    let poll = PollLoop::new(fetcher.clone(), store, PollConfig::default());

    poll.control().pause_gate().pause(PauseReason::Modal);
    assert_eq!(poll.poll_once().await, PollOutcome::Paused);
    assert_eq!(fetcher.calls(), 0);

    poll.control().pause_gate().resume(PauseReason::Modal);
    assert!(matches!(poll.poll_once().await, PollOutcome::Reconciled(_)));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn fetch_failure_is_logged_and_next_poll_recovers() {
    let store = shared_store(&ManualClock::new(0));
    let fetcher = ScriptedFetcher::default();
    fetcher.push(Err(PollError::Status(503)));
    fetcher.push(Ok(response_with(1, "Price <= 5")));

    let poll = PollLoop::new(fetcher.clone(), Arc::clone(&store), PollConfig::default());

    let failed = poll.poll_once().await;
    assert!(matches!(failed, PollOutcome::Failed(ref msg) if msg.contains("503")));
    assert!(lock_store(&store).active_notifications().is_empty());

    assert!(matches!(poll.poll_once().await, PollOutcome::Reconciled(_)));
    assert_eq!(lock_store(&store).active_notifications().len(), 1);
}

#[tokio::test]
async fn in_flight_response_does_not_resurrect_dismissed_alert() {
    let clock = ManualClock::new(1_000);
    let store = shared_store(&clock);
    let id = AlertId::from(42_u64);
    lock_store(&store).reconcile(&response_with(42, "Price >= 100").triggered);

    let release = Arc::new(Notify::new());
    let poll = PollLoop::new(
        GatedFetcher {
            release: Arc::clone(&release),
            response: response_with(42, "Price >= 100"),
        },
        Arc::clone(&store),
        PollConfig::default(),
    );

    let dismiss_then_release = async {
        lock_store(&store).dismiss(&id);
        clock.advance_ms(2_500);
        release.notify_one();
    };
    let (outcome, ()) = tokio::join!(poll.poll_once(), dismiss_then_release);

    assert!(matches!(outcome, PollOutcome::Reconciled(ref report) if report.suppressed == 1));
    let store = lock_store(&store);
    assert!(store.is_dismissed(&id));
    assert!(!store.active_notifications().contains_key(&id));
}

#[tokio::test]
async fn run_polls_at_start_and_on_refresh_until_shutdown() {
    let store = shared_store(&ManualClock::new(0));
    let fetcher = ScriptedFetcher::default();
    let poll = PollLoop::new(
        fetcher.clone(),
        store,
        PollConfig {
            interval_ms: 60_000,
        },
    );
    let control = poll.control();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(poll.run(async move {
        let _ = stop_rx.await;
    }));

    wait_for_calls(&fetcher, 1).await;
    control.request_refresh();
    wait_for_calls(&fetcher, 2).await;

    stop_tx.send(()).expect("loop should still be running");
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop should stop after shutdown")
        .expect("loop task should not panic");
    assert_eq!(fetcher.calls(), 2);
}
