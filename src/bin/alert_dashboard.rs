use std::sync::Arc;

use alertdash::{
    dashboard_router, init_logging, lock_store, log_app_bind, log_app_shutdown, log_app_start,
    DashboardConfig, DashboardState, HttpAlertsFetcher, InMemoryKeyValueStore, KeyValueStore,
    NotificationStore, NotificationStoreConfig, PollConfig, PollLoop, SqliteKeyValueStore,
    StorageBackend, SystemClock,
};
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = DashboardConfig::from_env()?;
    init_logging(&cfg.logging)?;
    log_app_start(&cfg);

    let storage: Arc<dyn KeyValueStore> = match cfg.storage_backend() {
        StorageBackend::Sqlite(path) => Arc::new(SqliteKeyValueStore::open(path)?),
        StorageBackend::Memory => Arc::new(InMemoryKeyValueStore::new()),
    };

    let store = NotificationStore::new(
        storage,
        Arc::new(SystemClock),
        NotificationStoreConfig {
            dismiss_cooldown_ms: cfg.dismiss_cooldown_ms,
            ..NotificationStoreConfig::default()
        },
    )
    .into_shared();

    let poll_loop = PollLoop::new(
        HttpAlertsFetcher::new(cfg.alerts_api_url.clone())?,
        Arc::clone(&store),
        PollConfig {
            interval_ms: cfg.poll_interval_ms,
        },
    );
    let state = DashboardState::new(
        Arc::clone(&store),
        poll_loop.control(),
        poll_loop.latest_alerts(),
        cfg.poll_interval_ms,
    );

    let (stop_poll, poll_stopped) = oneshot::channel::<()>();
    let poll_task = tokio::spawn(poll_loop.run(async move {
        let _ = poll_stopped.await;
    }));

    let app = dashboard_router(state);
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await?;

    let _ = stop_poll.send(());
    poll_task.await?;
    log_app_shutdown(&lock_store(&store));

    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
