//! HTTP surface: banner views plus the dismiss, restore, refresh and pause
//! handlers the page calls.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{info, warn};

use crate::model::AlertId;
use crate::poll::{LatestAlerts, PauseReason, PollControl};
use crate::render::{render_banners, render_banners_html, render_dashboard_html};
use crate::store::{lock_store, SharedNotificationStore};

#[derive(Clone)]
pub struct DashboardState {
    store: SharedNotificationStore,
    poll: PollControl,
    latest: LatestAlerts,
    poll_interval_ms: u64,
}

impl DashboardState {
    pub fn new(
        store: SharedNotificationStore,
        poll: PollControl,
        latest: LatestAlerts,
        poll_interval_ms: u64,
    ) -> Self {
        Self {
            store,
            poll,
            latest,
            poll_interval_ms,
        }
    }
}

pub fn dashboard_router(state: DashboardState) -> Router {
    Router::new()
        .route("/dashboard", get(get_dashboard_html))
        .route("/alerts", get(get_alerts))
        .route("/notifications", get(get_notifications))
        .route("/notifications/banners", get(get_banners))
        .route("/notifications/restore", post(post_restore))
        .route("/notifications/{id}/dismiss", post(post_dismiss))
        .route("/poll/refresh", post(post_refresh))
        .route("/poll/pause/{reason}", post(post_pause))
        .route("/poll/resume/{reason}", post(post_resume))
        .with_state(state)
}

async fn get_dashboard_html(State(state): State<DashboardState>) -> impl IntoResponse {
    let store = lock_store(&state.store);
    let banners = render_banners(&store);
    Html(render_dashboard_html(
        &banners,
        store.revision(),
        state.poll_interval_ms,
    ))
}

async fn get_banners(State(state): State<DashboardState>) -> impl IntoResponse {
    let banners = render_banners(&lock_store(&state.store));
    Html(render_banners_html(&banners))
}

async fn get_notifications(State(state): State<DashboardState>) -> impl IntoResponse {
    let store = lock_store(&state.store);
    let notifications = store.active_notifications();
    info!(
        component = "dashboard",
        event = "http.notifications.request",
        count = notifications.len()
    );
    Json(json!({
        "revision": store.revision(),
        "notifications": notifications,
    }))
}

async fn get_alerts(State(state): State<DashboardState>) -> impl IntoResponse {
    Json(state.latest.snapshot())
}

async fn post_dismiss(
    State(state): State<DashboardState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = AlertId::from(id);
    let mut store = lock_store(&state.store);
    store.dismiss(&id);
    info!(
        component = "dashboard",
        event = "http.dismiss.request",
        alert_id = %id
    );
    Json(json!({
        "id": id,
        "dismissed": store.is_dismissed(&id),
        "revision": store.revision(),
    }))
}

async fn post_restore(State(state): State<DashboardState>) -> impl IntoResponse {
    let mut store = lock_store(&state.store);
    store.restore_from_storage();
    Json(json!({ "revision": store.revision() }))
}

async fn post_refresh(State(state): State<DashboardState>) -> impl IntoResponse {
    state.poll.request_refresh();
    StatusCode::ACCEPTED
}

async fn post_pause(State(state): State<DashboardState>, Path(reason): Path<String>) -> Response {
    match PauseReason::parse(&reason) {
        Some(parsed) => {
            state.poll.pause_gate().pause(parsed);
            pause_status(&state)
        }
        None => unknown_reason(&reason),
    }
}

async fn post_resume(State(state): State<DashboardState>, Path(reason): Path<String>) -> Response {
    match PauseReason::parse(&reason) {
        Some(parsed) => {
            state.poll.pause_gate().resume(parsed);
            pause_status(&state)
        }
        None => unknown_reason(&reason),
    }
}

fn pause_status(state: &DashboardState) -> Response {
    let gate = state.poll.pause_gate();
    Json(json!({
        "paused": gate.is_paused(),
        "reasons": gate.active_reasons(),
    }))
    .into_response()
}

fn unknown_reason(reason: &str) -> Response {
    warn!(
        component = "dashboard",
        event = "http.pause.unknown_reason",
        reason
    );
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": format!("unknown pause reason '{reason}'") })),
    )
        .into_response()
}
