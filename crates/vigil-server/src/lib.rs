//! Vigil server library logic.
//!
//! Serves the live anomaly stream, the record query and ingest API, and the
//! Slack notification control surface on top of a shared [`AppState`].

pub mod api;
pub mod api_records;
pub mod api_slack;
pub mod api_stream;
pub mod config;
pub mod hub;
pub mod source;

use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use hub::BroadcastHub;
use serde_json::{json, Value};
use source::DbEventSource;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use vigil_db::DbPool;
use vigil_notify::{SlackConfig, SlackSink, SyncSettings, SyncTask};
use vigil_types::ClassifiedEvent;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Live stream observers.
    pub hub: BroadcastHub,
    /// Slack sync task. Constructed once; started and stopped through the
    /// control routes or at startup.
    pub sync_task: Arc<SyncTask>,
    /// Slack settings, reported by the status route.
    pub slack: SlackConfig,
    /// Idle time before a stream keepalive.
    pub keepalive: Duration,
    /// Anomaly page held by a `sync_to_slack` list query until the matching
    /// unidentified page arrives.
    pub pending_sync: Arc<Mutex<Option<Vec<ClassifiedEvent>>>>,
}

impl AppState {
    /// Builds the state with a Slack sink and a database-backed event source.
    pub fn new(pool: DbPool, slack: SlackConfig, keepalive: Duration) -> Self {
        let source = Arc::new(DbEventSource::new(pool.clone()));
        let sink = Arc::new(SlackSink::new(&slack));
        let sync_task = Arc::new(SyncTask::new(
            source,
            sink,
            SyncSettings::from_config(&slack),
        ));

        Self {
            pool,
            hub: BroadcastHub::new(),
            sync_task,
            slack,
            keepalive,
            pending_sync: Arc::new(Mutex::new(None)),
        }
    }
}

/// Graceful-shutdown hook: ends live streams so their connections can
/// finish, then stops the sync task and waits for any in-flight delivery.
pub async fn drain(state: &AppState) {
    state.hub.close();
    state.sync_task.stop().await;
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let slack_routes = Router::new()
        .route("/api/slack/status", get(api_slack::status_handler))
        .route(
            "/api/slack/test-connection",
            post(api_slack::test_connection_handler),
        )
        .route(
            "/api/slack/send-test-message",
            post(api_slack::send_test_message_handler),
        )
        .route(
            "/api/slack/start-notifications",
            post(api_slack::start_notifications_handler),
        )
        .route(
            "/api/slack/stop-notifications",
            post(api_slack::stop_notifications_handler),
        )
        .route(
            "/api/slack/send-new-data",
            post(api_slack::send_new_data_handler),
        )
        .route(
            "/api/slack/toggle-auto-send",
            post(api_slack::toggle_auto_send_handler),
        )
        .route(
            "/api/slack/clear-sent-records",
            post(api_slack::clear_sent_records_handler),
        );

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/anomalies",
            get(api_records::list_records_handler).post(api_records::ingest_record_handler),
        )
        .route(
            "/api/anomalies/recent",
            get(api_records::recent_anomalies_handler),
        )
        .route(
            "/api/anomalies/unidentified",
            get(api_records::recent_unidentified_handler),
        )
        .route(
            "/api/anomalies/sync-to-slack",
            post(api_records::sync_to_slack_handler),
        )
        .route(
            "/api/anomalies/check-new",
            get(api_records::check_new_handler),
        )
        .route(
            "/api/anomalies/stream",
            get(api_stream::anomaly_stream_handler),
        )
        .merge(slack_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
