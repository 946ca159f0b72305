//! Slack notification control handlers.

use crate::api::ApiError;
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use vigil_notify::{ManualOutcome, StartOutcome};

/// Response body for `GET /api/slack/status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SlackStatusResponse {
    pub enabled: bool,
    pub bot_token_configured: bool,
    pub channel_configured: bool,
    pub interval_seconds: u64,
    pub task_running: bool,
    pub auto_send_enabled: bool,
    pub sent_records_count: usize,
    pub last_checkpoint: Option<DateTime<Utc>>,
}

/// Query parameters for `POST /api/slack/toggle-auto-send`.
#[derive(Debug, Deserialize)]
pub struct ToggleQuery {
    /// Defaults to `true`.
    pub enabled: Option<bool>,
}

/// Handler for `GET /api/slack/status`.
pub async fn status_handler(Extension(state): Extension<Arc<AppState>>) -> Json<SlackStatusResponse> {
    let status = state.sync_task.status();
    Json(SlackStatusResponse {
        enabled: state.slack.enabled,
        bot_token_configured: state.slack.bot_token_configured(),
        channel_configured: state.slack.channel_configured(),
        interval_seconds: status.interval_seconds,
        task_running: status.running,
        auto_send_enabled: status.auto_send_enabled,
        sent_records_count: status.sent_records_count,
        last_checkpoint: status.last_checkpoint,
    })
}

/// Handler for `POST /api/slack/test-connection`.
pub async fn test_connection_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    state.sync_task.test_connection().await?;
    Ok(Json(json!({
        "status": "success",
        "message": "Slack connection test successful",
    })))
}

/// Handler for `POST /api/slack/send-test-message`.
///
/// Sends the newest records of each kind without marking them sent.
pub async fn send_test_message_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let limit = state.sync_task.settings().snapshot_page_size;
    let (anomalies, unidentified) = state.sync_task.send_snapshot(limit).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!(
            "Test message sent successfully with {} anomalies and {} unidentified parameters",
            anomalies, unidentified
        ),
    })))
}

/// Handler for `POST /api/slack/start-notifications`.
pub async fn start_notifications_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let body = match state.sync_task.start().await? {
        StartOutcome::Started => json!({
            "status": "success",
            "message": "Slack notifications started",
        }),
        StartOutcome::AlreadyRunning => json!({
            "status": "info",
            "message": "Slack notifications are already running",
        }),
    };
    Ok(Json(body))
}

/// Handler for `POST /api/slack/stop-notifications`.
pub async fn stop_notifications_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    if state.sync_task.stop().await {
        Json(json!({
            "status": "success",
            "message": "Slack notifications stopped",
        }))
    } else {
        Json(json!({
            "status": "info",
            "message": "Slack notifications are not running",
        }))
    }
}

/// Handler for `POST /api/slack/send-new-data`.
///
/// Sends only records not yet sent, independent of the schedule and the
/// auto-send setting.
pub async fn send_new_data_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.sync_task.send_manual_update().await?;
    let status = match outcome {
        ManualOutcome::Sent { .. } => "success",
        ManualOutcome::NothingToSend => "no_data",
    };
    Ok(Json(json!({
        "status": status,
        "message": outcome.message(),
    })))
}

/// Handler for `POST /api/slack/toggle-auto-send`.
pub async fn toggle_auto_send_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ToggleQuery>,
) -> Json<Value> {
    let enabled = params.enabled.unwrap_or(true);
    state.sync_task.enable_auto_send(enabled);
    Json(json!({
        "status": "success",
        "message": format!("Auto-send {}", if enabled { "enabled" } else { "disabled" }),
        "auto_send_enabled": enabled,
    }))
}

/// Handler for `POST /api/slack/clear-sent-records`.
pub async fn clear_sent_records_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let cleared = state.sync_task.clear_sent_records();
    Json(json!({
        "status": "success",
        "message": "Cleared sent records tracking",
        "cleared": cleared,
    }))
}
