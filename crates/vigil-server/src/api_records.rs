//! Classified record query and ingest handlers.
//!
//! Provides:
//! - `GET /api/anomalies` (filtered, paginated listing with optional Slack sync)
//! - `POST /api/anomalies` (ingest and live publish)
//! - `GET /api/anomalies/recent` and `/api/anomalies/unidentified`
//! - `POST /api/anomalies/sync-to-slack`
//! - `GET /api/anomalies/check-new`

use crate::api::{with_conn, ApiError};
use crate::AppState;
use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use vigil_db::{insert_record, query_records};
use vigil_types::{decode_timestamp, ClassificationKind, ClassifiedEvent, RecordQuery};

/// Query parameters for `GET /api/anomalies`.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: usize,
    /// Maximum records to return (default: 100).
    pub limit: Option<usize>,
    /// `anomaly` or `unidentified`.
    pub classification_type: Option<String>,
    /// Inclusive lower bound (RFC 3339, or naive UTC).
    pub start_time: Option<String>,
    /// Inclusive upper bound (RFC 3339, or naive UTC).
    pub end_time: Option<String>,
    /// Cache this page and forward it to Slack once both kinds are loaded.
    #[serde(default)]
    pub sync_to_slack: bool,
}

/// Request body for `POST /api/anomalies`.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub param_value: String,
    pub classification_type: String,
    /// Defaults to the time of ingest.
    pub timestamp: Option<String>,
}

/// Query parameters for the recent-window routes.
#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    /// Window size in hours, 1..=168 (default: 24).
    pub hours: Option<i64>,
    /// Maximum records, 1..=100 (default: 10).
    pub limit: Option<usize>,
}

/// Query parameters for `POST /api/anomalies/sync-to-slack`.
#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    /// Records per kind, 1..=100 (default: 20).
    pub limit: Option<usize>,
}

/// Query parameters for `GET /api/anomalies/check-new`.
#[derive(Debug, Deserialize)]
pub struct CheckNewQuery {
    /// Defaults to one day ago.
    pub since: Option<String>,
}

/// Response body for `GET /api/anomalies/check-new`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckNewResponse {
    pub has_new_data: bool,
    pub new_anomaly_count: usize,
    pub new_unidentified_count: usize,
    pub checked_since: DateTime<Utc>,
    pub checked_at: DateTime<Utc>,
}

fn parse_kind(value: &str) -> Result<ClassificationKind, ApiError> {
    value
        .parse::<ClassificationKind>()
        .map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Accepts RFC 3339, or a naive `YYYY-MM-DDTHH:MM:SS[.f]` taken as UTC.
fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>, ApiError> {
    if let Ok(ts) = decode_timestamp(value) {
        return Ok(ts);
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| ApiError::BadRequest(format!("invalid {}: {}", field, value)))
}

fn bounded<T: PartialOrd + std::fmt::Display + Copy>(
    field: &str,
    value: Option<T>,
    default: T,
    min: T,
    max: T,
) -> Result<T, ApiError> {
    let value = value.unwrap_or(default);
    if value < min || value > max {
        return Err(ApiError::BadRequest(format!(
            "{} must be between {} and {}",
            field, min, max
        )));
    }
    Ok(value)
}

async fn fetch(state: &AppState, query: RecordQuery) -> Result<Vec<ClassifiedEvent>, ApiError> {
    with_conn(&state.pool, move |conn| query_records(conn, &query)).await
}

/// Handler for `GET /api/anomalies`.
///
/// With `sync_to_slack=true`, an `anomaly` page is held in state and the
/// next `unidentified` page triggers delivery of both. Delivery failures are
/// logged and never fail the query.
pub async fn list_records_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> Result<Json<Vec<ClassifiedEvent>>, ApiError> {
    let kind = params
        .classification_type
        .as_deref()
        .map(parse_kind)
        .transpose()?;
    let since = params
        .start_time
        .as_deref()
        .map(|v| parse_time("start_time", v))
        .transpose()?;
    let until = params
        .end_time
        .as_deref()
        .map(|v| parse_time("end_time", v))
        .transpose()?;

    let query = RecordQuery {
        kind,
        since,
        until,
        offset: params.skip,
        limit: params.limit.unwrap_or(100),
    };
    let records = fetch(&state, query).await?;

    if params.sync_to_slack {
        match kind {
            Some(ClassificationKind::Anomaly) => {
                *state.pending_sync.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(records.clone());
            }
            Some(ClassificationKind::Unidentified) => {
                let anomalies = state
                    .pending_sync
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone()
                    .unwrap_or_default();
                match state
                    .sync_task
                    .deliver_untracked(&anomalies, &records)
                    .await
                {
                    Ok(()) => tracing::info!(
                        anomalies = anomalies.len(),
                        unidentified = records.len(),
                        "sent synchronized data to slack"
                    ),
                    Err(e) if e.is_configuration() => {
                        tracing::debug!(reason = %e, "skipping slack sync for list query");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "error sending synchronized data to slack");
                    }
                }
            }
            None => {}
        }
    }

    Ok(Json(records))
}

/// Handler for `POST /api/anomalies`.
///
/// Persists a classified record and publishes it to live stream observers.
pub async fn ingest_record_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<IngestRequest>,
) -> Result<(StatusCode, Json<ClassifiedEvent>), ApiError> {
    let kind = parse_kind(&payload.classification_type)?;
    let timestamp = payload
        .timestamp
        .as_deref()
        .map(|v| parse_time("timestamp", v))
        .transpose()?;

    let param_value = payload.param_value;
    let record = with_conn(&state.pool, move |conn| {
        insert_record(conn, kind, &param_value, timestamp)
    })
    .await?;

    let observers = state.hub.publish(&record);
    tracing::debug!(
        record_id = record.id,
        kind = %record.classification_type,
        observers,
        "ingested classified record"
    );

    Ok((StatusCode::CREATED, Json(record)))
}

async fn recent(
    state: &AppState,
    kind: ClassificationKind,
    params: RecentQuery,
) -> Result<Json<Vec<ClassifiedEvent>>, ApiError> {
    let hours = bounded("hours", params.hours, 24, 1, 168)?;
    let limit = bounded("limit", params.limit, 10, 1, 100)?;

    let end = Utc::now();
    let query = RecordQuery::newest(kind, limit)
        .since(end - Duration::hours(hours))
        .until(end);
    Ok(Json(fetch(state, query).await?))
}

/// Handler for `GET /api/anomalies/recent`.
pub async fn recent_anomalies_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<RecentQuery>,
) -> Result<Json<Vec<ClassifiedEvent>>, ApiError> {
    recent(&state, ClassificationKind::Anomaly, params).await
}

/// Handler for `GET /api/anomalies/unidentified`.
pub async fn recent_unidentified_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<RecentQuery>,
) -> Result<Json<Vec<ClassifiedEvent>>, ApiError> {
    recent(&state, ClassificationKind::Unidentified, params).await
}

/// Handler for `POST /api/anomalies/sync-to-slack`.
///
/// Sends the newest `limit` records of each kind regardless of what has
/// already been sent.
pub async fn sync_to_slack_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<SyncQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = bounded(
        "limit",
        params.limit,
        state.sync_task.settings().snapshot_page_size,
        1,
        100,
    )?;
    let (anomalies, unidentified) = state.sync_task.send_snapshot(limit).await?;

    Ok(Json(json!({
        "status": "success",
        "message": format!(
            "Synchronized data sent to Slack: {} anomalies, {} unidentified parameters",
            anomalies, unidentified
        ),
    })))
}

/// Handler for `GET /api/anomalies/check-new`.
pub async fn check_new_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<CheckNewQuery>,
) -> Result<Json<CheckNewResponse>, ApiError> {
    let since = match params.since.as_deref() {
        Some(v) => parse_time("since", v)?,
        None => Utc::now() - Duration::days(1),
    };

    let anomalies = fetch(
        &state,
        RecordQuery::newest(ClassificationKind::Anomaly, 1).since(since),
    )
    .await?;
    let unidentified = fetch(
        &state,
        RecordQuery::newest(ClassificationKind::Unidentified, 1).since(since),
    )
    .await?;

    Ok(Json(CheckNewResponse {
        has_new_data: !anomalies.is_empty() || !unidentified.is_empty(),
        new_anomaly_count: anomalies.len(),
        new_unidentified_count: unidentified.len(),
        checked_since: since,
        checked_at: Utc::now(),
    }))
}
