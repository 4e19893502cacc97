//! API route definitions.

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use super::error::ApiError;
use super::state::AppState;
use crate::storage::settings::{
    self, AppSettings, BackupSettingsInput, NotificationSettings, SettingsUpdate,
};
use crate::storage;

/// Upper bound on rows returned by the results listing.
const RESULTS_LIMIT: usize = 1000;

/// Largest accepted restore upload.
const RESTORE_BODY_LIMIT: usize = 256 * 1024 * 1024;

type ApiResult<T> = Result<T, ApiError>;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/results", get(list_results).delete(delete_results))
        .route("/results/latest", get(latest_result))
        .route("/export", get(export_results))
        .route("/trigger-test", post(trigger_test))
        .route("/settings", get(get_settings).post(save_settings))
        .route("/servers", get(servers))
        .route("/watchdog", get(watchdog_status))
        .route("/schedule", get(schedule))
        .route(
            "/notifications/settings",
            get(get_notification_settings).post(save_notification_settings),
        )
        .route("/notifications/test", post(test_notification))
        .route("/backup/settings", get(get_backup_settings).post(save_backup_settings))
        .route("/backup/run", post(run_backup))
        .route("/backup", get(download_backup))
        .route(
            "/restore",
            post(restore).layer(DefaultBodyLimit::max(RESTORE_BODY_LIMIT)),
        )
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

async fn list_results(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let rows = storage::list_results(&state.daemon.pool, RESULTS_LIMIT)?;
    Ok(Json(json!(rows)))
}

async fn latest_result(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    match storage::latest_result(&state.daemon.pool)? {
        Some(r) => Ok(Json(json!(r))),
        None => Err(ApiError::NotFound("No results yet".into())),
    }
}

async fn export_results(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let rows = storage::all_results(&state.daemon.pool)?;
    let headers = [
        (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={}", super::export::EXPORT_FILE_NAME),
        ),
    ];
    Ok((headers, super::export::results_csv(&rows)))
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    ids: Vec<String>,
}

async fn delete_results(State(state): State<AppState>, Json(req): Json<DeleteRequest>) -> ApiResult<Json<Value>> {
    let deleted = storage::delete_results(&state.daemon.pool, &req.ids)?;
    info!(deleted, "Results deleted");
    Ok(Json(json!({ "deleted_count": deleted })))
}

// ---------------------------------------------------------------------------
// Speed test trigger
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TriggerRequest {
    server_id: Option<i64>,
    app_language: Option<String>,
}

/// The body is optional; an empty POST runs against the automatic server.
async fn trigger_test(State(state): State<AppState>, body: Bytes) -> ApiResult<(StatusCode, Json<Value>)> {
    let req: TriggerRequest = if body.iter().all(u8::is_ascii_whitespace) {
        TriggerRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("invalid body: {e}")))?
    };
    let server_id = req.server_id.filter(|id| *id > 0);

    if !state.daemon.trigger_test(server_id, req.app_language) {
        return Err(ApiError::TooManyRequests);
    }
    Ok((StatusCode::ACCEPTED, Json(json!({ "message": "Started" }))))
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SettingsView {
    #[serde(flatten)]
    settings: AppSettings,
    latest_test_timestamp: Option<DateTime<Utc>>,
}

async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<SettingsView>> {
    let pool = &state.daemon.pool;
    let settings = settings::load_settings(pool)?;
    let latest_test_timestamp = storage::latest_result(pool)?.map(|r| r.timestamp);
    Ok(Json(SettingsView {
        settings,
        latest_test_timestamp,
    }))
}

async fn save_settings(State(state): State<AppState>, Json(update): Json<SettingsUpdate>) -> ApiResult<Json<Value>> {
    let saved = state.daemon.save_settings(&update)?;
    Ok(Json(json!({
        "message": "Settings saved",
        "interval_changed": saved.interval_changed,
        "settings": saved.settings,
    })))
}

async fn servers(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    Ok(Json(state.daemon.servers.closest_servers().await?))
}

// ---------------------------------------------------------------------------
// Watchdog and schedule
// ---------------------------------------------------------------------------

async fn watchdog_status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let report = state.daemon.watchdog.report(Utc::now()).await?;
    Ok(Json(json!(report)))
}

async fn schedule(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "jobs": state.daemon.scheduler.snapshot(),
        "test_running": state.daemon.test_running(),
    }))
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

async fn get_notification_settings(State(state): State<AppState>) -> ApiResult<Json<NotificationSettings>> {
    Ok(Json(settings::load_notification_settings(&state.daemon.pool)?))
}

async fn save_notification_settings(
    State(state): State<AppState>,
    Json(ns): Json<NotificationSettings>,
) -> ApiResult<Json<Value>> {
    settings::save_notification_settings(&state.daemon.pool, &ns)?;
    Ok(Json(json!({ "message": "Notification settings saved" })))
}

#[derive(Debug, Deserialize)]
struct NotificationTestRequest {
    #[serde(flatten)]
    settings: NotificationSettings,
    language: Option<String>,
}

async fn test_notification(
    State(state): State<AppState>,
    Json(req): Json<NotificationTestRequest>,
) -> ApiResult<Json<Value>> {
    let lang = req.language.as_deref().unwrap_or(crate::i18n::DEFAULT_LANGUAGE);
    state.daemon.dispatcher.send_test(&req.settings, lang).await?;
    Ok(Json(json!({ "message": "Sent" })))
}

// ---------------------------------------------------------------------------
// Backup
// ---------------------------------------------------------------------------

async fn get_backup_settings(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let current = settings::load_backup_settings(&state.daemon.pool)?;
    let next_run = state.daemon.scheduler.next_run(crate::scheduler::tags::BACKUP);
    Ok(Json(json!({ "settings": current, "next_run": next_run })))
}

async fn save_backup_settings(
    State(state): State<AppState>,
    Json(input): Json<BackupSettingsInput>,
) -> ApiResult<Json<Value>> {
    let saved = state.daemon.save_backup_settings(&input)?;
    Ok(Json(json!({ "message": "Backup settings saved", "settings": saved })))
}

async fn run_backup(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let backup = state.daemon.backup.clone();
    tokio::spawn(async move {
        if let Err(e) = backup.perform().await {
            error!(error = %e, "Manual backup failed");
        }
    });
    (StatusCode::ACCEPTED, Json(json!({ "message": "Backup started" })))
}

/// Dump the database on demand and hand it back as a download. Nothing is
/// written to the backup directory.
async fn download_backup(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let sql = state.daemon.backup.dump().await?;
    let name = crate::backup::dump_file_name(chrono::Local::now().naive_local());
    let headers = [
        (header::CONTENT_TYPE, "application/sql".to_string()),
        (header::CONTENT_DISPOSITION, format!("attachment; filename={name}")),
    ];
    Ok((headers, sql))
}

/// The body is the raw SQL dump.
async fn restore(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::BadRequest("empty upload".into()));
    }
    let rows = state.daemon.restore(&body).await?;
    info!(rows, "Database restored from upload");
    Ok(Json(json!({ "message": "Restored", "rows": rows })))
}
