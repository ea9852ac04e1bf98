use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{CreateNotification, Notification, NotificationRepository, ScopeFilter};
use crate::error::{AppError, AppErrorWithDetails, AppResult};
use crate::AppState;

const MAX_MESSAGE_CHARS: usize = 2000;
const MAX_SUBJECT_CHARS: usize = 200;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create_notification))
        .route("/stats", get(get_notification_stats))
        .route("/:id", get(get_notification))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    /// Department scope; omitted, `all` or `*` means every scope.
    pub scope: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NotificationStatsResponse {
    pub scope: String,
    pub total: i64,
    pub unread: i64,
    pub by_kind: HashMap<String, i64>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Write a notification. Every view whose scope matches sees it arrive.
async fn create_notification(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateNotification>,
) -> Result<(StatusCode, Json<Notification>), AppErrorWithDetails> {
    let mut problems = Vec::new();
    let message_len = payload.message.chars().count();
    if message_len > MAX_MESSAGE_CHARS {
        problems.push(serde_json::json!({
            "field": "message",
            "max_chars": MAX_MESSAGE_CHARS,
            "actual_chars": message_len,
        }));
    }
    let subject_len = payload.subject_name.chars().count();
    if subject_len > MAX_SUBJECT_CHARS {
        problems.push(serde_json::json!({
            "field": "subject_name",
            "max_chars": MAX_SUBJECT_CHARS,
            "actual_chars": subject_len,
        }));
    }
    if !problems.is_empty() {
        return Err(AppError::Validation("Notification fields are too long".to_string())
            .with_details(serde_json::json!({ "fields": problems })));
    }

    let created = state.store.create(payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_notification(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Notification>> {
    NotificationRepository::find_by_id(&state.db, &id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))
}

/// Totals for a department, straight from the database.
async fn get_notification_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> AppResult<Json<NotificationStatsResponse>> {
    let filter = query
        .scope
        .as_deref()
        .map(ScopeFilter::parse)
        .unwrap_or(ScopeFilter::All);

    let ((total, unread), by_kind) = tokio::try_join!(
        NotificationRepository::count_by_filter(&state.db, &filter),
        NotificationRepository::counts_by_kind(&state.db, &filter)
    )?;

    Ok(Json(NotificationStatsResponse {
        scope: filter.to_string(),
        total,
        unread,
        by_kind,
    }))
}
