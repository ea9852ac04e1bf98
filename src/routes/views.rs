use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::db::ScopeFilter;
use crate::error::{AppError, AppResult};
use crate::services::audio::AudioGate;
use crate::services::inbox::InboxSnapshot;
use crate::services::notices::Notice;
use crate::services::views::DashboardView;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(mount_view))
        .route("/:id", get(get_view).delete(unmount_view))
        .route("/:id/read/:notification_id", post(mark_one_read))
        .route("/:id/read-all", post(mark_all_read))
        .route(
            "/:id/notifications",
            delete(delete_all_notifications),
        )
        .route(
            "/:id/notifications/:notification_id",
            delete(delete_notification),
        )
        .route("/:id/gesture", post(gesture))
        .route("/:id/notices", get(take_notices))
        .route("/:id/sounds", get(sound_stream))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct MountViewRequest {
    /// Department to watch; omitted, `all` or `*` watches every department.
    pub scope: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MountViewResponse {
    pub id: Uuid,
    pub scope: String,
}

#[derive(Debug, Serialize)]
pub struct ViewResponse {
    pub id: Uuid,
    pub scope: String,
    pub mounted_at: String,
    pub active: bool,
    #[serde(flatten)]
    pub inbox: InboxSnapshot,
}

#[derive(Debug, Serialize)]
pub struct MutationResponse {
    /// How many records the command changed.
    pub affected: usize,
    pub unread_count: usize,
}

#[derive(Debug, Serialize)]
pub struct GestureResponse {
    pub audio: AudioGate,
}

// ============================================================================
// Handlers
// ============================================================================

async fn find_view(state: &AppState, id: &str) -> AppResult<Arc<DashboardView>> {
    let id = Uuid::parse_str(id)
        .map_err(|_| AppError::BadRequest(format!("Invalid view id: {}", id)))?;
    state
        .views
        .get(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("View {} not found", id)))
}

async fn mount_view(
    State(state): State<Arc<AppState>>,
    body: Option<Json<MountViewRequest>>,
) -> (StatusCode, Json<MountViewResponse>) {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let filter = request
        .scope
        .as_deref()
        .map(ScopeFilter::parse)
        .unwrap_or(ScopeFilter::All);

    let view = state
        .views
        .mount(state.store.clone(), filter, &state.config)
        .await;

    (
        StatusCode::CREATED,
        Json(MountViewResponse {
            id: view.id,
            scope: view.filter.to_string(),
        }),
    )
}

async fn get_view(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<ViewResponse>> {
    let view = find_view(&state, &id).await?;
    Ok(Json(ViewResponse {
        id: view.id,
        scope: view.filter.to_string(),
        mounted_at: view.mounted_at.to_rfc3339(),
        active: view.is_active(),
        inbox: view.inbox.snapshot(),
    }))
}

async fn unmount_view(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let view = find_view(&state, &id).await?;
    if state.views.unmount(&view.id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("View {} not found", view.id)))
    }
}

async fn mark_one_read(
    State(state): State<Arc<AppState>>,
    Path((id, notification_id)): Path<(String, String)>,
) -> AppResult<Json<MutationResponse>> {
    let view = find_view(&state, &id).await?;
    let changed = view.inbox.mark_one_read(&notification_id).await?;
    Ok(Json(MutationResponse {
        affected: usize::from(changed),
        unread_count: view.inbox.unread_count(),
    }))
}

async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<MutationResponse>> {
    let view = find_view(&state, &id).await?;
    let affected = view.inbox.mark_all_read().await?;
    Ok(Json(MutationResponse {
        affected,
        unread_count: view.inbox.unread_count(),
    }))
}

async fn delete_notification(
    State(state): State<Arc<AppState>>,
    Path((id, notification_id)): Path<(String, String)>,
) -> AppResult<Json<MutationResponse>> {
    let view = find_view(&state, &id).await?;
    view.inbox.delete_one(&notification_id).await?;
    Ok(Json(MutationResponse {
        affected: 1,
        unread_count: view.inbox.unread_count(),
    }))
}

async fn delete_all_notifications(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<MutationResponse>> {
    let view = find_view(&state, &id).await?;
    let affected = view.inbox.delete_all().await?;
    Ok(Json(MutationResponse {
        affected,
        unread_count: view.inbox.unread_count(),
    }))
}

async fn gesture(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<GestureResponse>> {
    let view = find_view(&state, &id).await?;
    Ok(Json(GestureResponse {
        audio: view.inbox.on_gesture(),
    }))
}

/// Hand the dashboard every toast queued since it last asked.
async fn take_notices(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<Notice>>> {
    let view = find_view(&state, &id).await?;
    Ok(Json(view.inbox.take_notices()))
}

/// Server-sent `play` events for the dashboard to turn into audio. While at
/// least one dashboard is connected here, the view's player succeeds.
async fn sound_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let view = find_view(&state, &id).await?;
    let rx = view.sounds.subscribe();
    tracing::debug!("Dashboard connected to sounds of view {}", view.id);

    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(sound) => {
                    let event = Event::default().event("play").json_data(&sound);
                    return Some((event, rx));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("Sound stream skipped {} stale event(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
