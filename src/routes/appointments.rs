use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::{Appointment, AppointmentRepository, CreateAppointment};
use crate::error::AppResult;
use crate::services::appointments::AppointmentService;
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(book_appointment))
        .route("/stats", get(get_appointment_stats))
        .route("/:id", delete(cancel_appointment))
        .route("/:id/complete", post(complete_appointment))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub department: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AppointmentStatsResponse {
    pub department: Option<String>,
    pub total: i64,
    pub by_status: HashMap<String, i64>,
}

async fn book_appointment(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateAppointment>,
) -> AppResult<(StatusCode, Json<Appointment>)> {
    let service = AppointmentService::new(&state.db, state.store.as_ref());
    let created = service.book(payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn complete_appointment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Appointment>> {
    let service = AppointmentService::new(&state.db, state.store.as_ref());
    Ok(Json(service.complete(&id).await?))
}

async fn cancel_appointment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Appointment>> {
    let service = AppointmentService::new(&state.db, state.store.as_ref());
    Ok(Json(service.cancel(&id).await?))
}

async fn get_appointment_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> AppResult<Json<AppointmentStatsResponse>> {
    let department = query
        .department
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    let by_status = AppointmentRepository::counts_by_status(&state.db, department.as_deref()).await?;

    Ok(Json(AppointmentStatsResponse {
        department,
        total: by_status.values().sum(),
        by_status,
    }))
}
