use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use chrono::NaiveDate;
use headers::{authorization::Bearer, Authorization};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::StoreError;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{ApplyWeeklyPatternRequest, CreateOverrideRequest, ResolveDayQuery, ScheduleError};
use crate::services::{AvailabilityService, CatalogService, OverrideService};

#[derive(Debug, Deserialize)]
pub struct OverrideListQuery {
    pub from: Option<NaiveDate>,
}

fn map_schedule_error(err: ScheduleError) -> AppError {
    match err {
        ScheduleError::InvalidDayOfWeek(day) => {
            AppError::ValidationError(format!("day_of_week must be 0..=6, got {}", day))
        }
        ScheduleError::UnknownTimeSlot(id) => {
            AppError::ValidationError(format!("Time slot {} is not in the catalog", id))
        }
        ScheduleError::ValidationError(msg) => AppError::ValidationError(msg),
        ScheduleError::NotFound(msg) => AppError::NotFound(msg),
        ScheduleError::Store(StoreError::Auth(msg)) => AppError::Auth(msg),
        ScheduleError::Store(StoreError::NotFound(msg)) => AppError::NotFound(msg),
        ScheduleError::Store(StoreError::Conflict(msg)) => AppError::Conflict(msg),
        ScheduleError::Store(err) => AppError::Database(err.to_string()),
        ScheduleError::Serialization(err) => AppError::Internal(err.to_string()),
    }
}

/// Therapists may only touch their own schedule; admins may touch any.
fn authorize_schedule_write(user: &User, therapist_id: &Uuid) -> Result<(), AppError> {
    let is_admin = user.role.as_deref() == Some("admin");
    let is_self = user.id == therapist_id.to_string();

    if !is_admin && !is_self {
        return Err(AppError::Auth(
            "Not authorized to manage this therapist's schedule".to_string(),
        ));
    }
    Ok(())
}

// ==============================================================================
// PUBLIC HANDLERS (NO AUTHENTICATION REQUIRED)
// ==============================================================================

#[axum::debug_handler]
pub async fn list_time_slots(
    State(state): State<Arc<AppConfig>>,
) -> Result<Json<Value>, AppError> {
    let catalog_service = CatalogService::new(&state);

    let catalog = catalog_service.load_catalog(None).await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "time_slots": catalog.get_all(),
        "total": catalog.len()
    })))
}

#[axum::debug_handler]
pub async fn get_time_slot(
    State(state): State<Arc<AppConfig>>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let catalog_service = CatalogService::new(&state);

    let slot = catalog_service.get_slot(&slot_id, None).await
        .map_err(|_| AppError::NotFound("Time slot not found".to_string()))?;

    Ok(Json(json!(slot)))
}

/// Resolve one therapist-day for client-facing slot pickers. Returns the
/// full three-stage resolution; pickers render `open_slots`.
#[axum::debug_handler]
pub async fn resolve_day(
    State(state): State<Arc<AppConfig>>,
    Path((therapist_id, date)): Path<(Uuid, NaiveDate)>,
    Query(query): Query<ResolveDayQuery>,
) -> Result<Json<Value>, AppError> {
    let availability_service = AvailabilityService::new(&state);

    let resolution = availability_service.resolve_date(&therapist_id, date, &query, None).await
        .map_err(map_schedule_error)?;

    Ok(Json(json!(resolution)))
}

// ==============================================================================
// PROTECTED HANDLERS (AUTHENTICATION REQUIRED)
// ==============================================================================

#[axum::debug_handler]
pub async fn get_weekly_pattern(
    State(state): State<Arc<AppConfig>>,
    Path(therapist_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let availability_service = AvailabilityService::new(&state);

    let rows = availability_service.get_weekly_pattern(&therapist_id, Some(token)).await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "therapist_id": therapist_id,
        "entries": rows
    })))
}

#[axum::debug_handler]
pub async fn replace_weekly_pattern(
    State(state): State<Arc<AppConfig>>,
    Path(therapist_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<ApplyWeeklyPatternRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    authorize_schedule_write(&user, &therapist_id)?;

    let availability_service = AvailabilityService::new(&state);

    let stored = availability_service.replace_weekly_pattern(&therapist_id, request, token).await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "therapist_id": therapist_id,
        "entries": stored,
        "total": stored.len()
    })))
}

#[axum::debug_handler]
pub async fn create_override(
    State(state): State<Arc<AppConfig>>,
    Path(therapist_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateOverrideRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    authorize_schedule_write(&user, &therapist_id)?;

    let override_service = OverrideService::new(&state);

    let entry = override_service.create_override(&therapist_id, request, token).await
        .map_err(map_schedule_error)?;

    Ok(Json(json!(entry)))
}

#[axum::debug_handler]
pub async fn list_overrides(
    State(state): State<Arc<AppConfig>>,
    Path(therapist_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Query(query): Query<OverrideListQuery>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let override_service = OverrideService::new(&state);

    let overrides = override_service.list_overrides(&therapist_id, query.from, token).await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "therapist_id": therapist_id,
        "overrides": overrides,
        "total": overrides.len()
    })))
}

#[axum::debug_handler]
pub async fn delete_override(
    State(state): State<Arc<AppConfig>>,
    Path((therapist_id, override_id)): Path<(Uuid, Uuid)>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    authorize_schedule_write(&user, &therapist_id)?;

    let override_service = OverrideService::new(&state);

    override_service.delete_override(&therapist_id, &override_id, token).await
        .map_err(map_schedule_error)?;

    Ok(Json(json!({
        "deleted": override_id
    })))
}
