use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::RealtimeError;
use crate::services::bridge::ScheduleSyncBridge;

fn map_realtime_error(err: RealtimeError) -> AppError {
    match err {
        RealtimeError::NotFound(msg) => AppError::NotFound(msg),
        RealtimeError::Store(err) => AppError::Database(err.to_string()),
        RealtimeError::Serialization(err) => AppError::Internal(err.to_string()),
    }
}

#[axum::debug_handler]
pub async fn get_status(
    Extension(bridge): Extension<Arc<ScheduleSyncBridge>>,
) -> Result<Json<Value>, AppError> {
    let status = bridge.status().await;

    Ok(Json(json!({
        "status": status,
        "active_channels": bridge.active_channel_count().await,
        "buffered_events": bridge.recent_events().await.len()
    })))
}

#[axum::debug_handler]
pub async fn list_events(
    Extension(bridge): Extension<Arc<ScheduleSyncBridge>>,
) -> Result<Json<Value>, AppError> {
    let events = bridge.recent_events().await;

    Ok(Json(json!({
        "events": events,
        "total": events.len()
    })))
}

#[axum::debug_handler]
pub async fn list_conflicts(
    Extension(bridge): Extension<Arc<ScheduleSyncBridge>>,
) -> Result<Json<Value>, AppError> {
    let conflicts = bridge.conflicts().await;
    let active = conflicts.iter().filter(|c| !c.resolved).count();

    Ok(Json(json!({
        "conflicts": conflicts,
        "active": active,
        "total": conflicts.len()
    })))
}

#[axum::debug_handler]
pub async fn acknowledge_conflict(
    Extension(bridge): Extension<Arc<ScheduleSyncBridge>>,
    Path(conflict_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let record = bridge.acknowledge_conflict(&conflict_id).await
        .map_err(map_realtime_error)?;

    Ok(Json(json!(record)))
}

#[axum::debug_handler]
pub async fn list_notifications(
    Extension(bridge): Extension<Arc<ScheduleSyncBridge>>,
) -> Result<Json<Value>, AppError> {
    let notifications = bridge.notifications().await;

    Ok(Json(json!({
        "notifications": notifications,
        "total": notifications.len()
    })))
}

#[axum::debug_handler]
pub async fn dismiss_notification(
    Extension(bridge): Extension<Arc<ScheduleSyncBridge>>,
    Path(notification_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    bridge.dismiss_notification(&notification_id).await
        .map_err(map_realtime_error)?;

    Ok(Json(json!({
        "dismissed": notification_id
    })))
}
