use std::sync::Arc;

use axum::{
    extract::Extension,
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;
use crate::services::bridge::ScheduleSyncBridge;

/// Bridge surface, nested under `/realtime`. The bridge singleton rides in
/// as an extension so every route shares one set of buffers.
pub fn realtime_routes(state: Arc<AppConfig>, bridge: Arc<ScheduleSyncBridge>) -> Router {
    Router::new()
        .route("/status", get(handlers::get_status))
        .route("/events", get(handlers::list_events))
        .route("/conflicts", get(handlers::list_conflicts))
        .route("/conflicts/{conflict_id}/acknowledge", post(handlers::acknowledge_conflict))
        .route("/notifications", get(handlers::list_notifications))
        .route("/notifications/{notification_id}/dismiss", post(handlers::dismiss_notification))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(Extension(bridge))
        .with_state(state)
}
