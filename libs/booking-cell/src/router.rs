use std::sync::Arc;

use axum::{
    extract::Extension,
    middleware,
    routing::{get, patch, post},
    Router,
};

use realtime_cell::services::ScheduleSyncBridge;
use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

/// Booking surface, nested under `/bookings`. Everything requires auth;
/// the sync bridge rides in as an extension so commits and conflicts land
/// on the shared buffers.
pub fn booking_routes(state: Arc<AppConfig>, bridge: Arc<ScheduleSyncBridge>) -> Router {
    Router::new()
        .route("/", post(handlers::book_appointment))
        .route("/", get(handlers::list_appointments))
        .route("/check", post(handlers::check_booking))
        .route("/{appointment_id}", get(handlers::get_appointment))
        .route("/{appointment_id}/status", patch(handlers::update_status))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/release", post(handlers::release_appointment))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(Extension(bridge))
        .with_state(state)
}
