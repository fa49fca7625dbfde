use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

/// Platform-wide slot catalog, nested under `/slots`.
pub fn slot_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(handlers::list_time_slots))
        .route("/{slot_id}", get(handlers::get_time_slot))
        .with_state(state)
}

/// Per-therapist schedule management, nested under `/availability`.
pub fn availability_routes(state: Arc<AppConfig>) -> Router {
    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/{therapist_id}/days/{date}", get(handlers::resolve_day));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/{therapist_id}/weekly", get(handlers::get_weekly_pattern))
        .route("/{therapist_id}/weekly", put(handlers::replace_weekly_pattern))
        .route("/{therapist_id}/overrides", post(handlers::create_override))
        .route("/{therapist_id}/overrides", get(handlers::list_overrides))
        .route("/{therapist_id}/overrides/{override_id}", delete(handlers::delete_override))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
