use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use booking_cell::router::booking_routes;
use realtime_cell::router::realtime_routes;
use realtime_cell::services::ScheduleSyncBridge;
use schedule_cell::router::{availability_routes, slot_routes};
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>, bridge: Arc<ScheduleSyncBridge>) -> Router {
    Router::new()
        .route("/", get(|| async { "Teletherapy API is running!" }))
        .nest("/slots", slot_routes(state.clone()))
        .nest("/availability", availability_routes(state.clone()))
        .nest("/bookings", booking_routes(state.clone(), bridge.clone()))
        .nest("/realtime", realtime_routes(state.clone(), bridge))
}
