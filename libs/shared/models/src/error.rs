use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("External service error: {0}")]
    ExternalService(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::Database(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::ExternalService(msg) => (StatusCode::BAD_GATEWAY, msg),
        };

        tracing::error!("Error: {}: {}", status, message);

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Classification attached to every rejected booking and every conflict
/// record. Serialized in SCREAMING_SNAKE because these are UI-facing
/// diagnostic codes, not store columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    /// Malformed or out-of-policy input, rejected before touching the store.
    Validation,
    /// The requested slot is not in the resolved set for that date.
    NotAvailable,
    /// An existing non-cancelled appointment overlaps the requested window.
    DoubleBooked,
    /// An override introduced after the slot was rendered now excludes it.
    StaleAvailability,
    /// The backing store could not be reached; safe to retry manually.
    StoreUnavailable,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictKind::Validation => "VALIDATION",
            ConflictKind::NotAvailable => "NOT_AVAILABLE",
            ConflictKind::DoubleBooked => "DOUBLE_BOOKED",
            ConflictKind::StaleAvailability => "STALE_AVAILABILITY",
            ConflictKind::StoreUnavailable => "STORE_UNAVAILABLE",
        };
        write!(f, "{}", s)
    }
}

impl ConflictKind {
    /// Whether re-resolving availability and resubmitting can succeed.
    /// True for every kind except infrastructure failure, which needs the
    /// store back first.
    pub fn is_recoverable_by_resubmit(&self) -> bool {
        !matches!(self, ConflictKind::StoreUnavailable)
    }
}
