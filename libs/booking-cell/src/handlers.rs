use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use realtime_cell::services::ScheduleSyncBridge;
use schedule_cell::models::ScheduleError;
use shared_config::AppConfig;
use shared_database::StoreError;
use shared_models::auth::User;
use shared_models::error::{AppError, ConflictKind};

use crate::models::{
    Appointment, AppointmentListQuery, BookingError, BookingRequest,
    CancelAppointmentRequest, UpdateStatusRequest,
};
use crate::services::AppointmentBookingService;

fn map_booking_error(err: BookingError) -> AppError {
    match err {
        BookingError::Validation(msg) => AppError::ValidationError(msg),
        // Booking-logic conflicts all surface as 409 with the taxonomy
        // kind leading the message.
        BookingError::NotAvailable(msg) => {
            AppError::Conflict(format!("{}: {}", ConflictKind::NotAvailable, msg))
        }
        BookingError::DoubleBooked(msg) => {
            AppError::Conflict(format!("{}: {}", ConflictKind::DoubleBooked, msg))
        }
        BookingError::StaleAvailability(msg) => {
            AppError::Conflict(format!("{}: {}", ConflictKind::StaleAvailability, msg))
        }
        BookingError::StoreUnavailable(msg) => AppError::ExternalService(msg),
        BookingError::NotFound(msg) => AppError::NotFound(msg),
        BookingError::InvalidTransition { from, to } => AppError::ValidationError(format!(
            "Cannot transition appointment from {} to {}",
            from, to
        )),
        BookingError::Schedule(ScheduleError::ValidationError(msg)) => {
            AppError::ValidationError(msg)
        }
        BookingError::Schedule(ScheduleError::NotFound(msg)) => AppError::NotFound(msg),
        BookingError::Schedule(err) => AppError::Database(err.to_string()),
        BookingError::Store(StoreError::Auth(msg)) => AppError::Auth(msg),
        BookingError::Store(StoreError::NotFound(msg)) => AppError::NotFound(msg),
        BookingError::Store(StoreError::Conflict(msg)) => AppError::Conflict(msg),
        BookingError::Store(StoreError::Unavailable(msg)) => AppError::ExternalService(msg),
        BookingError::Store(err) => AppError::Database(err.to_string()),
        BookingError::Serialization(err) => AppError::Internal(err.to_string()),
    }
}

fn caller_uuid(user: &User) -> Result<Uuid, AppError> {
    Uuid::parse_str(&user.id)
        .map_err(|_| AppError::Auth("Token subject is not a valid user id".to_string()))
}

/// Admins see any appointment; everyone else must be a participant.
fn authorize_participant(user: &User, appointment: &Appointment) -> Result<(), AppError> {
    let is_participant = user.id == appointment.therapist_id.to_string()
        || user.id == appointment.client_id.to_string();

    if !user.is_admin() && !is_participant {
        return Err(AppError::Auth(
            "Not authorized to access this appointment".to_string(),
        ));
    }
    Ok(())
}

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(bridge): Extension<Arc<ScheduleSyncBridge>>,
    Json(mut request): Json<BookingRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    // Non-admins always book for themselves, whatever the body says.
    if !user.is_admin() {
        request.client_id = Some(caller_uuid(&user)?);
    }

    let booking_service = AppointmentBookingService::new(&state).with_bridge(bridge);

    let appointment = booking_service.book_appointment(request, token).await
        .map_err(map_booking_error)?;

    Ok(Json(json!(appointment)))
}

/// Advisory bookability check; never writes, never records conflicts.
#[axum::debug_handler]
pub async fn check_booking(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Json(request): Json<BookingRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let booking_service = AppointmentBookingService::new(&state);

    let verdict = booking_service.check_booking(request, token).await
        .map_err(map_booking_error)?;

    Ok(Json(json!(verdict)))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Query(mut query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    // Non-admins only ever see their own side of the ledger.
    if !user.is_admin() {
        let own_id = caller_uuid(&user)?;
        if user.is_therapist() {
            query.therapist_id = Some(own_id);
        } else {
            query.client_id = Some(own_id);
        }
    }

    let booking_service = AppointmentBookingService::new(&state);

    let appointments = booking_service.list_appointments(query, token).await
        .map_err(map_booking_error)?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let booking_service = AppointmentBookingService::new(&state);

    let appointment = booking_service.get_appointment(appointment_id, token).await
        .map_err(map_booking_error)?;

    authorize_participant(&user, &appointment)?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn update_status(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(bridge): Extension<Arc<ScheduleSyncBridge>>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let booking_service = AppointmentBookingService::new(&state).with_bridge(bridge);

    let current = booking_service.get_appointment(appointment_id, token).await
        .map_err(map_booking_error)?;

    // Only the therapist running the session (or an admin) drives the
    // lifecycle; clients cancel through the cancel endpoint.
    if !user.is_admin() && user.id != current.therapist_id.to_string() {
        return Err(AppError::Auth(
            "Not authorized to change this appointment's status".to_string(),
        ));
    }

    let updated = booking_service.update_status(appointment_id, request.status, token).await
        .map_err(map_booking_error)?;

    Ok(Json(json!(updated)))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(bridge): Extension<Arc<ScheduleSyncBridge>>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();
    let booking_service = AppointmentBookingService::new(&state).with_bridge(bridge);

    let current = booking_service.get_appointment(appointment_id, token).await
        .map_err(map_booking_error)?;

    authorize_participant(&user, &current)?;

    let cancelled = booking_service.cancel_appointment(appointment_id, request, token).await
        .map_err(map_booking_error)?;

    Ok(Json(json!(cancelled)))
}

/// Payment-failure release hook. Admin only; payment infrastructure calls
/// this with a service token when a charge for a pending hold fails.
#[axum::debug_handler]
pub async fn release_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Extension(bridge): Extension<Arc<ScheduleSyncBridge>>,
) -> Result<Json<Value>, AppError> {
    let token = auth.token();

    if !user.is_admin() {
        return Err(AppError::Auth(
            "Only admins may release appointments".to_string(),
        ));
    }

    let booking_service = AppointmentBookingService::new(&state).with_bridge(bridge);

    let released = booking_service.release_on_payment_failure(appointment_id, token).await
        .map_err(map_booking_error)?;

    Ok(Json(json!(released)))
}
