use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, SecondsFormat, Utc};
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use realtime_cell::models::{ChangeAction, ChangeCollection, ScheduleEvent};
use realtime_cell::services::ScheduleSyncBridge;
use schedule_cell::models::{BookedWindow, DayResolution, SlotCatalog, WeeklySchedule};
use schedule_cell::models::ScheduleOverride;
use schedule_cell::services::catalog::CatalogService;
use schedule_cell::services::overrides::OverrideService;
use schedule_cell::services::recurrence::build_weekly_map;
use schedule_cell::services::resolver::{resolve_day, AvailabilityService};
use shared_config::AppConfig;
use shared_database::{StoreError, SupabaseClient};
use shared_models::error::ConflictKind;

use crate::models::{
    slot_key, Appointment, AppointmentListQuery, AppointmentStatus, BookingError,
    BookingRequest, BookingValidationRules, BookingVerdict, CancelAppointmentRequest,
    PaymentStatus,
};
use crate::services::conflict::{evaluate, SlotChoice};
use crate::services::lifecycle::AppointmentLifecycleService;

/// Everything the detector needs about one therapist-day, fetched in a
/// single round of concurrent reads so the verdict reflects one snapshot.
struct DaySnapshot {
    catalog: SlotCatalog,
    weekly: WeeklySchedule,
    overrides: Vec<ScheduleOverride>,
    existing: Vec<Appointment>,
}

/// The concrete window a booking request asks for, after the slot choice
/// has been resolved against the catalog.
struct RequestedWindow {
    choice: SlotChoice,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    duration_minutes: i32,
}

/// A request that passed the store-free checks. Custom windows resolve
/// completely up front; a catalog choice carries its slot id until the
/// catalog is loaded.
enum ValidatedRequest {
    Custom(RequestedWindow),
    CatalogSlot(Uuid),
}

pub struct AppointmentBookingService {
    supabase: SupabaseClient,
    catalog: CatalogService,
    availability: AvailabilityService,
    overrides: OverrideService,
    lifecycle: AppointmentLifecycleService,
    validation_rules: BookingValidationRules,
    bridge: Option<Arc<ScheduleSyncBridge>>,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            catalog: CatalogService::new(config),
            availability: AvailabilityService::new(config),
            overrides: OverrideService::new(config),
            lifecycle: AppointmentLifecycleService::new(),
            validation_rules: BookingValidationRules::default(),
            bridge: None,
        }
    }

    /// Wire in the sync bridge so bookings publish change events and
    /// rejected attempts land in the conflict log.
    pub fn with_bridge(mut self, bridge: Arc<ScheduleSyncBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Book an appointment. Availability is re-read at commit time and the
    /// insert carries a slot key covered by a partial unique index, so a
    /// racing booking for the same window loses cleanly instead of
    /// double-writing.
    #[instrument(skip(self, request, auth_token), fields(therapist_id = %request.therapist_id, date = %request.date))]
    pub async fn book_appointment(
        &self,
        request: BookingRequest,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        info!("Booking appointment for therapist {} on {}", request.therapist_id, request.date);

        let client_id = request.client_id.ok_or_else(|| {
            BookingError::Validation("client_id is required".to_string())
        })?;
        let validated = self.validate_request(&request)?;

        let snapshot = self.day_snapshot(request.therapist_id, request.date, auth_token).await?;
        let window = match validated {
            ValidatedRequest::Custom(window) => window,
            ValidatedRequest::CatalogSlot(slot_id) => {
                self.catalog_window(slot_id, &request, &snapshot.catalog)?
            }
        };

        let resolution = self.resolution_for(&request, &snapshot);
        let verdict = evaluate(
            window.choice,
            window.start,
            window.end,
            &resolution,
            &snapshot.existing,
            true,
        );

        if !verdict.bookable {
            return Err(self.reject(&request, verdict).await);
        }

        let now = Utc::now();
        let key = slot_key(&request.therapist_id, window.start, window.duration_minutes);

        let appointment_data = json!({
            "therapist_id": request.therapist_id,
            "client_id": client_id,
            "scheduled_for": window.start.to_rfc3339(),
            "duration_minutes": window.duration_minutes,
            "status": AppointmentStatus::Pending.to_string(),
            "session_type": request.session_type.to_string(),
            "payment_amount": request.payment_amount.unwrap_or(0.0),
            "payment_currency": request.payment_currency.clone().unwrap_or_else(|| "EUR".to_string()),
            "payment_status": PaymentStatus::Pending.to_string(),
            "slot_key": key,
            "notes": request.notes,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = match self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/appointments",
            Some(auth_token),
            Some(appointment_data),
            Some(headers),
        ).await {
            Ok(rows) => rows,
            // The store's unique index on the slot key admits one winner.
            // The loser gets a conflict verdict, never a retry.
            Err(StoreError::Conflict(_)) => {
                let message = "Another booking claimed this slot first";
                warn!("Conditional write lost for slot key {}", key);
                if let Some(bridge) = &self.bridge {
                    bridge.record_conflict(ConflictKind::DoubleBooked, vec![], message).await;
                }
                return Err(BookingError::DoubleBooked(message.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if result.is_empty() {
            return Err(BookingError::StoreUnavailable(
                "Insert returned no representation".to_string(),
            ));
        }

        let appointment: Appointment = serde_json::from_value(result[0].clone())?;

        info!("Appointment {} booked for therapist {} at {}",
              appointment.id, appointment.therapist_id, appointment.scheduled_for);

        self.publish_change(ChangeAction::Created, &appointment).await?;

        Ok(appointment)
    }

    /// Advisory read-path check: same pipeline as booking but nothing is
    /// written and no conflict is recorded. Overridden-away slots report
    /// `NOT_AVAILABLE` here; only the write path calls staleness.
    pub async fn check_booking(
        &self,
        request: BookingRequest,
        auth_token: &str,
    ) -> Result<BookingVerdict, BookingError> {
        debug!("Checking bookability for therapist {} on {}", request.therapist_id, request.date);

        let validated = match self.validate_request(&request) {
            Ok(validated) => validated,
            Err(err) => return Self::verdict_from_error(err),
        };

        let snapshot = self.day_snapshot(request.therapist_id, request.date, auth_token).await?;

        let window = match validated {
            ValidatedRequest::Custom(window) => window,
            ValidatedRequest::CatalogSlot(slot_id) => {
                match self.catalog_window(slot_id, &request, &snapshot.catalog) {
                    Ok(window) => window,
                    Err(err) => return Self::verdict_from_error(err),
                }
            }
        };

        let resolution = self.resolution_for(&request, &snapshot);

        Ok(evaluate(
            window.choice,
            window.start,
            window.end,
            &resolution,
            &snapshot.existing,
            false,
        ))
    }

    /// Drive an appointment through its lifecycle. The transition table is
    /// the single authority; anything it refuses returns the attempted pair.
    pub async fn update_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        debug!("Updating appointment {} status to {}", appointment_id, new_status);

        let current = self.get_appointment(appointment_id, auth_token).await?;
        self.lifecycle.validate_status_transition(current.status, new_status)?;

        let mut update_data = Map::new();
        update_data.insert("status".to_string(), json!(new_status.to_string()));
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let updated = self.patch_appointment(appointment_id, update_data, auth_token).await?;

        if new_status == AppointmentStatus::Confirmed {
            info!("Appointment {} confirmed; video channel {}",
                  updated.id, self.lifecycle.video_channel_id(&updated.id));
        }

        self.publish_change(ChangeAction::Updated, &updated).await?;

        Ok(updated)
    }

    /// Cancel an appointment. Cancelled rows fall out of the slot key's
    /// partial unique index, so the window becomes bookable again.
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        debug!("Cancelling appointment: {}", appointment_id);

        let current = self.get_appointment(appointment_id, auth_token).await?;
        self.lifecycle.validate_status_transition(current.status, AppointmentStatus::Cancelled)?;

        let mut update_data = Map::new();
        update_data.insert("status".to_string(), json!(AppointmentStatus::Cancelled.to_string()));
        if let Some(reason) = request.reason {
            update_data.insert("notes".to_string(), json!(format!("Cancelled: {}", reason)));
        }
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let cancelled = self.patch_appointment(appointment_id, update_data, auth_token).await?;

        info!("Appointment {} cancelled; slot released", appointment_id);
        self.publish_change(ChangeAction::Updated, &cancelled).await?;

        Ok(cancelled)
    }

    /// Release a held slot when payment for it failed. Only pending
    /// appointments hold a slot pre-payment; anything further along goes
    /// through the normal cancellation path.
    pub async fn release_on_payment_failure(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        debug!("Releasing appointment {} after payment failure", appointment_id);

        let current = self.get_appointment(appointment_id, auth_token).await?;

        if current.payment_status != PaymentStatus::Failed {
            return Err(BookingError::Validation(format!(
                "Appointment {} has no failed payment to release",
                appointment_id
            )));
        }
        if current.status != AppointmentStatus::Pending {
            return Err(BookingError::Validation(
                "Only pending appointments are released on payment failure".to_string(),
            ));
        }

        let mut update_data = Map::new();
        update_data.insert("status".to_string(), json!(AppointmentStatus::Cancelled.to_string()));
        update_data.insert("notes".to_string(), json!("Cancelled: payment failed"));
        update_data.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let released = self.patch_appointment(appointment_id, update_data, auth_token).await?;

        info!("Appointment {} released after payment failure", appointment_id);
        self.publish_change(ChangeAction::Updated, &released).await?;

        Ok(released)
    }

    pub async fn get_appointment(
        &self,
        appointment_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        debug!("Fetching appointment: {}", appointment_id);

        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        if result.is_empty() {
            return Err(BookingError::NotFound(appointment_id.to_string()));
        }

        Ok(serde_json::from_value(result[0].clone())?)
    }

    /// List appointments with optional filters, in scheduled order.
    pub async fn list_appointments(
        &self,
        query: AppointmentListQuery,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, BookingError> {
        debug!("Listing appointments with filters: {:?}", query);

        let mut query_parts = Vec::new();

        if let Some(therapist_id) = query.therapist_id {
            query_parts.push(format!("therapist_id=eq.{}", therapist_id));
        }
        if let Some(client_id) = query.client_id {
            query_parts.push(format!("client_id=eq.{}", client_id));
        }
        if let Some(status) = query.status {
            query_parts.push(format!("status=eq.{}", status));
        }
        if let Some(from) = query.from {
            // Offsets like +02:00 survive the query string only encoded.
            let date_str = from.to_rfc3339();
            let encoded_date = urlencoding::encode(&date_str);
            query_parts.push(format!("scheduled_for=gte.{}", encoded_date));
        }
        if let Some(to) = query.to {
            let date_str = to.to_rfc3339();
            let encoded_date = urlencoding::encode(&date_str);
            query_parts.push(format!("scheduled_for=lte.{}", encoded_date));
        }

        let path = format!(
            "/rest/v1/appointments?{}&order=scheduled_for.asc",
            query_parts.join("&")
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        let appointments = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()?;

        Ok(appointments)
    }

    async fn day_snapshot(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<DaySnapshot, BookingError> {
        let (catalog, pattern_rows, overrides, existing) = futures::try_join!(
            async {
                self.catalog.load_catalog(Some(auth_token)).await.map_err(BookingError::from)
            },
            async {
                self.availability
                    .get_weekly_pattern(&therapist_id, Some(auth_token))
                    .await
                    .map_err(BookingError::from)
            },
            async {
                self.overrides
                    .overrides_for_date(&therapist_id, date, Some(auth_token))
                    .await
                    .map_err(BookingError::from)
            },
            self.appointments_for_day(therapist_id, date, auth_token),
        )?;

        Ok(DaySnapshot {
            catalog,
            weekly: build_weekly_map(&pattern_rows),
            overrides,
            existing,
        })
    }

    /// Non-cancelled appointments for one therapist-day.
    async fn appointments_for_day(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, BookingError> {
        let day_start = date.and_time(NaiveTime::MIN).and_utc();
        let day_end = day_start + ChronoDuration::days(1);

        let path = format!(
            "/rest/v1/appointments?therapist_id=eq.{}&scheduled_for=gte.{}&scheduled_for=lt.{}&status=neq.cancelled",
            therapist_id,
            day_start.to_rfc3339_opts(SecondsFormat::Secs, true),
            day_end.to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        let appointments = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()?;

        Ok(appointments)
    }

    /// Store-free validation pass: request shape, the custom window's rules
    /// and its timing. Runs before any store read; catalog-slot requests get
    /// a date-level timing check here and the exact one in `catalog_window`.
    fn validate_request(&self, request: &BookingRequest) -> Result<ValidatedRequest, BookingError> {
        match (request.time_slot_id, request.start_time) {
            (Some(_), Some(_)) => Err(BookingError::Validation(
                "Provide either time_slot_id or start_time, not both".to_string(),
            )),
            (None, None) => Err(BookingError::Validation(
                "Either time_slot_id or start_time is required".to_string(),
            )),
            (Some(slot_id), None) => {
                self.validate_date_bounds(request.date)?;
                Ok(ValidatedRequest::CatalogSlot(slot_id))
            }
            (None, Some(start)) => {
                let duration = request.duration_minutes.ok_or_else(|| {
                    BookingError::Validation(
                        "duration_minutes is required for custom start times".to_string(),
                    )
                })?;

                let min = self.validation_rules.min_duration_minutes;
                let max = self.validation_rules.max_duration_minutes;
                if !(min..=max).contains(&duration) {
                    return Err(BookingError::Validation(format!(
                        "Duration must be between {} and {} minutes",
                        min, max
                    )));
                }

                if start.date_naive() != request.date {
                    return Err(BookingError::Validation(
                        "start_time must fall on the requested date".to_string(),
                    ));
                }

                self.validate_timing(start)?;

                Ok(ValidatedRequest::Custom(RequestedWindow {
                    choice: SlotChoice::Custom,
                    start,
                    end: start + ChronoDuration::minutes(duration as i64),
                    duration_minutes: duration,
                }))
            }
        }
    }

    /// Resolve a catalog-slot choice once the catalog is in hand. Slot
    /// existence and duration mismatch still classify as validation
    /// failures, they just cannot be checked before the slots are loaded.
    fn catalog_window(
        &self,
        slot_id: Uuid,
        request: &BookingRequest,
        catalog: &SlotCatalog,
    ) -> Result<RequestedWindow, BookingError> {
        let slot = catalog.get_by_id(&slot_id).ok_or_else(|| {
            BookingError::Validation(format!("Unknown time slot {}", slot_id))
        })?;

        if let Some(duration) = request.duration_minutes {
            if duration != slot.duration_minutes {
                return Err(BookingError::Validation(
                    "duration_minutes does not match the selected time slot".to_string(),
                ));
            }
        }

        let (start, end) = slot.window_on(request.date);
        self.validate_timing(start)?;

        Ok(RequestedWindow {
            choice: SlotChoice::Catalog(slot_id),
            start,
            end,
            duration_minutes: slot.duration_minutes,
        })
    }

    /// Date-level advance and horizon bounds for catalog-slot requests,
    /// whose exact start is unknown until the catalog loads. Rejects only
    /// dates no slot could make valid; `validate_timing` rechecks the
    /// resolved start.
    fn validate_date_bounds(&self, date: NaiveDate) -> Result<(), BookingError> {
        let now = Utc::now();
        let day_start = date.and_time(NaiveTime::MIN).and_utc();
        let day_end = day_start + ChronoDuration::days(1);

        if day_end <= now + ChronoDuration::hours(self.validation_rules.min_advance_hours) {
            return Err(BookingError::Validation(format!(
                "Appointments must be booked at least {} hours in advance",
                self.validation_rules.min_advance_hours
            )));
        }

        if day_start >= now + ChronoDuration::days(self.validation_rules.max_horizon_days) {
            return Err(BookingError::Validation(format!(
                "Appointments cannot be booked more than {} days ahead",
                self.validation_rules.max_horizon_days
            )));
        }

        Ok(())
    }

    fn validate_timing(&self, start: DateTime<Utc>) -> Result<(), BookingError> {
        let now = Utc::now();

        let min_advance = ChronoDuration::hours(self.validation_rules.min_advance_hours);
        if start <= now + min_advance {
            return Err(BookingError::Validation(format!(
                "Appointments must be booked at least {} hours in advance",
                self.validation_rules.min_advance_hours
            )));
        }

        let max_horizon = ChronoDuration::days(self.validation_rules.max_horizon_days);
        if start >= now + max_horizon {
            return Err(BookingError::Validation(format!(
                "Appointments cannot be booked more than {} days ahead",
                self.validation_rules.max_horizon_days
            )));
        }

        Ok(())
    }

    fn resolution_for(&self, request: &BookingRequest, snapshot: &DaySnapshot) -> DayResolution {
        let booked: Vec<BookedWindow> = snapshot
            .existing
            .iter()
            .filter(|appointment| appointment.status != AppointmentStatus::Cancelled)
            .map(|appointment| {
                BookedWindow::new(appointment.scheduled_for, appointment.duration_minutes)
            })
            .collect();

        resolve_day(
            &snapshot.catalog,
            &snapshot.weekly,
            request.pattern.unwrap_or_default(),
            request.monthly_rule.unwrap_or_default(),
            request.reference_date.unwrap_or(request.date),
            &snapshot.overrides,
            &booked,
            request.date,
        )
    }

    /// Turn a losing verdict into the matching error, logging it on the
    /// bridge so clients watching the conflict feed see why.
    async fn reject(&self, request: &BookingRequest, verdict: BookingVerdict) -> BookingError {
        let kind = verdict.kind.unwrap_or(ConflictKind::NotAvailable);
        let message = verdict
            .message
            .unwrap_or_else(|| "Booking rejected".to_string());

        warn!("Booking rejected for therapist {} on {}: {}",
              request.therapist_id, request.date, message);

        if let Some(bridge) = &self.bridge {
            bridge
                .record_conflict(kind, verdict.conflicting_appointment_ids.clone(), &message)
                .await;
        }

        match kind {
            ConflictKind::DoubleBooked => BookingError::DoubleBooked(message),
            ConflictKind::StaleAvailability => BookingError::StaleAvailability(message),
            _ => BookingError::NotAvailable(message),
        }
    }

    /// Fold validation failures into the advisory verdict shape so the
    /// check endpoint always answers with a verdict when it can.
    fn verdict_from_error(err: BookingError) -> Result<BookingVerdict, BookingError> {
        match err.conflict_kind() {
            Some(kind) => Ok(BookingVerdict::rejected(kind, &err.to_string())),
            None => Err(err),
        }
    }

    async fn patch_appointment(
        &self,
        appointment_id: Uuid,
        update_data: Map<String, Value>,
        auth_token: &str,
    ) -> Result<Appointment, BookingError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(Value::Object(update_data)),
            Some(headers),
        ).await?;

        if result.is_empty() {
            return Err(BookingError::NotFound(appointment_id.to_string()));
        }

        Ok(serde_json::from_value(result[0].clone())?)
    }

    async fn publish_change(
        &self,
        action: ChangeAction,
        appointment: &Appointment,
    ) -> Result<(), BookingError> {
        if let Some(bridge) = &self.bridge {
            let row = serde_json::to_value(appointment)?;
            bridge
                .publish(ScheduleEvent::new(
                    ChangeCollection::Appointments,
                    action,
                    Some(appointment.therapist_id),
                    row,
                ))
                .await;
        }
        Ok(())
    }
}
