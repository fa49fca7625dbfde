use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use schedule_cell::models::{MonthlyRule, RecurrencePattern};
use shared_models::error::ConflictKind;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub therapist_id: Uuid,
    pub client_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub session_type: SessionType,
    pub payment_amount: f64,
    pub payment_currency: String,
    pub payment_status: PaymentStatus,
    /// Conditional-write key: `{therapist_id}_{unix_start}_{duration}`. The
    /// store holds a partial unique index over non-cancelled rows, so two
    /// concurrent inserts for the same window admit exactly one winner.
    pub slot_key: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn scheduled_end(&self) -> DateTime<Utc> {
        self.scheduled_for + chrono::Duration::minutes(self.duration_minutes as i64)
    }

    /// Half-open overlap against a candidate window.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.scheduled_for < end && start < self.scheduled_end()
    }
}

/// The conditional-write key enforcing at most one winner per window.
pub fn slot_key(therapist_id: &Uuid, scheduled_for: DateTime<Utc>, duration_minutes: i32) -> String {
    format!("{}_{}_{}", therapist_id, scheduled_for.timestamp(), duration_minutes)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::InProgress => write!(f, "in_progress"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Individual,
    Couples,
    Teen,
    Group,
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionType::Individual => write!(f, "individual"),
            SessionType::Couples => write!(f, "couples"),
            SessionType::Teen => write!(f, "teen"),
            SessionType::Group => write!(f, "group"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

/// A booking attempt. Names either a catalog slot (`time_slot_id` + `date`)
/// or a custom range (`start_time` + `duration_minutes`); the recurrence
/// fields must match whatever the picker used to render the day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub therapist_id: Uuid,
    /// Defaults to the authenticated caller; admins may book on behalf of
    /// another client.
    pub client_id: Option<Uuid>,
    pub date: NaiveDate,
    pub time_slot_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i32>,
    pub session_type: SessionType,
    pub payment_amount: Option<f64>,
    pub payment_currency: Option<String>,
    pub notes: Option<String>,
    pub pattern: Option<RecurrencePattern>,
    pub monthly_rule: Option<MonthlyRule>,
    pub reference_date: Option<NaiveDate>,
}

/// The Conflict Detector's full answer; never partially succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingVerdict {
    pub bookable: bool,
    pub kind: Option<ConflictKind>,
    pub message: Option<String>,
    pub conflicting_appointment_ids: Vec<Uuid>,
}

impl BookingVerdict {
    pub fn bookable() -> Self {
        Self {
            bookable: true,
            kind: None,
            message: None,
            conflicting_appointment_ids: vec![],
        }
    }

    pub fn rejected(kind: ConflictKind, message: &str) -> Self {
        Self {
            bookable: false,
            kind: Some(kind),
            message: Some(message.to_string()),
            conflicting_appointment_ids: vec![],
        }
    }

    pub fn double_booked(conflicting_appointment_ids: Vec<Uuid>, message: &str) -> Self {
        Self {
            bookable: false,
            kind: Some(ConflictKind::DoubleBooked),
            message: Some(message.to_string()),
            conflicting_appointment_ids,
        }
    }
}

/// Local booking policy, checked before any store round-trip.
#[derive(Debug, Clone)]
pub struct BookingValidationRules {
    pub min_advance_hours: i64,
    pub max_horizon_days: i64,
    pub min_duration_minutes: i32,
    pub max_duration_minutes: i32,
}

impl Default for BookingValidationRules {
    fn default() -> Self {
        Self {
            min_advance_hours: 2,
            max_horizon_days: 90,
            min_duration_minutes: 20,
            max_duration_minutes: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentListQuery {
    pub therapist_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Slot not available: {0}")]
    NotAvailable(String),

    #[error("Double booked: {0}")]
    DoubleBooked(String),

    #[error("Availability changed underneath the booking: {0}")]
    StaleAvailability(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Appointment not found: {0}")]
    NotFound(String),

    #[error("Cannot transition appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Schedule error: {0}")]
    Schedule(#[from] schedule_cell::models::ScheduleError),

    #[error("Store error: {0}")]
    Store(#[from] shared_database::StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BookingError {
    /// Conflict taxonomy kind, for verdicts and ConflictRecords.
    pub fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            BookingError::Validation(_) => Some(ConflictKind::Validation),
            BookingError::NotAvailable(_) => Some(ConflictKind::NotAvailable),
            BookingError::DoubleBooked(_) => Some(ConflictKind::DoubleBooked),
            BookingError::StaleAvailability(_) => Some(ConflictKind::StaleAvailability),
            BookingError::StoreUnavailable(_) => Some(ConflictKind::StoreUnavailable),
            _ => None,
        }
    }
}
