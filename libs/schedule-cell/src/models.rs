use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;

// ==============================================================================
// TIME SLOT CATALOG
// ==============================================================================

/// Platform-wide bookable time-of-day window. Immutable catalog entry,
/// referenced by id everywhere else and never duplicated per therapist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: Uuid,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_minutes: i32,
    pub display_name: String,
}

impl TimeSlot {
    /// Concrete UTC window of this slot on a given date, half-open.
    pub fn window_on(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = date.and_time(self.start_time).and_utc();
        (start, start + Duration::minutes(self.duration_minutes as i64))
    }
}

/// In-memory index over the slot catalog, ordered by start time.
#[derive(Debug, Clone, Default)]
pub struct SlotCatalog {
    slots: Vec<TimeSlot>,
    by_id: HashMap<Uuid, usize>,
}

impl SlotCatalog {
    pub fn from_rows(mut rows: Vec<TimeSlot>) -> Self {
        rows.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        let by_id = rows
            .iter()
            .enumerate()
            .map(|(idx, slot)| (slot.id, idx))
            .collect();
        Self { slots: rows, by_id }
    }

    pub fn get_all(&self) -> &[TimeSlot] {
        &self.slots
    }

    /// Missing ids mean "slot no longer offered"; callers drop them from
    /// derived sets instead of erroring.
    pub fn get_by_id(&self, id: &Uuid) -> Option<&TimeSlot> {
        self.by_id.get(id).map(|idx| &self.slots[*idx])
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// ==============================================================================
// RECURRING AVAILABILITY
// ==============================================================================

/// One row per (weekday, slot) a therapist has opened as part of their
/// standing weekly pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Availability {
    pub id: Uuid,
    pub therapist_id: Uuid,
    pub day_of_week: i32, // 0 = Sunday, 6 = Saturday
    pub time_slot_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Day-of-week to slot-id sets; set semantics deduplicate by construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeeklySchedule {
    days: HashMap<i32, HashSet<Uuid>>,
}

impl WeeklySchedule {
    pub fn insert(&mut self, day_of_week: i32, time_slot_id: Uuid) {
        self.days.entry(day_of_week).or_default().insert(time_slot_id);
    }

    pub fn slots_for(&self, day_of_week: i32) -> Option<&HashSet<Uuid>> {
        self.days.get(&day_of_week)
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    Weekly,
    Biweekly,
    Monthly,
}

impl Default for RecurrencePattern {
    fn default() -> Self {
        RecurrencePattern::Weekly
    }
}

/// How a monthly cadence anchors to its reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonthlyRule {
    SameDayOfMonth,
    SameWeekdayOfMonth,
}

impl Default for MonthlyRule {
    fn default() -> Self {
        MonthlyRule::SameDayOfMonth
    }
}

// ==============================================================================
// SCHEDULE OVERRIDES
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideKind {
    DayOff,
    TimeOff,
    CustomHours,
}

impl fmt::Display for OverrideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideKind::DayOff => write!(f, "day_off"),
            OverrideKind::TimeOff => write!(f, "time_off"),
            OverrideKind::CustomHours => write!(f, "custom_hours"),
        }
    }
}

/// Per-date exception to the standing weekly pattern. `affected_slots` is
/// meaningful only for `time_off` (slots removed) and `custom_hours` (slots
/// replacing the day's normal set); ignored for `day_off`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleOverride {
    pub id: Uuid,
    pub therapist_id: Uuid,
    pub date: NaiveDate,
    pub kind: OverrideKind,
    pub reason: String,
    #[serde(default)]
    pub affected_slots: Vec<Uuid>,
    pub is_recurring: bool,
    pub recurring_until: Option<NaiveDate>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==============================================================================
// RESOLVER OUTPUT
// ==============================================================================

/// A time window already consumed by a non-cancelled appointment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookedWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BookedWindow {
    pub fn new(start: DateTime<Utc>, duration_minutes: i32) -> Self {
        Self {
            start,
            end: start + Duration::minutes(duration_minutes as i64),
        }
    }

    /// Half-open interval overlap; back-to-back windows do not overlap.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && start < self.end
    }
}

/// What one date resolves to, at each stage of the pipeline. `base_slots`
/// is the raw recurring pattern for that date, `offered_slots` has the
/// effective override applied, `open_slots` additionally subtracts windows
/// consumed by existing appointments. All three are catalog-ordered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayResolution {
    pub date: NaiveDate,
    pub override_kind: Option<OverrideKind>,
    pub base_slots: Vec<TimeSlot>,
    pub offered_slots: Vec<TimeSlot>,
    pub open_slots: Vec<TimeSlot>,
}

impl DayResolution {
    pub fn is_offered(&self, slot_id: &Uuid) -> bool {
        self.offered_slots.iter().any(|s| s.id == *slot_id)
    }

    pub fn in_base(&self, slot_id: &Uuid) -> bool {
        self.base_slots.iter().any(|s| s.id == *slot_id)
    }
}

// ==============================================================================
// REQUEST / RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyPatternEntry {
    pub day_of_week: i32,
    pub time_slot_id: Uuid,
}

/// Wholesale replacement of a therapist's standing weekly pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyWeeklyPatternRequest {
    pub entries: Vec<WeeklyPatternEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOverrideRequest {
    pub date: NaiveDate,
    pub kind: OverrideKind,
    pub reason: String,
    pub affected_slots: Option<Vec<Uuid>>,
    pub is_recurring: Option<bool>,
    pub recurring_until: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Query parameters for resolving one date.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResolveDayQuery {
    pub pattern: Option<RecurrencePattern>,
    pub monthly_rule: Option<MonthlyRule>,
    pub reference_date: Option<NaiveDate>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Day of week must be between 0 (Sunday) and 6 (Saturday), got {0}")]
    InvalidDayOfWeek(i32),

    #[error("Time slot {0} is not in the catalog")]
    UnknownTimeSlot(Uuid),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] shared_database::StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
