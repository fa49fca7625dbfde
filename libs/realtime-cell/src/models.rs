use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use shared_models::error::ConflictKind;

// ==============================================================================
// CHANGE EVENTS
// ==============================================================================

/// The three store collections the bridge watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCollection {
    Availability,
    ScheduleOverrides,
    Appointments,
}

impl ChangeCollection {
    /// Store table backing this collection.
    pub fn table(&self) -> &'static str {
        match self {
            ChangeCollection::Availability => "therapist_availability",
            ChangeCollection::ScheduleOverrides => "schedule_overrides",
            ChangeCollection::Appointments => "appointments",
        }
    }

    pub fn all() -> [ChangeCollection; 3] {
        [
            ChangeCollection::Availability,
            ChangeCollection::ScheduleOverrides,
            ChangeCollection::Appointments,
        ]
    }
}

impl fmt::Display for ChangeCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Created,
    Updated,
}

/// One observed change, fanned out to subscribers. Not a source of truth;
/// consumers re-resolve availability instead of patching local state from
/// the row payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEvent {
    pub id: Uuid,
    pub collection: ChangeCollection,
    pub action: ChangeAction,
    pub therapist_id: Option<Uuid>,
    pub row: Value,
    pub observed_at: DateTime<Utc>,
}

impl ScheduleEvent {
    pub fn new(
        collection: ChangeCollection,
        action: ChangeAction,
        therapist_id: Option<Uuid>,
        row: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            collection,
            action,
            therapist_id,
            row,
            observed_at: Utc::now(),
        }
    }
}

// ==============================================================================
// CONNECTION STATUS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Reconnecting => "reconnecting",
        };
        write!(f, "{}", s)
    }
}

// ==============================================================================
// CONFLICTS & NOTIFICATIONS
// ==============================================================================

/// Ephemeral operator-visibility record. Created on detection, marked
/// resolved on acknowledgement, garbage-collected by the bounded buffer
/// (most-recent N kept). Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: Uuid,
    pub kind: ConflictKind,
    pub involved_appointment_ids: Vec<Uuid>,
    pub message: String,
    pub detected_at: DateTime<Utc>,
    pub resolved: bool,
}

impl ConflictRecord {
    pub fn new(kind: ConflictKind, involved_appointment_ids: Vec<Uuid>, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            involved_appointment_ids,
            message,
            detected_at: Utc::now(),
            resolved: false,
        }
    }
}

/// User-dismissable notification, optionally auto-hidden after a timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncNotification {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub auto_hide_after_seconds: Option<u64>,
}

impl SyncNotification {
    pub fn new(title: &str, body: &str, auto_hide_after_seconds: Option<u64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.to_string(),
            body: body.to_string(),
            created_at: Utc::now(),
            auto_hide_after_seconds,
        }
    }

    /// Auto-hide notifications expire on their timer; sticky ones never do.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.auto_hide_after_seconds {
            Some(secs) => now >= self.created_at + Duration::seconds(secs as i64),
            None => false,
        }
    }
}

// ==============================================================================
// CONFIGURATION
// ==============================================================================

/// Buffer and channel bounds for the bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub event_buffer_size: usize,
    pub conflict_buffer_size: usize,
    pub notification_buffer_size: usize,
    pub channel_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 100,
            conflict_buffer_size: 50,
            notification_buffer_size: 50,
            channel_capacity: 256,
        }
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] shared_database::StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
