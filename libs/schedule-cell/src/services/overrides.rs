use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{CreateOverrideRequest, OverrideKind, ScheduleError, ScheduleOverride};
use crate::services::recurrence::weekday_number;

/// Whether an override governs the given date, accounting for recurrence.
fn matches_date(entry: &ScheduleOverride, date: NaiveDate) -> bool {
    if entry.date == date {
        return true;
    }

    if !entry.is_recurring {
        return false;
    }

    if weekday_number(entry.date) != weekday_number(date) {
        return false;
    }

    if date < entry.date {
        return false;
    }

    match entry.recurring_until {
        Some(until) => date <= until,
        None => true,
    }
}

/// Whole-day exclusions dominate replacements, replacements dominate
/// removals.
fn kind_rank(kind: OverrideKind) -> u8 {
    match kind {
        OverrideKind::DayOff => 3,
        OverrideKind::CustomHours => 2,
        OverrideKind::TimeOff => 1,
    }
}

/// The single effective override for a date, if any. This is the only
/// precedence implementation in the codebase; every consumer goes through
/// it. Ties between overrides of the same kind go to the most recently
/// created row.
pub fn effective_override(
    date: NaiveDate,
    overrides: &[ScheduleOverride],
) -> Option<&ScheduleOverride> {
    overrides
        .iter()
        .filter(|entry| matches_date(entry, date))
        .max_by_key(|entry| (kind_rank(entry.kind), entry.created_at))
}

pub struct OverrideService {
    supabase: SupabaseClient,
}

impl OverrideService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    /// Record a new override in the therapist's ledger. Several overrides
    /// may exist for one date; `effective_override` decides which governs.
    pub async fn create_override(
        &self,
        therapist_id: &Uuid,
        request: CreateOverrideRequest,
        auth_token: &str,
    ) -> Result<ScheduleOverride, ScheduleError> {
        debug!("Creating {} override for therapist {} on {}", request.kind, therapist_id, request.date);

        let affected_slots = request.affected_slots.unwrap_or_default();
        match request.kind {
            OverrideKind::TimeOff | OverrideKind::CustomHours => {
                if affected_slots.is_empty() {
                    return Err(ScheduleError::ValidationError(format!(
                        "{} overrides require at least one affected slot",
                        request.kind
                    )));
                }
            }
            OverrideKind::DayOff => {}
        }

        let is_recurring = request.is_recurring.unwrap_or(false);
        if let Some(until) = request.recurring_until {
            if !is_recurring {
                return Err(ScheduleError::ValidationError(
                    "recurring_until is only valid on recurring overrides".to_string(),
                ));
            }
            if until < request.date {
                return Err(ScheduleError::ValidationError(
                    "recurring_until must not be before the override date".to_string(),
                ));
            }
        }

        let override_data = json!({
            "therapist_id": therapist_id,
            "date": request.date,
            "kind": request.kind,
            "reason": request.reason,
            "affected_slots": affected_slots,
            "is_recurring": is_recurring,
            "recurring_until": request.recurring_until,
            "notes": request.notes,
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/schedule_overrides",
            Some(auth_token),
            Some(override_data),
            Some(headers),
        ).await?;

        let created = result
            .into_iter()
            .next()
            .ok_or_else(|| ScheduleError::NotFound("Override was not created".to_string()))?;

        let entry: ScheduleOverride = serde_json::from_value(created)?;
        debug!("Override created with ID: {}", entry.id);
        Ok(entry)
    }

    /// All override rows that could govern the given date: exact-date rows
    /// plus every recurring row (recurrence is resolved in memory by
    /// `effective_override`).
    pub async fn overrides_for_date(
        &self,
        therapist_id: &Uuid,
        date: NaiveDate,
        auth_token: Option<&str>,
    ) -> Result<Vec<ScheduleOverride>, ScheduleError> {
        let path = format!(
            "/rest/v1/schedule_overrides?therapist_id=eq.{}&or=(date.eq.{},is_recurring.eq.true)&order=created_at.asc",
            therapist_id, date
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            auth_token,
            None,
        ).await?;

        let overrides: Vec<ScheduleOverride> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<ScheduleOverride>, _>>()?;

        Ok(overrides)
    }

    /// The therapist's ledger, optionally limited to rows still relevant
    /// on or after `from` (recurring rows always qualify).
    pub async fn list_overrides(
        &self,
        therapist_id: &Uuid,
        from: Option<NaiveDate>,
        auth_token: &str,
    ) -> Result<Vec<ScheduleOverride>, ScheduleError> {
        let path = match from {
            Some(from_date) => format!(
                "/rest/v1/schedule_overrides?therapist_id=eq.{}&or=(date.gte.{},is_recurring.eq.true)&order=date.asc",
                therapist_id, from_date
            ),
            None => format!(
                "/rest/v1/schedule_overrides?therapist_id=eq.{}&order=date.asc",
                therapist_id
            ),
        };

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await?;

        let overrides: Vec<ScheduleOverride> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<ScheduleOverride>, _>>()?;

        Ok(overrides)
    }

    pub async fn delete_override(
        &self,
        therapist_id: &Uuid,
        override_id: &Uuid,
        auth_token: &str,
    ) -> Result<(), ScheduleError> {
        debug!("Deleting override {} for therapist {}", override_id, therapist_id);

        let path = format!(
            "/rest/v1/schedule_overrides?id=eq.{}&therapist_id=eq.{}",
            override_id, therapist_id
        );

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let deleted: Vec<Value> = self.supabase.request_with_headers(
            Method::DELETE,
            &path,
            Some(auth_token),
            None,
            Some(headers),
        ).await?;

        if deleted.is_empty() {
            return Err(ScheduleError::NotFound(format!(
                "Override {} not found",
                override_id
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(
        kind: OverrideKind,
        date: NaiveDate,
        is_recurring: bool,
        recurring_until: Option<NaiveDate>,
        created_offset_minutes: i64,
    ) -> ScheduleOverride {
        let created = Utc::now() + Duration::minutes(created_offset_minutes);
        ScheduleOverride {
            id: Uuid::new_v4(),
            therapist_id: Uuid::new_v4(),
            date,
            kind,
            reason: "test".to_string(),
            affected_slots: vec![],
            is_recurring,
            recurring_until,
            notes: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn exact_date_matches() {
        let overrides = vec![entry(OverrideKind::DayOff, date(2025, 3, 10), false, None, 0)];
        assert!(effective_override(date(2025, 3, 10), &overrides).is_some());
        assert!(effective_override(date(2025, 3, 11), &overrides).is_none());
    }

    #[test]
    fn recurring_matches_same_weekday_within_bound() {
        // 2025-03-10 is a Monday
        let overrides = vec![entry(
            OverrideKind::TimeOff,
            date(2025, 3, 10),
            true,
            Some(date(2025, 4, 7)),
            0,
        )];

        // Mondays inside the window
        assert!(effective_override(date(2025, 3, 17), &overrides).is_some());
        assert!(effective_override(date(2025, 4, 7), &overrides).is_some());
        // Monday past the bound
        assert!(effective_override(date(2025, 4, 14), &overrides).is_none());
        // Tuesday inside the window
        assert!(effective_override(date(2025, 3, 18), &overrides).is_none());
        // Monday before the reference
        assert!(effective_override(date(2025, 3, 3), &overrides).is_none());
    }

    #[test]
    fn recurring_without_bound_is_open_ended() {
        let overrides = vec![entry(OverrideKind::DayOff, date(2025, 3, 10), true, None, 0)];
        assert!(effective_override(date(2026, 3, 9), &overrides).is_some()); // a Monday, a year out
    }

    #[test]
    fn day_off_dominates_custom_hours_and_time_off() {
        let d = date(2025, 3, 10);
        let overrides = vec![
            entry(OverrideKind::TimeOff, d, false, None, 0),
            entry(OverrideKind::DayOff, d, false, None, -10),
            entry(OverrideKind::CustomHours, d, false, None, 5),
        ];

        let winner = effective_override(d, &overrides).unwrap();
        assert_eq!(winner.kind, OverrideKind::DayOff);
    }

    #[test]
    fn custom_hours_dominates_time_off() {
        let d = date(2025, 3, 10);
        let overrides = vec![
            entry(OverrideKind::TimeOff, d, false, None, 10),
            entry(OverrideKind::CustomHours, d, false, None, 0),
        ];

        let winner = effective_override(d, &overrides).unwrap();
        assert_eq!(winner.kind, OverrideKind::CustomHours);
    }

    #[test]
    fn equal_kinds_resolve_to_most_recently_created() {
        let d = date(2025, 3, 10);
        let older = entry(OverrideKind::TimeOff, d, false, None, -30);
        let newer = entry(OverrideKind::TimeOff, d, false, None, 0);
        let newer_id = newer.id;

        let overrides = vec![older, newer];
        let winner = effective_override(d, &overrides).unwrap();
        assert_eq!(winner.id, newer_id);
    }
}
