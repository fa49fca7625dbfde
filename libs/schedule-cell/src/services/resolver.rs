use std::collections::HashSet;

use chrono::{NaiveDate, NaiveTime, SecondsFormat, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{
    ApplyWeeklyPatternRequest, Availability, BookedWindow, DayResolution, MonthlyRule,
    OverrideKind, RecurrencePattern, ResolveDayQuery, ScheduleError, ScheduleOverride,
    SlotCatalog, WeeklySchedule,
};
use crate::services::catalog::CatalogService;
use crate::services::overrides::{effective_override, OverrideService};
use crate::services::recurrence::{apply_pattern, build_weekly_map};

/// Resolve one therapist-day into its three offering stages.
///
/// `base_slots` is the recurrence pattern intersected with the catalog,
/// `offered_slots` is `base_slots` after the effective override, and
/// `open_slots` is `offered_slots` minus anything colliding with a booked
/// window. Slot ids absent from the catalog are dropped silently at the
/// base stage. All three lists keep the catalog's start-time order.
pub fn resolve_day(
    catalog: &SlotCatalog,
    weekly: &WeeklySchedule,
    pattern: RecurrencePattern,
    monthly_rule: MonthlyRule,
    reference_date: NaiveDate,
    overrides: &[ScheduleOverride],
    booked: &[BookedWindow],
    date: NaiveDate,
) -> DayResolution {
    let candidate_ids = apply_pattern(pattern, monthly_rule, weekly, reference_date, date);

    let base_slots: Vec<_> = catalog
        .get_all()
        .iter()
        .filter(|slot| candidate_ids.contains(&slot.id))
        .cloned()
        .collect();

    let effective = effective_override(date, overrides);
    let offered_slots: Vec<_> = match effective.map(|o| (o.kind, &o.affected_slots)) {
        None => base_slots.clone(),
        Some((OverrideKind::DayOff, _)) => vec![],
        Some((OverrideKind::TimeOff, affected)) => {
            let removed: HashSet<&Uuid> = affected.iter().collect();
            base_slots
                .iter()
                .filter(|slot| !removed.contains(&slot.id))
                .cloned()
                .collect()
        }
        Some((OverrideKind::CustomHours, affected)) => {
            let replacement: HashSet<&Uuid> = affected.iter().collect();
            catalog
                .get_all()
                .iter()
                .filter(|slot| replacement.contains(&slot.id))
                .cloned()
                .collect()
        }
    };

    let open_slots: Vec<_> = offered_slots
        .iter()
        .filter(|slot| {
            let (start, end) = slot.window_on(date);
            !booked.iter().any(|window| window.overlaps(start, end))
        })
        .cloned()
        .collect();

    DayResolution {
        date,
        override_kind: effective.map(|o| o.kind),
        base_slots,
        offered_slots,
        open_slots,
    }
}

/// Row shape for the booked-window query; only the fields the resolver
/// needs.
#[derive(Debug, Deserialize)]
struct BookedRow {
    scheduled_for: chrono::DateTime<Utc>,
    duration_minutes: i32,
}

pub struct AvailabilityService {
    supabase: SupabaseClient,
    catalog: CatalogService,
    overrides: OverrideService,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            catalog: CatalogService::new(config),
            overrides: OverrideService::new(config),
        }
    }

    /// The therapist's stored weekly pattern rows, day-of-week ascending.
    pub async fn get_weekly_pattern(
        &self,
        therapist_id: &Uuid,
        auth_token: Option<&str>,
    ) -> Result<Vec<Availability>, ScheduleError> {
        debug!("Fetching weekly pattern for therapist {}", therapist_id);

        let path = format!(
            "/rest/v1/therapist_availability?therapist_id=eq.{}&order=day_of_week.asc",
            therapist_id
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            auth_token,
            None,
        ).await?;

        let rows: Vec<Availability> = result
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Availability>, _>>()?;

        Ok(rows)
    }

    /// Replace the therapist's weekly pattern wholesale. Entries are
    /// validated against the catalog and deduplicated before the old rows
    /// are deleted, so a rejected request leaves the stored pattern
    /// untouched. An empty entry list clears the pattern.
    pub async fn replace_weekly_pattern(
        &self,
        therapist_id: &Uuid,
        request: ApplyWeeklyPatternRequest,
        auth_token: &str,
    ) -> Result<Vec<Availability>, ScheduleError> {
        debug!(
            "Replacing weekly pattern for therapist {} with {} entries",
            therapist_id,
            request.entries.len()
        );

        let catalog = self.catalog.load_catalog(Some(auth_token)).await?;

        let mut seen: HashSet<(i32, Uuid)> = HashSet::new();
        let mut rows: Vec<Value> = Vec::new();
        for entry in &request.entries {
            if !(0..=6).contains(&entry.day_of_week) {
                return Err(ScheduleError::InvalidDayOfWeek(entry.day_of_week));
            }
            if !catalog.contains(&entry.time_slot_id) {
                return Err(ScheduleError::UnknownTimeSlot(entry.time_slot_id));
            }
            if seen.insert((entry.day_of_week, entry.time_slot_id)) {
                rows.push(json!({
                    "therapist_id": therapist_id,
                    "day_of_week": entry.day_of_week,
                    "time_slot_id": entry.time_slot_id,
                    "created_at": Utc::now().to_rfc3339(),
                    "updated_at": Utc::now().to_rfc3339()
                }));
            }
        }

        let delete_path = format!(
            "/rest/v1/therapist_availability?therapist_id=eq.{}",
            therapist_id
        );
        let _: Vec<Value> = self.supabase.request(
            Method::DELETE,
            &delete_path,
            Some(auth_token),
            None,
        ).await?;

        if rows.is_empty() {
            debug!("Weekly pattern cleared for therapist {}", therapist_id);
            return Ok(vec![]);
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let inserted: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/therapist_availability",
            Some(auth_token),
            Some(Value::Array(rows)),
            Some(headers),
        ).await?;

        let stored: Vec<Availability> = inserted
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Availability>, _>>()?;

        debug!("Stored {} weekly pattern rows", stored.len());
        Ok(stored)
    }

    /// Non-cancelled appointment windows for the therapist on the given
    /// date. Cancelled appointments never block a slot.
    pub async fn booked_windows(
        &self,
        therapist_id: &Uuid,
        date: NaiveDate,
        auth_token: Option<&str>,
    ) -> Result<Vec<BookedWindow>, ScheduleError> {
        let day_start = date
            .and_time(NaiveTime::MIN)
            .and_utc()
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let day_end = (date + chrono::Duration::days(1))
            .and_time(NaiveTime::MIN)
            .and_utc()
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        let path = format!(
            "/rest/v1/appointments?therapist_id=eq.{}&scheduled_for=gte.{}&scheduled_for=lt.{}&status=neq.cancelled&select=scheduled_for,duration_minutes",
            therapist_id, day_start, day_end
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            auth_token,
            None,
        ).await?;

        let windows = result
            .into_iter()
            .map(|row| {
                let row: BookedRow = serde_json::from_value(row)?;
                Ok(BookedWindow::new(row.scheduled_for, row.duration_minutes))
            })
            .collect::<Result<Vec<BookedWindow>, ScheduleError>>()?;

        Ok(windows)
    }

    /// Full pipeline for one therapist-day: catalog, weekly pattern,
    /// override ledger and booked windows are fetched fresh and folded
    /// through `resolve_day`.
    pub async fn resolve_date(
        &self,
        therapist_id: &Uuid,
        date: NaiveDate,
        query: &ResolveDayQuery,
        auth_token: Option<&str>,
    ) -> Result<DayResolution, ScheduleError> {
        debug!("Resolving {} for therapist {}", date, therapist_id);

        let pattern = query.pattern.unwrap_or_default();
        let monthly_rule = query.monthly_rule.unwrap_or_default();
        // The cadence anchor defaults to the requested date itself, so an
        // unanchored biweekly or monthly pattern applies on that date.
        let reference_date = query.reference_date.unwrap_or(date);

        let catalog = self.catalog.load_catalog(auth_token).await?;
        let rows = self.get_weekly_pattern(therapist_id, auth_token).await?;
        let weekly = build_weekly_map(&rows);
        let overrides = self
            .overrides
            .overrides_for_date(therapist_id, date, auth_token)
            .await?;
        let booked = self.booked_windows(therapist_id, date, auth_token).await?;

        let resolution = resolve_day(
            &catalog,
            &weekly,
            pattern,
            monthly_rule,
            reference_date,
            &overrides,
            &booked,
            date,
        );

        debug!(
            "Resolved {}: {} base, {} offered, {} open",
            date,
            resolution.base_slots.len(),
            resolution.offered_slots.len(),
            resolution.open_slots.len()
        );
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeSlot;
    use chrono::Duration;

    fn slot(hour: u32, minute: u32) -> TimeSlot {
        let start = NaiveTime::from_hms_opt(hour, minute, 0).unwrap();
        TimeSlot {
            id: Uuid::new_v4(),
            start_time: start,
            end_time: start + Duration::minutes(50),
            duration_minutes: 50,
            display_name: format!("{:02}:{:02}", hour, minute),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn weekly_for(day_of_week: i32, slots: &[&TimeSlot]) -> WeeklySchedule {
        let mut weekly = WeeklySchedule::default();
        for s in slots {
            weekly.insert(day_of_week, s.id);
        }
        weekly
    }

    fn override_entry(kind: OverrideKind, on: NaiveDate, affected: Vec<Uuid>) -> ScheduleOverride {
        ScheduleOverride {
            id: Uuid::new_v4(),
            therapist_id: Uuid::new_v4(),
            date: on,
            kind,
            reason: "test".to_string(),
            affected_slots: affected,
            is_recurring: false,
            recurring_until: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    // 2025-03-10 is a Monday.
    const MONDAY: (i32, u32, u32) = (2025, 3, 10);

    #[test]
    fn plain_weekly_day_offers_its_base() {
        let (a, b) = (slot(9, 0), slot(10, 0));
        let weekly = weekly_for(1, &[&a, &b]);
        let catalog = SlotCatalog::from_rows(vec![a.clone(), b.clone()]);
        let monday = date(MONDAY.0, MONDAY.1, MONDAY.2);

        let resolution = resolve_day(
            &catalog,
            &weekly,
            RecurrencePattern::Weekly,
            MonthlyRule::SameDayOfMonth,
            monday,
            &[],
            &[],
            monday,
        );

        assert_eq!(resolution.base_slots, vec![a.clone(), b.clone()]);
        assert_eq!(resolution.offered_slots, resolution.base_slots);
        assert_eq!(resolution.open_slots, resolution.base_slots);
        assert_eq!(resolution.override_kind, None);
    }

    #[test]
    fn resolution_is_deterministic() {
        let (a, b) = (slot(9, 0), slot(14, 0));
        let weekly = weekly_for(1, &[&a, &b]);
        let catalog = SlotCatalog::from_rows(vec![b.clone(), a.clone()]);
        let monday = date(MONDAY.0, MONDAY.1, MONDAY.2);

        let first = resolve_day(
            &catalog, &weekly, RecurrencePattern::Weekly, MonthlyRule::SameDayOfMonth,
            monday, &[], &[], monday,
        );
        let second = resolve_day(
            &catalog, &weekly, RecurrencePattern::Weekly, MonthlyRule::SameDayOfMonth,
            monday, &[], &[], monday,
        );

        assert_eq!(first, second);
        // Catalog order, not insertion order.
        assert_eq!(first.base_slots[0].id, a.id);
    }

    #[test]
    fn slot_ids_missing_from_catalog_are_dropped() {
        let a = slot(9, 0);
        let mut weekly = weekly_for(1, &[&a]);
        weekly.insert(1, Uuid::new_v4()); // stale id, slot was removed from the catalog
        let catalog = SlotCatalog::from_rows(vec![a.clone()]);
        let monday = date(MONDAY.0, MONDAY.1, MONDAY.2);

        let resolution = resolve_day(
            &catalog, &weekly, RecurrencePattern::Weekly, MonthlyRule::SameDayOfMonth,
            monday, &[], &[], monday,
        );

        assert_eq!(resolution.base_slots, vec![a]);
    }

    #[test]
    fn day_off_empties_the_offering_but_keeps_the_base() {
        let a = slot(9, 0);
        let weekly = weekly_for(1, &[&a]);
        let catalog = SlotCatalog::from_rows(vec![a.clone()]);
        let monday = date(MONDAY.0, MONDAY.1, MONDAY.2);
        let overrides = vec![override_entry(OverrideKind::DayOff, monday, vec![])];

        let resolution = resolve_day(
            &catalog, &weekly, RecurrencePattern::Weekly, MonthlyRule::SameDayOfMonth,
            monday, &overrides, &[], monday,
        );

        assert_eq!(resolution.base_slots, vec![a]);
        assert!(resolution.offered_slots.is_empty());
        assert!(resolution.open_slots.is_empty());
        assert_eq!(resolution.override_kind, Some(OverrideKind::DayOff));
    }

    #[test]
    fn time_off_subtracts_only_affected_slots() {
        let (a, b) = (slot(9, 0), slot(10, 0));
        let weekly = weekly_for(1, &[&a, &b]);
        let catalog = SlotCatalog::from_rows(vec![a.clone(), b.clone()]);
        let monday = date(MONDAY.0, MONDAY.1, MONDAY.2);
        let overrides = vec![override_entry(OverrideKind::TimeOff, monday, vec![a.id])];

        let resolution = resolve_day(
            &catalog, &weekly, RecurrencePattern::Weekly, MonthlyRule::SameDayOfMonth,
            monday, &overrides, &[], monday,
        );

        assert_eq!(resolution.offered_slots, vec![b]);
    }

    #[test]
    fn custom_hours_replaces_the_base_outright() {
        let (a, b, evening) = (slot(9, 0), slot(10, 0), slot(19, 0));
        let weekly = weekly_for(1, &[&a, &b]);
        let catalog = SlotCatalog::from_rows(vec![a.clone(), b.clone(), evening.clone()]);
        let monday = date(MONDAY.0, MONDAY.1, MONDAY.2);
        // The replacement may name slots outside the base; unknown ids are dropped.
        let overrides = vec![override_entry(
            OverrideKind::CustomHours,
            monday,
            vec![evening.id, Uuid::new_v4()],
        )];

        let resolution = resolve_day(
            &catalog, &weekly, RecurrencePattern::Weekly, MonthlyRule::SameDayOfMonth,
            monday, &overrides, &[], monday,
        );

        assert_eq!(resolution.base_slots, vec![a, b]);
        assert_eq!(resolution.offered_slots, vec![evening]);
    }

    #[test]
    fn booked_windows_close_overlapping_slots_only() {
        let (a, b) = (slot(9, 0), slot(10, 0));
        let weekly = weekly_for(1, &[&a, &b]);
        let catalog = SlotCatalog::from_rows(vec![a.clone(), b.clone()]);
        let monday = date(MONDAY.0, MONDAY.1, MONDAY.2);

        let (a_start, _) = a.window_on(monday);
        let booked = vec![BookedWindow::new(a_start + Duration::minutes(30), 30)];

        let resolution = resolve_day(
            &catalog, &weekly, RecurrencePattern::Weekly, MonthlyRule::SameDayOfMonth,
            monday, &[], &booked, monday,
        );

        // The 09:00 slot collides with the 09:30-10:00 booking; the 10:00
        // slot starts exactly where it ends and stays open.
        assert_eq!(resolution.offered_slots, vec![a.clone(), b.clone()]);
        assert_eq!(resolution.open_slots, vec![b]);
    }

    #[test]
    fn back_to_back_booking_leaves_the_adjacent_slot_open() {
        let (a, b) = (slot(9, 0), slot(9, 50));
        let weekly = weekly_for(1, &[&a, &b]);
        let catalog = SlotCatalog::from_rows(vec![a.clone(), b.clone()]);
        let monday = date(MONDAY.0, MONDAY.1, MONDAY.2);

        let (a_start, _) = a.window_on(monday);
        let booked = vec![BookedWindow::new(a_start, 50)]; // exactly covers slot a

        let resolution = resolve_day(
            &catalog, &weekly, RecurrencePattern::Weekly, MonthlyRule::SameDayOfMonth,
            monday, &[], &booked, monday,
        );

        assert_eq!(resolution.open_slots, vec![b]);
    }

    #[test]
    fn day_without_pattern_resolves_empty() {
        let a = slot(9, 0);
        let weekly = weekly_for(1, &[&a]);
        let catalog = SlotCatalog::from_rows(vec![a.clone()]);
        let tuesday = date(2025, 3, 11);

        let resolution = resolve_day(
            &catalog, &weekly, RecurrencePattern::Weekly, MonthlyRule::SameDayOfMonth,
            tuesday, &[], &[], tuesday,
        );

        assert!(resolution.base_slots.is_empty());
        assert!(resolution.offered_slots.is_empty());
        assert!(resolution.open_slots.is_empty());
    }
}
