use chrono::{DateTime, Utc};
use uuid::Uuid;

use schedule_cell::models::DayResolution;
use shared_models::error::ConflictKind;

use crate::models::{Appointment, AppointmentStatus, BookingVerdict};

/// What the caller picked: a catalog slot or a free-form range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotChoice {
    Catalog(Uuid),
    Custom,
}

/// Half-open interval overlap. Back-to-back windows share a boundary and
/// never overlap.
pub fn windows_overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> bool {
    a_start < b_end && b_start < a_end
}

/// Whether `[start, end)` is fully covered by the union of the given
/// windows. Adjacent windows chain; any gap fails the sweep.
fn union_covers(
    mut windows: Vec<(DateTime<Utc>, DateTime<Utc>)>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> bool {
    if start >= end {
        return false;
    }

    windows.sort_by_key(|w| w.0);

    let mut cursor = start;
    for (w_start, w_end) in windows {
        if w_start > cursor {
            break;
        }
        if w_end > cursor {
            cursor = w_end;
        }
        if cursor >= end {
            return true;
        }
    }
    cursor >= end
}

fn stage_windows(slots: &[schedule_cell::models::TimeSlot], date: chrono::NaiveDate) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    slots.iter().map(|slot| slot.window_on(date)).collect()
}

/// Decide bookability of one candidate window against a fresh resolution
/// and the day's existing appointments. Classification refines the stages:
/// a candidate the pattern never offered is `NOT_AVAILABLE`; one an
/// override removed is `STALE_AVAILABILITY` on the write path (the picker
/// predates the override) and `NOT_AVAILABLE` on the read path; one that
/// collides with a live appointment is `DOUBLE_BOOKED`, with the colliding
/// ids attached. Pure and synchronous; callers fetch state, this decides.
pub fn evaluate(
    choice: SlotChoice,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    resolution: &DayResolution,
    existing: &[Appointment],
    at_commit: bool,
) -> BookingVerdict {
    let offered = match choice {
        SlotChoice::Catalog(slot_id) => resolution.is_offered(&slot_id),
        SlotChoice::Custom => union_covers(stage_windows(&resolution.offered_slots, resolution.date), start, end),
    };

    if !offered {
        let was_in_base = match choice {
            SlotChoice::Catalog(slot_id) => resolution.in_base(&slot_id),
            SlotChoice::Custom => union_covers(stage_windows(&resolution.base_slots, resolution.date), start, end),
        };

        if at_commit && was_in_base {
            return BookingVerdict::rejected(
                ConflictKind::StaleAvailability,
                "An override now excludes this time; refresh availability and pick again",
            );
        }
        return BookingVerdict::rejected(
            ConflictKind::NotAvailable,
            "Requested time is not within the therapist's offered hours for this date",
        );
    }

    let conflicting: Vec<Uuid> = existing
        .iter()
        .filter(|appointment| appointment.status != AppointmentStatus::Cancelled)
        .filter(|appointment| appointment.overlaps(start, end))
        .map(|appointment| appointment.id)
        .collect();

    if !conflicting.is_empty() {
        return BookingVerdict::double_booked(
            conflicting,
            "Another appointment overlaps the requested window",
        );
    }

    BookingVerdict::bookable()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveTime};
    use schedule_cell::models::TimeSlot;

    use crate::models::{PaymentStatus, SessionType};

    fn slot(hour: u32, minute: u32, duration: i32) -> TimeSlot {
        let start = NaiveTime::from_hms_opt(hour, minute, 0).unwrap();
        TimeSlot {
            id: Uuid::new_v4(),
            start_time: start,
            end_time: start + Duration::minutes(duration as i64),
            duration_minutes: duration,
            display_name: format!("{:02}:{:02}", hour, minute),
        }
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn resolution(base: Vec<TimeSlot>, offered: Vec<TimeSlot>) -> DayResolution {
        let open = offered.clone();
        DayResolution {
            date: monday(),
            override_kind: None,
            base_slots: base,
            offered_slots: offered,
            open_slots: open,
        }
    }

    fn appointment_at(hour: u32, minute: u32, duration: i32, status: AppointmentStatus) -> Appointment {
        let start = monday()
            .and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap())
            .and_utc();
        Appointment {
            id: Uuid::new_v4(),
            therapist_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            scheduled_for: start,
            duration_minutes: duration,
            status,
            session_type: SessionType::Individual,
            payment_amount: 80.0,
            payment_currency: "EUR".to_string(),
            payment_status: PaymentStatus::Pending,
            slot_key: crate::models::slot_key(&Uuid::new_v4(), start, duration),
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn window(hour: u32, minute: u32, duration: i32) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = monday()
            .and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap())
            .and_utc();
        (start, start + Duration::minutes(duration as i64))
    }

    #[test]
    fn overlapping_candidate_is_double_booked() {
        let s = slot(10, 30, 50);
        let res = resolution(vec![s.clone()], vec![s.clone()]);
        let existing = vec![appointment_at(10, 0, 50, AppointmentStatus::Confirmed)];

        let (start, end) = window(10, 30, 50);
        let verdict = evaluate(SlotChoice::Catalog(s.id), start, end, &res, &existing, true);

        assert!(!verdict.bookable);
        assert_eq!(verdict.kind, Some(ConflictKind::DoubleBooked));
        assert_eq!(verdict.conflicting_appointment_ids.len(), 1);
        assert_eq!(verdict.conflicting_appointment_ids[0], existing[0].id);
    }

    #[test]
    fn back_to_back_candidate_is_bookable() {
        let s = slot(10, 50, 50);
        let res = resolution(vec![s.clone()], vec![s.clone()]);
        let existing = vec![appointment_at(10, 0, 50, AppointmentStatus::Confirmed)];

        let (start, end) = window(10, 50, 50);
        let verdict = evaluate(SlotChoice::Catalog(s.id), start, end, &res, &existing, true);

        assert!(verdict.bookable);
        assert_eq!(verdict.kind, None);
    }

    #[test]
    fn cancelled_appointments_never_block() {
        let s = slot(9, 0, 50);
        let res = resolution(vec![s.clone()], vec![s.clone()]);
        let existing = vec![appointment_at(9, 0, 50, AppointmentStatus::Cancelled)];

        let (start, end) = window(9, 0, 50);
        let verdict = evaluate(SlotChoice::Catalog(s.id), start, end, &res, &existing, true);

        assert!(verdict.bookable);
    }

    #[test]
    fn completed_appointments_still_block() {
        let s = slot(9, 0, 50);
        let res = resolution(vec![s.clone()], vec![s.clone()]);
        let existing = vec![appointment_at(9, 0, 50, AppointmentStatus::Completed)];

        let (start, end) = window(9, 0, 50);
        let verdict = evaluate(SlotChoice::Catalog(s.id), start, end, &res, &existing, true);

        assert_eq!(verdict.kind, Some(ConflictKind::DoubleBooked));
    }

    #[test]
    fn override_excluded_slot_is_stale_only_at_commit() {
        let s = slot(9, 0, 50);
        // In the base pattern, removed by an override.
        let res = resolution(vec![s.clone()], vec![]);
        let (start, end) = window(9, 0, 50);

        let commit = evaluate(SlotChoice::Catalog(s.id), start, end, &res, &[], true);
        assert_eq!(commit.kind, Some(ConflictKind::StaleAvailability));

        let read = evaluate(SlotChoice::Catalog(s.id), start, end, &res, &[], false);
        assert_eq!(read.kind, Some(ConflictKind::NotAvailable));
    }

    #[test]
    fn slot_never_offered_is_not_available() {
        let s = slot(9, 0, 50);
        let res = resolution(vec![s.clone()], vec![s.clone()]);
        let (start, end) = window(19, 0, 50);

        let verdict = evaluate(SlotChoice::Catalog(Uuid::new_v4()), start, end, &res, &[], true);
        assert_eq!(verdict.kind, Some(ConflictKind::NotAvailable));
    }

    #[test]
    fn custom_range_spanning_adjacent_slots_is_bookable() {
        let a = slot(9, 0, 50);
        let b = slot(9, 50, 50);
        let res = resolution(vec![a.clone(), b.clone()], vec![a, b]);

        // 100 minutes across both slots, no gap.
        let (start, end) = window(9, 0, 100);
        let verdict = evaluate(SlotChoice::Custom, start, end, &res, &[], true);

        assert!(verdict.bookable);
    }

    #[test]
    fn custom_range_over_a_gap_is_not_available() {
        let a = slot(9, 0, 50);
        let b = slot(10, 0, 50);
        let res = resolution(vec![a.clone(), b.clone()], vec![a, b]);

        // 09:00-10:50 crosses the uncovered 09:50-10:00 gap.
        let (start, end) = window(9, 0, 110);
        let verdict = evaluate(SlotChoice::Custom, start, end, &res, &[], true);

        assert_eq!(verdict.kind, Some(ConflictKind::NotAvailable));
    }

    #[test]
    fn custom_range_overlapping_booking_is_double_booked() {
        let a = slot(9, 0, 50);
        let res = resolution(vec![a.clone()], vec![a]);
        let existing = vec![appointment_at(9, 0, 30, AppointmentStatus::Pending)];

        let (start, end) = window(9, 0, 50);
        let verdict = evaluate(SlotChoice::Custom, start, end, &res, &existing, true);

        assert_eq!(verdict.kind, Some(ConflictKind::DoubleBooked));
    }

    #[test]
    fn empty_range_is_never_bookable() {
        let a = slot(9, 0, 50);
        let res = resolution(vec![a.clone()], vec![a]);

        let (start, _) = window(9, 0, 50);
        let verdict = evaluate(SlotChoice::Custom, start, start, &res, &[], false);

        assert!(!verdict.bookable);
    }
}
