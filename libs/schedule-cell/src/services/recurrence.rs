use std::collections::HashSet;

use chrono::{Datelike, NaiveDate, Weekday};
use uuid::Uuid;

use crate::models::{Availability, MonthlyRule, RecurrencePattern, WeeklySchedule};

/// Day-of-week numbering used across the platform (0 = Sunday).
pub fn weekday_number(date: NaiveDate) -> i32 {
    match date.weekday() {
        Weekday::Sun => 0,
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat => 6,
    }
}

/// Groups standing availability rows into per-weekday slot-id sets.
pub fn build_weekly_map(rows: &[Availability]) -> WeeklySchedule {
    let mut weekly = WeeklySchedule::default();
    for row in rows {
        weekly.insert(row.day_of_week, row.time_slot_id);
    }
    weekly
}

/// Whole weeks between two dates, floored. Floor division keeps the
/// cadence parity consistent for targets before the reference as well.
pub fn whole_weeks_between(reference: NaiveDate, target: NaiveDate) -> i64 {
    (target - reference).num_days().div_euclid(7)
}

/// 1-based ordinal of the date's weekday within its month ("second
/// Tuesday" = 2).
pub fn week_of_month(date: NaiveDate) -> u32 {
    date.day0() / 7 + 1
}

fn monthly_occurrence_matches(rule: MonthlyRule, reference: NaiveDate, target: NaiveDate) -> bool {
    match rule {
        // Months lacking the reference's day-of-month (the 31st in
        // February) produce no matching date at all; the occurrence is
        // skipped, never clamped to month-end.
        MonthlyRule::SameDayOfMonth => target.day() == reference.day(),
        MonthlyRule::SameWeekdayOfMonth => {
            target.weekday() == reference.weekday()
                && week_of_month(target) == week_of_month(reference)
        }
    }
}

/// Expands the weekly map across the requested cadence: the target date's
/// weekday set applies always for `Weekly`, on even week parity for
/// `Biweekly`, and on matching monthly occurrences for `Monthly`.
pub fn apply_pattern(
    pattern: RecurrencePattern,
    monthly_rule: MonthlyRule,
    weekly: &WeeklySchedule,
    reference_date: NaiveDate,
    target_date: NaiveDate,
) -> HashSet<Uuid> {
    let applies = match pattern {
        RecurrencePattern::Weekly => true,
        RecurrencePattern::Biweekly => {
            whole_weeks_between(reference_date, target_date).rem_euclid(2) == 0
        }
        RecurrencePattern::Monthly => {
            monthly_occurrence_matches(monthly_rule, reference_date, target_date)
        }
    };

    if !applies {
        return HashSet::new();
    }

    weekly
        .slots_for(weekday_number(target_date))
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn row(day_of_week: i32, time_slot_id: Uuid) -> Availability {
        Availability {
            id: Uuid::new_v4(),
            therapist_id: Uuid::new_v4(),
            day_of_week,
            time_slot_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn weekday_numbering_starts_at_sunday() {
        assert_eq!(weekday_number(date(2025, 1, 5)), 0); // Sunday
        assert_eq!(weekday_number(date(2025, 1, 6)), 1); // Monday
        assert_eq!(weekday_number(date(2025, 1, 11)), 6); // Saturday
    }

    #[test]
    fn weekly_map_deduplicates_rows() {
        let slot = Uuid::new_v4();
        let rows = vec![row(1, slot), row(1, slot), row(2, slot)];

        let weekly = build_weekly_map(&rows);
        assert_eq!(weekly.slots_for(1).unwrap().len(), 1);
        assert_eq!(weekly.slots_for(2).unwrap().len(), 1);
        assert!(weekly.slots_for(3).is_none());
    }

    #[test]
    fn weekly_pattern_applies_unconditionally() {
        let slot = Uuid::new_v4();
        let weekly = build_weekly_map(&[row(1, slot)]);
        let reference = date(2025, 1, 6); // Monday

        for weeks in [0i64, 1, 2, 5] {
            let target = reference + chrono::Duration::weeks(weeks);
            let result = apply_pattern(
                RecurrencePattern::Weekly,
                MonthlyRule::default(),
                &weekly,
                reference,
                target,
            );
            assert!(result.contains(&slot), "week {} should apply", weeks);
        }
    }

    #[test]
    fn biweekly_applies_on_even_weeks_only() {
        let slot = Uuid::new_v4();
        let weekly = build_weekly_map(&[row(1, slot)]);
        let reference = date(2025, 1, 6); // Monday, week 0

        let week_two = apply_pattern(
            RecurrencePattern::Biweekly,
            MonthlyRule::default(),
            &weekly,
            reference,
            date(2025, 1, 20),
        );
        assert!(week_two.contains(&slot));

        let week_one = apply_pattern(
            RecurrencePattern::Biweekly,
            MonthlyRule::default(),
            &weekly,
            reference,
            date(2025, 1, 13),
        );
        assert!(week_one.is_empty());
    }

    #[test]
    fn biweekly_cadence_extends_before_the_reference() {
        let slot = Uuid::new_v4();
        let weekly = build_weekly_map(&[row(1, slot)]);
        let reference = date(2025, 1, 20); // Monday

        let two_weeks_before = apply_pattern(
            RecurrencePattern::Biweekly,
            MonthlyRule::default(),
            &weekly,
            reference,
            date(2025, 1, 6),
        );
        assert!(two_weeks_before.contains(&slot));

        let one_week_before = apply_pattern(
            RecurrencePattern::Biweekly,
            MonthlyRule::default(),
            &weekly,
            reference,
            date(2025, 1, 13),
        );
        assert!(one_week_before.is_empty());
    }

    #[test]
    fn monthly_same_day_of_month() {
        let slot = Uuid::new_v4();
        // 2025-02-15 is a Saturday
        let weekly = build_weekly_map(&[row(6, slot)]);
        let reference = date(2025, 1, 15);

        let matching = apply_pattern(
            RecurrencePattern::Monthly,
            MonthlyRule::SameDayOfMonth,
            &weekly,
            reference,
            date(2025, 2, 15),
        );
        assert!(matching.contains(&slot));

        let off_by_one = apply_pattern(
            RecurrencePattern::Monthly,
            MonthlyRule::SameDayOfMonth,
            &weekly,
            reference,
            date(2025, 2, 14),
        );
        assert!(off_by_one.is_empty());
    }

    #[test]
    fn monthly_day_31_is_skipped_not_clamped() {
        let slot = Uuid::new_v4();
        let weekly = build_weekly_map(&[row(5, slot)]); // 2025-02-28 is a Friday
        let reference = date(2025, 1, 31);

        let month_end = apply_pattern(
            RecurrencePattern::Monthly,
            MonthlyRule::SameDayOfMonth,
            &weekly,
            reference,
            date(2025, 2, 28),
        );
        assert!(month_end.is_empty(), "short month must not clamp to the 28th");

        // 2025-03-31 is a Monday
        let weekly_monday = build_weekly_map(&[row(1, slot)]);
        let next_real_31st = apply_pattern(
            RecurrencePattern::Monthly,
            MonthlyRule::SameDayOfMonth,
            &weekly_monday,
            reference,
            date(2025, 3, 31),
        );
        assert!(next_real_31st.contains(&slot));
    }

    #[test]
    fn monthly_same_weekday_of_month() {
        let slot = Uuid::new_v4();
        let weekly = build_weekly_map(&[row(1, slot)]);
        let reference = date(2025, 1, 6); // first Monday of January

        let first_monday_feb = apply_pattern(
            RecurrencePattern::Monthly,
            MonthlyRule::SameWeekdayOfMonth,
            &weekly,
            reference,
            date(2025, 2, 3),
        );
        assert!(first_monday_feb.contains(&slot));

        let second_monday_feb = apply_pattern(
            RecurrencePattern::Monthly,
            MonthlyRule::SameWeekdayOfMonth,
            &weekly,
            reference,
            date(2025, 2, 10),
        );
        assert!(second_monday_feb.is_empty());
    }
}
