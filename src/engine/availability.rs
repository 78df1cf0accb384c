use chrono::{NaiveDate, NaiveDateTime};

use crate::model::Slot;

// ── Availability Calculator ───────────────────────────────────────

/// Lazy view over a visit's slots that are bookable relative to `now`:
/// under capacity AND starting strictly after `now`.
///
/// `slots` is the visit's slot list, already sorted by (date, start_time),
/// so the output ordering — ascending by (date, start_time) — is part of
/// the contract, not an accident. The iterator is restartable: calling
/// again over the same snapshot yields the same sequence.
pub fn available_slots<'a>(
    slots: &'a [Slot],
    now: NaiveDateTime,
) -> impl Iterator<Item = &'a Slot> + 'a {
    slots
        .iter()
        .filter(move |s| !s.is_full() && s.starts_at() > now)
}

/// Distinct dates having at least one bookable slot, ascending.
pub fn available_dates(slots: &[Slot], now: NaiveDateTime) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = available_slots(slots, now).map(|s| s.date).collect();
    // Input is date-sorted, so consecutive dedup suffices.
    dates.dedup();
    dates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use ulid::Ulid;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn t(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn slot(day: u32, start_h: u32, max: u32, booked: u32) -> Slot {
        Slot {
            id: Ulid::new(),
            visit_id: Ulid::new(),
            date: d(day),
            start_time: t(start_h),
            end_time: t(start_h + 1),
            max_appointments: max,
            booked_count: booked,
        }
    }

    #[test]
    fn filters_full_and_elapsed() {
        let slots = vec![
            slot(1, 9, 5, 0),  // elapsed relative to now
            slot(1, 12, 5, 5), // full
            slot(1, 14, 5, 4), // one seat left
            slot(2, 9, 5, 0),
        ];
        let now = d(1).and_time(t(10));
        let free: Vec<_> = available_slots(&slots, now).collect();
        assert_eq!(free.len(), 2);
        assert_eq!(free[0].start_time, t(14));
        assert_eq!(free[1].date, d(2));
    }

    #[test]
    fn slot_starting_exactly_now_is_excluded() {
        let slots = vec![slot(1, 10, 5, 0)];
        let now = d(1).and_time(t(10));
        assert_eq!(available_slots(&slots, now).count(), 0);

        // One second earlier it is still bookable
        let just_before = d(1).and_hms_opt(9, 59, 59).unwrap();
        assert_eq!(available_slots(&slots, just_before).count(), 1);
    }

    #[test]
    fn ordering_is_ascending_by_date_then_time() {
        let slots = vec![
            slot(1, 9, 5, 0),
            slot(1, 14, 5, 0),
            slot(2, 8, 5, 0),
            slot(3, 10, 5, 0),
        ];
        let now = d(1).and_time(t(0));
        let starts: Vec<_> = available_slots(&slots, now)
            .map(|s| s.starts_at())
            .collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
    }

    #[test]
    fn iterator_is_restartable() {
        let slots = vec![slot(1, 9, 5, 0), slot(2, 9, 5, 0)];
        let now = d(1).and_time(t(0));
        let first: Vec<_> = available_slots(&slots, now).map(|s| s.id).collect();
        let second: Vec<_> = available_slots(&slots, now).map(|s| s.id).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn dates_deduplicated_ascending() {
        let slots = vec![
            slot(1, 9, 5, 0),
            slot(1, 14, 5, 0),
            slot(2, 9, 5, 5), // full — day 2 has no other slot
            slot(3, 9, 5, 0),
        ];
        let now = d(1).and_time(t(0));
        let dates = available_dates(&slots, now);
        assert_eq!(dates, vec![d(1), d(3)]);
    }

    #[test]
    fn empty_slots_no_dates() {
        let now = d(1).and_time(t(0));
        assert!(available_dates(&[], now).is_empty());
    }

    #[test]
    fn date_with_one_free_and_one_full_slot_still_listed() {
        let slots = vec![slot(1, 9, 5, 5), slot(1, 14, 5, 1)];
        let now = d(1).and_time(t(0));
        assert_eq!(available_dates(&slots, now), vec![d(1)]);
    }
}
