use time::{Duration, PrimitiveDateTime};

use crate::core::time::seconds_between;
use crate::db::models::Test;

/// Seconds since the attempt started. A start in the future counts as zero.
pub(crate) fn elapsed_seconds(started_at: PrimitiveDateTime, now: PrimitiveDateTime) -> i64 {
    seconds_between(started_at, now).max(0)
}

pub(crate) fn allotted_seconds(duration_minutes: i32) -> i64 {
    i64::from(duration_minutes.max(0)) * 60
}

pub(crate) fn remaining_seconds(
    started_at: PrimitiveDateTime,
    duration_minutes: i32,
    now: PrimitiveDateTime,
) -> i64 {
    (allotted_seconds(duration_minutes) - elapsed_seconds(started_at, now)).max(0)
}

/// Elapsed time clamped to the allotted duration, as stored on a finished attempt.
pub(crate) fn time_spent_seconds(
    started_at: PrimitiveDateTime,
    duration_minutes: i32,
    now: PrimitiveDateTime,
) -> i32 {
    let clamped = elapsed_seconds(started_at, now).min(allotted_seconds(duration_minutes));
    i32::try_from(clamped).unwrap_or(i32::MAX)
}

pub(crate) fn deadline(started_at: PrimitiveDateTime, duration_minutes: i32) -> PrimitiveDateTime {
    started_at + Duration::minutes(i64::from(duration_minutes.max(0)))
}

/// A client-side timer expiry is honoured when the server agrees within `tolerance_seconds`.
pub(crate) fn timer_expiry_accepted(remaining_seconds: i64, tolerance_seconds: i64) -> bool {
    remaining_seconds <= tolerance_seconds.max(0)
}

pub(crate) fn availability_error(test: &Test, now: PrimitiveDateTime) -> Option<&'static str> {
    if !test.is_published {
        return Some("Test is not published");
    }
    if test.available_from.is_some_and(|from| now < from) {
        return Some("Test is not yet available");
    }
    if test.available_until.is_some_and(|until| now > until) {
        return Some("Test is no longer available");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fixed_time, single_choice_test};

    #[test]
    fn remaining_counts_down_from_duration() {
        let start = fixed_time();

        assert_eq!(remaining_seconds(start, 30, start), 1800);
        assert_eq!(remaining_seconds(start, 30, start + Duration::seconds(90)), 1710);
        assert_eq!(remaining_seconds(start, 30, start + Duration::minutes(45)), 0);
    }

    #[test]
    fn clock_skew_before_start_is_clamped() {
        let start = fixed_time();
        let earlier = start - Duration::seconds(20);

        assert_eq!(elapsed_seconds(start, earlier), 0);
        assert_eq!(remaining_seconds(start, 10, earlier), 600);
    }

    #[test]
    fn time_spent_is_clamped_to_duration() {
        let start = fixed_time();
        let ten_hours_later = start + Duration::hours(10);

        assert_eq!(time_spent_seconds(start, 30, ten_hours_later), 1800);
        assert_eq!(time_spent_seconds(start, 30, start + Duration::seconds(75)), 75);
    }

    #[test]
    fn deadline_adds_duration() {
        let start = fixed_time();
        assert_eq!(deadline(start, 20), start + Duration::minutes(20));
    }

    #[test]
    fn timer_expiry_respects_tolerance() {
        assert!(timer_expiry_accepted(0, 5));
        assert!(timer_expiry_accepted(5, 5));
        assert!(!timer_expiry_accepted(6, 5));
        assert!(!timer_expiry_accepted(1, -3));
    }

    #[test]
    fn availability_window_is_enforced() {
        let now = fixed_time();
        let mut definition = single_choice_test(20, 1, 1);
        assert_eq!(availability_error(&definition.test, now), None);

        definition.test.available_from = Some(now + Duration::hours(1));
        assert_eq!(availability_error(&definition.test, now), Some("Test is not yet available"));

        definition.test.available_from = None;
        definition.test.available_until = Some(now - Duration::seconds(1));
        assert_eq!(
            availability_error(&definition.test, now),
            Some("Test is no longer available")
        );

        definition.test.available_until = None;
        definition.test.is_published = false;
        assert_eq!(availability_error(&definition.test, now), Some("Test is not published"));
    }
}
