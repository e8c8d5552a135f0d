use time::{format_description::well_known::Rfc3339, OffsetDateTime, PrimitiveDateTime};

/// Source of server time. Every lifecycle decision reads "now" from here so that
/// elapsed/remaining time never depends on a client clock.
pub(crate) trait Clock: Send + Sync {
    fn now(&self) -> PrimitiveDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> PrimitiveDateTime {
        primitive_now_utc()
    }
}

pub(crate) fn primitive_now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

pub(crate) fn format_primitive(value: PrimitiveDateTime) -> String {
    value.assume_utc().format(&Rfc3339).unwrap_or_else(|_| value.assume_utc().to_string())
}

/// Whole seconds from `earlier` to `later`; negative when `later` precedes `earlier`.
pub(crate) fn seconds_between(earlier: PrimitiveDateTime, later: PrimitiveDateTime) -> i64 {
    (later - earlier).whole_seconds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::{Date, Duration, Time};

    fn at(hour: u8, minute: u8, second: u8) -> PrimitiveDateTime {
        let date = Date::from_calendar_date(2025, time::Month::January, 2).unwrap();
        PrimitiveDateTime::new(date, Time::from_hms(hour, minute, second).unwrap())
    }

    #[test]
    fn format_primitive_outputs_utc_z() {
        assert_eq!(format_primitive(at(10, 20, 30)), "2025-01-02T10:20:30Z");
    }

    #[test]
    fn seconds_between_is_signed() {
        assert_eq!(seconds_between(at(10, 0, 0), at(10, 30, 0)), 1800);
        assert_eq!(seconds_between(at(10, 30, 0), at(10, 0, 0)), -1800);
    }

    #[test]
    fn seconds_between_truncates_fractions() {
        let start = at(10, 0, 0);
        let later = start + Duration::milliseconds(2_999);
        assert_eq!(seconds_between(start, later), 2);
    }

    #[test]
    fn system_clock_is_close_to_now() {
        let before = primitive_now_utc();
        let now = SystemClock.now();
        assert!(seconds_between(before, now) >= 0);
        assert!(seconds_between(before, now) < 5);
    }
}
