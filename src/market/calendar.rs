//! Market session calendar for US equity options.
//!
//! Maps a UTC instant to a `MarketStatus` using regular NYSE hours in
//! Eastern Time. Holidays are not modeled; weekends are closed.

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc, Weekday};

use super::types::MarketStatus;

/// Eastern Time offset in seconds. Standard time; DST drift only shifts the
/// session boundaries by an hour, which the paper engine tolerates.
const EASTERN_OFFSET_SECS: i32 = -5 * 3600;

/// Derives market status from a clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketCalendar;

impl MarketCalendar {
    pub fn new() -> Self {
        Self
    }

    /// Status right now.
    pub fn status(&self) -> MarketStatus {
        self.status_at(Utc::now())
    }

    /// Status at an arbitrary instant. Pure, for tests.
    pub fn status_at(&self, instant: DateTime<Utc>) -> MarketStatus {
        let eastern = FixedOffset::east_opt(EASTERN_OFFSET_SECS).unwrap();
        let local = instant.with_timezone(&eastern);

        match local.weekday() {
            Weekday::Sat | Weekday::Sun => return MarketStatus::Closed,
            _ => {}
        }

        let t = local.time();
        let pre_open = NaiveTime::from_hms_opt(4, 0, 0).unwrap();
        let open = NaiveTime::from_hms_opt(9, 30, 0).unwrap();
        let close = NaiveTime::from_hms_opt(16, 0, 0).unwrap();
        let after_close = NaiveTime::from_hms_opt(20, 0, 0).unwrap();

        if t >= open && t < close {
            MarketStatus::Open
        } else if t >= pre_open && t < open {
            MarketStatus::PreMarket
        } else if t >= close && t < after_close {
            MarketStatus::AfterHours
        } else {
            MarketStatus::Closed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn eastern_utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        let eastern = FixedOffset::east_opt(EASTERN_OFFSET_SECS).unwrap();
        eastern
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_weekday_regular_session_is_open() {
        // Wednesday 2026-01-07, 10:00 ET
        let cal = MarketCalendar::new();
        assert_eq!(cal.status_at(eastern_utc(2026, 1, 7, 10, 0)), MarketStatus::Open);
    }

    #[test]
    fn test_open_boundary_at_930() {
        let cal = MarketCalendar::new();
        assert_eq!(
            cal.status_at(eastern_utc(2026, 1, 7, 9, 30)),
            MarketStatus::Open
        );
        assert_eq!(
            cal.status_at(eastern_utc(2026, 1, 7, 9, 29)),
            MarketStatus::PreMarket
        );
    }

    #[test]
    fn test_close_boundary_at_1600() {
        let cal = MarketCalendar::new();
        assert_eq!(
            cal.status_at(eastern_utc(2026, 1, 7, 15, 59)),
            MarketStatus::Open
        );
        assert_eq!(
            cal.status_at(eastern_utc(2026, 1, 7, 16, 0)),
            MarketStatus::AfterHours
        );
    }

    #[test]
    fn test_overnight_is_closed() {
        let cal = MarketCalendar::new();
        assert_eq!(
            cal.status_at(eastern_utc(2026, 1, 7, 22, 0)),
            MarketStatus::Closed
        );
        assert_eq!(
            cal.status_at(eastern_utc(2026, 1, 7, 3, 0)),
            MarketStatus::Closed
        );
    }

    #[test]
    fn test_weekend_is_closed() {
        let cal = MarketCalendar::new();
        // Saturday 2026-01-10, midday
        assert_eq!(
            cal.status_at(eastern_utc(2026, 1, 10, 12, 0)),
            MarketStatus::Closed
        );
    }
}
