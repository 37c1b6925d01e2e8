//! Calendar helpers shared by seeding, feature extraction and the fallback

use chrono::{DateTime, Datelike, Duration, DurationRound, Timelike, Utc, Weekday};

/// First hour (inclusive) of the business day, UTC
pub const BUSINESS_HOURS_START: u32 = 9;

/// Last hour (exclusive) of the business day, UTC
pub const BUSINESS_HOURS_END: u32 = 18;

pub fn is_weekend(timestamp: DateTime<Utc>) -> bool {
    matches!(timestamp.weekday(), Weekday::Sat | Weekday::Sun)
}

pub fn is_business_hour(timestamp: DateTime<Utc>) -> bool {
    (BUSINESS_HOURS_START..BUSINESS_HOURS_END).contains(&timestamp.hour())
}

/// Monday = 0
pub fn day_of_week(timestamp: DateTime<Utc>) -> u32 {
    timestamp.weekday().num_days_from_monday()
}

/// The start of the hour following `timestamp`
pub fn next_full_hour(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    let truncated = timestamp
        .duration_trunc(Duration::hours(1))
        .unwrap_or(timestamp);
    truncated + Duration::hours(1)
}

/// The start of the hour containing `timestamp`
pub fn current_hour(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(Duration::hours(1))
        .unwrap_or(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_weekend_detection() {
        // 2024-01-06 is a Saturday
        let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap();
        assert!(is_weekend(saturday));
        assert!(!is_weekend(monday));
        assert_eq!(day_of_week(monday), 0);
        assert_eq!(day_of_week(saturday), 5);
    }

    #[test]
    fn test_business_hours_boundaries() {
        let at = |h| Utc.with_ymd_and_hms(2024, 1, 8, h, 0, 0).unwrap();
        assert!(!is_business_hour(at(8)));
        assert!(is_business_hour(at(9)));
        assert!(is_business_hour(at(17)));
        assert!(!is_business_hour(at(18)));
    }

    #[test]
    fn test_next_full_hour() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 8, 10, 42, 13).unwrap();
        assert_eq!(
            next_full_hour(ts),
            Utc.with_ymd_and_hms(2024, 1, 8, 11, 0, 0).unwrap()
        );
        assert_eq!(
            current_hour(ts),
            Utc.with_ymd_and_hms(2024, 1, 8, 10, 0, 0).unwrap()
        );
    }
}
