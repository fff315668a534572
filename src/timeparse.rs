//! Parsing of user-supplied time filter bounds

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::sftp::TimeRange;

/// Accepted date-time layouts, tried in order
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
];

/// Accepted date-only layouts (midnight)
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y%m%d", "%d-%m-%Y"];

/// Parse a local wall-clock time such as `2024-03-01 14:30` or `01/03/2024`.
///
/// Day-first layouts win over month-first ones when both would match.
pub fn parse_local_time(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();

    let naive = DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

/// Window covering the last `hours` hours up to `now`
pub fn last_hours(hours: u32, now: DateTime<Utc>) -> TimeRange {
    TimeRange::new(Some(now - Duration::hours(i64::from(hours))), None)
}
