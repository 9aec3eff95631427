//! Lenient timestamp parsing for feeds, sitemaps and article metadata.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Parse the date formats seen in the wild: RFC 3339, RFC 2822, naive
/// date-times, and bare `YYYY-MM-DD` (taken as midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Offsets without a colon, e.g. `2025-01-10T08:00:00+0900`.
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s.get(..10).unwrap_or(s), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_common_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 1, 10, 8, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2025-01-10T08:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-10T17:30:00+09:00"), Some(expected));
        assert_eq!(parse_timestamp("Fri, 10 Jan 2025 08:30:00 +0000"), Some(expected));
        assert_eq!(parse_timestamp("Fri, 10 Jan 2025 08:30:00 GMT"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-10T17:30:00+0900"), Some(expected));
        assert_eq!(parse_timestamp("2025-01-10 08:30:00"), Some(expected));
    }

    #[test]
    fn bare_date_is_midnight() {
        assert_eq!(
            parse_timestamp("2025-01-10"),
            Some(Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn garbage_is_none() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("last tuesday"), None);
    }
}
