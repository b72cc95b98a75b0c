//! Timestamp parsing and timezone normalization (SPEC_FULL.md §4.2 step 6, §8
//! invariant 7).
//!
//! A format's `date_format` is a chrono strptime string. Formats whose captured date
//! already carries an offset (`%z`) parse straight to an aware instant. Formats that
//! capture a naive local timestamp (the W3C family) are interpreted against a
//! configured timezone name before conversion to UTC. After either path, a configured
//! `seconds_to_add_to_date` shift is applied.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampError {
    BadDate,
    UnknownTimezone,
}

/// Parse `date_str` against `date_format`, normalize to UTC against `timezone` (used
/// only when the format string carries no `%z`/`%Z`), then add `offset_seconds`.
pub fn parse_and_normalize(
    date_str: &str,
    date_format: &str,
    timezone: Option<&str>,
    offset_seconds: i64,
) -> Result<DateTime<Utc>, TimestampError> {
    let format_has_offset = date_format.contains("%z") || date_format.contains("%Z");

    let utc = if format_has_offset {
        let parsed = DateTime::parse_from_str(date_str, date_format)
            .map_err(|_| TimestampError::BadDate)?;
        parsed.with_timezone(&Utc)
    } else {
        let naive = NaiveDateTime::parse_from_str(date_str, date_format)
            .map_err(|_| TimestampError::BadDate)?;
        naive_to_utc(naive, timezone)?
    };

    Ok(utc + chrono::Duration::seconds(offset_seconds))
}

fn naive_to_utc(naive: NaiveDateTime, timezone: Option<&str>) -> Result<DateTime<Utc>, TimestampError> {
    match timezone {
        None => Ok(Utc.from_utc_datetime(&naive)),
        Some(tz_str) => {
            if let Some(offset_seconds) = parse_numeric_offset(tz_str) {
                let utc = Utc.from_utc_datetime(&naive) - chrono::Duration::seconds(offset_seconds);
                return Ok(utc);
            }
            let tz: Tz = tz_str.parse().map_err(|_| TimestampError::UnknownTimezone)?;
            let local = tz
                .from_local_datetime(&naive)
                .single()
                .ok_or(TimestampError::BadDate)?;
            Ok(local.with_timezone(&Utc))
        }
    }
}

/// Parse a numeric UTC offset like `+0200`, `-0700`, or `+02:00` into seconds east of
/// UTC. Returns `None` for anything that isn't this shape (falls through to IANA
/// timezone-name lookup).
fn parse_numeric_offset(s: &str) -> Option<i64> {
    let s = s.trim();
    let (sign, rest) = match s.strip_prefix('+') {
        Some(rest) => (1i64, rest),
        None => s.strip_prefix('-').map(|rest| (-1i64, rest))?,
    };
    let (hh, mm) = if let Some((h, m)) = rest.split_once(':') {
        (h.parse::<i64>().ok()?, m.parse::<i64>().ok()?)
    } else if rest.len() == 4 && rest.chars().all(|c| c.is_ascii_digit()) {
        (rest[0..2].parse::<i64>().ok()?, rest[2..4].parse::<i64>().ok()?)
    } else {
        return None;
    };
    Some(sign * (hh * 3600 + mm * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use proptest::prelude::*;

    #[test]
    fn common_format_date_with_offset_converts_to_utc() {
        // SPEC_FULL.md §8 boundary scenario 1: 10/Oct/2000:13:55:36 -0700 -> 2000-10-10 20:55:36 UTC.
        let dt = parse_and_normalize(
            "10/Oct/2000:13:55:36 -0700",
            "%d/%b/%Y:%H:%M:%S %z",
            None,
            0,
        )
        .unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2000-10-10 20:55:36");
    }

    #[test]
    fn naive_w3c_date_uses_configured_numeric_offset() {
        let dt = parse_and_normalize(
            "2024-01-01 12:00:00",
            "%Y-%m-%d %H:%M:%S",
            Some("+0200"),
            0,
        )
        .unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-01 10:00:00");
    }

    #[test]
    fn naive_w3c_date_uses_iana_timezone_name() {
        let dt = parse_and_normalize(
            "2024-07-01 12:00:00",
            "%Y-%m-%d %H:%M:%S",
            Some("Europe/Berlin"),
            0,
        )
        .unwrap();
        // Europe/Berlin is UTC+2 in July (CEST).
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-07-01 10:00:00");
    }

    #[test]
    fn seconds_offset_is_applied_after_timezone_normalization() {
        let dt = parse_and_normalize("2024-01-01 00:00:00", "%Y-%m-%d %H:%M:%S", None, 3600).unwrap();
        assert_eq!(dt.hour(), 1);
    }

    #[test]
    fn bad_date_is_an_error() {
        let result = parse_and_normalize("not a date", "%Y-%m-%d %H:%M:%S", None, 0);
        assert_eq!(result, Err(TimestampError::BadDate));
    }

    #[test]
    fn unknown_timezone_is_an_error() {
        let result = parse_and_normalize(
            "2024-01-01 00:00:00",
            "%Y-%m-%d %H:%M:%S",
            Some("Not/A_Zone"),
            0,
        );
        assert_eq!(result, Err(TimestampError::UnknownTimezone));
    }

    #[test]
    fn year_sanity() {
        let dt = parse_and_normalize("2024-01-01 00:00:00", "%Y-%m-%d %H:%M:%S", None, 0).unwrap();
        assert_eq!(dt.year(), 2024);
    }

    proptest! {
        // SPEC_FULL.md §8 invariant 7: the stored instant is strptime(date) minus the
        // timezone's offset, for any sign and magnitude of offset.
        #[test]
        fn prop_numeric_offset_normalization_matches_manual_subtraction(
            offset_hours in -14i64..14,
            offset_minutes in 0i64..60,
        ) {
            let naive = "2024-06-15 12:00:00";
            let tz = format!("{}{:02}{:02}", if offset_hours < 0 { "-" } else { "+" }, offset_hours.abs(), offset_minutes);
            let dt = parse_and_normalize(naive, "%Y-%m-%d %H:%M:%S", Some(&tz), 0).unwrap();

            let naive_dt = NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S").unwrap();
            let sign = if offset_hours < 0 { -1 } else { 1 };
            let total_offset = sign * (offset_hours.abs() * 3600 + offset_minutes * 60);
            let expected = Utc.from_utc_datetime(&naive_dt) - chrono::Duration::seconds(total_offset);
            prop_assert_eq!(dt, expected);
        }
    }
}
