//! Date parsing for recall filters.
//!
//! Accepts RFC3339 instants, plain `YYYY-MM-DD` dates, and relative
//! spans (`7d`, `12h`, `2w`, `1m`, `1y`, `30min`) measured back from
//! `now`. Anything else is a hard error, not a silent default.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::error::{ConfigError, Error, Result};

/// Parses a user-supplied date string for the named filter field.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] for unparseable input.
pub fn parse_when(field: &str, raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid(field, raw, "empty date"));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| invalid(field, raw, "invalid date"))?;
        return Ok(DateTime::from_naive_utc_and_offset(midnight, Utc));
    }

    parse_relative(trimmed, now).ok_or_else(|| {
        invalid(
            field,
            raw,
            "expected RFC3339, YYYY-MM-DD, or a relative span like 7d or 1m",
        )
    })
}

fn parse_relative(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let split = raw.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = raw.split_at(split);
    let amount: i64 = digits.parse().ok()?;

    let span = match unit {
        "min" => Duration::minutes(amount),
        "h" => Duration::hours(amount),
        "d" => Duration::days(amount),
        "w" => Duration::weeks(amount),
        "m" => Duration::days(amount.checked_mul(30)?),
        "y" => Duration::days(amount.checked_mul(365)?),
        _ => return None,
    };
    now.checked_sub_signed(span)
}

fn invalid(field: &str, raw: &str, reason: &str) -> Error {
    ConfigError::Invalid {
        name: field.to_string(),
        reason: format!("'{raw}': {reason}"),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_rfc3339() {
        let dt = parse_when("since", "2026-02-15T08:30:00Z", now()).unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-02-15T08:30:00+00:00");
    }

    #[test]
    fn test_plain_date() {
        let dt = parse_when("around", "2026-02-15", now()).unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-02-15T00:00:00+00:00");
    }

    #[test]
    fn test_relative_spans() {
        let n = now();
        assert_eq!(parse_when("since", "7d", n).unwrap(), n - Duration::days(7));
        assert_eq!(parse_when("since", "12h", n).unwrap(), n - Duration::hours(12));
        assert_eq!(parse_when("since", "2w", n).unwrap(), n - Duration::weeks(2));
        assert_eq!(parse_when("since", "1m", n).unwrap(), n - Duration::days(30));
        assert_eq!(parse_when("since", "1y", n).unwrap(), n - Duration::days(365));
        assert_eq!(
            parse_when("since", "30min", n).unwrap(),
            n - Duration::minutes(30)
        );
    }

    #[test]
    fn test_invalid_inputs() {
        for bad in ["", "yesterday", "7", "d7", "2026-13-40", "1.5d"] {
            assert!(parse_when("since", bad, now()).is_err(), "accepted {bad:?}");
        }
    }
}
