//! Parsing helpers for raw query parameters, so malformed input becomes a
//! 400 with a readable message instead of a generic rejection.

use chrono::{NaiveDate, NaiveTime};

use shared_models::error::AppError;
use shared_models::time_format;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| {
        AppError::ValidationError(format!("Invalid {} format: {}. Use YYYY-MM-DD", field, raw))
    })
}

pub fn parse_time(raw: &str, field: &str) -> Result<NaiveTime, AppError> {
    time_format::parse_time(raw).ok_or_else(|| {
        AppError::ValidationError(format!("Invalid {} format: {}. Use HH:MM", field, raw))
    })
}

pub fn require<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, AppError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::ValidationError(format!("{} is required", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("2026-03-02", "date").unwrap(), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        assert_matches!(parse_date("02/03/2026", "date"), Err(AppError::ValidationError(msg)) if msg.contains("YYYY-MM-DD"));
        assert!(parse_date("2026-02-30", "date").is_err());
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("09:15", "time").unwrap(), NaiveTime::from_hms_opt(9, 15, 0).unwrap());
        assert_matches!(parse_time("25:00", "time"), Err(AppError::ValidationError(_)));
    }

    #[test]
    fn test_require() {
        assert_eq!(require(Some("x"), "date").unwrap(), "x");
        assert_matches!(require(Some("  "), "date"), Err(AppError::ValidationError(msg)) if msg == "date is required");
        assert!(require(None, "time").is_err());
    }
}
