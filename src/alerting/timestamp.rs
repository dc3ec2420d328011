use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::db::probe::RawTimestamp;

use super::models::CheckError;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
];

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"];

/// Normalises the probe's raw value to UTC. Values without a zone are taken as UTC.
pub fn normalize(raw: &RawTimestamp) -> Result<DateTime<Utc>, CheckError> {
    match raw {
        RawTimestamp::Utc(ts) => Ok(*ts),
        RawTimestamp::Naive(ts) => Ok(ts.and_utc()),
        RawTimestamp::Date(date) => date_at_midnight(*date),
        RawTimestamp::Text(text) => parse_text(text),
        RawTimestamp::Null => Err(CheckError::Parse("latest timestamp value is NULL".to_string())),
    }
}

fn date_at_midnight(date: NaiveDate) -> Result<DateTime<Utc>, CheckError> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| CheckError::Parse(format!("invalid date {date}")))
}

pub fn parse_text(text: &str) -> Result<DateTime<Utc>, CheckError> {
    let s = text.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(s, format) {
            return Ok(ts.with_timezone(&Utc));
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(ts.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date_at_midnight(date);
    }

    Err(CheckError::Parse(format!("unrecognised timestamp '{text}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn expected() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 30).unwrap()
    }

    #[test]
    fn test_structured_values() {
        assert_eq!(normalize(&RawTimestamp::Utc(expected())).unwrap(), expected());
        assert_eq!(normalize(&RawTimestamp::Naive(expected().naive_utc())).unwrap(), expected());
        assert_eq!(
            normalize(&RawTimestamp::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap())).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_text_formats() {
        for text in [
            "2024-03-09T14:05:30Z",
            "2024-03-09T16:05:30+02:00",
            "2024-03-09 14:05:30",
            "2024-03-09T14:05:30",
            "2024-03-09 14:05:30.000",
            "2024-03-09 16:05:30+02",
            "Sat, 09 Mar 2024 14:05:30 +0000",
            " 2024/03/09 14:05:30 ",
        ] {
            assert_eq!(parse_text(text).unwrap(), expected(), "failed to parse {text}");
        }
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(parse_text("yesterday"), Err(CheckError::Parse(_))));
        assert!(matches!(normalize(&RawTimestamp::Null), Err(CheckError::Parse(_))));
    }
}
