//! Natural-language time range parsing for retrieval queries.

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;

static PAST_DAYS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^past\s+(\d+)\s+days?$").expect("invalid past-days regex")
});

static SINCE_WEEKDAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^since\s+([a-z]+)$").expect("invalid since-weekday regex")
});

/// Half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Parse a natural time phrase relative to `now`.
///
/// Supported: `today`, `yesterday`, `last week`, `past N days`,
/// `since <weekday>`. Anything else is a bad request.
pub fn parse_time_range(phrase: &str, now: DateTime<Utc>) -> AppResult<TimeRange> {
    let phrase = phrase.trim().to_lowercase();
    let midnight = start_of_day(now);
    let tomorrow = midnight + Duration::days(1);

    match phrase.as_str() {
        "today" => {
            return Ok(TimeRange {
                start: midnight,
                end: tomorrow,
            });
        }
        "yesterday" => {
            return Ok(TimeRange {
                start: midnight - Duration::days(1),
                end: midnight,
            });
        }
        "last week" => {
            return Ok(TimeRange {
                start: midnight - Duration::days(7),
                end: tomorrow,
            });
        }
        _ => {}
    }

    if let Some(caps) = PAST_DAYS_RE.captures(&phrase) {
        let days: i64 = caps[1]
            .parse()
            .map_err(|_| AppError::Validation(format!("Invalid day count in '{}'", phrase)))?;
        if days == 0 {
            return Err(AppError::Validation(
                "Day count must be at least 1".to_string(),
            ));
        }
        return Ok(TimeRange {
            start: midnight - Duration::days(days),
            end: tomorrow,
        });
    }

    if let Some(caps) = SINCE_WEEKDAY_RE.captures(&phrase) {
        let target = parse_weekday(&caps[1])?;
        let days_back = i64::from(
            (now.weekday().num_days_from_monday() + 7 - target.num_days_from_monday()) % 7,
        );
        return Ok(TimeRange {
            start: midnight - Duration::days(days_back),
            end: tomorrow,
        });
    }

    Err(AppError::Validation(format!(
        "Unsupported time phrase: '{}'",
        phrase
    )))
}

fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
}

fn parse_weekday(name: &str) -> AppResult<Weekday> {
    match name {
        "monday" | "mon" => Ok(Weekday::Mon),
        "tuesday" | "tue" => Ok(Weekday::Tue),
        "wednesday" | "wed" => Ok(Weekday::Wed),
        "thursday" | "thu" => Ok(Weekday::Thu),
        "friday" | "fri" => Ok(Weekday::Fri),
        "saturday" | "sat" => Ok(Weekday::Sat),
        "sunday" | "sun" => Ok(Weekday::Sun),
        other => Err(AppError::Validation(format!("Unknown weekday: '{}'", other))),
    }
}
