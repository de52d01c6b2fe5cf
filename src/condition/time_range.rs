//! Day-of-week time-range grammar: `D/R1,R2,…[/TZ]`.
//!
//! `D` is one of `M T W R F S U` (`R` is Thursday, to avoid colliding with
//! Tuesday). Each `R` is either the literal `true` or `HH[:MM[:SS]]-HH[:MM[:SS]]`
//! with `start <= end`. `TZ`, if present, is a fixed UTC offset like `+05:30`
//! or `-08:00`; bare `UTC` is also accepted. Entries for the same day merge.

use chrono::{DateTime, FixedOffset, NaiveTime, Utc, Weekday};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    BadDayLetter(char),
    BadRange(String),
    StartAfterEnd(String),
    BadTimezone(String),
    Empty,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadDayLetter(c) => write!(f, "unknown day letter '{c}'"),
            Self::BadRange(r) => write!(f, "malformed time range '{r}'"),
            Self::StartAfterEnd(r) => write!(f, "range start after end: '{r}'"),
            Self::BadTimezone(tz) => write!(f, "malformed timezone offset '{tz}'"),
            Self::Empty => write!(f, "empty day/time-range entry"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayRange {
    Always,
    Window(NaiveTime, NaiveTime),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayWindow {
    pub day: Weekday,
    pub ranges: Vec<DayRange>,
    pub offset: FixedOffset,
}

fn day_from_letter(c: char) -> Result<Weekday, ParseError> {
    match c {
        'M' => Ok(Weekday::Mon),
        'T' => Ok(Weekday::Tue),
        'W' => Ok(Weekday::Wed),
        'R' => Ok(Weekday::Thu),
        'F' => Ok(Weekday::Fri),
        'S' => Ok(Weekday::Sat),
        'U' => Ok(Weekday::Sun),
        other => Err(ParseError::BadDayLetter(other)),
    }
}

fn parse_clock(s: &str) -> Option<NaiveTime> {
    let parts: Vec<&str> = s.split(':').collect();
    let (h, m, sec) = match parts.as_slice() {
        [h] => (h.parse().ok()?, 0, 0),
        [h, m] => (h.parse().ok()?, m.parse().ok()?, 0),
        [h, m, s] => (h.parse().ok()?, m.parse().ok()?, s.parse().ok()?),
        _ => return None,
    };
    NaiveTime::from_hms_opt(h, m, sec)
}

fn parse_range(raw: &str) -> Result<DayRange, ParseError> {
    if raw == "true" {
        return Ok(DayRange::Always);
    }
    let (start_s, end_s) = raw.split_once('-').ok_or_else(|| ParseError::BadRange(raw.to_string()))?;
    let start = parse_clock(start_s).ok_or_else(|| ParseError::BadRange(raw.to_string()))?;
    let end = parse_clock(end_s).ok_or_else(|| ParseError::BadRange(raw.to_string()))?;
    if start > end {
        return Err(ParseError::StartAfterEnd(raw.to_string()));
    }
    Ok(DayRange::Window(start, end))
}

fn parse_offset(raw: &str) -> Result<FixedOffset, ParseError> {
    if raw.eq_ignore_ascii_case("utc") {
        return Ok(FixedOffset::east_opt(0).unwrap());
    }
    let sign = match raw.as_bytes().first() {
        Some(b'+') => 1,
        Some(b'-') => -1,
        _ => return Err(ParseError::BadTimezone(raw.to_string())),
    };
    let rest = &raw[1..];
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let h: i32 = h.parse().map_err(|_| ParseError::BadTimezone(raw.to_string()))?;
    let m: i32 = m.parse().map_err(|_| ParseError::BadTimezone(raw.to_string()))?;
    let secs = sign * (h * 3600 + m * 60);
    FixedOffset::east_opt(secs).ok_or_else(|| ParseError::BadTimezone(raw.to_string()))
}

/// Parse one `D/R1,R2,…[/TZ]` entry.
pub fn parse_entry(raw: &str) -> Result<DayWindow, ParseError> {
    if raw.is_empty() {
        return Err(ParseError::Empty);
    }
    let mut parts = raw.splitn(3, '/');
    let day_letter = parts.next().ok_or(ParseError::Empty)?;
    let mut chars = day_letter.chars();
    let day = match (chars.next(), chars.next()) {
        (Some(c), None) => day_from_letter(c)?,
        _ => return Err(ParseError::BadDayLetter(day_letter.chars().next().unwrap_or('?'))),
    };
    let ranges_part = parts.next().ok_or(ParseError::Empty)?;
    let ranges = ranges_part
        .split(',')
        .map(parse_range)
        .collect::<Result<Vec<_>, _>>()?;
    let offset = match parts.next() {
        Some(tz) => parse_offset(tz)?,
        None => FixedOffset::east_opt(0).unwrap(),
    };
    Ok(DayWindow { day, ranges, offset })
}

/// Parse every entry in a condition's `values`, merging entries that share
/// the same day.
pub fn parse_all(values: &[String]) -> Result<Vec<DayWindow>, ParseError> {
    let mut windows: Vec<DayWindow> = Vec::new();
    for raw in values {
        let parsed = parse_entry(raw)?;
        if let Some(existing) = windows.iter_mut().find(|w| w.day == parsed.day && w.offset == parsed.offset) {
            existing.ranges.extend(parsed.ranges);
        } else {
            windows.push(parsed);
        }
    }
    Ok(windows)
}

/// Whether `now` (UTC) conforms to any parsed window, and if so the instant
/// (UTC) at which the current matching window ends — `None` for an
/// `Always` window, meaning it never ends on its own.
#[must_use]
pub fn evaluate(windows: &[DayWindow], now: DateTime<Utc>) -> Option<Option<DateTime<Utc>>> {
    for window in windows {
        let local = now.with_timezone(&window.offset);
        if local.weekday() != window.day {
            continue;
        }
        let local_time = local.time();
        for range in &window.ranges {
            match range {
                DayRange::Always => return Some(None),
                DayRange::Window(start, end) => {
                    if *start <= local_time && local_time <= *end {
                        let end_local = local.date_naive().and_time(*end).and_local_timezone(window.offset);
                        let end_utc = end_local.single().map(|dt| dt.with_timezone(&Utc));
                        return Some(end_utc);
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rejects_hour_out_of_range() {
        assert!(parse_range("25:00-26:00").is_err());
    }

    #[test]
    fn rejects_start_after_end() {
        let err = parse_range("17:00:00-08:00:00").unwrap_err();
        assert_eq!(err, ParseError::StartAfterEnd("17:00:00-08:00:00".to_string()));
    }

    #[test]
    fn parses_literal_true() {
        let window = parse_entry("M/true").unwrap();
        assert_eq!(window.day, Weekday::Mon);
        assert_eq!(window.ranges, vec![DayRange::Always]);
    }

    #[test]
    fn merges_entries_for_same_day() {
        let windows = parse_all(&["M/09:00-12:00".into(), "M/13:00-17:00".into()]).unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].ranges.len(), 2);
    }

    #[test]
    fn evaluates_within_window() {
        let windows = parse_all(&["W/09:00-17:00".into()]).unwrap();
        // 2024-01-03 is a Wednesday.
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap();
        let result = evaluate(&windows, now);
        assert!(result.is_some());
    }

    #[test]
    fn evaluates_outside_window_as_none() {
        let windows = parse_all(&["W/09:00-17:00".into()]).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 20, 0, 0).unwrap();
        assert!(evaluate(&windows, now).is_none());
    }

    #[test]
    fn wrong_day_does_not_match() {
        let windows = parse_all(&["M/00:00-23:59:59".into()]).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap(); // Wednesday
        assert!(evaluate(&windows, now).is_none());
    }
}
