//! Calendar-day keys and date normalization.
//!
//! Every persisted date uses the fixed `YYYY-MM-DD` string form regardless of
//! backend. User-facing input is looser: day-first numerics, month names, or a
//! bare month-year that resolves to the first day of that month.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("could not resolve '{input}' to a calendar date")]
pub struct DateParseError {
    pub input: String,
}

impl DateParseError {
    fn new(input: &str) -> Self {
        Self { input: input.to_string() }
    }
}

/// Canonical calendar-day key, no time component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey(NaiveDate);

/// Full-date formats tried in order. Day-before-month wins for ambiguous
/// numerics, so `07-10-2024` is the 7th of October.
const NUMERIC_FORMATS: &[&str] =
    &["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%Y/%m/%d", "%m-%d-%Y", "%m/%d/%Y"];

const TEXTUAL_FORMATS: &[&str] =
    &["%d %B %Y", "%B %d, %Y", "%B %d %Y", "%d %b %Y", "%b %d, %Y", "%b %d %Y"];

impl DayKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// Strict `YYYY-MM-DD`, the stored representation.
    pub fn parse_iso(value: &str) -> Result<Self, DateParseError> {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .map(Self)
            .map_err(|_| DateParseError::new(value))
    }

    /// Resolves an arbitrary user-supplied date expression.
    ///
    /// A bare month-year (`July 2024`, `jul 2024`, `2024-07`) resolves to the
    /// first day of the month. Month names match case-insensitively.
    pub fn normalize(input: &str) -> Result<Self, DateParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DateParseError::new(input));
        }

        for format in NUMERIC_FORMATS.iter().chain(TEXTUAL_FORMATS) {
            if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
                return Ok(Self(date));
            }
        }

        if let Some(day) = parse_month_year(trimmed) {
            return Ok(day);
        }

        Err(DateParseError::new(input))
    }

    pub fn next(self) -> Self {
        Self(self.0 + Duration::days(1))
    }

    pub fn date(self) -> NaiveDate {
        self.0
    }
}

fn parse_month_year(input: &str) -> Option<DayKey> {
    let words: Vec<&str> = input.split_whitespace().collect();
    if let [month, year] = words[..] {
        let month = month_number(month)?;
        let year: i32 = year.parse().ok()?;
        return DayKey::from_ymd(year, month, 1);
    }

    // Numeric month-year: 2024-07, 07-2024, 2024/07.
    let parts: Vec<&str> = input.split(['-', '/']).map(str::trim).collect();
    if let [first, second] = parts[..] {
        let (year, month) = if first.len() == 4 { (first, second) } else { (second, first) };
        let year: i32 = year.parse().ok()?;
        let month: u32 = month.parse().ok()?;
        return DayKey::from_ymd(year, month, 1);
    }

    None
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: &[&str] = &[
        "january",
        "february",
        "march",
        "april",
        "may",
        "june",
        "july",
        "august",
        "september",
        "october",
        "november",
        "december",
    ];
    let lowered = name.to_lowercase();
    MONTHS
        .iter()
        .position(|month| **month == lowered || (lowered.len() >= 3 && month.starts_with(&lowered)))
        .map(|index| index as u32 + 1)
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for DayKey {
    type Err = DateParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse_iso(value)
    }
}

impl Serialize for DayKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DayKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse_iso(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(year: i32, month: u32, day: u32) -> DayKey {
        DayKey::from_ymd(year, month, day).expect("valid test date")
    }

    #[test]
    fn normalizes_iso_input_unchanged() {
        assert_eq!(DayKey::normalize("2024-07-14").unwrap(), day(2024, 7, 14));
    }

    #[test]
    fn normalizes_day_first_numerics() {
        assert_eq!(DayKey::normalize("14-07-2024").unwrap(), day(2024, 7, 14));
        assert_eq!(DayKey::normalize("14/07/2024").unwrap(), day(2024, 7, 14));
    }

    #[test]
    fn prefers_day_before_month_for_ambiguous_numerics() {
        assert_eq!(DayKey::normalize("07-10-2024").unwrap(), day(2024, 10, 7));
    }

    #[test]
    fn falls_back_to_month_first_when_day_first_is_impossible() {
        assert_eq!(DayKey::normalize("07-25-2024").unwrap(), day(2024, 7, 25));
    }

    #[test]
    fn month_year_resolves_to_first_of_month() {
        assert_eq!(DayKey::normalize("July 2024").unwrap(), day(2024, 7, 1));
        assert_eq!(DayKey::normalize("july 2024").unwrap(), day(2024, 7, 1));
        assert_eq!(DayKey::normalize("jul 2024").unwrap(), day(2024, 7, 1));
    }

    #[test]
    fn numeric_month_year_resolves_to_first_of_month() {
        assert_eq!(DayKey::normalize("2024-07").unwrap(), day(2024, 7, 1));
        assert_eq!(DayKey::normalize("07-2024").unwrap(), day(2024, 7, 1));
    }

    #[test]
    fn parses_textual_full_dates() {
        assert_eq!(DayKey::normalize("14 July 2024").unwrap(), day(2024, 7, 14));
        assert_eq!(DayKey::normalize("July 14, 2024").unwrap(), day(2024, 7, 14));
    }

    #[test]
    fn rejects_unresolvable_input() {
        let error = DayKey::normalize("next harvest").unwrap_err();
        assert_eq!(error.input, "next harvest");
        assert!(DayKey::normalize("").is_err());
        assert!(DayKey::normalize("2024-13").is_err());
    }

    #[test]
    fn display_matches_stored_form() {
        assert_eq!(day(2024, 7, 1).to_string(), "2024-07-01");
        assert_eq!(DayKey::parse_iso("2024-07-01").unwrap(), day(2024, 7, 1));
    }

    #[test]
    fn next_crosses_month_boundaries() {
        assert_eq!(day(2024, 7, 31).next(), day(2024, 8, 1));
    }
}
