//! Conversion between millisecond durations and human-scaled periods.
//!
//! Stored configuration keeps every duration in milliseconds, while edit
//! forms work with a count of seconds, minutes, hours or days.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Unit of a human-scaled period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodUnit {
    Second,
    Minute,
    Hour,
    Day,
}

impl PeriodUnit {
    /// Every unit, largest first.
    pub const ALL: [PeriodUnit; 4] = [
        PeriodUnit::Day,
        PeriodUnit::Hour,
        PeriodUnit::Minute,
        PeriodUnit::Second,
    ];

    pub fn millis(self) -> i64 {
        match self {
            PeriodUnit::Second => SECOND_MS,
            PeriodUnit::Minute => MINUTE_MS,
            PeriodUnit::Hour => HOUR_MS,
            PeriodUnit::Day => DAY_MS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PeriodUnit::Second => "second",
            PeriodUnit::Minute => "minute",
            PeriodUnit::Hour => "hour",
            PeriodUnit::Day => "day",
        }
    }
}

impl fmt::Display for PeriodUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a period unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownUnit(pub String);

impl fmt::Display for UnknownUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown period unit: {:?}", self.0)
    }
}

impl std::error::Error for UnknownUnit {}

impl FromStr for PeriodUnit {
    type Err = UnknownUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PeriodUnit::ALL
            .into_iter()
            .find(|u| u.as_str() == s)
            .ok_or_else(|| UnknownUnit(s.to_string()))
    }
}

/// Longest period a probe or trigger may be configured with.
pub const MAX_PERIOD_MS: i64 = 366 * DAY_MS;

/// Convert a count of `unit` into milliseconds. `None` on overflow.
pub fn to_millis(value: i64, unit: PeriodUnit) -> Option<i64> {
    value.checked_mul(unit.millis())
}

/// Like [`to_millis`], but for a unit that has not been parsed yet.
///
/// An unrecognised unit or an overflowing product yields `0`, which every
/// caller treats as an invalid period.
pub fn to_millis_str(value: i64, unit: &str) -> i64 {
    unit.parse()
        .ok()
        .and_then(|u| to_millis(value, u))
        .unwrap_or(0)
}

/// Split a millisecond duration into the largest unit that divides it
/// exactly.
///
/// Durations that are not a whole number of seconds fall back to
/// `second`, truncated toward zero; they do not survive a round trip.
/// Zero is reported as `(0, second)`.
pub fn to_period_and_unit(ms: i64) -> (i64, PeriodUnit) {
    if ms == 0 {
        return (0, PeriodUnit::Second);
    }
    for unit in PeriodUnit::ALL {
        if ms % unit.millis() == 0 {
            return (ms / unit.millis(), unit);
        }
    }
    (ms / SECOND_MS, PeriodUnit::Second)
}

/// Render a duration as e.g. `"14 days"` or `"1 hour"`.
pub fn describe(ms: i64) -> String {
    let (value, unit) = to_period_and_unit(ms);
    if value == 1 {
        format!("{} {}", value, unit)
    } else {
        format!("{} {}s", value, unit)
    }
}
