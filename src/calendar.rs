// Calendar-day normalisation.
//
// Every "which day is it" question in the engine goes through one DayBoundary.
// The default boundary is UTC midnight; a deployment can move it (e.g. -480 for
// midnight Pacific) but the same offset then applies to streaks, journal
// bucketing and week boundaries alike.

use std::fmt;

use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, Offset, Utc};
use spacetimedb::SpacetimeType;

use crate::error::ValidationError;

/// Largest offset any real timezone uses (UTC+14)
const MAX_OFFSET_MINUTES: i32 = 14 * 60;

/// Calendar day with no time component
#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateKey {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

impl DateKey {
    pub fn new(year: i32, month: u8, day: u8) -> Result<Self, ValidationError> {
        let key = DateKey { year, month, day };
        key.to_naive()?;
        Ok(key)
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        DateKey {
            year: date.year(),
            month: date.month() as u8,
            day: date.day() as u8,
        }
    }

    pub fn to_naive(&self) -> Result<NaiveDate, ValidationError> {
        NaiveDate::from_ymd_opt(self.year, self.month as u32, self.day as u32).ok_or(
            ValidationError::InvalidDate { year: self.year, month: self.month, day: self.day },
        )
    }

    /// Parse `YYYY-MM-DD`
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(DateKey::from_naive)
            .map_err(|e| ValidationError::MalformedPayload(format!("bad date '{}': {}", s.trim(), e)))
    }

    pub fn add_days(self, n: i64) -> Result<Self, ValidationError> {
        let date = self.to_naive()?;
        let shifted = if n >= 0 {
            date.checked_add_days(Days::new(n as u64))
        } else {
            date.checked_sub_days(Days::new(n.unsigned_abs()))
        };
        shifted
            .map(DateKey::from_naive)
            .ok_or_else(|| ValidationError::InvalidRange(format!("{} shifted by {} days overflows", self, n)))
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Fixed reference offset that decides where one calendar day ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DayBoundary {
    offset_minutes: i32,
}

impl DayBoundary {
    pub const UTC: DayBoundary = DayBoundary { offset_minutes: 0 };

    pub fn new(offset_minutes: i32) -> Result<Self, ValidationError> {
        if offset_minutes.abs() > MAX_OFFSET_MINUTES {
            return Err(ValidationError::MalformedPayload(format!(
                "day boundary offset {} minutes is beyond +/-{}",
                offset_minutes, MAX_OFFSET_MINUTES
            )));
        }
        Ok(DayBoundary { offset_minutes })
    }

    pub fn offset_minutes(&self) -> i32 {
        self.offset_minutes
    }

    fn fixed_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

/// Normalise an instant to its calendar day under `boundary`
pub fn day_key(instant: DateTime<Utc>, boundary: DayBoundary) -> DateKey {
    DateKey::from_naive(instant.with_timezone(&boundary.fixed_offset()).date_naive())
}

/// Convert SpacetimeDB-style micros since the unix epoch to a UTC instant
pub fn instant_from_micros(micros: i64) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| ValidationError::MalformedPayload(format!("timestamp {} is out of range", micros)))
}

pub fn day_key_from_micros(micros: i64, boundary: DayBoundary) -> Result<DateKey, ValidationError> {
    Ok(day_key(instant_from_micros(micros)?, boundary))
}

/// Whole days from `b` to `a` (`a - b`); negative when `a` is earlier
pub fn days_between(a: DateKey, b: DateKey) -> Result<i64, ValidationError> {
    Ok((a.to_naive()? - b.to_naive()?).num_days())
}

/// Sunday on or before `day`
pub fn week_start(day: DateKey) -> Result<DateKey, ValidationError> {
    let date = day.to_naive()?;
    let back = date.weekday().num_days_from_sunday() as i64;
    day.add_days(-back)
}

/// Inclusive range of calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: DateKey,
    pub to: DateKey,
}

impl DateRange {
    pub fn new(from: DateKey, to: DateKey) -> Result<Self, ValidationError> {
        from.to_naive()?;
        to.to_naive()?;
        if from > to {
            return Err(ValidationError::InvalidRange(format!("{} is after {}", from, to)));
        }
        Ok(DateRange { from, to })
    }

    pub fn contains(&self, day: DateKey) -> bool {
        self.from <= day && day <= self.to
    }

    pub fn days(&self) -> Result<Vec<DateKey>, ValidationError> {
        let span = days_between(self.to, self.from)?;
        (0..=span).map(|i| self.from.add_days(i)).collect()
    }
}
