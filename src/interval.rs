//! Merge embargo windows
//!
//! An embargo is a union of intervals during which nothing gets merged.
//! Intervals are either weekly ("Fri 1pm - Mon 7am") or absolute
//! ("2026-12-24 - 2027-01-02"). All times are UTC.

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc, Weekday};
use regex::Regex;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::LazyLock;

const MINUTES_PER_DAY: u32 = 24 * 60;
const MINUTES_PER_WEEK: u32 = 7 * MINUTES_PER_DAY;

static RANGE_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+-\s+").expect("valid regex"));

static CLOCK_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$").expect("valid regex")
});

/// A window recurring every week
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklyInterval {
    from: u32,
    to: u32,
}

impl WeeklyInterval {
    /// Build from start/end weekday and time of day
    pub fn new(from_day: Weekday, from_time: NaiveTime, to_day: Weekday, to_time: NaiveTime) -> Self {
        Self {
            from: minute_of_week(from_day, from_time),
            to: minute_of_week(to_day, to_time),
        }
    }

    /// Whether the window contains `instant`; the end is exclusive
    pub fn covers(&self, instant: DateTime<Utc>) -> bool {
        let now = minute_of_week(instant.weekday(), instant.time());
        if self.from <= self.to {
            self.from <= now && now < self.to
        } else {
            // wraps around the end of the week
            now >= self.from || now < self.to
        }
    }
}

fn minute_of_week(day: Weekday, time: NaiveTime) -> u32 {
    (day.num_days_from_monday() * MINUTES_PER_DAY + time.hour() * 60 + time.minute())
        % MINUTES_PER_WEEK
}

/// A single embargo window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interval {
    /// Recurs every week
    Weekly(WeeklyInterval),
    /// One-off window, end exclusive
    Absolute {
        /// Start of the window
        from: DateTime<Utc>,
        /// End of the window
        to: DateTime<Utc>,
    },
}

impl Interval {
    /// Whether the window contains `instant`
    pub fn covers(&self, instant: DateTime<Utc>) -> bool {
        match self {
            Self::Weekly(weekly) => weekly.covers(instant),
            Self::Absolute { from, to } => *from <= instant && instant < *to,
        }
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = RANGE_SEPARATOR.split(s.trim()).collect();
        let [from, to] = parts.as_slice() else {
            return Err(Error::Config(format!(
                "interval `{s}` must look like `<start> - <end>`"
            )));
        };

        if let (Some((from_day, from_time)), Some((to_day, to_time))) =
            (parse_weekly_point(from), parse_weekly_point(to))
        {
            return Ok(Self::Weekly(WeeklyInterval::new(
                from_day, from_time, to_day, to_time,
            )));
        }

        let from = parse_absolute_point(from)?;
        let to = parse_absolute_point(to)?;
        if to < from {
            return Err(Error::Config(format!("interval `{s}` ends before it starts")));
        }
        Ok(Self::Absolute { from, to })
    }
}

/// `Fri 1pm`, `friday 13:30`, `Mon 07:00`
fn parse_weekly_point(s: &str) -> Option<(Weekday, NaiveTime)> {
    let (day, time) = s.trim().split_once(char::is_whitespace)?;
    let day = Weekday::from_str(day).ok()?;
    let time = parse_clock_time(time.trim())?;
    Some((day, time))
}

fn parse_clock_time(s: &str) -> Option<NaiveTime> {
    let caps = CLOCK_TIME.captures(s)?;
    let mut hour: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = caps.get(2).map_or(Some(0), |m| m.as_str().parse().ok())?;
    if let Some(meridiem) = caps.get(3) {
        if hour == 0 || hour > 12 {
            return None;
        }
        let pm = meridiem.as_str().eq_ignore_ascii_case("pm");
        hour = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// RFC 3339, `YYYY-MM-DD HH:MM` or a bare date (midnight)
fn parse_absolute_point(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M") {
        return Ok(dt.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    Err(Error::Config(format!("cannot parse `{s}` as a point in time")))
}

/// Union of embargo windows
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct IntervalUnion {
    intervals: Vec<Interval>,
}

impl IntervalUnion {
    /// No embargo at all
    pub const fn empty() -> Self {
        Self {
            intervals: Vec::new(),
        }
    }

    /// Build from already parsed intervals
    pub const fn new(intervals: Vec<Interval>) -> Self {
        Self { intervals }
    }

    /// Parse a comma-separated list of intervals; blank input is empty
    pub fn from_human(s: &str) -> Result<Self> {
        let intervals = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(Interval::from_str)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { intervals })
    }

    /// Whether any window contains `instant`
    pub fn covers(&self, instant: DateTime<Utc>) -> bool {
        self.intervals.iter().any(|i| i.covers(instant))
    }

    /// Whether there are no windows
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

impl TryFrom<String> for IntervalUnion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::from_human(&value)
    }
}

impl FromStr for IntervalUnion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_human(s)
    }
}
