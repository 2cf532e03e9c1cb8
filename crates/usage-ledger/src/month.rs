//! Calendar month (UTC) used as the budget accounting window

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, SecondsFormat, Utc};

/// A UTC calendar month such as `2026-10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Month {
    first_day: NaiveDate,
}

impl Month {
    /// Build a month from its year and 1-based month number.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|first_day| Self { first_day })
    }

    /// The month containing `ts`.
    pub fn of(ts: DateTime<Utc>) -> Self {
        Self {
            first_day: ts.date_naive().with_day(1).unwrap_or(NaiveDate::MIN),
        }
    }

    /// The month containing the current instant.
    pub fn current() -> Self {
        Self::of(Utc::now())
    }

    pub fn year(&self) -> i32 {
        self.first_day.year()
    }

    pub fn month(&self) -> u32 {
        self.first_day.month()
    }

    /// The month before this one.
    pub fn previous(&self) -> Self {
        match self.month() {
            1 => Self::new(self.year() - 1, 12),
            m => Self::new(self.year(), m - 1),
        }
        .unwrap_or(*self)
    }

    /// First instant of the month.
    pub fn start(&self) -> DateTime<Utc> {
        self.first_day.and_time(NaiveTime::MIN).and_utc()
    }

    /// First instant of the following month.
    pub fn end(&self) -> DateTime<Utc> {
        let next = match self.month() {
            12 => NaiveDate::from_ymd_opt(self.year() + 1, 1, 1),
            m => NaiveDate::from_ymd_opt(self.year(), m + 1, 1),
        };
        next.unwrap_or(NaiveDate::MAX)
            .and_time(NaiveTime::MIN)
            .and_utc()
    }

    /// Half-open `[start, end)` range in the ledger's timestamp encoding.
    pub fn bounds(&self) -> (String, String) {
        (format_timestamp(self.start()), format_timestamp(self.end()))
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for Month {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, month) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("expected YYYY-MM, got: {s}"))?;
        let year: i32 = year
            .parse()
            .map_err(|_| format!("invalid year in month: {s}"))?;
        let month: u32 = month
            .parse()
            .map_err(|_| format!("invalid month number in month: {s}"))?;
        Month::new(year, month).ok_or_else(|| format!("month out of range: {s}"))
    }
}

/// Fixed-width RFC 3339 encoding (microseconds, `Z` suffix) so that string
/// order in SQLite matches chronological order.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
