//! Campaign date ranges and their calendar month decomposition.
//!
//! A [`Period`] is a half-open range `[start, end)` of calendar days. The
//! scheduler never works on a whole period directly; it works on the
//! [`MonthRange`]s returned by [`Period::months`], each clipped to the period
//! bounds so that the union of all months is exactly the period.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::PeriodError;

/// Date format used in campaign files and on stage command lines.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parses an ISO `YYYY-MM-DD` date.
pub fn parse_date(value: &str) -> Result<NaiveDate, PeriodError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| PeriodError::InvalidDate {
        value: value.to_string(),
    })
}

/// Immutable half-open date range. `start < end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Period {
    start: NaiveDate,
    end: NaiveDate,
}

impl Period {
    /// Creates a new period, rejecting empty or inverted ranges.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, PeriodError> {
        if start >= end {
            return Err(PeriodError::EmptyRange {
                start: start.format(DATE_FORMAT).to_string(),
                end: end.format(DATE_FORMAT).to_string(),
            });
        }
        Ok(Self { start, end })
    }

    /// Parses a period from two ISO date strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, PeriodError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    /// First day of the period (inclusive).
    pub fn start(&self) -> NaiveDate {
        self.start
    }

    /// Day after the last day of the period (exclusive).
    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Returns true if `date` lies within `[start, end)`.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// Intersection of two periods, or `None` when they do not overlap.
    pub fn overlap(&self, other: &Period) -> Option<Period> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        Period::new(start, end).ok()
    }

    /// Lazily enumerates the calendar months touched by this period.
    ///
    /// The iterator is finite and can be restarted by calling `months()` again
    /// or cloning it before consumption.
    pub fn months(&self) -> MonthIter {
        MonthIter {
            cursor: Some(self.start),
            end: self.end,
        }
    }

    /// Number of calendar months touched by this period.
    pub fn month_count(&self) -> usize {
        self.months().count()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

/// One calendar month clipped to the bounds of the period it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct MonthRange {
    pub year: i32,
    pub month: u32,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl MonthRange {
    /// Stable key used by the history store, e.g. `2012-07`.
    pub fn key(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }

    /// Four digit year, as passed to stage programs.
    pub fn year_str(&self) -> String {
        format!("{:04}", self.year)
    }

    /// Zero padded month, as passed to stage programs.
    pub fn month_str(&self) -> String {
        format!("{:02}", self.month)
    }

    /// Returns true if the range covers the whole calendar month.
    pub fn is_full_month(&self) -> bool {
        self.start.day() == 1
            && first_of_next_month(self.start).map_or(false, |next| next == self.end)
    }
}

impl fmt::Display for MonthRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Iterator over the clipped months of a [`Period`].
#[derive(Debug, Clone)]
pub struct MonthIter {
    cursor: Option<NaiveDate>,
    end: NaiveDate,
}

impl Iterator for MonthIter {
    type Item = MonthRange;

    fn next(&mut self) -> Option<MonthRange> {
        let start = self.cursor?;
        if start >= self.end {
            self.cursor = None;
            return None;
        }

        let next = first_of_next_month(start);
        let end = next.map_or(self.end, |n| n.min(self.end));
        self.cursor = next;

        Some(MonthRange {
            year: start.year(),
            month: start.month(),
            start,
            end,
        })
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    date.with_day(1)?.checked_add_months(chrono::Months::new(1))
}
