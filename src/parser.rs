use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use regex::Captures;

use crate::pattern::Pattern;

/// Ordering of the date/time component groups consumed by
/// [`FieldParser::next_date_time`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateTimeOrder {
    /// day/month/year followed by hour/minute/second
    DayMonthYearHms,
}

/// Sequential cursor over the capture groups of a matched sentence.
///
/// Accessors must be called in the order the pattern declares its groups;
/// each call consumes exactly one group (six for a date/time). An absent or
/// empty group yields the accessor's default. Consuming groups out of
/// declaration order is a caller bug, not a recoverable condition.
pub struct FieldParser<'t> {
    captures: Captures<'t>,
    index: usize,
}

impl<'t> FieldParser<'t> {
    /// Match `sentence` against `pattern` and position the cursor on the
    /// first capture group. `None` when the sentence does not match.
    pub fn new(pattern: &Pattern, sentence: &'t str) -> Option<Self> {
        pattern
            .captures(sentence)
            .map(|captures| Self { captures, index: 1 })
    }

    fn next_group(&mut self) -> Option<&'t str> {
        let group = self.captures.get(self.index).map(|m| m.as_str());
        self.index += 1;
        group.filter(|s| !s.is_empty())
    }

    /// The raw captured token, unmodified.
    pub fn next(&mut self) -> Option<&'t str> {
        self.next_group()
    }

    pub fn next_int(&mut self, default: i64) -> i64 {
        self.next_group()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }

    pub fn next_double(&mut self, default: f64) -> f64 {
        self.next_group()
            .and_then(|s| s.parse().ok())
            .unwrap_or(default)
    }

    pub fn next_hex_int(&mut self, default: u64) -> u64 {
        self.next_group()
            .and_then(|s| u64::from_str_radix(s, 16).ok())
            .unwrap_or(default)
    }

    /// Combine the fixed set of date/time component groups into one UTC
    /// timestamp. Two-digit years resolve into the 2000s.
    ///
    /// The patterns only reject non-numeric tokens, so digit runs that do
    /// not form a real calendar date still reach this point and error here.
    pub fn next_date_time(&mut self, order: DateTimeOrder) -> Result<DateTime<Utc>> {
        match order {
            DateTimeOrder::DayMonthYearHms => {
                let day = self.next_int(0) as u32;
                let month = self.next_int(0) as u32;
                let mut year = self.next_int(0) as i32;
                if year < 100 {
                    year += 2000;
                }
                let hour = self.next_int(0) as u32;
                let minute = self.next_int(0) as u32;
                let second = self.next_int(0) as u32;

                let date = NaiveDate::from_ymd_opt(year, month, day)
                    .with_context(|| format!("invalid calendar date {day:02}/{month:02}/{year}"))?;
                let time = date
                    .and_hms_opt(hour, minute, second)
                    .with_context(|| format!("invalid time {hour:02}:{minute:02}:{second:02}"))?;
                Ok(time.and_utc())
            }
        }
    }
}
