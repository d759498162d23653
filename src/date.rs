//! Date literals: `[yyyy/mm/dd hh:mm:ss]` to Unix time in the local zone.

use crate::types::Value;
use chrono::{Datelike, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DateField {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl DateField {
    pub(crate) fn name(self) -> &'static str {
        match self {
            DateField::Year => "year",
            DateField::Month => "month",
            DateField::Day => "day",
            DateField::Hour => "hour",
            DateField::Minute => "minute",
            DateField::Second => "second",
        }
    }
}

/// The numeric fields of a date literal, in source order. Missing time
/// fields are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct DateParts {
    pub year: Value,
    pub month: Value,
    pub day: Value,
    pub hour: Value,
    pub minute: Value,
    pub second: Value,
}

impl DateParts {
    /// Converts through the local calendar. The error message names the
    /// first field that makes the date impossible.
    pub(crate) fn to_timestamp(self) -> Result<Value, String> {
        let invalid = |field: DateField| format!("invalid {} in date", field.name());
        let year = if (0..100).contains(&self.year) {
            Local::now().year() as Value / 100 * 100 + self.year
        } else {
            self.year
        };
        let year = i32::try_from(year).map_err(|_| invalid(DateField::Year))?;
        let month = u32::try_from(self.month).ok().filter(|m| (1..=12).contains(m));
        let month = month.ok_or_else(|| invalid(DateField::Month))?;
        let day = u32::try_from(self.day).map_err(|_| invalid(DateField::Day))?;
        let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
            if NaiveDate::from_ymd_opt(year, 1, 1).is_none() {
                invalid(DateField::Year)
            } else {
                invalid(DateField::Day)
            }
        })?;

        let hour = u32::try_from(self.hour).ok().filter(|h| *h < 24).ok_or_else(|| invalid(DateField::Hour))?;
        let minute = u32::try_from(self.minute).ok().filter(|m| *m < 60).ok_or_else(|| invalid(DateField::Minute))?;
        let second = u32::try_from(self.second).ok().filter(|s| *s < 60).ok_or_else(|| invalid(DateField::Second))?;
        let time = NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| invalid(DateField::Second))?;

        local_timestamp(NaiveDateTime::new(date, time)).ok_or_else(|| "invalid local time in date".to_string())
    }
}

fn local_timestamp(naive: NaiveDateTime) -> Option<Value> {
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(t) => Some(t.timestamp()),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.timestamp()),
        LocalResult::None => None,
    }
}

pub(crate) fn now() -> Value {
    Local::now().timestamp()
}

/// Local midnight at the start of today.
pub(crate) fn today() -> Value {
    let midnight = Local::now().date_naive().and_hms_opt(0, 0, 0);
    midnight.and_then(local_timestamp).unwrap_or_else(now)
}
