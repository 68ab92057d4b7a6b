//! Six-field crontab restricted to wildcards and single literals.
//!
//! Each field is either `*` or one value. Ranges, lists and steps are
//! rejected. `day_of_week` counts from Monday (`0`) and also accepts the
//! names `mon`..`sun`. All evaluation happens in UTC.

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const WEEKDAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

/// How far ahead `next_after` searches before deciding a crontab never fires.
const SEARCH_YEARS: i32 = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrontabError {
    #[error("invalid {field} value '{value}': only '*' or a single value is supported")]
    Unsupported { field: &'static str, value: String },
    #[error("invalid {field} value '{value}'")]
    InvalidValue { field: &'static str, value: String },
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("crontab '{0}' never fires")]
    NeverFires(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronUnit {
    Second,
    Minute,
    Hour,
    Day,
    Month,
    DayOfWeek,
}

impl CronUnit {
    pub fn name(self) -> &'static str {
        match self {
            CronUnit::Second => "second",
            CronUnit::Minute => "minute",
            CronUnit::Hour => "hour",
            CronUnit::Day => "day",
            CronUnit::Month => "month",
            CronUnit::DayOfWeek => "day_of_week",
        }
    }

    fn bounds(self) -> (u32, u32) {
        match self {
            CronUnit::Second | CronUnit::Minute => (0, 59),
            CronUnit::Hour => (0, 23),
            CronUnit::Day => (1, 31),
            CronUnit::Month => (1, 12),
            CronUnit::DayOfWeek => (0, 6),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronField {
    Any,
    Exact(u32),
    /// A day of week given by name; the value is days from Monday.
    Named(u32),
}

impl CronField {
    pub fn parse(unit: CronUnit, raw: &str) -> Result<Self, CrontabError> {
        let raw = raw.trim();
        if raw == "*" {
            return Ok(CronField::Any);
        }
        if raw.contains(['-', ',', '/', '*']) {
            return Err(CrontabError::Unsupported {
                field: unit.name(),
                value: raw.to_owned(),
            });
        }

        if unit == CronUnit::DayOfWeek {
            let lower = raw.to_ascii_lowercase();
            if let Some(idx) = WEEKDAY_NAMES.iter().position(|name| *name == lower) {
                return Ok(CronField::Named(idx as u32));
            }
        }

        let value = raw.parse::<u32>().map_err(|_| CrontabError::InvalidValue {
            field: unit.name(),
            value: raw.to_owned(),
        })?;
        let (min, max) = unit.bounds();
        if value < min || value > max {
            return Err(CrontabError::OutOfRange {
                field: unit.name(),
                value,
                min,
                max,
            });
        }
        Ok(CronField::Exact(value))
    }

    pub fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Exact(v) | CronField::Named(v) => *v == value,
        }
    }
}

impl fmt::Display for CronField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CronField::Any => f.write_str("*"),
            CronField::Exact(v) => write!(f, "{v}"),
            CronField::Named(v) => f.write_str(WEEKDAY_NAMES[*v as usize]),
        }
    }
}

/// Wire form of a crontab: one string per field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrontabFields {
    #[serde(default = "zero")]
    pub second: String,
    #[serde(default = "any")]
    pub minute: String,
    #[serde(default = "any")]
    pub hour: String,
    #[serde(default = "any")]
    pub day: String,
    #[serde(default = "any")]
    pub month: String,
    #[serde(default = "any")]
    pub day_of_week: String,
}

fn zero() -> String {
    "0".to_owned()
}

fn any() -> String {
    "*".to_owned()
}

impl Default for CrontabFields {
    fn default() -> Self {
        Self {
            second: zero(),
            minute: any(),
            hour: any(),
            day: any(),
            month: any(),
            day_of_week: any(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CrontabFields", into = "CrontabFields")]
pub struct Crontab {
    second: CronField,
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl Crontab {
    pub fn second(&self) -> CronField {
        self.second
    }

    pub fn minute(&self) -> CronField {
        self.minute
    }

    pub fn hour(&self) -> CronField {
        self.hour
    }

    pub fn day(&self) -> CronField {
        self.day
    }

    pub fn month(&self) -> CronField {
        self.month
    }

    pub fn day_of_week(&self) -> CronField {
        self.day_of_week
    }

    pub fn matches(&self, at: &DateTime<Utc>) -> bool {
        self.second.matches(at.second())
            && self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.day.matches(at.day())
            && self.month.matches(at.month())
            && self.day_of_week.matches(at.weekday().num_days_from_monday())
    }

    /// First whole second strictly after `after` that matches, if any.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = after.naive_utc().with_nanosecond(0)? + Duration::seconds(1);
        let last_year = t.year() + SEARCH_YEARS;

        while t.year() <= last_year {
            if !self.month.matches(t.month()) {
                t = first_of_next_month(t)?;
                continue;
            }
            if !self.day.matches(t.day())
                || !self.day_of_week.matches(t.weekday().num_days_from_monday())
            {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hour.matches(t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !self.minute.matches(t.minute()) {
                t = t.date().and_hms_opt(t.hour(), t.minute(), 0)? + Duration::minutes(1);
                continue;
            }
            if !self.second.matches(t.second()) {
                t += Duration::seconds(1);
                continue;
            }
            return Some(t.and_utc());
        }
        None
    }

    /// Like `next_after`, but a crontab with no future firing is an error.
    pub fn require_next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, CrontabError> {
        self.next_after(after)
            .ok_or_else(|| CrontabError::NeverFires(self.to_string()))
    }

    pub fn fields(&self) -> CrontabFields {
        CrontabFields::from(*self)
    }
}

fn first_of_next_month(t: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

impl TryFrom<CrontabFields> for Crontab {
    type Error = CrontabError;

    fn try_from(raw: CrontabFields) -> Result<Self, Self::Error> {
        Ok(Self {
            second: CronField::parse(CronUnit::Second, &raw.second)?,
            minute: CronField::parse(CronUnit::Minute, &raw.minute)?,
            hour: CronField::parse(CronUnit::Hour, &raw.hour)?,
            day: CronField::parse(CronUnit::Day, &raw.day)?,
            month: CronField::parse(CronUnit::Month, &raw.month)?,
            day_of_week: CronField::parse(CronUnit::DayOfWeek, &raw.day_of_week)?,
        })
    }
}

impl From<Crontab> for CrontabFields {
    fn from(tab: Crontab) -> Self {
        Self {
            second: tab.second.to_string(),
            minute: tab.minute.to_string(),
            hour: tab.hour.to_string(),
            day: tab.day.to_string(),
            month: tab.month.to_string(),
            day_of_week: tab.day_of_week.to_string(),
        }
    }
}

impl fmt::Display for Crontab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.second, self.minute, self.hour, self.day, self.month, self.day_of_week
        )
    }
}
