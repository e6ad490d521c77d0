//! Cron expressions and fixed intervals.
//!
//! Cron uses the classic five fields `minute hour day-of-month month
//! day-of-week`, each accepting `*`, `N`, `A-B`, lists separated by `,` and a
//! `/step` suffix. Month and weekday names (`jan`, `mon`) are accepted, and
//! `@hourly`, `@daily`, `@weekly`, `@monthly`, `@yearly` are shorthands. When
//! both day fields are restricted a time matches if either one does.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;

/// When a job fires on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Schedule {
    /// Five-field cron expression, evaluated in local time
    Cron(String),
    /// Fixed period in milliseconds
    IntervalMs(u64),
}

impl Schedule {
    /// Check the schedule is usable.
    pub fn validate(&self) -> Result<(), JobError> {
        match self {
            Schedule::Cron(expr) => CronExpr::parse(expr).map(|_| ()),
            Schedule::IntervalMs(0) => Err(JobError::Invalid("interval must be positive".into())),
            Schedule::IntervalMs(_) => Ok(()),
        }
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Cron(expr) => CronExpr::parse(expr)
                .ok()?
                .next_after(&after.with_timezone(&chrono::Local))
                .map(|t| t.with_timezone(&Utc)),
            Schedule::IntervalMs(ms) => {
                let ms = i64::try_from(*ms).ok()?;
                Some(after + Duration::milliseconds(ms))
            }
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::Cron(expr) => write!(f, "cron '{}'", expr),
            Schedule::IntervalMs(ms) => write!(f, "every {} ms", ms),
        }
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: u64,
    hours: u32,
    days: u32,
    months: u16,
    weekdays: u8,
    days_restricted: bool,
    weekdays_restricted: bool,
}

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, JobError> {
        let expr = expr.trim();
        let expanded = match expr {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            "@yearly" | "@annually" => "0 0 1 1 *",
            other => other,
        };
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(JobError::Invalid(format!(
                "cron expression needs 5 fields, got {}: '{}'",
                fields.len(),
                expr
            )));
        }

        let minutes = parse_field(fields[0], 0, 59, &[])?;
        let hours = parse_field(fields[1], 0, 23, &[])?;
        let days = parse_field(fields[2], 1, 31, &[])?;
        let months = parse_field(fields[3], 1, 12, &MONTH_NAMES)?;
        let mut weekdays = parse_field(fields[4], 0, 7, &DAY_NAMES)?;
        // 7 is another name for Sunday
        if weekdays & (1 << 7) != 0 {
            weekdays |= 1;
        }

        Ok(Self {
            minutes,
            hours: hours as u32,
            days: days as u32,
            months: months as u16,
            weekdays: (weekdays & 0x7f) as u8,
            days_restricted: fields[2] != "*",
            weekdays_restricted: fields[4] != "*",
        })
    }

    /// Whether the minute containing `t` is a fire time.
    pub fn matches<Tz: TimeZone>(&self, t: &DateTime<Tz>) -> bool {
        self.matches_naive(&t.naive_local())
    }

    fn matches_naive(&self, t: &NaiveDateTime) -> bool {
        bit(self.minutes, t.minute())
            && bit(self.hours as u64, t.hour())
            && bit(self.months as u64, t.month())
            && self.day_matches(t.date())
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = bit(self.days as u64, date.day());
        let dow = bit(self.weekdays as u64, date.weekday().num_days_from_sunday());
        match (self.days_restricted, self.weekdays_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// First matching minute strictly after `after`, searching up to about
    /// five years ahead.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let start = after.naive_local().with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = start + Duration::days(5 * 366);
        let mut t = start;

        while t < limit {
            if !bit(self.months as u64, t.month()) {
                t = first_of_next_month(t.date())?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !bit(self.hours as u64, t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            // Skip local times that do not exist (DST gap)
            if let Some(found) = tz.from_local_datetime(&t).earliest() {
                return Some(found);
            }
            t += Duration::minutes(1);
        }
        None
    }
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

fn parse_field(field: &str, min: u32, max: u32, names: &[&str]) -> Result<u64, JobError> {
    let invalid = || JobError::Invalid(format!("invalid cron field '{}'", field));
    let mut mask = 0u64;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid())?;
                if step == 0 {
                    return Err(invalid());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, names, min)?, parse_value(b, names, min)?)
        } else {
            let v = parse_value(range, names, min)?;
            // `N/step` runs from N to the end of the range
            if part.contains('/') { (v, max) } else { (v, v) }
        };

        if lo < min || hi > max || lo > hi {
            return Err(invalid());
        }
        let mut v = lo;
        while v <= hi {
            mask |= 1u64 << v;
            v += step;
        }
    }

    Ok(mask)
}

fn parse_value(text: &str, names: &[&str], min: u32) -> Result<u32, JobError> {
    if let Ok(n) = text.parse::<u32>() {
        return Ok(n);
    }
    let lower = text.to_ascii_lowercase();
    names
        .iter()
        .position(|name| *name == lower)
        .map(|idx| idx as u32 + min)
        .ok_or_else(|| JobError::Invalid(format!("invalid cron value '{}'", text)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_every_minute() {
        let cron = CronExpr::parse("* * * * *").unwrap();
        assert!(cron.matches(&at(2024, 3, 1, 12, 34)));
        assert_eq!(
            cron.next_after(&at(2024, 3, 1, 12, 34)),
            Some(at(2024, 3, 1, 12, 35))
        );
    }

    #[test]
    fn test_step_and_ranges() {
        let cron = CronExpr::parse("*/15 9-17 * * mon-fri").unwrap();
        // 2024-03-01 is a Friday
        assert!(cron.matches(&at(2024, 3, 1, 9, 45)));
        assert!(!cron.matches(&at(2024, 3, 1, 9, 46)));
        assert!(!cron.matches(&at(2024, 3, 1, 18, 0)));
        // Saturday
        assert!(!cron.matches(&at(2024, 3, 2, 10, 0)));
        // Friday 17:45 -> Monday 09:00
        assert_eq!(
            cron.next_after(&at(2024, 3, 1, 17, 45)),
            Some(at(2024, 3, 4, 9, 0))
        );
    }

    #[test]
    fn test_lists_and_names() {
        let cron = CronExpr::parse("0,30 6 1 jan,jul *").unwrap();
        assert!(cron.matches(&at(2024, 7, 1, 6, 30)));
        assert!(!cron.matches(&at(2024, 8, 1, 6, 30)));
        assert_eq!(
            cron.next_after(&at(2024, 1, 1, 6, 30)),
            Some(at(2024, 7, 1, 6, 0))
        );
    }

    #[test]
    fn test_day_fields_are_ored() {
        // 13th of the month or any Friday
        let cron = CronExpr::parse("0 0 13 * 5").unwrap();
        assert!(cron.matches(&at(2024, 3, 13, 0, 0)));
        assert!(cron.matches(&at(2024, 3, 8, 0, 0)));
        assert!(!cron.matches(&at(2024, 3, 9, 0, 0)));
    }

    #[test]
    fn test_sunday_as_seven_and_macros() {
        let cron = CronExpr::parse("0 0 * * 7").unwrap();
        // 2024-03-03 is a Sunday
        assert!(cron.matches(&at(2024, 3, 3, 0, 0)));
        assert_eq!(CronExpr::parse("@weekly").unwrap(), CronExpr::parse("0 0 * * 0").unwrap());
    }

    #[test]
    fn test_leap_day() {
        let cron = CronExpr::parse("0 0 29 2 *").unwrap();
        assert_eq!(
            cron.next_after(&at(2025, 1, 1, 0, 0)),
            Some(at(2028, 2, 29, 0, 0))
        );
    }

    #[test]
    fn test_invalid_expressions() {
        for bad in ["", "* * * *", "60 * * * *", "* 24 * * *", "*/0 * * * *", "5-1 * * * *", "x * * * *"] {
            assert!(CronExpr::parse(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn test_interval_schedule() {
        let schedule = Schedule::IntervalMs(90_000);
        assert_eq!(
            schedule.next_after(at(2024, 1, 1, 0, 0)),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 30).unwrap())
        );
        assert!(Schedule::IntervalMs(0).validate().is_err());
        assert!(Schedule::Cron("bogus".into()).validate().is_err());
    }

    #[test]
    fn test_schedule_serde_shape() {
        let json = serde_json::to_string(&Schedule::IntervalMs(500)).unwrap();
        assert_eq!(json, r#"{"intervalMs":500}"#);
        let parsed: Schedule = serde_json::from_str(r#"{"cron":"* * * * *"}"#).unwrap();
        assert_eq!(parsed, Schedule::Cron("* * * * *".into()));
    }
}
