//! Five-field cron expressions: `MIN HOUR DOM MON DOW`.
//!
//! Fields accept `*`, `N`, `a-b`, `*/n`, `a-b/n`, `N/n` and comma lists.
//! Months and weekdays also accept three-letter names; weekday `7` is
//! Sunday. When both day-of-month and day-of-week are restricted a day
//! matches if either does (classic cron). Macros: `@yearly`, `@annually`,
//! `@monthly`, `@weekly`, `@daily`, `@midnight`, `@hourly`.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};

use crate::core::TaskError;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Search horizon; an expression with no match inside it never fires.
const HORIZON_YEARS: i32 = 5;

/// Computes the next fire time of a cron expression.
pub trait NextOccurrence: Send + Sync + 'static {
    /// First fire time strictly after `after`.
    ///
    /// # Errors
    ///
    /// `TaskError::InvalidCron` if the expression does not parse or never fires.
    fn next_occurrence(&self, expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, TaskError>;
}

/// [`NextOccurrence`] backed by [`CronExpression`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCron;

impl NextOccurrence for StandardCron {
    fn next_occurrence(&self, expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, TaskError> {
        CronExpression::parse(expr)?
            .next_after(after)
            .ok_or_else(|| TaskError::InvalidCron(format!("`{expr}` never fires")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    any: bool,
}

impl Field {
    const fn contains(self, value: u32) -> bool {
        self.bits & (1 << value) != 0
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    minutes: Field,
    hours: Field,
    days_of_month: Field,
    months: Field,
    days_of_week: Field,
}

impl CronExpression {
    /// Parse a five-field expression or macro.
    ///
    /// # Errors
    ///
    /// `TaskError::InvalidCron` describing the offending field.
    pub fn parse(expr: &str) -> Result<Self, TaskError> {
        let expanded = match expr.trim() {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other => other,
        };
        let parts: Vec<&str> = expanded.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(TaskError::InvalidCron(format!(
                "`{expr}` needs 5 fields (MIN HOUR DOM MON DOW)"
            )));
        }
        let field = |index: usize, min: u32, max: u32, names: &[&str]| {
            parse_field(parts[index], min, max, names)
                .map_err(|reason| TaskError::InvalidCron(format!("`{expr}`: {reason}")))
        };
        let mut days_of_week = field(4, 0, 7, &DAY_NAMES)?;
        if days_of_week.contains(7) {
            days_of_week.bits = (days_of_week.bits | 1) & !(1 << 7);
        }
        Ok(Self {
            minutes: field(0, 0, 59, &[])?,
            hours: field(1, 0, 23, &[])?,
            days_of_month: field(2, 1, 31, &[])?,
            months: field(3, 1, 12, &MONTH_NAMES)?,
            days_of_week,
        })
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        match (self.days_of_month.any, self.days_of_week.any) {
            (false, false) => dom || dow,
            _ => dom && dow,
        }
    }

    /// First matching minute strictly after `after`, or `None` if nothing
    /// matches within five years.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.naive_utc().with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = start.with_year(start.year() + HORIZON_YEARS)?;
        let mut t = start;
        while t <= limit {
            if !self.months.contains(t.month()) {
                t = first_of_next_month(t)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = (t.date() + Duration::days(1)).and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t.and_utc());
        }
        None
    }
}

impl FromStr for CronExpression {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
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

fn parse_value(raw: &str, min: u32, max: u32, names: &[&str]) -> Result<u32, String> {
    let upper = raw.to_ascii_uppercase();
    let value = match names.iter().position(|name| *name == upper) {
        Some(pos) => u32::try_from(pos).map_err(|e| e.to_string())? + min,
        None => raw
            .parse()
            .map_err(|_| format!("`{raw}` is not a number"))?,
    };
    if value < min || value > max {
        return Err(format!("{value} outside {min}-{max}"));
    }
    Ok(value)
}

fn parse_field(raw: &str, min: u32, max: u32, names: &[&str]) -> Result<Field, String> {
    let mut bits = 0_u64;
    for part in raw.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("bad step `{step}`"))?;
                if step == 0 {
                    return Err("step must be positive".into());
                }
                (range, step)
            }
            None => (part, 1),
        };
        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, min, max, names)?, parse_value(b, min, max, names)?)
        } else {
            let start = parse_value(range, min, max, names)?;
            // `N/n` runs from N to the end of the range.
            (start, if part.contains('/') { max } else { start })
        };
        if lo > hi {
            return Err(format!("range {lo}-{hi} is reversed"));
        }
        for value in (lo..=hi).step_by(step as usize) {
            bits |= 1 << value;
        }
    }
    Ok(Field {
        bits,
        any: raw == "*",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_every_hour() {
        let next = StandardCron
            .next_occurrence("0 * * * *", at(2026, 2, 22, 10, 30))
            .unwrap();
        assert_eq!(next, at(2026, 2, 22, 11, 0));
    }

    #[test]
    fn test_result_is_strictly_after() {
        let now = at(2026, 2, 22, 8, 0);
        let next = StandardCron.next_occurrence("0 8 * * *", now).unwrap();
        assert_eq!(next, at(2026, 2, 23, 8, 0));
        let every = StandardCron.next_occurrence("* * * * *", now).unwrap();
        assert_eq!(every, at(2026, 2, 22, 8, 1));
    }

    #[test]
    fn test_steps_ranges_and_lists() {
        let cron = CronExpression::parse("*/15 9-17/4 * * *").unwrap();
        assert_eq!(cron.next_after(at(2026, 2, 22, 10, 2)), Some(at(2026, 2, 22, 13, 0)));
        let cron = CronExpression::parse("5,35 * * * *").unwrap();
        assert_eq!(cron.next_after(at(2026, 2, 22, 10, 5)), Some(at(2026, 2, 22, 10, 35)));
    }

    #[test]
    fn test_names_and_sunday_seven() {
        // 2026-03-01 is a Sunday.
        let cron = CronExpression::parse("0 12 * MAR 7").unwrap();
        assert_eq!(cron.next_after(at(2026, 1, 10, 0, 0)), Some(at(2026, 3, 1, 12, 0)));
        assert_eq!(cron, CronExpression::parse("0 12 * 3 sun").unwrap());
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // 2026-02-02 is a Monday; the 15th comes later.
        let cron = CronExpression::parse("0 0 15 * MON").unwrap();
        assert_eq!(cron.next_after(at(2026, 2, 1, 0, 0)), Some(at(2026, 2, 2, 0, 0)));
    }

    #[test]
    fn test_macros_and_year_rollover() {
        let next = StandardCron
            .next_occurrence("@yearly", at(2026, 6, 1, 0, 0))
            .unwrap();
        assert_eq!(next, at(2027, 1, 1, 0, 0));
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in ["bad", "60 * * * *", "* * * * * *", "*/0 * * * *", "5-1 * * * *"] {
            assert!(matches!(CronExpression::parse(expr), Err(TaskError::InvalidCron(_))), "{expr}");
        }
        assert!(StandardCron
            .next_occurrence("0 0 30 2 *", at(2026, 1, 1, 0, 0))
            .is_err());
    }
}
