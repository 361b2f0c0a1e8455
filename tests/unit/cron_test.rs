//! Tests for cron expressions

use chrono::{TimeZone, Utc};
use prometheus_background::core::{CronExpression, NextOccurrence, StandardCron};

#[test]
fn test_next_is_always_after_now() {
    let expressions = ["* * * * *", "*/7 * * * *", "0 0 * * 1-5", "30 4 1,15 * *", "@hourly"];
    let mut now = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap();
    for expr in expressions {
        for _ in 0..20 {
            let next = StandardCron.next_occurrence(expr, now).unwrap();
            assert!(next > now, "{expr}: {next} <= {now}");
            now = next;
        }
    }
}

#[test]
fn test_weekday_range() {
    // 2026-03-07 is a Saturday.
    let cron: CronExpression = "0 9 * * MON-FRI".parse().unwrap();
    let after = Utc.with_ymd_and_hms(2026, 3, 6, 10, 0, 0).unwrap();
    assert_eq!(
        cron.next_after(after),
        Some(Utc.with_ymd_and_hms(2026, 3, 9, 9, 0, 0).unwrap())
    );
}

#[test]
fn test_leap_day() {
    let cron = CronExpression::parse("0 0 29 2 *").unwrap();
    let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(
        cron.next_after(after),
        Some(Utc.with_ymd_and_hms(2028, 2, 29, 0, 0, 0).unwrap())
    );
}
