//! Next-report-time arithmetic.
//!
//! Advancement is anchored on the previous due time, never on wall-clock now,
//! so a late run does not shift the schedule.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use eres_core::error::{EresError, Result};

pub const DAY_SECS: i64 = 86_400;
pub const WEEK_SECS: i64 = 7 * DAY_SECS;
pub const FORTNIGHT_SECS: i64 = 14 * DAY_SECS;
/// Intervals at or above four weeks are treated as month-based.
pub const MONTHLY_THRESHOLD_SECS: i64 = 28 * DAY_SECS;

/// Next due time after a completed run: `previous + k·interval` for the
/// smallest `k >= 1` such that the result is strictly after `now`.
pub fn advance(previous: i64, interval: i64, now: i64) -> Result<i64> {
    if interval <= 0 {
        return Err(EresError::InvalidSchedule(format!(
            "interval must be positive, got {interval}"
        )));
    }
    let next = previous.saturating_add(interval);
    if next > now {
        return Ok(next);
    }
    let k = (now - previous) / interval + 1;
    Ok(previous.saturating_add(k.saturating_mul(interval)))
}

/// First due time for a newly created schedule.
///
/// `time` is "HH:MM" in UTC (empty = midnight). `day` is an ISO weekday
/// (1 = Monday) for weekly/fortnightly intervals and a day of month for
/// month-based ones; other intervals ignore it.
pub fn first_report_time(interval: i64, time: &str, day: u32, now: i64) -> Result<i64> {
    if interval <= 0 {
        return Err(EresError::InvalidSchedule(format!(
            "interval must be positive, got {interval}"
        )));
    }
    let at = parse_time_of_day(time)?;
    let now_dt = Utc
        .timestamp_opt(now, 0)
        .single()
        .ok_or_else(|| EresError::InvalidSchedule(format!("timestamp out of range: {now}")))?;

    let candidate = if interval == WEEK_SECS || interval == FORTNIGHT_SECS {
        next_weekday_at(now_dt, day, at)
    } else if interval >= MONTHLY_THRESHOLD_SECS {
        next_month_day_at(now_dt, day, at)
    } else {
        next_time_of_day(now_dt, at)
    };
    Ok(candidate.timestamp())
}

fn parse_time_of_day(time: &str) -> Result<NaiveTime> {
    let time = time.trim();
    if time.is_empty() {
        return Ok(NaiveTime::MIN);
    }
    NaiveTime::parse_from_str(time, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
        .map_err(|e| EresError::InvalidSchedule(format!("bad time of day '{time}': {e}")))
}

fn at_time(date: chrono::NaiveDate, at: NaiveTime) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(at))
}

fn next_time_of_day(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let today = at_time(now.date_naive(), at);
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

fn next_weekday_at(now: DateTime<Utc>, day: u32, at: NaiveTime) -> DateTime<Utc> {
    let target = day.clamp(1, 7);
    let current = now.weekday().number_from_monday();
    let ahead = (target + 7 - current) % 7;
    let candidate = at_time(now.date_naive(), at) + Duration::days(ahead as i64);
    if candidate > now {
        candidate
    } else {
        candidate + Duration::days(7)
    }
}

fn next_month_day_at(now: DateTime<Utc>, day: u32, at: NaiveTime) -> DateTime<Utc> {
    let (mut year, mut month) = (now.year(), now.month());
    // at most two iterations: this month, then next
    loop {
        let dom = day.clamp(1, days_in_month(year, month));
        if let Some(date) = chrono::NaiveDate::from_ymd_opt(year, month, dom) {
            let candidate = at_time(date, at);
            if candidate > now {
                return candidate;
            }
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    chrono::NaiveDate::from_ymd_opt(ny, nm, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap().timestamp()
    }

    #[test]
    fn test_advance_on_time() {
        assert_eq!(advance(1000, 86400, 2000).unwrap(), 87400);
    }

    #[test]
    fn test_advance_is_anchor_based_after_long_delay() {
        // three and a half intervals late: skip to the next slot on the original grid
        let prev = 1000;
        let now = prev + 3 * 86400 + 43200;
        let next = advance(prev, 86400, now).unwrap();
        assert_eq!(next, prev + 4 * 86400);
        assert_ne!(next, now + 86400);
        assert_eq!((next - prev) % 86400, 0);
    }

    #[test]
    fn test_advance_exact_boundary_moves_past_now() {
        // now lands exactly on a grid point: result must be strictly greater
        assert_eq!(advance(0, 100, 200).unwrap(), 300);
    }

    #[test]
    fn test_advance_rejects_bad_interval() {
        assert!(advance(1000, 0, 2000).is_err());
        assert!(advance(1000, -5, 2000).is_err());
    }

    #[test]
    fn test_first_daily_time() {
        let now = ts(2026, 2, 22, 10, 30);
        let next = first_report_time(DAY_SECS, "08:00", 1, now).unwrap();
        assert_eq!(next, ts(2026, 2, 23, 8, 0));

        let next = first_report_time(DAY_SECS, "11:15", 1, now).unwrap();
        assert_eq!(next, ts(2026, 2, 22, 11, 15));
    }

    #[test]
    fn test_first_weekly_weekday() {
        // 2026-02-22 is a Sunday; day 1 = Monday
        let now = ts(2026, 2, 22, 10, 0);
        let next = first_report_time(WEEK_SECS, "09:00", 1, now).unwrap();
        assert_eq!(next, ts(2026, 2, 23, 9, 0));

        // same weekday but time already passed: a week later
        let next = first_report_time(WEEK_SECS, "09:00", 7, now).unwrap();
        assert_eq!(next, ts(2026, 3, 1, 9, 0));
    }

    #[test]
    fn test_first_monthly_clamps_day() {
        let now = ts(2026, 2, 10, 0, 0);
        let next = first_report_time(30 * DAY_SECS, "06:00", 31, now).unwrap();
        assert_eq!(next, ts(2026, 2, 28, 6, 0));

        let now = ts(2026, 12, 20, 0, 0);
        let next = first_report_time(30 * DAY_SECS, "", 5, now).unwrap();
        assert_eq!(next, ts(2027, 1, 5, 0, 0));
    }

    #[test]
    fn test_first_bad_time() {
        assert!(first_report_time(DAY_SECS, "25:99", 1, 0).is_err());
    }
}
